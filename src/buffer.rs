/// Bytes kept behind the read cursor when an exhausted buffer is recycled,
/// so a reader can still push back a partially matched stop tag.
pub(crate) const LOOKBEHIND: usize = 8;

/// Fixed-capacity receive buffer with explicit read and fill cursors.
///
/// Not a ring: `rewind` moves the unread bytes to the front, which is the
/// only compaction. Invariant: `read <= fill <= N`.
pub(crate) struct RxBuffer<const N: usize> {
    storage: [u8; N],
    read: usize,
    fill: usize,
}

impl<const N: usize> RxBuffer<N> {
    pub const fn new() -> Self {
        Self {
            storage: [0; N],
            read: 0,
            fill: 0,
        }
    }

    /// Bytes received but not consumed yet.
    pub fn unread(&self) -> &[u8] {
        &self.storage[self.read..self.fill]
    }

    pub fn len(&self) -> usize {
        self.fill - self.read
    }

    pub fn is_exhausted(&self) -> bool {
        self.read == self.fill
    }

    pub fn is_full(&self) -> bool {
        self.fill == N
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    /// Discard everything, consumed or not.
    pub fn reset(&mut self) {
        self.read = 0;
        self.fill = 0;
    }

    /// Move the unread bytes to the front of the buffer.
    pub fn rewind(&mut self) {
        if self.read > 0 {
            self.storage.copy_within(self.read..self.fill, 0);
            self.fill -= self.read;
            self.read = 0;
        }
    }

    /// Make room on an exhausted buffer, keeping up to `LOOKBEHIND`
    /// consumed bytes so `push_back` keeps working across a refill.
    pub fn recycle(&mut self) {
        debug_assert!(self.is_exhausted());
        let keep = self.read.min(LOOKBEHIND);
        self.storage.copy_within(self.read - keep..self.read, 0);
        self.read = keep;
        self.fill = keep;
    }

    /// Free space after the fill cursor.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.fill..]
    }

    /// Mark `n` bytes written through `spare_mut` as received and return them.
    pub fn commit(&mut self, n: usize) -> &[u8] {
        let start = self.fill;
        self.fill = (self.fill + n).min(N);
        &self.storage[start..self.fill]
    }

    pub fn next(&mut self) -> Option<u8> {
        let b = *self.storage[self.read..self.fill].first()?;
        self.read += 1;
        Some(b)
    }

    /// Consume `n` unread bytes.
    pub fn consume(&mut self, n: usize) {
        self.read = (self.read + n).min(self.fill);
    }

    /// Un-consume the last `n` bytes. Fails when they are no longer held.
    pub fn push_back(&mut self, n: usize) -> bool {
        if n > self.read {
            return false;
        }
        self.read -= n;
        true
    }

    pub fn starts_with(&self, token: &[u8]) -> bool {
        self.unread().starts_with(token)
    }

    /// Offset of `needle` within the unread bytes.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.unread()
            .windows(needle.len())
            .position(|window| window == needle)
    }
}
