//! Field scanning and number parsing shared by the engine readers and
//! [`UrcParams`](crate::urc::UrcParams).
//!
//! A single [`FieldScanner`] applies the delimiter, quote and stop tag rules
//! one byte at a time and forwards field content to a [`Sink`].

use heapless::Vec;

use crate::config::MAX_TAG_LEN;

/// How double quotes inside a field are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quotes {
    /// Quotes are ordinary data.
    Literal,
    /// Quotes are dropped from the output.
    Elide,
    /// Quotes are dropped, and delimiters and stop tags between them are
    /// treated as data.
    Protect,
}

/// Outcome of feeding one byte to a [`FieldScanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    More,
    Delimiter,
    StopTag,
}

/// Destination of field content.
pub trait Sink {
    fn push(&mut self, b: u8);

    /// No more content fits.
    fn is_full(&self) -> bool;

    /// Bytes offered after the sink was full.
    fn overflow(&self) -> usize;
}

/// Copies into a caller supplied slice, counting whatever did not fit.
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    len: usize,
    overflow: usize,
}

impl<'a> SliceSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            overflow: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Sink for SliceSink<'_> {
    fn push(&mut self, b: u8) {
        match self.buf.get_mut(self.len) {
            Some(slot) => {
                *slot = b;
                self.len += 1;
            }
            None => self.overflow += 1,
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    fn overflow(&self) -> usize {
        self.overflow
    }
}

/// Decodes pairs of hex digits into bytes. Non-hex characters are skipped.
pub struct HexSink<'a> {
    buf: &'a mut [u8],
    len: usize,
    high: Option<u8>,
    overflow: usize,
}

impl<'a> HexSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            high: None,
            overflow: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Sink for HexSink<'_> {
    fn push(&mut self, b: u8) {
        if self.is_full() {
            self.overflow += 1;
            return;
        }
        let Some(nibble) = (b as char).to_digit(16) else {
            return;
        };
        match self.high.take() {
            None => self.high = Some(nibble as u8),
            Some(high) => {
                self.buf[self.len] = (high << 4) | nibble as u8;
                self.len += 1;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    fn overflow(&self) -> usize {
        self.overflow
    }
}

/// Throws content away, optionally after counting up to a limit.
pub struct Discard {
    taken: usize,
    limit: Option<usize>,
    overflow: usize,
}

impl Discard {
    pub fn new() -> Self {
        Self {
            taken: 0,
            limit: None,
            overflow: 0,
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }
}

impl Default for Discard {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Discard {
    fn push(&mut self, _b: u8) {
        if self.is_full() {
            self.overflow += 1;
        } else {
            self.taken += 1;
        }
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.taken >= limit)
    }

    fn overflow(&self) -> usize {
        self.overflow
    }
}

/// Splits a byte stream into fields.
///
/// A field ends at the delimiter (outside protected quotes) or at the stop
/// tag, which is withheld from the sink. Bytes that start to match the stop
/// tag are held back until the match either completes or fails; on failure
/// they are released to the sink and the current byte is tried against the
/// start of the tag again.
#[derive(Debug, Clone)]
pub struct FieldScanner {
    tag: Vec<u8, MAX_TAG_LEN>,
    delimiter: Option<u8>,
    quotes: Quotes,
    matched: usize,
    in_quotes: bool,
}

impl FieldScanner {
    pub fn new(tag: &[u8], delimiter: Option<u8>, quotes: Quotes) -> Self {
        Self {
            tag: Vec::from_slice(tag).unwrap_or_default(),
            delimiter,
            quotes,
            matched: 0,
            in_quotes: false,
        }
    }

    /// Number of bytes currently held as a partial stop tag match.
    pub fn held(&self) -> usize {
        self.matched
    }

    pub fn feed<S: Sink>(&mut self, b: u8, sink: &mut S) -> Flow {
        if b == b'"' && self.quotes != Quotes::Literal {
            self.release(sink);
            if self.quotes == Quotes::Protect {
                self.in_quotes = !self.in_quotes;
            }
            return Flow::More;
        }

        if self.in_quotes {
            sink.push(b);
            return Flow::More;
        }

        if Some(b) == self.delimiter {
            self.release(sink);
            return Flow::Delimiter;
        }

        if self.matched > 0 && self.tag.get(self.matched) != Some(&b) {
            self.release(sink);
        }

        if self.tag.get(self.matched) == Some(&b) {
            self.matched += 1;
            if self.matched == self.tag.len() {
                self.matched = 0;
                return Flow::StopTag;
            }
        } else {
            sink.push(b);
        }

        Flow::More
    }

    /// Hand held bytes to the sink.
    fn release<S: Sink>(&mut self, sink: &mut S) {
        for &b in &self.tag[..self.matched] {
            sink.push(b);
        }
        self.matched = 0;
    }
}

/// Parse a decimal integer: optional leading spaces, an optional sign and
/// at least one digit. Parsing stops at the first non-digit.
pub fn parse_int(s: &[u8]) -> Option<i32> {
    let s = match s.iter().position(|b| *b != b' ') {
        Some(start) => &s[start..],
        None => return None,
    };
    let (negative, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    let mut seen = false;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        seen = true;
    }
    if !seen {
        return None;
    }

    i32::try_from(if negative { -value } else { value }).ok()
}

/// Parse the first run of decimal digits, ignoring anything before it.
pub fn parse_u64(s: &[u8]) -> Option<u64> {
    let start = s.iter().position(u8::is_ascii_digit)?;
    s[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .try_fold(0u64, |acc, &b| {
            acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
        })
}
