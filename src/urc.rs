//! Unsolicited result code handlers.

use heapless::{String, Vec};

use crate::asynch::callback::{Callback, DeferQueue};
use crate::codec::{parse_int, parse_u64, Discard, FieldScanner, Flow, HexSink, Quotes, Sink, SliceSink};
use crate::config::{MAX_PREFIX_LEN, MAX_URC_HANDLERS};
use crate::error::Error;

/// Handler for one URC prefix.
///
/// Runs while the engine still owns the serial channel, so it must return
/// quickly and must not lock the engine. Longer work goes through
/// [`UrcParams::defer`].
///
/// The handler sees at most [`URC_LINE_LEN`](crate::config::URC_LINE_LEN)
/// bytes of the line following the prefix. Anything beyond that is
/// consumed and dropped with a warning.
pub trait UrcHandler: Sync {
    fn handle(&self, urc: &mut UrcParams<'_>);
}

impl<F> UrcHandler for F
where
    F: Fn(&mut UrcParams<'_>) + Sync,
{
    fn handle(&self, urc: &mut UrcParams<'_>) {
        self(urc)
    }
}

/// Parameters of a matched URC: the rest of its line after the prefix and
/// the optional leading space, without the line terminator.
pub struct UrcParams<'a> {
    line: &'a [u8],
    pos: usize,
    delimiter: u8,
    callbacks: &'a dyn DeferQueue,
}

impl<'a> UrcParams<'a> {
    pub fn new(line: &'a [u8], delimiter: u8, callbacks: &'a dyn DeferQueue) -> Self {
        Self {
            line,
            pos: 0,
            delimiter,
            callbacks,
        }
    }

    /// Unread part of the line.
    pub fn remaining(&self) -> &'a [u8] {
        &self.line[self.pos..]
    }

    /// Run `function(param)` on the callback task.
    pub fn defer(&self, function: Callback, param: i32) -> Result<(), Error> {
        self.callbacks.defer(function, param)
    }

    pub fn read_int(&mut self) -> Option<i32> {
        let mut buf = [0; 32];
        match self.read_string(&mut buf)? {
            0 => None,
            len => parse_int(&buf[..len]),
        }
    }

    pub fn read_uint64(&mut self) -> Option<u64> {
        let mut buf = [0; 32];
        match self.read_string(&mut buf)? {
            0 => None,
            len => parse_u64(&buf[..len]),
        }
    }

    /// Copy the next field, without quotes, into `buf`. Returns its length,
    /// truncated to `buf.len()`.
    pub fn read_string(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut sink = SliceSink::new(buf);
        self.scan(Some(self.delimiter), Quotes::Protect, &mut sink, false)?;
        Some(sink.len())
    }

    /// Copy exactly `buf.len()` bytes, or what is left of the line.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut sink = SliceSink::new(buf);
        self.scan(None, Quotes::Literal, &mut sink, true)?;
        Some(sink.len())
    }

    /// Decode a hex encoded field into `buf`.
    pub fn read_hex_string(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut sink = HexSink::new(buf);
        self.scan(Some(self.delimiter), Quotes::Elide, &mut sink, true)?;
        Some(sink.len())
    }

    pub fn skip_param(&mut self, count: usize) {
        for _ in 0..count {
            if self
                .scan(Some(self.delimiter), Quotes::Protect, &mut Discard::new(), false)
                .is_none()
            {
                break;
            }
        }
    }

    fn scan<S: Sink>(
        &mut self,
        delimiter: Option<u8>,
        quotes: Quotes,
        sink: &mut S,
        exact: bool,
    ) -> Option<Flow> {
        if self.pos >= self.line.len() {
            return None;
        }

        let mut scanner = FieldScanner::new(&[], delimiter, quotes);
        while let Some(&b) = self.line.get(self.pos) {
            if exact && sink.is_full() {
                break;
            }
            self.pos += 1;
            if let flow @ (Flow::Delimiter | Flow::StopTag) = scanner.feed(b, sink) {
                return Some(flow);
            }
        }
        Some(Flow::More)
    }
}

/// Registered handler.
pub struct UrcEntry {
    prefix: String<MAX_PREFIX_LEN>,
    handler: &'static dyn UrcHandler,
}

/// Prefix to handler bindings, consulted most recently registered first.
#[derive(Default)]
pub struct UrcRegistry {
    entries: Vec<UrcEntry, MAX_URC_HANDLERS>,
}

impl UrcRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` for `prefix`. Registering a prefix that already
    /// has a handler is a no-op.
    pub fn insert(&mut self, prefix: &str, handler: &'static dyn UrcHandler) -> Result<(), Error> {
        if prefix.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if self.contains(prefix) {
            debug!("URC handler for {} already registered", prefix);
            return Ok(());
        }

        let prefix = String::try_from(prefix).map_err(|_| Error::InvalidParameter)?;
        self.entries
            .push(UrcEntry { prefix, handler })
            .map_err(|_| Error::OutOfMemory)
    }

    pub fn remove(&mut self, prefix: &str) -> bool {
        match self.entries.iter().position(|e| e.prefix == prefix) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.entries.iter().any(|e| e.prefix == prefix)
    }

    /// Handler whose prefix starts `data`, with the prefix length.
    pub fn find(&self, data: &[u8]) -> Option<(usize, &'static dyn UrcHandler)> {
        self.entries
            .iter()
            .rev()
            .find(|e| data.starts_with(e.prefix.as_bytes()))
            .map(|e| (e.prefix.len(), e.handler))
    }

    /// Length of the longest registered prefix.
    pub fn longest(&self) -> usize {
        self.entries.iter().map(|e| e.prefix.len()).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
