use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::codec::{parse_int, parse_u64, Discard, FieldScanner, Flow, HexSink, Quotes, Sink, SliceSink};
use crate::config::{AtConfig, MAX_TAG_LEN};

use super::AtEngine;

impl<'d, M, IO, C, const N: usize> AtEngine<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    /// Read a decimal integer parameter.
    pub async fn read_int(&mut self) -> Option<i32> {
        if !self.can_read(false) {
            return None;
        }
        let mut buf = [0; 32];
        match self.read_string(&mut buf, false).await? {
            0 => None,
            len => parse_int(&buf[..len]),
        }
    }

    /// Read an unsigned 64 bit parameter. Leading non-digits are skipped.
    pub async fn read_uint64(&mut self) -> Option<u64> {
        if !self.can_read(false) {
            return None;
        }
        let mut buf = [0; 32];
        match self.read_string(&mut buf, false).await? {
            0 => None,
            len => parse_u64(&buf[..len]),
        }
    }

    /// Read the next parameter into `buf`, dropping quotes, and return its
    /// length. A parameter longer than `buf` is truncated but consumed up
    /// to its delimiter or the stop tag. With `read_even_stop_tag`, reading
    /// continues after the stop tag was found, for information responses
    /// spanning several lines.
    pub async fn read_string(&mut self, buf: &mut [u8], read_even_stop_tag: bool) -> Option<usize> {
        if !self.can_read(read_even_stop_tag) {
            return None;
        }

        let mut scanner = FieldScanner::new(&self.active_tag(), Some(self.delimiter), Quotes::Protect);
        let mut sink = SliceSink::new(buf);
        self.scan(&mut scanner, &mut sink, false).await?;
        Some(sink.len())
    }

    /// Read `buf.len()` raw bytes. Ends early, without the tag, if the
    /// stop tag shows up first.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.last_error.is_some() || self.active_found() {
            return None;
        }

        let mut scanner = FieldScanner::new(&self.active_tag(), None, Quotes::Literal);
        let mut sink = SliceSink::new(buf);
        self.scan(&mut scanner, &mut sink, true).await?;
        Some(sink.len())
    }

    /// Read a hex encoded parameter, optionally quoted, decoding up to
    /// `buf.len()` bytes. Once `buf` is full the rest of the parameter,
    /// closing quote included, is consumed up to its delimiter or the stop
    /// tag.
    pub async fn read_hex_string(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.can_read(false) {
            return None;
        }

        self.consume_char(b'"').await;
        if self.last_error.is_some() {
            return None;
        }

        let mut scanner = FieldScanner::new(&self.active_tag(), Some(self.delimiter), Quotes::Elide);
        let mut sink = HexSink::new(buf);
        if self.scan(&mut scanner, &mut sink, true).await? == Flow::More {
            let mut rest = FieldScanner::new(&self.active_tag(), Some(self.delimiter), Quotes::Elide);
            self.scan(&mut rest, &mut Discard::new(), false).await?;
        }
        Some(sink.len())
    }

    /// Skip `count` parameters.
    pub async fn skip_param(&mut self, count: usize) {
        if !self.can_read(false) {
            return;
        }

        for _ in 0..count {
            if self.active_found() {
                break;
            }
            let mut scanner = FieldScanner::new(&self.active_tag(), Some(self.delimiter), Quotes::Protect);
            if self.scan(&mut scanner, &mut Discard::new(), false).await.is_none() {
                return;
            }
        }
    }

    /// Skip `count` runs of `len` bytes, stopping at the stop tag.
    pub async fn skip_len(&mut self, len: usize, count: usize) {
        if !self.can_read(false) {
            return;
        }

        for _ in 0..count {
            if self.active_found() {
                break;
            }
            let mut scanner = FieldScanner::new(&self.active_tag(), None, Quotes::Literal);
            if self.scan(&mut scanner, &mut Discard::with_limit(len), true).await.is_none() {
                return;
            }
        }
    }

    /// Feed the stream through `scanner` until the field ends. In `exact`
    /// mode reading also ends once the sink is full, and bytes read past
    /// what the sink accepted are returned to the buffer.
    pub(super) async fn scan<S: Sink>(
        &mut self,
        scanner: &mut FieldScanner,
        sink: &mut S,
        exact: bool,
    ) -> Option<Flow> {
        loop {
            if exact && sink.is_full() {
                let surplus = sink.overflow() + scanner.held();
                if !self.buf.push_back(surplus) {
                    warn!("Lost {} bytes after a bounded read", surplus);
                }
                return Some(Flow::More);
            }

            let b = self.get_char().await?;
            match scanner.feed(b, sink) {
                Flow::More => {}
                Flow::StopTag => {
                    self.mark_found();
                    return Some(Flow::StopTag);
                }
                Flow::Delimiter => return Some(Flow::Delimiter),
            }
        }
    }

    /// Reading is allowed: no sticky error, a scope is open and its stop
    /// tag has not been consumed yet (unless `even_found`).
    fn can_read(&self, even_found: bool) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        match self.tags.get(self.scope) {
            Some(tag) => even_found || !tag.found,
            None => false,
        }
    }

    /// Stop tag sequence of the current scope, empty outside any scope.
    pub(super) fn active_tag(&self) -> Vec<u8, MAX_TAG_LEN> {
        self.tags
            .get(self.scope)
            .and_then(|tag| Vec::from_slice(tag.seq()).ok())
            .unwrap_or_default()
    }

    fn active_found(&self) -> bool {
        self.tags.get(self.scope).is_some_and(|tag| tag.found)
    }

    pub(super) fn mark_found(&mut self) {
        if let Some(tag) = self.tags.get_mut(self.scope) {
            tag.found = true;
        }
    }
}
