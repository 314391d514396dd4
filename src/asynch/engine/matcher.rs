use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::codec::{Discard, FieldScanner, Flow, Quotes, SliceSink, Sink};
use crate::config::{AtConfig, URC_LINE_LEN};
use crate::error::{to_3gpp, DeviceError, DeviceErrorType, Error};
use crate::fmt::Printable;
use crate::scope::{Scope, ScopeEvent, CRLF, OK};
use crate::urc::UrcParams;

use super::AtEngine;

const CME_ERROR: &[u8] = b"+CME ERROR:";
const CMS_ERROR: &[u8] = b"+CMS ERROR:";
const ERROR: &[u8] = b"ERROR\r\n";

impl<'d, M, IO, C, const N: usize> AtEngine<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    /// Start reading a response. With a `prefix`, skip lines until it is
    /// found, then enter the information scope unless `stop` is set.
    /// Without one, stop at the first line that is not a final result or
    /// a URC.
    pub async fn resp_start(&mut self, prefix: Option<&str>, stop: bool) {
        if self.last_error.is_some() {
            return;
        }

        self.transition(ScopeEvent::End).await;
        self.buf.rewind();
        self.fill(false).await;

        self.info_prefix.clear();
        if let Some(prefix) = prefix {
            match String::try_from(prefix) {
                Ok(prefix) => self.info_prefix = prefix,
                Err(_) => {
                    self.set_error(Error::InvalidParameter);
                    return;
                }
            }
        }

        self.transition(ScopeEvent::Begin).await;
        self.resp(prefix.is_some(), true, true).await;

        if !stop && prefix.is_some() && self.prefix_matched {
            self.transition(ScopeEvent::Information).await;
        }
    }

    /// Move to the next information line carrying the prefix given to
    /// `resp_start`. Returns false once the final result is reached.
    pub async fn info_resp(&mut self) -> bool {
        if self.last_error.is_some() || self.tags.resp().found {
            return false;
        }

        if self.prefix_matched {
            self.prefix_matched = false;
            return true;
        }

        if self.scope == Scope::Info {
            self.information_stop().await;
        }

        self.resp(true, true, true).await;

        if self.prefix_matched {
            self.transition(ScopeEvent::Information).await;
            self.prefix_matched = false;
            return true;
        }

        self.transition(ScopeEvent::InformationEnd).await;
        false
    }

    /// Enter the next element introduced by `start_tag`, closing the
    /// current one first.
    pub async fn info_elem(&mut self, start_tag: u8) -> bool {
        if self.last_error.is_some() {
            return false;
        }

        if self.scope == Scope::Elem {
            self.element_stop().await;
        }

        self.consume_char(self.delimiter).await;

        if self.consume_char(start_tag).await {
            self.prefix_matched = true;
            self.transition(ScopeEvent::Element).await;
            return true;
        }

        self.transition(ScopeEvent::Information).await;
        false
    }

    /// Consume up to and including the stop tag of the current scope.
    pub async fn consume_to_stop_tag(&mut self) -> bool {
        match self.tags.get(self.scope) {
            Some(tag) if !tag.found && !tag.seq().is_empty() => {}
            _ => return true,
        }
        if self.error_found {
            return true;
        }

        let tag = self.active_tag();

        if self.consume_to_tag(&tag).await {
            self.mark_found();
            return true;
        }

        warn!("Stop tag not found");
        self.set_error(Error::DeviceError);
        false
    }

    /// Finish the response: close any open element and information line,
    /// then consume to the final result. Stop tags and the expected prefix
    /// revert to their defaults.
    pub async fn resp_stop(&mut self) {
        if self.scope == Scope::Elem {
            self.element_stop().await;
            self.transition(ScopeEvent::Information).await;
        }

        if self.scope == Scope::Info {
            self.information_stop().await;
        }

        if self.scope == Scope::Resp && self.tags.resp().seq() == OK {
            self.skip_to_final().await;
        }

        if self.consume_to_stop_tag().await {
            self.transition(ScopeEvent::End).await;
        }

        self.tags = Default::default();
        self.info_prefix.clear();
        self.last_response_stop = Instant::now();
    }

    /// Walk the remaining lines up to the final result, dispatching URCs
    /// and dropping anything else.
    async fn skip_to_final(&mut self) {
        while self.last_error.is_none() && !self.error_found && !self.tags.resp().found {
            self.resp(false, true, true).await;
            if self.tags.resp().found || self.error_found || self.last_error.is_some() {
                break;
            }
            if !self.consume_to_tag(CRLF).await {
                break;
            }
        }
    }

    /// Wait for a single byte such as the `>` prompt. URCs and error
    /// responses arriving meanwhile are handled.
    pub async fn wait_char(&mut self, expected: u8) -> bool {
        self.error_found = false;

        while self.last_error.is_none() {
            let c = self.get_char().await;
            self.match_urc().await;
            if self.match_error().await {
                self.error_found = true;
                return false;
            }
            if c == Some(expected) {
                return true;
            }
        }

        false
    }

    /// Whether the last matcher run dispatched a URC.
    pub fn urc_matched(&self) -> bool {
        self.urc_matched
    }

    /// Whether the last matcher run stopped on an error response.
    pub fn error_found(&self) -> bool {
        self.error_found
    }

    /// Drain unsolicited data between cycles: dispatch URCs and drop
    /// everything else line by line.
    pub(crate) async fn service_oob(&mut self, announced: usize) {
        if announced == 0 && !self.has_pending_input() {
            return;
        }

        if self.debug {
            debug!("OoB readable {}, already buffered {}", announced, self.buf.len());
        }

        self.oob = true;
        self.clear_error();
        self.start = Instant::now();
        self.transition(ScopeEvent::End).await;

        loop {
            if self.match_urc().await {
                if !self.has_pending_input() {
                    break;
                }
            } else if self.buf.find(CRLF).is_some() {
                self.consume_to_tag(CRLF).await;
            } else {
                if !self.fill(true).await {
                    self.buf.reset();
                    break;
                }
                self.start = Instant::now();
            }
        }

        self.oob = false;
        if self.debug {
            debug!("OoB done");
        }
    }

    /// Match the buffered stream against final results, the expected
    /// prefix and URCs, reading until one of them decides the outcome.
    async fn resp(&mut self, with_prefix: bool, crlf_first: bool, check_urc: bool) {
        self.prefix_matched = false;
        self.urc_matched = false;
        self.error_found = false;

        let prefix = if with_prefix && !self.info_prefix.is_empty() {
            Some(self.info_prefix.clone())
        } else {
            None
        };

        while self.last_error.is_none() {
            if crlf_first {
                self.match_token(CRLF);
            }

            if self.match_token(OK) {
                self.transition(ScopeEvent::Final).await;
                self.tags.resp_mut().found = true;
                return;
            }

            if self.match_error().await {
                self.error_found = true;
                return;
            }

            if let Some(prefix) = &prefix {
                if self.match_token(prefix.as_bytes()) {
                    self.prefix_matched = true;
                    return;
                }
            }

            if check_urc && self.match_urc().await {
                self.urc_matched = true;
                self.clear_error();
                continue;
            }

            if self.buf.find(CRLF).is_some() {
                // Without a prefix the caller reads the line itself
                if prefix.is_none() {
                    return;
                }
                self.consume_to_tag(CRLF).await;
            } else {
                if prefix.is_none() && self.buf.len() >= self.max_resp_len {
                    return;
                }
                if !self.fill(true).await {
                    self.set_error(Error::DeviceError);
                }
            }
        }
    }

    /// Consume `token` if the unread bytes start with it.
    fn match_token(&mut self, token: &[u8]) -> bool {
        self.buf.rewind();
        if self.buf.starts_with(token) {
            self.buf.consume(token.len());
            return true;
        }
        false
    }

    async fn match_error(&mut self) -> bool {
        let err_type = if self.match_token(CME_ERROR) {
            DeviceErrorType::Cme
        } else if self.match_token(CMS_ERROR) {
            DeviceErrorType::Cms
        } else if self.match_token(ERROR) {
            DeviceErrorType::NoError
        } else {
            return false;
        };

        if err_type != DeviceErrorType::NoError {
            self.transition(ScopeEvent::Information).await;
            match self.read_int().await {
                Some(code) => {
                    if self.last_3gpp_error == 0 {
                        if let Some(mapped) = to_3gpp(code, err_type) {
                            debug!("3GPP error code {}", mapped);
                            self.last_3gpp_error = mapped;
                        }
                    }
                    self.device_error = DeviceError { err_type, code };
                    info!("AT error code {}", code);
                }
                None => warn!("Failed to read AT error code"),
            }
        }

        self.set_error(Error::DeviceError);
        true
    }

    /// Dispatch a URC at the front of the buffer to its handler.
    async fn match_urc(&mut self) -> bool {
        self.buf.rewind();
        let Some((prefix_len, handler)) = self.urcs.find(self.buf.unread()) else {
            return false;
        };
        self.buf.consume(prefix_len);

        let parent = self.scope;
        let parent_found = self.tags.get(parent).map(|tag| tag.found);
        let started = Instant::now();

        self.transition(ScopeEvent::Information).await;

        let mut line = [0; URC_LINE_LEN];
        let len = self.capture_line(&mut line).await;
        trace!("URC {}", Printable(&line[..len]));

        handler.handle(&mut UrcParams::new(&line[..len], self.delimiter, self.callbacks));
        self.information_stop().await;

        self.scope = parent;
        if let (Some(tag), Some(found)) = (self.tags.get_mut(parent), parent_found) {
            tag.found = found;
        }
        self.start += started.elapsed();
        true
    }

    /// Copy the rest of the current information line into `line`.
    async fn capture_line(&mut self, line: &mut [u8]) -> usize {
        let tag = self.active_tag();
        if tag.is_empty() {
            return 0;
        }

        let mut scanner = FieldScanner::new(&tag, None, Quotes::Literal);
        let mut sink = SliceSink::new(line);
        if self.scan(&mut scanner, &mut sink, false).await.is_some() && sink.overflow() > 0 {
            warn!("URC line truncated, {} bytes dropped", sink.overflow());
        }
        sink.len()
    }

    /// Consume up to and including `tag`.
    pub(super) async fn consume_to_tag(&mut self, tag: &[u8]) -> bool {
        let mut scanner = FieldScanner::new(tag, None, Quotes::Literal);
        let mut sink = Discard::new();
        loop {
            let Some(b) = self.get_char().await else {
                return false;
            };
            if scanner.feed(b, &mut sink) == Flow::StopTag {
                return true;
            }
        }
    }

    async fn information_stop(&mut self) {
        if self.consume_to_stop_tag().await {
            self.transition(ScopeEvent::InformationEnd).await;
        }
    }

    async fn element_stop(&mut self) {
        if self.consume_to_stop_tag().await {
            self.transition(ScopeEvent::ElementEnd).await;
        }
    }

    /// Apply `event` to the scope. Entering a scope clears its stop tag;
    /// entering an information line skips one leading space.
    pub(super) async fn transition(&mut self, event: ScopeEvent) {
        let next = self.scope.next(event);
        if next == self.scope {
            return;
        }

        self.scope = next;
        if let Some(tag) = self.tags.get_mut(next) {
            tag.found = false;
        }
        if next == Scope::Info && self.last_error.is_none() {
            self.consume_char(b' ').await;
        }
    }
}
