//! The AT command/response engine.
//!
//! Every primitive follows the sticky error convention: the first failure
//! of a cycle is recorded and later calls in the same cycle become no-ops
//! returning a failure value, until [`AtEngine::clear_error`] or a new
//! `lock`.

mod matcher;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

use core::marker::PhantomData;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{with_timeout, Duration, Instant};
use embedded_io::{Error as _, ReadReady};
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::buffer::RxBuffer;
use crate::config::{AtConfig, MAX_PREFIX_LEN};
use crate::error::{DeviceError, Error};
use crate::fmt::Printable;
use crate::scope::{Scope, Tags};
use crate::urc::{UrcHandler, UrcRegistry};

use super::callback::{Callback, CallbackQueue, DeferQueue};

/// Parser state for one serial channel. Reached through a
/// [`Session`](super::Session) while the channel is locked.
pub struct AtEngine<'d, M: RawMutex, IO, C, const N: usize> {
    io: IO,
    callbacks: &'d CallbackQueue<M>,
    _config: PhantomData<C>,

    initialised: bool,
    debug: bool,
    /// Set while the URC runner drains data between cycles.
    oob: bool,

    buf: RxBuffer<N>,
    scope: Scope,
    tags: Tags,
    delimiter: u8,
    use_delimiter: bool,
    cmd_started: bool,
    info_prefix: String<MAX_PREFIX_LEN>,
    prefix_matched: bool,
    urc_matched: bool,
    error_found: bool,
    max_resp_len: usize,
    urcs: UrcRegistry,

    last_error: Option<Error>,
    device_error: DeviceError,
    last_3gpp_error: i32,

    timeout: Duration,
    previous_timeout: Duration,
    consecutive_timeouts: i32,
    timeout_callback: Option<Callback>,
    start: Instant,
    last_response_stop: Instant,
}

impl<'d, M, IO, C, const N: usize> AtEngine<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    pub(crate) fn new(io: IO, callbacks: &'d CallbackQueue<M>) -> Self {
        Self {
            io,
            callbacks,
            _config: PhantomData,
            initialised: true,
            debug: C::DEBUG,
            oob: false,
            buf: RxBuffer::new(),
            scope: Scope::None,
            tags: Tags::default(),
            delimiter: C::DEFAULT_DELIMITER,
            use_delimiter: true,
            cmd_started: false,
            info_prefix: String::new(),
            prefix_matched: false,
            urc_matched: false,
            error_found: false,
            max_resp_len: C::MAX_RESP_LENGTH,
            urcs: UrcRegistry::new(),
            last_error: None,
            device_error: DeviceError::default(),
            last_3gpp_error: 0,
            timeout: C::DEFAULT_TIMEOUT,
            previous_timeout: C::DEFAULT_TIMEOUT,
            consecutive_timeouts: 0,
            timeout_callback: None,
            start: Instant::from_ticks(0),
            last_response_stop: Instant::from_ticks(0),
        }
    }

    pub(crate) fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Reset per-cycle state when the channel is locked.
    pub(crate) fn begin_cycle(&mut self) {
        self.clear_error();
        self.start = Instant::now();
    }

    pub(crate) fn shutdown(&mut self) {
        self.initialised = false;
        self.urcs.clear();
        self.timeout_callback = None;
        self.buf.reset();
        self.scope = Scope::None;
    }

    /// Bytes are buffered or waiting on the serial port.
    pub(crate) fn has_pending_input(&mut self) -> bool {
        !self.buf.is_exhausted() || matches!(self.io.read_ready(), Ok(true))
    }

    pub(crate) fn register_urc(
        &mut self,
        prefix: &str,
        handler: &'static dyn UrcHandler,
    ) -> Result<(), Error> {
        self.urcs.insert(prefix, handler)?;
        self.max_resp_len = self.max_resp_len.max(self.urcs.longest());
        Ok(())
    }

    pub(crate) fn unregister_urc(&mut self, prefix: &str) {
        if !self.urcs.remove(prefix) {
            debug!("No URC handler for {}", prefix);
        }
    }

    pub(crate) fn set_timeout_callback(&mut self, callback: Option<Callback>) {
        self.timeout_callback = callback;
    }

    /// Current parsing scope.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Enable or disable tracing of raw serial traffic.
    pub fn set_debug(&mut self, on: bool) {
        self.debug = on;
    }

    /// The first error raised since the cycle started or the error was
    /// last cleared.
    pub fn last_error(&self) -> Result<(), Error> {
        match self.last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Code reported by the last `+CME ERROR` / `+CMS ERROR`.
    pub fn last_device_error(&self) -> DeviceError {
        self.device_error
    }

    /// 3GPP equivalent of the first mappable device error, 0 if none.
    pub fn last_3gpp_error(&self) -> i32 {
        self.last_3gpp_error
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.device_error = DeviceError::default();
        self.last_3gpp_error = 0;
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        debug!("AT error {:?}", error);
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    /// Change the cycle timeout. With `make_default` the change is
    /// permanent, otherwise [`restore_at_timeout`](Self::restore_at_timeout)
    /// reverts it.
    pub fn set_at_timeout(&mut self, timeout: Duration, make_default: bool) {
        if make_default {
            self.previous_timeout = timeout;
            self.timeout = timeout;
        } else if timeout != self.timeout {
            self.previous_timeout = self.timeout;
            self.timeout = timeout;
        }
    }

    pub fn restore_at_timeout(&mut self) {
        self.timeout = self.previous_timeout;
    }

    pub fn at_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    pub fn set_default_delimiter(&mut self) {
        self.delimiter = C::DEFAULT_DELIMITER;
    }

    /// Whether the writers emit the delimiter between sub-parameters.
    pub fn use_delimiter(&mut self, use_delimiter: bool) {
        self.use_delimiter = use_delimiter;
    }

    /// Replace the stop tag of the current scope. `None` disables stop tag
    /// matching for the scope. All tags revert at `resp_stop`.
    pub fn set_stop_tag(&mut self, seq: Option<&str>) {
        if self.last_error.is_some() {
            return;
        }
        let Some(tag) = self.tags.get_mut(self.scope) else {
            return;
        };
        if tag.set(seq.map(str::as_bytes)).is_err() {
            self.set_error(Error::InvalidParameter);
        }
    }

    /// Discard everything buffered or currently readable.
    pub async fn flush(&mut self) {
        debug!("AT flush");
        self.buf.reset();
        while self.fill(false).await {
            self.buf.reset();
        }
    }

    /// Read more bytes into the buffer. With `wait`, block until the cycle
    /// deadline; otherwise only read what the port already holds.
    pub(crate) async fn fill(&mut self, wait: bool) -> bool {
        if self.buf.is_full() {
            if self.buf.read_pos() > 0 {
                self.buf.rewind();
            } else {
                warn!("AT receive buffer overrun, discarding {} bytes", N);
                self.buf.reset();
            }
        }

        let timeout = if self.oob { C::URC_TIMEOUT } else { self.timeout };
        let deadline = self.start + timeout;
        let now = Instant::now();

        if !wait || now >= deadline {
            if !matches!(self.io.read_ready(), Ok(true)) {
                return false;
            }
            return self.read_available().await;
        }

        with_timeout(deadline - now, self.read_available())
            .await
            .unwrap_or(false)
    }

    async fn read_available(&mut self) -> bool {
        match self.io.read(self.buf.spare_mut()).await {
            Ok(0) => false,
            Ok(n) => {
                let received = self.buf.commit(n);
                if self.debug {
                    trace!("AT rx: {}", Printable(received));
                }
                true
            }
            Err(e) => {
                warn!("AT read failed: {:?}", e.kind());
                false
            }
        }
    }

    /// Next byte of the stream. On timeout, raises `DeviceError` and tells
    /// the timeout callback how many timeouts happened in a row.
    pub(crate) async fn get_char(&mut self) -> Option<u8> {
        if self.buf.is_exhausted() {
            self.buf.recycle();
            if !self.fill(true).await {
                self.consecutive_timeouts += 1;
                warn!("AT timeout ({} in a row)", self.consecutive_timeouts);
                if let Some(callback) = self.timeout_callback {
                    self.callbacks.defer(callback, self.consecutive_timeouts).ok();
                }
                self.set_error(Error::DeviceError);
                return None;
            }
            self.consecutive_timeouts = 0;
        }
        self.buf.next()
    }

    /// Consume `c` if it is the next byte.
    pub(crate) async fn consume_char(&mut self, c: u8) -> bool {
        match self.get_char().await {
            Some(b) if b == c => true,
            Some(_) => {
                self.buf.push_back(1);
                false
            }
            None => false,
        }
    }
}
