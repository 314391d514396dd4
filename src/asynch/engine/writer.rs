use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_io::{Error as _, ReadReady};
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::config::AtConfig;
use crate::error::Error;
use crate::fmt::Printable;

use super::AtEngine;

/// Command line terminator.
const TERMINATOR: &[u8] = b"\r";

impl<'d, M, IO, C, const N: usize> AtEngine<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    /// Write the command text, e.g. `AT+CGMI`, once the minimum gap since
    /// the previous response has passed.
    pub async fn cmd_start(&mut self, cmd: &str) {
        Timer::at(self.last_response_stop + C::SEND_DELAY).await;

        if self.last_error.is_some() {
            return;
        }

        self.write(cmd.as_bytes()).await;
        self.cmd_started = true;
    }

    pub async fn write_int(&mut self, param: i32) {
        if !self.check_cmd_send().await {
            return;
        }
        let mut s: String<12> = String::new();
        if write!(s, "{}", param).is_ok() {
            self.write(s.as_bytes()).await;
        }
    }

    pub async fn write_uint64(&mut self, param: u64) {
        if !self.check_cmd_send().await {
            return;
        }
        let mut s: String<20> = String::new();
        if write!(s, "{}", param).is_ok() {
            self.write(s.as_bytes()).await;
        }
    }

    /// Write a string sub-parameter, optionally wrapped in double quotes.
    pub async fn write_string(&mut self, param: &str, quote: bool) {
        if !self.check_cmd_send().await {
            return;
        }
        if quote && self.write(b"\"").await != 1 {
            return;
        }
        self.write(param.as_bytes()).await;
        if quote {
            self.write(b"\"").await;
        }
    }

    /// Terminate the command line.
    pub async fn cmd_stop(&mut self) {
        if self.last_error.is_some() {
            return;
        }
        self.write(TERMINATOR).await;
    }

    /// Terminate the command and consume a response carrying nothing but
    /// the final result.
    pub async fn cmd_stop_read_resp(&mut self) {
        self.cmd_stop().await;
        self.resp_start(None, false).await;
        self.resp_stop().await;
    }

    /// Write raw bytes, e.g. a payload after a `>` prompt.
    pub async fn write_bytes(&mut self, data: &[u8]) -> usize {
        if self.last_error.is_some() {
            return 0;
        }
        self.write(data).await
    }

    /// Emit the delimiter before every sub-parameter except the first.
    async fn check_cmd_send(&mut self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        if !self.use_delimiter {
            return true;
        }
        if self.cmd_started {
            self.cmd_started = false;
            return true;
        }
        let delimiter = [self.delimiter];
        self.write(&delimiter).await == 1
    }

    async fn write(&mut self, data: &[u8]) -> usize {
        match self.io.write_all(data).await {
            Ok(()) => {
                if self.debug {
                    trace!("AT tx: {}", Printable(data));
                }
                data.len()
            }
            Err(e) => {
                error!("AT write failed: {:?}", e.kind());
                self.set_error(Error::DeviceError);
                0
            }
        }
    }
}
