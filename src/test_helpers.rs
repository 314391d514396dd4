//! Scripted serial link standing in for the modem in unit tests.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Poll, Waker};
use std::collections::VecDeque;
use std::vec::Vec;

use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};

#[derive(Default)]
struct Inner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
    fail_writes: bool,
    waker: Option<Waker>,
}

/// The far end of the serial port. Bytes fed here are read by the engine,
/// and every command terminator the engine writes releases the next
/// scripted reply.
#[derive(Default)]
pub struct MockLink {
    inner: RefCell<Inner>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `data` readable right away.
    pub fn feed(&self, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        inner.rx.extend(data);
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    /// Queue `data` to become readable once the next `\r` is written. An
    /// empty reply leaves the command unanswered.
    pub fn reply(&self, data: &[u8]) {
        self.inner.borrow_mut().replies.push_back(data.to_vec());
    }

    /// Everything written so far, as text.
    pub fn sent(&self) -> std::string::String {
        std::string::String::from_utf8_lossy(&self.inner.borrow().tx).into_owned()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    pub fn pending_rx(&self) -> usize {
        self.inner.borrow().rx.len()
    }

    pub fn port(&self) -> MockPort<'_> {
        MockPort { link: self }
    }
}

/// Engine side of a [`MockLink`].
pub struct MockPort<'a> {
    link: &'a MockLink,
}

impl ErrorType for MockPort<'_> {
    type Error = ErrorKind;
}

impl Read for MockPort<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        poll_fn(|cx| {
            let mut inner = self.link.inner.borrow_mut();
            if inner.rx.is_empty() {
                inner.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = buf.len().min(inner.rx.len());
            for (dst, src) in buf.iter_mut().zip(inner.rx.drain(..n)) {
                *dst = src;
            }
            Poll::Ready(Ok(n))
        })
        .await
    }
}

impl Write for MockPort<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut inner = self.link.inner.borrow_mut();
        if inner.fail_writes {
            return Err(ErrorKind::BrokenPipe);
        }
        inner.tx.extend_from_slice(buf);
        for _ in buf.iter().filter(|&&b| b == b'\r') {
            if let Some(reply) = inner.replies.pop_front() {
                inner.rx.extend(reply);
            }
        }
        Ok(buf.len())
    }
}

impl ReadReady for MockPort<'_> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.link.inner.borrow().rx.is_empty())
    }
}
