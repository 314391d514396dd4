pub mod callback;
pub mod client;
mod engine;
pub mod runner;

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use crate::config::{AtConfig, DEFAULT_RX_BUF_LEN};

pub use callback::{Callback, CallbackQueue, CallbackRunner, DeferQueue};
pub use client::{Client, Session};
pub use engine::AtEngine;
pub use runner::UrcRunner;

/// Start/stop handshake with one background task.
pub(crate) struct TaskControl<M: RawMutex> {
    pub(crate) stop: Signal<M, ()>,
    pub(crate) done: Signal<M, ()>,
    running: AtomicBool,
}

impl<M: RawMutex> TaskControl<M> {
    const fn new() -> Self {
        Self {
            stop: Signal::new(),
            done: Signal::new(),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn started(&self) {
        self.done.reset();
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn finished(&self) {
        self.running.store(false, Ordering::Release);
        self.done.signal(());
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the task to exit and wait up to `timeout` for it. A task that
    /// was never started counts as stopped.
    pub(crate) async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop.signal(());
        if !self.is_running() {
            return true;
        }
        with_timeout(timeout, self.done.wait()).await.is_ok()
    }
}

/// Queues and signals shared by the engine and its background tasks.
pub struct Resources<M: RawMutex> {
    pub(crate) callbacks: CallbackQueue<M>,
    pub(crate) data_ready: Signal<M, usize>,
    pub(crate) urc_task: TaskControl<M>,
    pub(crate) callback_task: TaskControl<M>,
}

impl<M: RawMutex> Default for Resources<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Resources<M> {
    pub const fn new() -> Self {
        Self {
            callbacks: CallbackQueue::new(),
            data_ready: Signal::new(),
            urc_task: TaskControl::new(),
            callback_task: TaskControl::new(),
        }
    }

    /// Tell the URC runner that `available` bytes arrived on the serial
    /// port. Meant to be called from the UART receive path.
    pub fn notify_rx(&self, available: usize) {
        self.data_ready.signal(available);
    }
}

/// One AT channel: the engine behind its mutex.
pub struct State<'d, M: RawMutex, IO, C, const N: usize = DEFAULT_RX_BUF_LEN> {
    pub(crate) resources: &'d Resources<M>,
    pub(crate) engine: Mutex<M, AtEngine<'d, M, IO, C, N>>,
}

impl<'d, M, IO, C, const N: usize> State<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    pub fn new(io: IO, _config: C, resources: &'d Resources<M>) -> Self {
        Self {
            resources,
            engine: Mutex::new(AtEngine::new(io, &resources.callbacks)),
        }
    }
}

/// Split an initialised channel into the caller handle and the two
/// background runners.
pub fn new<'d, M, IO, C, const N: usize>(
    state: &'d State<'d, M, IO, C, N>,
) -> (
    Client<'d, M, IO, C, N>,
    UrcRunner<'d, M, IO, C, N>,
    CallbackRunner<'d, M>,
)
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    (
        Client::new(state),
        UrcRunner::new(state),
        CallbackRunner::new(state.resources),
    )
}
