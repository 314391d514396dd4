use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

use crate::config::CALLBACK_QUEUE_LEN;
use crate::error::Error;

use super::Resources;

/// A function run on the callback task with one argument.
///
/// Callbacks are `'static` so the queue needs no allocation. Context is
/// carried by capturing `'static` data: a `static`, or a leaked `Box` on
/// targets with an allocator.
pub type Callback = &'static (dyn Fn(i32) + Sync);

/// Queued callback invocation.
pub struct Deferred {
    function: Callback,
    param: i32,
}

impl Deferred {
    fn invoke(self) {
        (self.function)(self.param)
    }
}

/// Anything that can hand a callback over to the callback task.
pub trait DeferQueue {
    fn defer(&self, function: Callback, param: i32) -> Result<(), Error>;
}

/// Bounded FIFO feeding the [`CallbackRunner`].
pub struct CallbackQueue<M: RawMutex> {
    channel: Channel<M, Deferred, CALLBACK_QUEUE_LEN>,
}

impl<M: RawMutex> CallbackQueue<M> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }
}

impl<M: RawMutex> DeferQueue for CallbackQueue<M> {
    fn defer(&self, function: Callback, param: i32) -> Result<(), Error> {
        self.channel
            .try_send(Deferred { function, param })
            .map_err(|_| {
                warn!("Callback queue full");
                Error::OutOfMemory
            })
    }
}

/// Runs deferred callbacks one at a time, in the order they were queued.
///
/// You must call `.run()` in a background task for deferred callbacks and
/// AT timeout notifications to be delivered.
pub struct CallbackRunner<'d, M: RawMutex> {
    resources: &'d Resources<M>,
}

impl<'d, M: RawMutex> CallbackRunner<'d, M> {
    pub(crate) fn new(resources: &'d Resources<M>) -> Self {
        Self { resources }
    }

    /// Returns after `deinit`, once every callback queued before it has run.
    pub async fn run(&mut self) {
        let control = &self.resources.callback_task;
        let channel = &self.resources.callbacks.channel;

        control.started();
        info!("Callback task started");

        loop {
            match select(control.stop.wait(), channel.receive()).await {
                Either::First(()) => break,
                Either::Second(deferred) => deferred.invoke(),
            }
        }

        while let Ok(deferred) = channel.try_receive() {
            deferred.invoke();
        }

        info!("Callback task ended");
        control.finished();
    }
}
