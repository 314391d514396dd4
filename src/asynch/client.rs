use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::MutexGuard;
use embassy_time::Duration;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use crate::config::AtConfig;
use crate::error::Error;
use crate::urc::UrcHandler;

use super::callback::{Callback, DeferQueue};
use super::engine::AtEngine;
use super::{Resources, State};

const SYNC_ATTEMPTS: usize = 10;

/// Handle used by command sequencing code. Cheap to copy; every copy
/// talks to the same channel.
pub struct Client<'d, M: RawMutex, IO, C, const N: usize> {
    state: &'d State<'d, M, IO, C, N>,
}

impl<M: RawMutex, IO, C, const N: usize> Clone for Client<'_, M, IO, C, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: RawMutex, IO, C, const N: usize> Copy for Client<'_, M, IO, C, N> {}

impl<'d, M, IO, C, const N: usize> Client<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    pub(crate) fn new(state: &'d State<'d, M, IO, C, N>) -> Self {
        Self { state }
    }

    /// Take the channel for one command cycle. Clears the sticky error and
    /// starts the cycle timeout.
    pub async fn lock(&self) -> Result<Session<'d, M, IO, C, N>, Error> {
        let mut engine = self.state.engine.lock().await;
        if !engine.is_initialised() {
            return Err(Error::NotInitialised);
        }
        engine.begin_cycle();
        Ok(Session {
            engine,
            resources: self.state.resources,
        })
    }

    /// Call `handler` whenever a line starting with `prefix` arrives.
    pub async fn set_urc_handler(
        &self,
        prefix: &str,
        handler: &'static dyn UrcHandler,
    ) -> Result<(), Error> {
        let mut engine = self.state.engine.lock().await;
        if !engine.is_initialised() {
            return Err(Error::NotInitialised);
        }
        engine.register_urc(prefix, handler)
    }

    pub async fn remove_urc_handler(&self, prefix: &str) {
        let mut engine = self.state.engine.lock().await;
        if engine.is_initialised() {
            engine.unregister_urc(prefix);
        }
    }

    /// Run `function(param)` on the callback task.
    pub fn callback(&self, function: Callback, param: i32) -> Result<(), Error> {
        self.state.resources.callbacks.defer(function, param)
    }

    /// Called, on the callback task, with the number of consecutive AT
    /// timeouts each time one happens.
    pub async fn set_at_timeout_callback(&self, callback: Option<Callback>) {
        let mut engine = self.state.engine.lock().await;
        if engine.is_initialised() {
            engine.set_timeout_callback(callback);
        }
    }

    /// Re-establish command/response framing by polling `AT+CMEE?` until
    /// a complete response comes back.
    pub async fn sync(&self, timeout: Duration) -> bool {
        info!("AT sync");
        for _ in 0..SYNC_ATTEMPTS {
            let Ok(mut at) = self.lock().await else {
                return false;
            };
            at.set_at_timeout(timeout, false);
            at.cmd_start("AT+CMEE?").await;
            at.cmd_stop().await;
            at.resp_start(Some("+CMEE:"), false).await;
            at.resp_stop().await;
            at.restore_at_timeout();
            if at.unlock_return_error().is_ok() {
                return true;
            }
        }
        warn!("AT sync failed");
        false
    }

    /// Stop both background tasks and release the URC handlers. Must not
    /// be called while a cycle is in progress.
    pub async fn deinit(&self) {
        let resources = self.state.resources;

        if !resources.urc_task.shutdown(C::TASK_EXIT_TIMEOUT).await {
            warn!("URC task did not stop");
        }
        if !resources.callback_task.shutdown(C::TASK_EXIT_TIMEOUT).await {
            warn!("Callback task did not stop");
        }

        self.state.engine.lock().await.shutdown();
        info!("AT engine shut down");
    }
}

/// Exclusive access to the engine for one command cycle.
///
/// Dropping the session unlocks the channel and wakes the URC runner if
/// input is left over.
pub struct Session<'d, M: RawMutex, IO, C, const N: usize>
where
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    engine: MutexGuard<'d, M, AtEngine<'d, M, IO, C, N>>,
    resources: &'d Resources<M>,
}

impl<'d, M, IO, C, const N: usize> Session<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    pub fn unlock(self) {}

    /// Unlock and return the sticky error of the cycle.
    pub fn unlock_return_error(self) -> Result<(), Error> {
        self.engine.last_error()
    }
}

impl<'d, M, IO, C, const N: usize> Deref for Session<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    type Target = AtEngine<'d, M, IO, C, N>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl<M, IO, C, const N: usize> DerefMut for Session<'_, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

impl<M, IO, C, const N: usize> Drop for Session<'_, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    fn drop(&mut self) {
        if self.engine.has_pending_input() {
            self.resources.data_ready.signal(0);
        }
    }
}
