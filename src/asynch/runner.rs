use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use crate::config::AtConfig;

use super::State;

/// Background reader for data arriving between command cycles.
///
/// You must call `.run()` in a background task for URCs to be dispatched
/// while no caller holds the channel.
pub struct UrcRunner<'d, M: RawMutex, IO, C, const N: usize> {
    state: &'d State<'d, M, IO, C, N>,
}

impl<'d, M, IO, C, const N: usize> UrcRunner<'d, M, IO, C, N>
where
    M: RawMutex,
    IO: Read + Write + ReadReady,
    C: AtConfig,
{
    pub(crate) fn new(state: &'d State<'d, M, IO, C, N>) -> Self {
        Self { state }
    }

    /// Returns after `deinit`.
    pub async fn run(&mut self) {
        let resources = self.state.resources;
        let control = &resources.urc_task;

        control.started();
        info!("URC task started");

        loop {
            let announced = match C::URC_POLL_INTERVAL {
                Some(interval) => {
                    match select3(
                        control.stop.wait(),
                        resources.data_ready.wait(),
                        Timer::after(interval),
                    )
                    .await
                    {
                        Either3::First(()) => break,
                        Either3::Second(n) => n,
                        Either3::Third(()) => 0,
                    }
                }
                None => match select(control.stop.wait(), resources.data_ready.wait()).await {
                    Either::First(()) => break,
                    Either::Second(n) => n,
                },
            };

            let mut engine = self.state.engine.lock().await;
            if !engine.is_initialised() {
                break;
            }
            engine.service_oob(announced).await;
        }

        info!("URC task ended");
        control.finished();
    }
}
