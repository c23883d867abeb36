//! Timer-driven ticking.
//!
//! Hosts that do not drive [`Runtime::tick`] themselves can spawn a
//! [`TickDriver`] on a tokio runtime. It ticks every
//! [`RuntimeConfig::tick_interval`](crate::config::RuntimeConfig::tick_interval)
//! and can be woken early with [`TickDriver::wake`].

use std::sync::Arc;

use tokio::sync::{oneshot, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use super::scheduler::TickReport;
use crate::reactive::Runtime;

/// A background task that ticks a runtime until shut down.
pub struct TickDriver {
    shutdown: oneshot::Sender<()>,
    wake: Arc<Notify>,
    handle: JoinHandle<TickReport>,
}

impl TickDriver {
    /// Spawn the driver on the current tokio runtime.
    pub fn spawn(runtime: Runtime) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let wake = Arc::new(Notify::new());
        let woken = Arc::clone(&wake);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(runtime.config().tick_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut total = TickReport::default();
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = interval.tick() => {}
                    _ = woken.notified() => {}
                }
                if runtime.pending() > 0 {
                    total.absorb(runtime.tick());
                    ticks += 1;
                }
            }

            debug!(ticks, ran = total.ran, failed = total.failed, "tick driver stopped");
            total
        });

        Self {
            shutdown,
            wake,
            handle,
        }
    }

    /// Request a tick without waiting for the next interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the driver and return the accumulated report.
    pub async fn shutdown(self) -> Result<TickReport, JoinError> {
        let _ = self.shutdown.send(());
        self.handle.await
    }
}
