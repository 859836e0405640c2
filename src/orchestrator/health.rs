//! Periodic health check of the live session.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// How often a ready session is checked.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Time to check session `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTick {
    /// Spawn generation the timer belongs to.
    pub generation: u64,
}

/// Emit a [`HealthTick`] every `interval` until `cancel` fires.
///
/// The first tick comes one full interval after the call.
#[must_use]
pub fn spawn_health_check<E>(
    generation: u64,
    interval: Duration,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: From<HealthTick> + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("health check stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if events.send(E::from(HealthTick { generation })).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        .instrument(info_span!("health_check", generation)),
    )
}
