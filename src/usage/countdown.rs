//! Countdown to a usage-limit reset.
//!
//! Two clocks race toward the same deadline: a one-second ticker that
//! republishes the remaining time and checks the wall clock, and an
//! absolute timer armed for the exact wait. Whichever sees the deadline
//! pass first emits [`CountdownEvent::Elapsed`] exactly once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Countdown tick cadence.
pub const TICK: Duration = Duration::from_secs(1);

/// Progress reported by a running countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownEvent {
    /// Seconds left before the waiting item resumes.
    Tick {
        /// Waiting item.
        message_id: String,
        /// Remaining whole seconds.
        remaining_secs: u64,
    },
    /// The deadline passed.
    Elapsed {
        /// Waiting item.
        message_id: String,
    },
}

/// Whole seconds from `now` until `deadline`, floored at zero.
#[must_use]
pub fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((deadline - now).num_seconds()).unwrap_or(0)
}

/// Spawn a countdown for `message_id` ending at `deadline`.
///
/// Events are converted into the caller's event type. Cancelling `cancel`
/// stops the countdown silently.
#[must_use]
pub fn spawn_countdown<E>(
    message_id: String,
    deadline: DateTime<Utc>,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: From<CountdownEvent> + Send + 'static,
{
    let span = info_span!("usage_countdown", message_id = %message_id);
    tokio::spawn(
        async move {
            info!(
                remaining_secs = seconds_until(deadline, Utc::now()),
                "usage limit countdown started"
            );

            let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
            let absolute = tokio::time::sleep_until(tokio::time::Instant::now() + wait);
            tokio::pin!(absolute);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        debug!("usage countdown cancelled");
                        return;
                    }

                    () = &mut absolute => break,

                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let tick = CountdownEvent::Tick {
                            message_id: message_id.clone(),
                            remaining_secs: seconds_until(deadline, now),
                        };
                        if events.send(E::from(tick)).await.is_err() {
                            return;
                        }
                        // The monotonic timer stalls across a system suspend.
                        if now >= deadline {
                            break;
                        }
                    }
                }
            }

            info!("usage limit wait elapsed");
            let _ = events
                .send(E::from(CountdownEvent::Elapsed { message_id }))
                .await;
        }
        .instrument(span),
    )
}
