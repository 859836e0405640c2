//! Daily scheduled session start.

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// The configured start time arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledStart;

/// Next local instant at `hour:minute` strictly after `now`.
///
/// Returns `None` for an out-of-range time or when the wall-clock time does
/// not exist on either candidate day.
#[must_use]
pub fn next_occurrence(now: DateTime<Local>, hour: u32, minute: u32) -> Option<DateTime<Local>> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.date_naive();
    [Some(today), today.checked_add_days(Days::new(1))]
        .into_iter()
        .flatten()
        .filter_map(|day| Local.from_local_datetime(&day.and_time(at)).earliest())
        .find(|candidate| *candidate > now)
}

/// Emit [`ScheduledStart`] every day at `hour:minute` local time.
#[must_use]
pub fn spawn_daily_start<E>(
    hour: u32,
    minute: u32,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: From<ScheduledStart> + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut last_fired: Option<DateTime<Local>> = None;
            loop {
                let now = Local::now();
                let reference = last_fired.map_or(now, |fired| fired.max(now));
                let Some(next) = next_occurrence(reference, hour, minute) else {
                    warn!(hour, minute, "cannot compute the next scheduled start");
                    return;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                info!(at = %next.format("%Y-%m-%d %H:%M"), "session start scheduled");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("scheduled start cancelled");
                        return;
                    }
                    () = tokio::time::sleep(wait) => {
                        last_fired = Some(next);
                        if events.send(E::from(ScheduledStart)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        .instrument(info_span!("scheduled_start")),
    )
}
