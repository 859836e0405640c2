//! Chunked message transmission with bounded retries.
//!
//! The wrapper forwards stdin to a PTY. Writing a long message in one go
//! lets the submit byte land in the same PTY read as the text, which the
//! CLI treats as a pasted newline instead of a submit. Messages are
//! therefore written in small chunks with pauses, and `\r` is sent alone.

pub mod backoff;
pub mod writer;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

pub use backoff::RetryPolicy;
pub use writer::{StdinHandle, WriteRequest};

/// Bytes per stdin write.
pub const CHUNK_SIZE: usize = 1024;

/// Pause after each chunk.
pub const CHUNK_PAUSE: Duration = Duration::from_millis(200);

/// Extra pause after the last chunk before submitting.
pub const SUBMIT_PAUSE: Duration = Duration::from_millis(300);

/// Submit byte.
pub const SUBMIT: &[u8] = b"\r";

/// Interrupt byte.
pub const INTERRUPT: &[u8] = b"\x1b";

/// How long a restart may take to reach a ready prompt.
pub const RESTART_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Access to the live session from a transmission in progress.
pub trait SessionLink: Send + Sync {
    /// Writer of the current subprocess, if one is attached.
    fn current_writer(&self) -> Option<StdinHandle>;

    /// Start a new session and wait until it is ready.
    fn restart_and_wait(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Write `text` in chunks followed by a separate submit.
///
/// # Errors
///
/// Returns `AppError::Transmission` if any write fails.
pub async fn send_chunked(writer: &StdinHandle, text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    let chunks = bytes.len().div_ceil(CHUNK_SIZE);
    debug!(bytes = bytes.len(), chunks, "sending message");

    for chunk in bytes.chunks(CHUNK_SIZE) {
        writer.write(chunk).await?;
        tokio::time::sleep(CHUNK_PAUSE).await;
    }
    tokio::time::sleep(SUBMIT_PAUSE).await;
    writer.write(SUBMIT).await?;
    debug!(chunks, "message submitted");
    Ok(())
}

/// Why one transmission attempt failed.
#[derive(Debug)]
enum Failure {
    /// No subprocess attached.
    Missing,
    /// A write failed.
    Write(AppError),
}

/// Next step of the transmission state machine.
#[derive(Debug)]
enum Step {
    Attempt,
    Restart { retry: u32 },
    Resend { retry: u32, cause: AppError },
}

/// Transmit `text`, restarting the session or re-sending as needed.
///
/// A missing subprocess triggers a restart after an exponential pause
/// ([`RetryPolicy::RESTART`]); a failed write re-sends the whole message
/// after a flat pause ([`RetryPolicy::WRITE`]). Both share one retry
/// counter.
///
/// # Errors
///
/// - `AppError::ProcessUnavailable` once restarts are exhausted.
/// - `AppError::Transmission` once re-sends are exhausted.
/// - Whatever the restart reports if the session cannot be brought back.
/// - `AppError::Cancelled` if `cancel` fires.
pub async fn transmit(link: &dyn SessionLink, text: &str, cancel: &CancellationToken) -> Result<()> {
    let mut retries: u32 = 0;
    let mut step = Step::Attempt;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("transmission cancelled".into()));
        }

        step = match step {
            Step::Attempt => {
                let failure = match link.current_writer() {
                    None => Failure::Missing,
                    Some(writer) => match send_chunked(&writer, text).await {
                        Ok(()) => return Ok(()),
                        Err(err) => Failure::Write(err),
                    },
                };
                classify(failure, retries)?
            }
            Step::Restart { retry } => {
                let pause = RetryPolicy::RESTART.delay(retry);
                warn!(
                    attempt = retry + 1,
                    max = RetryPolicy::RESTART.max_retries,
                    pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                    "process not available, restarting session"
                );
                pause_or_cancel(pause, cancel).await?;
                link.restart_and_wait(RESTART_READY_TIMEOUT).await?;
                info!("session restarted, resending message");
                retries = retry + 1;
                Step::Attempt
            }
            Step::Resend { retry, cause } => {
                warn!(
                    attempt = retry + 1,
                    max = RetryPolicy::WRITE.max_retries,
                    error = %cause,
                    "retrying message send"
                );
                pause_or_cancel(RetryPolicy::WRITE.delay(retry), cancel).await?;
                retries = retry + 1;
                Step::Attempt
            }
        };
    }
}

fn classify(failure: Failure, retries: u32) -> Result<Step> {
    match failure {
        Failure::Missing if RetryPolicy::RESTART.allows(retries) => {
            Ok(Step::Restart { retry: retries })
        }
        Failure::Missing => Err(AppError::ProcessUnavailable(format!(
            "process not available after {} retries",
            RetryPolicy::RESTART.max_retries
        ))),
        Failure::Write(cause) if RetryPolicy::WRITE.allows(retries) => Ok(Step::Resend {
            retry: retries,
            cause,
        }),
        Failure::Write(cause) => Err(AppError::Transmission(format!(
            "failed to send message after {} retries: {cause}",
            RetryPolicy::WRITE.max_retries
        ))),
    }
}

async fn pause_or_cancel(pause: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(AppError::Cancelled("transmission cancelled".into())),
        () = tokio::time::sleep(pause) => Ok(()),
    }
}
