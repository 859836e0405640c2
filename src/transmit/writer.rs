//! Stdin writer task.
//!
//! Owns the wrapper's `stdin` and performs every write on behalf of the
//! rest of the application. Requests arrive on an [`mpsc`] channel with a
//! [`oneshot`] acknowledgement so callers can await write completion. The
//! task exits on cancellation, when every [`StdinHandle`] is dropped, or on
//! the first failed write, after which the handle reports itself closed.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Capacity of the request channel.
const WRITE_QUEUE_DEPTH: usize = 32;

/// One write waiting for the task.
#[derive(Debug)]
pub struct WriteRequest {
    /// Bytes to write verbatim.
    pub bytes: Vec<u8>,
    /// Completion signal.
    pub ack: oneshot::Sender<Result<()>>,
}

/// Cloneable sender side of the writer task.
#[derive(Debug, Clone)]
pub struct StdinHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl StdinHandle {
    /// Create a handle and the receiver the writer task consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<WriteRequest>) {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Whether the writer task has stopped accepting writes.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Write `bytes` and wait until they are flushed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transmission` if the stream is not writable or
    /// the write fails.
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Transmission("stdin is not writable".into()));
        }
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest {
                bytes: bytes.into(),
                ack,
            })
            .await
            .map_err(|_| AppError::Transmission("stdin writer stopped".into()))?;
        done.await
            .map_err(|_| AppError::Transmission("stdin writer dropped the request".into()))?
    }
}

/// Writer task body: drain `requests` into `stdin` until stopped.
///
/// # Errors
///
/// Returns `AppError::Transmission` when a write to `stdin` fails.
pub async fn run_writer<W>(
    generation: u64,
    stdin: W,
    mut requests: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "stdin writer: cancellation received, stopping");
                break;
            }

            request = requests.recv() => {
                let Some(WriteRequest { bytes, ack }) = request else {
                    debug!(generation, "stdin writer: request channel closed, stopping");
                    break;
                };

                let outcome = match stdin.write_all(&bytes).await {
                    Ok(()) => stdin.flush().await,
                    Err(err) => Err(err),
                };

                match outcome {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(err) => {
                        warn!(generation, error = %err, "stdin writer: write failed");
                        let failure = AppError::Transmission(format!("write failed: {err}"));
                        let _ = ack.send(Err(failure.clone()));
                        return Err(failure);
                    }
                }
            }
        }
    }

    Ok(())
}
