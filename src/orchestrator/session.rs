//! Wrapper subprocess and its I/O tasks.
//!
//! [`SessionProcess::spawn`] launches the wrapper and starts four tasks
//! bound to one cancellation token:
//!
//! - a stdout reader and a stderr reader (`FramedRead` over
//!   [`Utf8ChunkCodec`]) forwarding decoded chunks,
//! - the stdin writer task behind a [`StdinHandle`],
//! - an exit monitor that owns the `Child` and reports how it ended.
//!
//! Every event carries the generation the process was spawned with so the
//! orchestrator can discard events from a process it already replaced.
//! Cancelling the token terminates the child: `SIGTERM` first on Unix, then
//! a hard kill after [`TERMINATE_GRACE`].

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::notify::OutputStream;
use crate::terminal::codec::Utf8ChunkCodec;
use crate::transmit::writer::{run_writer, StdinHandle};
use crate::{AppError, Result};

use super::spawner::LaunchSpec;

/// How long a terminated child gets to exit before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Something the subprocess did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded output.
    Output {
        /// Spawn generation.
        generation: u64,
        /// Source stream.
        stream: OutputStream,
        /// Text chunk.
        text: String,
    },
    /// The process exited on its own.
    Closed {
        /// Spawn generation.
        generation: u64,
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
    },
    /// Waiting on the process failed.
    Failed {
        /// Spawn generation.
        generation: u64,
        /// Error text.
        error: String,
    },
}

/// A running wrapper subprocess.
#[derive(Debug)]
pub struct SessionProcess {
    generation: u64,
    pid: u32,
    writer: StdinHandle,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SessionProcess {
    /// Launch `spec` and start its I/O tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be started or its
    /// pipes cannot be captured.
    pub fn spawn<E>(spec: &LaunchSpec, generation: u64, events: mpsc::Sender<E>) -> Result<Self>
    where
        E: From<SessionEvent> + Send + 'static,
    {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to start {}: {err}", spec.program)))?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::Spawn("process exited before it could be tracked".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stderr".into()))?;

        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        let span = info_span!("session", generation, pid);

        let (writer, requests) = StdinHandle::channel();
        let writer_cancel = cancel.clone();
        tokio::spawn(
            async move {
                if let Err(err) = run_writer(generation, stdin, requests, writer_cancel).await {
                    warn!(%err, "stdin writer stopped");
                }
            }
            .instrument(span.clone()),
        );

        tokio::spawn(
            read_stream(generation, OutputStream::Stdout, stdout, events.clone(), cancel.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            read_stream(generation, OutputStream::Stderr, stderr, events.clone(), cancel.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            monitor_exit(generation, child, Arc::clone(&exited), events, cancel.clone())
                .instrument(span),
        );

        info!(generation, pid, program = %spec.program, "session process started");
        Ok(Self {
            generation,
            pid,
            writer,
            exited,
            cancel,
        })
    }

    /// Spawn generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Writer for the process's stdin.
    #[must_use]
    pub fn writer(&self) -> StdinHandle {
        self.writer.clone()
    }

    /// The process is alive and its stdin accepts writes.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.exited.load(Ordering::Acquire) && !self.writer.is_closed()
    }

    /// Stop the process and its tasks. No exit event is emitted.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SessionProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_stream<R, E>(
    generation: u64,
    stream: OutputStream,
    source: R,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    E: From<SessionEvent> + Send + 'static,
{
    let mut framed = FramedRead::new(source, Utf8ChunkCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(?stream, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => match item {
                None => {
                    debug!(?stream, "reader: EOF detected");
                    break;
                }
                Some(Err(err)) => {
                    warn!(?stream, %err, "reader: stream error, stopping");
                    break;
                }
                Some(Ok(text)) => {
                    let event = SessionEvent::Output { generation, stream, text };
                    if events.send(E::from(event)).await.is_err() {
                        debug!(?stream, "reader: event channel closed, stopping");
                        break;
                    }
                }
            },
        }
    }
}

async fn monitor_exit<E>(
    generation: u64,
    mut child: Child,
    exited: Arc<AtomicBool>,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) where
    E: From<SessionEvent> + Send + 'static,
{
    tokio::select! {
        result = child.wait() => {
            exited.store(true, Ordering::Release);
            let event = match result {
                Ok(status) => {
                    info!(code = ?status.code(), "session process exited");
                    SessionEvent::Closed { generation, code: status.code() }
                }
                Err(err) => {
                    warn!(%err, "error waiting for session process");
                    SessionEvent::Failed { generation, error: err.to_string() }
                }
            };
            if events.send(E::from(event)).await.is_err() {
                warn!("event channel closed before exit could be delivered");
            }
        }
        () = cancel.cancelled() => {
            terminate_child(&mut child).await;
            exited.store(true, Ordering::Release);
        }
    }
}

/// Ask the child to stop, then kill it if it lingers.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(%err, "SIGTERM failed, killing");
        } else if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            info!(code = ?status.code(), "session process terminated");
            return;
        }
    }

    match child.kill().await {
        Ok(()) => info!("session process killed"),
        Err(err) => warn!(%err, "failed to kill session process"),
    }
}
