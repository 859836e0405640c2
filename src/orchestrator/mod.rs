//! Queue-driven session orchestration.
//!
//! A single actor task owns the queue, the session process and every flag
//! derived from them. Everything else talks to it through an
//! [`OrchestratorHandle`]: operator commands arrive on an `mpsc` channel
//! with a `oneshot` reply, and subprocess output, delivery outcomes,
//! countdown ticks and timers come back as internal events on a second
//! channel. Because only the actor mutates state, the single-processing
//! invariant holds without locks.

mod actor;
pub mod delivery;
pub mod dependency;
pub mod health;
pub mod schedule;
pub mod session;
pub mod sleep_guard;
pub mod spawner;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GlobalConfig;
use crate::models::{HistoryRun, MessageItem, SessionSnapshot};
use crate::notify::{RemoteNotifier, UiPublisher};
use crate::persistence::QueueStore;
use crate::queue::QueueStats;
use crate::transmit::writer::StdinHandle;
use crate::transmit::SessionLink;
use crate::{AppError, Result};

/// Depth of the operator command channel.
pub const COMMAND_CAPACITY: usize = 64;

/// Depth of the internal event channel.
pub const EVENT_CAPACITY: usize = 1024;

/// Depth of the raw stdout broadcast used by readiness waits.
pub const OUTPUT_CAPACITY: usize = 1024;

/// Readiness poll cadence while waiting for a session.
pub const READY_POLL: Duration = Duration::from_secs(1);

/// How long a freshly started session gets to become ready.
pub const READY_WAIT: Duration = Duration::from_secs(30);

/// Everything the orchestrator needs from the outside.
#[derive(Clone)]
pub struct OrchestratorDeps {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Pending-queue and history storage, if persistence is on.
    pub store: Option<Arc<dyn QueueStore>>,
    /// Best-effort outbound notifier.
    pub remote: Option<Arc<dyn RemoteNotifier>>,
    /// UI event sink.
    pub ui: UiPublisher,
}

/// Operator request handled by the actor.
pub(crate) enum Command {
    Enqueue {
        text: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Edit {
        id: String,
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Duplicate {
        id: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Reorder {
        from: usize,
        to: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    StartSession {
        reply: oneshot::Sender<Result<()>>,
    },
    StartProcessing {
        reply: oneshot::Sender<Result<()>>,
    },
    StopProcessing {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Keypress {
        key: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Items {
        reply: oneshot::Sender<Vec<MessageItem>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    History {
        reply: oneshot::Sender<Result<Vec<HistoryRun>>>,
    },
}

/// Cloneable client of the orchestrator actor.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    ready: watch::Receiver<bool>,
    writer: watch::Receiver<Option<StdinHandle>>,
    output: broadcast::Sender<Arc<str>>,
}

impl OrchestratorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::Cancelled("orchestrator stopped".into()))?;
        response
            .await
            .map_err(|_| AppError::Cancelled("orchestrator dropped the request".into()))
    }

    /// Add a message to the tail of the queue; returns its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for blank text or a full queue.
    pub async fn enqueue(&self, text: impl Into<String>) -> Result<String> {
        let text = text.into();
        self.request(|reply| Command::Enqueue { text, reply }).await?
    }

    /// Replace the text of a message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub async fn edit(&self, id: impl Into<String>, text: impl Into<String>) -> Result<()> {
        let (id, text) = (id.into(), text.into());
        self.request(|reply| Command::Edit { id, text, reply }).await?
    }

    /// Remove a message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub async fn remove(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    /// Insert a pending copy of a message; returns the copy's id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id and
    /// `AppError::InvalidInput` for a full queue.
    pub async fn duplicate(&self, id: impl Into<String>) -> Result<String> {
        let id = id.into();
        self.request(|reply| Command::Duplicate { id, reply }).await?
    }

    /// Move the message at index `from` to index `to`.
    ///
    /// Out-of-range indices leave the queue untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn reorder(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::Reorder { from, to, reply }).await?
    }

    /// Drop every message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Start the CLI session if none is running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DependencyUnavailable` when the check fails and
    /// `AppError::Spawn` when the process cannot be started.
    pub async fn start_session(&self) -> Result<()> {
        self.request(|reply| Command::StartSession { reply }).await?
    }

    /// Enable processing, starting the session first if needed.
    ///
    /// # Errors
    ///
    /// Returns whatever starting the session reports.
    pub async fn start_processing(&self) -> Result<()> {
        self.request(|reply| Command::StartProcessing { reply }).await?
    }

    /// Disable processing and interrupt the CLI.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn stop_processing(&self) -> Result<()> {
        self.request(|reply| Command::StopProcessing { reply }).await
    }

    /// Kill the session and clear all session state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn reset_session(&self) -> Result<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Send a navigation key (`up`, `down`, `left`, `right`, `enter`, `escape`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for an unknown key and
    /// `AppError::ProcessUnavailable` without a session.
    pub async fn keypress(&self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.request(|reply| Command::Keypress { key, reply }).await?
    }

    /// Current session flags.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Copy of the queue in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn items(&self) -> Result<Vec<MessageItem>> {
        self.request(|reply| Command::Items { reply }).await
    }

    /// Queue statistics.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the actor is gone.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Saved runs of this workspace, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    pub async fn history(&self) -> Result<Vec<HistoryRun>> {
        self.request(|reply| Command::History { reply }).await?
    }

    /// Whether the session currently shows its input prompt.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Subscribe to raw stdout chunks of the live session.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<Arc<str>> {
        self.output.subscribe()
    }
}

impl SessionLink for OrchestratorHandle {
    fn current_writer(&self) -> Option<StdinHandle> {
        self.writer.borrow().clone()
    }

    fn restart_and_wait(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.start_session().await?;
            if poll_ready(&self.ready, READY_POLL, timeout, &CancellationToken::new()).await {
                Ok(())
            } else {
                Err(AppError::ReadinessTimeout(format!(
                    "session not ready within {}s of restart",
                    timeout.as_secs()
                )))
            }
        })
    }
}

/// Poll `ready` every `poll` until it is `true` or `timeout` passes.
pub async fn poll_ready(
    ready: &watch::Receiver<bool>,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if *ready.borrow() {
            return true;
        }
        if Instant::now() >= deadline || cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(poll) => {}
        }
    }
}

/// Start the orchestrator actor.
///
/// The actor recovers the saved queue, arms the scheduled start and
/// auto-start, then serves commands until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the workspace root cannot be resolved.
pub fn spawn(deps: OrchestratorDeps, cancel: CancellationToken) -> Result<(OrchestratorHandle, JoinHandle<()>)> {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let (ready_tx, ready_rx) = watch::channel(false);
    let (writer_tx, writer_rx) = watch::channel(None);
    let (output_tx, _) = broadcast::channel(OUTPUT_CAPACITY);

    let handle = OrchestratorHandle {
        commands: command_tx,
        ready: ready_rx,
        writer: writer_rx,
        output: output_tx.clone(),
    };

    let orchestrator = actor::Orchestrator::new(
        deps,
        actor::Channels {
            handle: handle.clone(),
            events: event_tx,
            ready: ready_tx,
            writer: writer_tx,
            output: output_tx,
        },
        cancel,
    )?;
    let task = tokio::spawn(orchestrator.run(command_rx, event_rx));
    Ok((handle, task))
}
