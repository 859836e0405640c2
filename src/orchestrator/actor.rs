//! State machine behind [`OrchestratorHandle`](super::OrchestratorHandle).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::message::USAGE_LIMIT_OUTPUT;
use crate::models::{HistoryRun, MessageItem, MessageStatus, SessionSnapshot};
use crate::notify::{NoticeLevel, OutputStream, RemoteNotifier, RemoteUpdate, UiEvent, UiPublisher};
use crate::persistence::QueueStore;
use crate::queue::limits::truncate_field;
use crate::queue::{Eviction, MessageQueue};
use crate::terminal::patterns::{auth_failure, has_permission_prompt, is_startup_ready};
use crate::terminal::Key;
use crate::transmit::writer::StdinHandle;
use crate::transmit::INTERRUPT;
use crate::usage::countdown::{spawn_countdown, CountdownEvent};
use crate::usage::{self, UsageLimitHit};
use crate::{AppError, Result};

use super::delivery::{spawn_delivery, DeliveryEvent};
use super::dependency;
use super::health::{spawn_health_check, HealthTick, HEALTH_INTERVAL};
use super::schedule::{spawn_daily_start, ScheduledStart};
use super::session::{SessionEvent, SessionProcess};
use super::sleep_guard::SleepGuard;
use super::spawner::{HostPlatform, LaunchSpec};
use super::{poll_ready, Command, OrchestratorDeps, OrchestratorHandle, READY_POLL, READY_WAIT};

/// Pause before auto-started processing picks its first message.
const AUTO_START_DELAY: Duration = Duration::from_millis(200);

/// Pause between the session turning ready and the auto-start check.
const READY_RECHECK_DELAY: Duration = Duration::from_millis(500);

/// Pause between one message finishing and the next being picked.
const NEXT_MESSAGE_DELAY: Duration = Duration::from_secs(1);

/// Pause between a usage-limit reset and resumed processing.
const RESUME_DELAY: Duration = Duration::from_secs(2);

/// Queue maintenance cadence.
pub(super) const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Channel ends the actor owns.
pub(super) struct Channels {
    pub handle: OrchestratorHandle,
    pub events: mpsc::Sender<Event>,
    pub ready: watch::Sender<bool>,
    pub writer: watch::Sender<Option<StdinHandle>>,
    pub output: broadcast::Sender<Arc<str>>,
}

/// Internal event fed back into the actor.
#[derive(Debug)]
pub(super) enum Event {
    Session(SessionEvent),
    Delivery(DeliveryEvent),
    Countdown(CountdownEvent),
    Health(HealthTick),
    Scheduled(ScheduledStart),
    ProcessNext,
    AutoStartCheck,
    ReadyWait { purpose: ReadyPurpose, ready: bool },
}

impl From<SessionEvent> for Event {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<DeliveryEvent> for Event {
    fn from(event: DeliveryEvent) -> Self {
        Self::Delivery(event)
    }
}

impl From<CountdownEvent> for Event {
    fn from(event: CountdownEvent) -> Self {
        Self::Countdown(event)
    }
}

impl From<HealthTick> for Event {
    fn from(tick: HealthTick) -> Self {
        Self::Health(tick)
    }
}

impl From<ScheduledStart> for Event {
    fn from(start: ScheduledStart) -> Self {
        Self::Scheduled(start)
    }
}

/// What to do once a readiness wait ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadyPurpose {
    /// Resume the scheduler that found the session not ready.
    ProcessNext,
    /// Enable processing after starting a session for it.
    StartProcessing,
}

/// How a session process ended.
#[derive(Debug)]
enum ExitKind {
    Closed(Option<i32>),
    Failed(String),
}

struct ActiveDelivery {
    message_id: String,
    cancel: CancellationToken,
}

pub(super) struct Orchestrator {
    config: Arc<GlobalConfig>,
    workspace: String,
    workspace_root: PathBuf,
    platform: HostPlatform,
    store: Option<Arc<dyn QueueStore>>,
    remote: Option<Arc<dyn RemoteNotifier>>,
    ui: UiPublisher,
    channels: Channels,
    queue: MessageQueue,
    session: Option<SessionProcess>,
    generation: u64,
    ready: bool,
    processing: bool,
    current: Option<String>,
    delivery: Option<ActiveDelivery>,
    ready_waits: Vec<ReadyPurpose>,
    health: Option<CancellationToken>,
    countdowns: HashMap<String, CancellationToken>,
    sleep_guard: SleepGuard,
    history: Option<HistoryRun>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub(super) fn new(
        deps: OrchestratorDeps,
        channels: Channels,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let OrchestratorDeps {
            config,
            store,
            remote,
            ui,
        } = deps;
        Ok(Self {
            workspace: config.workspace_key()?,
            workspace_root: config.workspace_root()?,
            platform: HostPlatform::current(),
            queue: MessageQueue::new(config.queue.clone()),
            sleep_guard: SleepGuard::new(config.sleep_prevention.clone()),
            config,
            store,
            remote,
            ui,
            channels,
            session: None,
            generation: 0,
            ready: false,
            processing: false,
            current: None,
            delivery: None,
            ready_waits: Vec::new(),
            health: None,
            countdowns: HashMap::new(),
            history: None,
            cancel,
        })
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<Event>,
    ) {
        let span = info_span!("orchestrator", workspace = %self.workspace);
        async move {
            self.boot().await;
            let cancel = self.cancel.clone();
            let mut maintenance =
                tokio::time::interval_at(Instant::now() + MAINTENANCE_INTERVAL, MAINTENANCE_INTERVAL);

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    Some(command) = commands.recv() => self.handle_command(command).await,

                    Some(event) = events.recv() => self.handle_event(event).await,

                    _ = maintenance.tick() => self.run_maintenance().await,
                }
            }

            self.shutdown().await;
        }
        .instrument(span)
        .await;
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    async fn boot(&mut self) {
        self.recover().await;

        if let Some((hour, minute)) = self.config.scheduled_start() {
            if self.config.session.auto_start {
                warn!("scheduled start ignored because auto_start is enabled");
            } else {
                drop(spawn_daily_start(
                    hour,
                    minute,
                    self.channels.events.clone(),
                    self.cancel.child_token(),
                ));
            }
        }

        if self.config.session.auto_start {
            info!("auto-starting session");
            if let Err(err) = self.start_session().await {
                warn!(%err, "auto-start failed");
            }
        }
    }

    async fn recover(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let now = Utc::now();

        match store.close_open_runs(&self.workspace, now).await {
            Ok(0) => {}
            Ok(closed) => info!(closed, "closed history runs left open by a previous process"),
            Err(err) => warn!(%err, "failed to close open history runs"),
        }

        if !self.config.history.persist_pending_queue {
            return;
        }
        let recovered = match store.load_pending_queue(&self.workspace).await {
            Ok(items) => items,
            Err(err) => {
                warn!(%err, "failed to load pending queue");
                return;
            }
        };
        if recovered.is_empty() {
            return;
        }

        let count = recovered.len();
        self.queue.restore(recovered);

        let waiting: Vec<(String, Option<DateTime<Utc>>)> = self
            .queue
            .items()
            .iter()
            .filter(|m| m.status == MessageStatus::Waiting)
            .map(|m| (m.id.clone(), m.wait_deadline()))
            .collect();
        for (id, deadline) in waiting {
            match deadline {
                Some(deadline) if deadline > now => self.arm_countdown(id, deadline),
                _ => {
                    if let Some(item) = self.queue.get_mut(&id) {
                        item.resume_from_wait();
                    }
                    info!(message_id = %id, "usage limit already reset, item released");
                }
            }
        }

        info!(count, "recovered pending queue");
        self.ui.notice(
            NoticeLevel::Info,
            format!("Recovered {count} pending messages from the previous run"),
        );
        self.queue_changed().await;
    }

    async fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        for (_, countdown) in self.countdowns.drain() {
            countdown.cancel();
        }
        if let Some(delivery) = self.delivery.take() {
            delivery.cancel.cancel();
        }
        self.stop_session_helpers();
        if let Some(session) = self.session.take() {
            session.terminate();
        }
        self.persist_pending().await;
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { text, reply } => {
                let result = self.enqueue(text).await;
                let _ = reply.send(result);
            }
            Command::Edit { id, text, reply } => {
                let result = self.queue.edit(&id, text);
                if result.is_ok() {
                    self.queue_changed().await;
                }
                let _ = reply.send(result);
            }
            Command::Remove { id, reply } => {
                let result = match self.queue.remove(&id) {
                    Some(_) => {
                        if let Some(countdown) = self.countdowns.remove(&id) {
                            countdown.cancel();
                        }
                        self.queue_changed().await;
                        Ok(())
                    }
                    None => Err(AppError::NotFound(format!("message {id} not found"))),
                };
                let _ = reply.send(result);
            }
            Command::Duplicate { id, reply } => {
                let result = match self.queue.duplicate(&id) {
                    Ok(outcome) => {
                        self.report_eviction(Eviction {
                            removed: outcome.evicted,
                            still_full: false,
                        });
                        self.queue_changed().await;
                        self.try_auto_start();
                        Ok(outcome.id)
                    }
                    Err(err) => Err(self.refuse_full(err)),
                };
                let _ = reply.send(result);
            }
            Command::Reorder { from, to, reply } => {
                if self.queue.reorder(from, to) {
                    self.queue_changed().await;
                } else {
                    debug!(from, to, len = self.queue.len(), "reorder out of range ignored");
                }
                let _ = reply.send(Ok(()));
            }
            Command::Clear { reply } => {
                for (_, countdown) in self.countdowns.drain() {
                    countdown.cancel();
                }
                self.queue.clear();
                self.queue_changed().await;
                self.check_history_end().await;
                self.ui.notice(NoticeLevel::Info, "Queue cleared");
                let _ = reply.send(());
            }
            Command::StartSession { reply } => {
                let result = self.start_session().await;
                let _ = reply.send(result);
            }
            Command::StartProcessing { reply } => {
                let result = self.start_processing().await;
                let _ = reply.send(result);
            }
            Command::StopProcessing { reply } => {
                self.stop_processing().await;
                let _ = reply.send(());
            }
            Command::Reset { reply } => {
                self.reset_session().await;
                let _ = reply.send(());
            }
            Command::Keypress { key, reply } => self.keypress(&key, reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Items { reply } => {
                let _ = reply.send(self.queue.items().to_vec());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.queue.stats(Utc::now()));
            }
            Command::History { reply } => {
                let result = match &self.store {
                    Some(store) => store.list_history_runs(&self.workspace).await,
                    None => Ok(Vec::new()),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Session(SessionEvent::Output {
                generation,
                stream,
                text,
            }) => self.on_output(generation, stream, text).await,
            Event::Session(SessionEvent::Closed { generation, code }) => {
                self.on_exit(generation, ExitKind::Closed(code)).await;
            }
            Event::Session(SessionEvent::Failed { generation, error }) => {
                self.on_exit(generation, ExitKind::Failed(error)).await;
            }
            Event::Delivery(DeliveryEvent::PermissionPrompt { message_id }) => {
                debug!(%message_id, "permission prompt during delivery");
                self.ui.notice(
                    NoticeLevel::Info,
                    "The CLI is asking for permission. Answer with the key commands to continue.",
                );
            }
            Event::Delivery(DeliveryEvent::Finished { message_id, result }) => {
                self.on_delivery_finished(message_id, result).await;
            }
            Event::Countdown(CountdownEvent::Tick {
                message_id,
                remaining_secs,
            }) => self.on_countdown_tick(&message_id, remaining_secs),
            Event::Countdown(CountdownEvent::Elapsed { message_id }) => {
                self.on_wait_elapsed(message_id).await;
            }
            Event::Health(HealthTick { generation }) => self.on_health_tick(generation).await,
            Event::Scheduled(ScheduledStart) => {
                info!("scheduled start time reached");
                self.ui
                    .notice(NoticeLevel::Info, "Scheduled start time reached, starting session");
                if let Err(err) = self.start_session().await {
                    warn!(%err, "scheduled start failed");
                }
            }
            Event::ProcessNext => self.process_next().await,
            Event::AutoStartCheck => self.try_auto_start(),
            Event::ReadyWait { purpose, ready } => self.on_ready_wait(purpose, ready).await,
        }
    }

    // ── Queue operations ─────────────────────────────────────────────────

    async fn enqueue(&mut self, text: String) -> Result<String> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("message text is empty".into()));
        }

        let outcome = self.queue.enqueue(text).map_err(|err| self.refuse_full(err))?;
        if outcome.truncated {
            self.ui.notice(
                NoticeLevel::Warning,
                format!(
                    "Message was longer than {} characters and was truncated",
                    self.config.queue.max_message_size
                ),
            );
        }
        self.report_eviction(Eviction {
            removed: outcome.evicted,
            still_full: false,
        });

        let text = if self.queue.has(MessageStatus::Waiting) {
            "Message added to queue (it will run after the usage limit resets)"
        } else {
            "Message added to queue"
        };
        self.ui.notice(NoticeLevel::Info, text);

        self.queue_changed().await;
        self.try_auto_start();
        Ok(outcome.id)
    }

    fn refuse_full(&self, err: AppError) -> AppError {
        if matches!(err, AppError::InvalidInput(_)) {
            self.ui.notice(
                NoticeLevel::Warning,
                format!(
                    "Queue is full ({} messages). Remove or clear messages to free space.",
                    self.queue.len()
                ),
            );
        }
        err
    }

    fn report_eviction(&self, eviction: Eviction) {
        if eviction.removed > 0 {
            self.ui.notice(
                NoticeLevel::Info,
                format!("Queue cleanup: removed {} old completed messages", eviction.removed),
            );
        }
        if eviction.still_full {
            self.ui.notice(
                NoticeLevel::Warning,
                format!(
                    "Queue is full ({} messages). Remove or clear messages to free space.",
                    self.queue.len()
                ),
            );
        }
    }

    async fn run_maintenance(&mut self) {
        let now = Utc::now();
        let retention_hours = self.config.queue.retention_hours;
        let stats = self.queue.stats(now);
        let retention_ms = i64::from(retention_hours) * 3_600_000;
        if !stats.needs_cleanup && stats.oldest_age_ms <= retention_ms {
            trace!("queue maintenance: nothing to do");
            return;
        }

        let removed = self.queue.cleanup_completed_older_than(now, retention_hours);
        let eviction = self.queue.enforce_size_limit();
        if removed + eviction.removed > 0 {
            self.report_eviction(Eviction {
                removed: removed + eviction.removed,
                still_full: eviction.still_full,
            });
            self.queue_changed().await;
        } else {
            self.report_eviction(eviction);
        }

        let after = self.queue.stats(now);
        if after.needs_cleanup {
            warn!(total = after.total, "queue still above cleanup threshold after maintenance");
            self.ui.notice(
                NoticeLevel::Warning,
                format!(
                    "Queue has {} messages, above the cleanup threshold of {}",
                    after.total, self.config.queue.cleanup_threshold
                ),
            );
        }
    }

    // ── Session control ──────────────────────────────────────────────────

    fn wrapper_path(&self) -> PathBuf {
        let configured = &self.config.cli.wrapper_script;
        if configured.is_absolute() {
            configured.clone()
        } else {
            self.workspace_root.join(configured)
        }
    }

    async fn start_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            self.ui.notice(NoticeLevel::Info, "CLI session is already running");
            return Ok(());
        }

        let wrapper = self.wrapper_path();
        let report = dependency::check(&self.config.cli, &wrapper, self.platform).await;
        self.ui.publish(UiEvent::DependencyReport(report.clone()));
        if !report.all_available() {
            let rendered = report.render();
            warn!("session start refused: dependencies missing");
            self.ui.notice(
                NoticeLevel::Error,
                format!("Cannot start the CLI session.\n{rendered}"),
            );
            return Err(AppError::DependencyUnavailable(rendered));
        }

        let interpreter = report
            .interpreter
            .path
            .clone()
            .unwrap_or_else(|| self.config.cli.interpreter.clone());
        let spec = LaunchSpec::for_wrapper(
            &interpreter,
            &wrapper,
            self.config.session.skip_permissions,
            self.workspace_root.clone(),
            self.platform,
        );

        self.generation += 1;
        match SessionProcess::spawn(&spec, self.generation, self.channels.events.clone()) {
            Ok(process) => {
                self.channels.writer.send_replace(Some(process.writer()));
                self.session = Some(process);
                self.set_ready(false);
                self.state_changed();
                self.ui.notice(NoticeLevel::Info, "CLI session starting");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "failed to start session process");
                self.set_ready(false);
                self.processing = false;
                self.channels.writer.send_replace(None);
                self.state_changed();
                self.ui.notice(
                    NoticeLevel::Error,
                    format!("Failed to start the CLI session: {err}"),
                );
                Err(err)
            }
        }
    }

    async fn start_processing(&mut self) -> Result<()> {
        self.ensure_history_run().await;

        if self.session.is_none() {
            self.start_session().await?;
            if !self.queue.is_empty() {
                self.spawn_ready_wait(ReadyPurpose::StartProcessing);
            }
            return Ok(());
        }

        self.processing = true;
        self.state_changed();
        self.ui.notice(NoticeLevel::Info, "Processing started");
        self.process_next().await;
        Ok(())
    }

    async fn stop_processing(&mut self) {
        self.processing = false;
        self.current = None;
        if let Some(session) = &self.session {
            let writer = session.writer();
            tokio::spawn(async move {
                if let Err(err) = writer.write(INTERRUPT).await {
                    debug!(%err, "failed to send interrupt");
                }
            });
        }
        self.check_history_end().await;
        self.state_changed();
        self.ui.notice(NoticeLevel::Info, "Processing stopped");
    }

    async fn reset_session(&mut self) {
        info!(generation = self.generation, "resetting session");
        self.tear_down_session(None).await;
        self.ui.notice(NoticeLevel::Info, "CLI session reset");
    }

    fn keypress(&self, key: &str, reply: oneshot::Sender<Result<()>>) {
        let key: Key = match key.parse() {
            Ok(key) => key,
            Err(err) => {
                self.ui
                    .notice(NoticeLevel::Warning, format!("Unknown key command: {key}"));
                let _ = reply.send(Err(err));
                return;
            }
        };
        let Some(session) = &self.session else {
            self.ui
                .notice(NoticeLevel::Warning, "No CLI session is running to receive the key");
            let _ = reply.send(Err(AppError::ProcessUnavailable("no session is running".into())));
            return;
        };
        debug!(%key, "sending key");
        let writer = session.writer();
        tokio::spawn(async move {
            let _ = reply.send(writer.write(key.sequence()).await);
        });
    }

    /// Drop the session and everything tied to it.
    ///
    /// With `failure`, a processing item is marked failed with that reason;
    /// otherwise it is left to its cancelled delivery to settle.
    async fn tear_down_session(&mut self, failure: Option<&str>) {
        self.set_ready(false);
        self.stop_session_helpers();
        self.processing = false;

        if let Some(reason) = failure {
            if let Some(id) = self.processing_item() {
                self.fail_item(&id, reason.to_owned());
            }
        }
        self.current = None;

        if let Some(delivery) = self.delivery.take() {
            delivery.cancel.cancel();
        }
        if let Some(session) = self.session.take() {
            session.terminate();
        }
        self.channels.writer.send_replace(None);

        self.queue_changed().await;
        self.state_changed();
    }

    fn stop_session_helpers(&mut self) {
        if let Some(health) = self.health.take() {
            health.cancel();
        }
        self.sleep_guard.stop();
    }

    fn become_ready(&mut self, notice: &str) {
        self.set_ready(true);
        if let Some(session) = &self.session {
            let token = self.cancel.child_token();
            drop(spawn_health_check(
                session.generation(),
                HEALTH_INTERVAL,
                self.channels.events.clone(),
                token.clone(),
            ));
            if let Some(previous) = self.health.replace(token) {
                previous.cancel();
            }
        }
        self.sleep_guard.start();
        self.state_changed();
        self.ui.notice(NoticeLevel::Info, notice);
        self.schedule(READY_RECHECK_DELAY, Event::AutoStartCheck);
    }

    // ── Subprocess events ────────────────────────────────────────────────

    async fn on_output(&mut self, generation: u64, stream: OutputStream, text: String) {
        if generation != self.generation || self.session.is_none() {
            trace!(generation, "dropping output of a replaced session");
            return;
        }

        self.ui.publish(UiEvent::Output {
            stream,
            text: text.clone(),
        });
        if stream == OutputStream::Stderr {
            return;
        }
        let _ = self.channels.output.send(Arc::from(text.as_str()));

        if usage::mentions_usage_limit(&text) {
            if let Some(id) = self.processing_item() {
                if let Some(hit) = usage::detect(&text, Local::now()) {
                    self.on_usage_limit(id, hit).await;
                }
            }
            return;
        }

        if let Some(marker) = auth_failure(&text) {
            self.on_auth_failure(marker).await;
            return;
        }

        if has_permission_prompt(&text) {
            if !self.ready {
                self.become_ready(
                    "CLI session is waiting for permission. Answer with the key commands.",
                );
            }
            return;
        }

        if !self.ready && is_startup_ready(&text) {
            self.become_ready("CLI session started and ready");
        }
    }

    async fn on_auth_failure(&mut self, marker: &str) {
        warn!(marker, "CLI reported an authentication failure");
        self.set_ready(false);
        if let Some(id) = self.processing_item() {
            self.fail_item(&id, AppError::Authentication(marker.to_owned()).to_string());
        }
        self.current = None;
        if let Some(delivery) = self.delivery.take() {
            delivery.cancel.cancel();
        }
        self.queue_changed().await;
        self.state_changed();
        self.ui.notice(
            NoticeLevel::Error,
            "CLI authentication failed. Log in with the CLI, then reset and restart the session.",
        );
    }

    async fn on_exit(&mut self, generation: u64, kind: ExitKind) {
        if generation != self.generation || self.session.is_none() {
            debug!(generation, "ignoring exit of a replaced session");
            return;
        }

        let was_processing = self.processing;
        let reason = match &kind {
            ExitKind::Closed(code) => format!(
                "process closed unexpectedly (code: {})",
                code.map_or_else(|| "none".to_owned(), |c| c.to_string())
            ),
            ExitKind::Failed(error) => format!("process error: {error}"),
        };
        info!(generation, reason, "session process ended");
        self.tear_down_session(Some(&reason)).await;

        let (level, text) = match (kind, was_processing) {
            (ExitKind::Closed(_), true) => (
                NoticeLevel::Warning,
                format!("CLI {reason} while processing. Start the session again to continue."),
            ),
            (ExitKind::Failed(_), true) => (NoticeLevel::Error, format!("CLI {reason}")),
            (_, false) => (NoticeLevel::Info, "CLI session ended".to_owned()),
        };
        self.ui.notice(level, text);
    }

    async fn on_health_tick(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        if !self.ready || session.is_healthy() {
            trace!(generation, "session healthy");
            return;
        }

        warn!(generation, "session became unhealthy");
        self.tear_down_session(Some("process became unhealthy")).await;
        self.ui.notice(
            NoticeLevel::Warning,
            "CLI process became unhealthy. Start the session again to continue.",
        );
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    fn try_auto_start(&mut self) {
        let should_start = self.ready
            && self.delivery.is_none()
            && !self.queue.has(MessageStatus::Processing)
            && self.queue.has(MessageStatus::Pending)
            && !self.queue.has(MessageStatus::Waiting)
            && (self.processing || self.queue.count(MessageStatus::Pending) == 1);
        if !should_start {
            return;
        }
        if !self.processing {
            info!("auto-starting processing");
            self.processing = true;
            self.state_changed();
        }
        self.schedule(AUTO_START_DELAY, Event::ProcessNext);
    }

    async fn process_next(&mut self) {
        if !self.processing {
            trace!("processing disabled");
            return;
        }
        if self.queue.is_empty() {
            self.ui
                .notice(NoticeLevel::Info, "Queue is empty. Add messages to continue.");
            return;
        }
        if self.delivery.is_some() || self.queue.has(MessageStatus::Processing) {
            trace!("a message is already in flight");
            return;
        }

        let Some((id, text)) = self
            .queue
            .next_pending()
            .map(|m| (m.id.clone(), m.text.clone()))
        else {
            self.check_history_end().await;
            if !self.queue.has(MessageStatus::Waiting) {
                self.ui.notice(NoticeLevel::Info, "All messages processed");
            }
            return;
        };

        if self.session.is_none() {
            warn!("no session to process messages");
            self.processing = false;
            self.state_changed();
            self.ui.notice(
                NoticeLevel::Warning,
                "No CLI session is running. Start the session to process messages.",
            );
            return;
        }
        if !self.ready {
            debug!("session not ready, waiting");
            self.spawn_ready_wait(ReadyPurpose::ProcessNext);
            return;
        }

        if let Err(err) = self.queue.set_processing(&id, Utc::now()) {
            warn!(%err, "cannot start message");
            return;
        }
        info!(message_id = %id, "processing message");
        self.current = Some(id.clone());
        self.queue_changed().await;
        self.state_changed();

        let cancel = self.cancel.child_token();
        drop(spawn_delivery(
            id.clone(),
            text,
            Arc::new(self.channels.handle.clone()),
            self.channels.output.clone(),
            self.channels.events.clone(),
            cancel.clone(),
        ));
        self.delivery = Some(ActiveDelivery {
            message_id: id,
            cancel,
        });
    }

    async fn on_delivery_finished(&mut self, message_id: String, result: Result<()>) {
        if self
            .delivery
            .as_ref()
            .is_some_and(|d| d.message_id == message_id)
        {
            self.delivery = None;
        }

        let still_processing = self
            .queue
            .get(&message_id)
            .is_some_and(|m| m.status == MessageStatus::Processing);
        if still_processing {
            match result {
                Ok(()) => {
                    if let Some(item) = self.queue.get_mut(&message_id) {
                        item.mark_completed(None, Utc::now());
                    }
                }
                Err(err) => self.fail_item(&message_id, format!("Processing failed: {err}")),
            }
        }
        if self.current.as_deref() == Some(message_id.as_str()) {
            self.current = None;
        }
        if still_processing {
            self.queue_changed().await;
            self.state_changed();
        }

        self.schedule(NEXT_MESSAGE_DELAY, Event::ProcessNext);
    }

    fn spawn_ready_wait(&mut self, purpose: ReadyPurpose) {
        if self.ready_waits.contains(&purpose) {
            return;
        }
        self.ready_waits.push(purpose);

        let ready = self.channels.ready.subscribe();
        let events = self.channels.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let ready = poll_ready(&ready, READY_POLL, READY_WAIT, &cancel).await;
            let _ = events.send(Event::ReadyWait { purpose, ready }).await;
        });
    }

    async fn on_ready_wait(&mut self, purpose: ReadyPurpose, ready: bool) {
        self.ready_waits.retain(|p| *p != purpose);
        match (purpose, ready) {
            (ReadyPurpose::ProcessNext, true) => self.process_next().await,
            (ReadyPurpose::ProcessNext, false) => {
                warn!("session did not become ready");
                self.processing = false;
                self.state_changed();
                self.ui.notice(
                    NoticeLevel::Warning,
                    "CLI session did not become ready. Processing stopped.",
                );
            }
            (ReadyPurpose::StartProcessing, true) => {
                self.processing = true;
                self.state_changed();
                self.ui.notice(NoticeLevel::Info, "Processing started");
                self.process_next().await;
            }
            (ReadyPurpose::StartProcessing, false) => {
                warn!("session did not become ready after start");
                self.ui.notice(
                    NoticeLevel::Error,
                    format!(
                        "CLI session did not become ready within {}s",
                        READY_WAIT.as_secs()
                    ),
                );
            }
        }
    }

    fn schedule(&self, delay: Duration, event: Event) {
        let events = self.channels.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(event).await;
                }
            }
        });
    }

    // ── Usage limits ─────────────────────────────────────────────────────

    async fn on_usage_limit(&mut self, message_id: String, hit: UsageLimitHit) {
        let now = Utc::now();
        warn!(%message_id, reset = %hit.reset_label, "usage limit reached");

        self.processing = false;
        if let Some(item) = self.queue.get_mut(&message_id) {
            item.mark_completed(Some(USAGE_LIMIT_OUTPUT.to_owned()), now);
        }
        self.current = None;
        if let Some(delivery) = self.delivery.take() {
            delivery.cancel.cancel();
        }

        if self.queue.waiting_continue().is_some() {
            debug!("continue ticket already waiting");
        } else {
            let ticket = MessageItem::continue_ticket(hit.wait_until, &hit.reset_label, now);
            let ticket_id = ticket.id.clone();
            self.queue.insert_after(Some(&message_id), ticket);
            self.arm_countdown(ticket_id, hit.wait_until);
            self.ui.notice(
                NoticeLevel::Warning,
                format!(
                    "Usage limit reached. Processing will resume automatically at {}",
                    hit.reset_label
                ),
            );
        }

        self.queue_changed().await;
        self.state_changed();
    }

    fn arm_countdown(&mut self, message_id: String, deadline: DateTime<Utc>) {
        let cancel = self.cancel.child_token();
        if let Some(previous) = self.countdowns.insert(message_id.clone(), cancel.clone()) {
            previous.cancel();
        }
        drop(spawn_countdown(
            message_id,
            deadline,
            self.channels.events.clone(),
            cancel,
        ));
    }

    fn on_countdown_tick(&mut self, message_id: &str, remaining_secs: u64) {
        let Some(item) = self.queue.get_mut(message_id) else {
            return;
        };
        if item.status != MessageStatus::Waiting {
            return;
        }
        item.wait_seconds = Some(remaining_secs);
        self.ui.publish(UiEvent::QueueUpdated {
            items: self.queue.items().to_vec(),
        });
    }

    async fn on_wait_elapsed(&mut self, message_id: String) {
        self.countdowns.remove(&message_id);
        let Some(item) = self.queue.get_mut(&message_id) else {
            return;
        };
        if item.status != MessageStatus::Waiting {
            return;
        }
        item.resume_from_wait();
        info!(%message_id, "usage limit reset, resuming");
        self.ui
            .notice(NoticeLevel::Info, "Usage limit has reset. Resuming processing.");
        self.queue_changed().await;

        if !self.processing {
            self.processing = true;
            self.state_changed();
        }
        self.schedule(RESUME_DELAY, Event::ProcessNext);
    }

    // ── State helpers ────────────────────────────────────────────────────

    fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
        self.channels.ready.send_replace(ready);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            running: self.session.is_some(),
            ready: self.ready,
            processing: self.processing,
            current_message_id: self.current.clone(),
        }
    }

    fn processing_item(&self) -> Option<String> {
        self.queue
            .items()
            .iter()
            .find(|m| m.status == MessageStatus::Processing)
            .map(|m| m.id.clone())
    }

    fn fail_item(&mut self, message_id: &str, mut error: String) {
        truncate_field(&mut error, self.config.queue.max_error_size);
        if let Some(item) = self.queue.get_mut(message_id) {
            warn!(%message_id, error = %error, "message failed");
            item.mark_error(error, Utc::now());
        }
    }

    fn state_changed(&self) {
        let snapshot = self.snapshot();
        self.ui.publish(UiEvent::SessionStateChanged(snapshot.clone()));
        self.notify_remote(RemoteUpdate::StatusChanged(snapshot));
    }

    async fn queue_changed(&mut self) {
        let items = self.queue.items().to_vec();
        self.ui.publish(UiEvent::QueueUpdated {
            items: items.clone(),
        });
        self.notify_remote(RemoteUpdate::QueueChanged { items });
        self.persist_pending().await;
        self.update_history().await;
    }

    fn notify_remote(&self, update: RemoteUpdate) {
        let Some(remote) = self.remote.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = remote.notify(update).await {
                debug!(%err, "remote notification failed");
            }
        });
    }

    async fn persist_pending(&mut self) {
        if !self.config.history.persist_pending_queue {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.queue.pending_snapshot();
        if let Err(err) = store.save_pending_queue(&self.workspace, &snapshot).await {
            warn!(%err, "failed to persist pending queue");
        }
    }

    // ── History ──────────────────────────────────────────────────────────

    async fn ensure_history_run(&mut self) {
        if self.history.as_ref().is_some_and(|run| !run.is_closed()) {
            return;
        }
        let mut run = HistoryRun::new(self.workspace.clone());
        run.refresh(self.queue.limited_items());
        info!(run_id = %run.id, "history run opened");
        self.history = Some(run);
        self.save_history().await;
    }

    async fn update_history(&mut self) {
        let items = self.queue.limited_items();
        let Some(run) = self.history.as_mut() else {
            return;
        };
        run.refresh(items);
        self.save_history().await;
    }

    async fn check_history_end(&mut self) {
        if self.queue.has_unfinished() {
            return;
        }
        let items = self.queue.limited_items();
        let Some(run) = self.history.as_mut() else {
            return;
        };
        run.refresh(items);
        run.ended_at = Some(Utc::now());
        info!(run_id = %run.id, total = run.total, "history run closed");
        self.save_history().await;
        self.history = None;
    }

    async fn save_history(&mut self) {
        if !self.config.history.auto_save {
            return;
        }
        let (Some(store), Some(run)) = (&self.store, &self.history) else {
            return;
        };
        if let Err(err) = store.save_history_run(run, self.config.history.max_runs).await {
            warn!(%err, "failed to save history run");
        }
    }
}
