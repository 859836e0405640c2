//! Screen analysis deciding when the CLI has finished answering.
//!
//! [`ScreenAnalyzer`] is a pure classifier fed with output chunks and
//! polled on a fixed cadence:
//!
//! - `Unknown`: no prompt on screen yet.
//! - `Busy`: a prompt is visible but output arrived within the debounce
//!   window, so the screen may still change.
//! - `PermissionWait`: the CLI asked a permission question; only an idle
//!   hint printed after it leaves this state. A human answers it with
//!   keypresses. An answered question is not scanned again.
//! - `Ready`: a prompt is visible and the screen has been quiet for the
//!   debounce window.
//!
//! [`wait_for_ready`] drives the analyzer from a live output subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::patterns::{permission_prompt_end, screen_looks_ready, READY_HINT};
use super::screen::ScreenBuffer;
use crate::{AppError, Result};

/// Cadence of screen analysis.
pub const ANALYSIS_INTERVAL: Duration = Duration::from_millis(500);

/// Silence required before a visible prompt counts as ready.
pub const DEBOUNCE: Duration = Duration::from_millis(1000);

/// Longest a single response may take.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Classification of the current screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    /// No prompt visible.
    Unknown,
    /// Prompt visible but output is still arriving.
    Busy,
    /// A permission question is on screen.
    PermissionWait,
    /// Prompt visible and output has settled.
    Ready,
}

/// Outcome of one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Resulting classification.
    pub state: ScreenState,
    /// This pass is the one that detected the permission question.
    pub permission_entered: bool,
}

/// Screen buffer plus the bookkeeping needed to classify it.
#[derive(Debug, Clone)]
pub struct ScreenAnalyzer {
    screen: ScreenBuffer,
    last_output: Instant,
    waiting_for_permission: bool,
}

impl ScreenAnalyzer {
    /// Start analysis at `now` with an empty screen.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            screen: ScreenBuffer::new(),
            last_output: now,
            waiting_for_permission: false,
        }
    }

    /// Current screen contents.
    #[must_use]
    pub fn screen(&self) -> &str {
        self.screen.as_str()
    }

    /// Record an output chunk received at `now`.
    pub fn on_chunk(&mut self, chunk: &str, now: Instant) {
        if self.screen.push(chunk) {
            debug!("clear screen detected, screen buffer reset");
        }
        self.last_output = now;
    }

    /// Classify the screen at `now`.
    pub fn evaluate(&mut self, now: Instant) -> Evaluation {
        if self.waiting_for_permission {
            let Some(at) = self.screen.since_mark().rfind(READY_HINT) else {
                return Evaluation {
                    state: ScreenState::PermissionWait,
                    permission_entered: false,
                };
            };
            debug!("permission resolved");
            self.screen.set_mark(self.screen.mark() + at + READY_HINT.len());
            self.waiting_for_permission = false;
        }

        if let Some(end) = permission_prompt_end(self.screen.since_mark()) {
            self.screen.set_mark(self.screen.mark() + end);
            self.waiting_for_permission = true;
            return Evaluation {
                state: ScreenState::PermissionWait,
                permission_entered: true,
            };
        }

        let state = if !screen_looks_ready(self.screen.as_str()) {
            ScreenState::Unknown
        } else if now.saturating_duration_since(self.last_output) >= DEBOUNCE {
            ScreenState::Ready
        } else {
            ScreenState::Busy
        };
        Evaluation {
            state,
            permission_entered: false,
        }
    }
}

/// Wait until the CLI shows a settled prompt.
///
/// Subscribes to `output` for the duration of the wait. `on_permission`
/// runs once each time a permission question appears.
///
/// # Errors
///
/// - `AppError::ReadinessTimeout` after `timeout`.
/// - `AppError::ProcessExited` if the output stream closes.
/// - `AppError::Cancelled` if `cancel` fires.
pub async fn wait_for_ready(
    mut output: broadcast::Receiver<Arc<str>>,
    timeout: Duration,
    cancel: CancellationToken,
    mut on_permission: impl FnMut() + Send,
) -> Result<()> {
    let start = Instant::now();
    let deadline = tokio::time::sleep_until(start + timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(start + ANALYSIS_INTERVAL, ANALYSIS_INTERVAL);
    let mut analyzer = ScreenAnalyzer::new(start);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                return Err(AppError::Cancelled("readiness wait cancelled".into()));
            }

            () = &mut deadline => {
                warn!(timeout_secs = timeout.as_secs(), "timed out waiting for the CLI to become ready");
                return Err(AppError::ReadinessTimeout(
                    "timed out waiting for the CLI to finish processing".into(),
                ));
            }

            chunk = output.recv() => match chunk {
                Ok(text) => analyzer.on_chunk(&text, Instant::now()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "screen analysis lagged behind output");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AppError::ProcessExited("output stream closed".into()));
                }
            },

            now = ticker.tick() => {
                let evaluation = analyzer.evaluate(now);
                if evaluation.permission_entered {
                    info!("permission prompt detected while waiting for response");
                    on_permission();
                }
                if evaluation.state == ScreenState::Ready {
                    debug!("screen settled on a ready prompt");
                    return Ok(());
                }
            }
        }
    }
}
