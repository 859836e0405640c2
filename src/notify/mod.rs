//! Events published to the UI layer and the remote notifier.

pub mod webhook;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{DependencyReport, MessageItem, SessionSnapshot};
use crate::Result;

pub use webhook::WebhookNotifier;

/// Capacity of the UI event channel.
pub const UI_EVENT_CAPACITY: usize = 1024;

/// Severity of an operator notice.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something needs attention but work continues.
    Warning,
    /// Something failed.
    Error,
}

/// Which subprocess stream produced output.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Structured update for the UI layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// The queue changed.
    QueueUpdated {
        /// Full queue in order.
        items: Vec<MessageItem>,
    },
    /// Readiness or processing flags changed.
    SessionStateChanged(SessionSnapshot),
    /// Raw subprocess output.
    Output {
        /// Source stream.
        stream: OutputStream,
        /// Decoded text.
        text: String,
    },
    /// Operator-facing message.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Message text.
        text: String,
    },
    /// Result of a dependency check.
    DependencyReport(DependencyReport),
}

/// Sender side of the UI event channel.
#[derive(Debug, Clone)]
pub struct UiPublisher {
    tx: broadcast::Sender<UiEvent>,
}

impl UiPublisher {
    /// Create a publisher with its own channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(UI_EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn publish(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            trace!("ui event dropped: no subscribers");
        }
    }

    /// Publish a notice.
    pub fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        self.publish(UiEvent::Notice {
            level,
            text: text.into(),
        });
    }
}

impl Default for UiPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot sent to the remote notifier.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RemoteUpdate {
    /// Queue contents changed.
    QueueChanged {
        /// Full queue in order.
        items: Vec<MessageItem>,
    },
    /// Session flags changed.
    StatusChanged(SessionSnapshot),
}

/// Best-effort outbound notification seam.
pub trait RemoteNotifier: Send + Sync {
    /// Deliver `update`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Remote` on delivery failure; callers log and
    /// discard it.
    fn notify(&self, update: RemoteUpdate) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
