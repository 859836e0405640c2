//! Queue item model and its status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Text of the synthetic item inserted when a usage limit is hit.
pub const CONTINUE_TEXT: &str = "continue";

/// Output recorded on the item that was in flight when the limit hit.
pub const USAGE_LIMIT_OUTPUT: &str = "Completed but hit usage limit";

/// Lifecycle status of a queued message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Queued and eligible for delivery.
    Pending,
    /// Currently being delivered to the CLI.
    Processing,
    /// Delivered and answered.
    Completed,
    /// Delivery failed.
    Error,
    /// Parked until a usage-limit reset instant.
    Waiting,
}

impl MessageStatus {
    /// Stable lowercase name used in persistence and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Waiting => "waiting",
        }
    }

    /// Parse the name produced by [`Self::as_str`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for unknown names.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "waiting" => Ok(Self::Waiting),
            other => Err(AppError::InvalidInput(format!(
                "unknown message status: {other}"
            ))),
        }
    }

    /// Whether the item still has work ahead of it.
    #[must_use]
    pub fn is_unfinished(self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Waiting)
    }
}

/// A user message queued for delivery to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Text typed into the CLI.
    pub text: String,
    /// When the item was enqueued or last edited.
    pub enqueued_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// Captured output or completion note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When delivery began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    /// When delivery finished (successfully or not).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Resume instant for waiting items, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<i64>,
    /// Seconds remaining until `wait_until`, refreshed by the countdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
}

impl MessageItem {
    /// Construct a pending item with a generated identifier.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            enqueued_at: Utc::now(),
            status: MessageStatus::Pending,
            output: None,
            error: None,
            processing_started_at: None,
            completed_at: None,
            wait_until: None,
            wait_seconds: None,
        }
    }

    /// Construct the waiting `continue` ticket that resumes after a limit.
    #[must_use]
    pub fn continue_ticket(wait_until: DateTime<Utc>, reset_label: &str, now: DateTime<Utc>) -> Self {
        let remaining = (wait_until - now).num_seconds().max(0);
        Self {
            status: MessageStatus::Waiting,
            error: Some(format!(
                "Usage limit reached - will resume at {reset_label}"
            )),
            wait_until: Some(wait_until.timestamp_millis()),
            wait_seconds: Some(u64::try_from(remaining).unwrap_or(0)),
            ..Self::new(CONTINUE_TEXT)
        }
    }

    /// Whether this is a waiting `continue` ticket.
    #[must_use]
    pub fn is_continue_ticket(&self) -> bool {
        self.status == MessageStatus::Waiting && self.text == CONTINUE_TEXT
    }

    /// Transition to processing.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = MessageStatus::Processing;
        self.processing_started_at = Some(now);
    }

    /// Transition to completed with an optional output note.
    pub fn mark_completed(&mut self, output: Option<String>, now: DateTime<Utc>) {
        self.status = MessageStatus::Completed;
        self.completed_at = Some(now);
        if output.is_some() {
            self.output = output;
        }
    }

    /// Transition to error with a description.
    pub fn mark_error(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = MessageStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Release a waiting item back to pending, clearing its wait fields.
    pub fn resume_from_wait(&mut self) {
        self.status = MessageStatus::Pending;
        self.wait_until = None;
        self.wait_seconds = None;
        self.error = None;
    }

    /// Resume instant of a waiting item.
    #[must_use]
    pub fn wait_deadline(&self) -> Option<DateTime<Utc>> {
        self.wait_until.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}
