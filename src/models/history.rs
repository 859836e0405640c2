//! Processing run history model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{MessageItem, MessageStatus};

/// One start-processing run over a workspace queue.
///
/// Opened when processing starts, refreshed on each status change and
/// closed once no item has work left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRun {
    /// Unique identifier (`run:` prefixed UUID v4).
    pub id: String,
    /// Workspace key the run belongs to.
    pub workspace: String,
    /// When processing started.
    pub started_at: DateTime<Utc>,
    /// When the run was closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Size-limited copies of the queue at the last refresh.
    pub messages: Vec<MessageItem>,
    /// Status of every message by id.
    pub status_map: BTreeMap<String, MessageStatus>,
    /// Queue length at the last refresh.
    pub total: usize,
    /// Completed items at the last refresh.
    pub completed: usize,
    /// Failed items at the last refresh.
    pub errors: usize,
    /// Waiting items at the last refresh.
    pub waiting: usize,
}

impl HistoryRun {
    /// Open a new run for `workspace`.
    #[must_use]
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            id: format!("run:{}", Uuid::new_v4()),
            workspace: workspace.into(),
            started_at: Utc::now(),
            ended_at: None,
            messages: Vec::new(),
            status_map: BTreeMap::new(),
            total: 0,
            completed: 0,
            errors: 0,
            waiting: 0,
        }
    }

    /// Replace the captured messages and recompute totals.
    pub fn refresh(&mut self, messages: Vec<MessageItem>) {
        let count = |status| messages.iter().filter(|m| m.status == status).count();
        self.total = messages.len();
        self.completed = count(MessageStatus::Completed);
        self.errors = count(MessageStatus::Error);
        self.waiting = count(MessageStatus::Waiting);
        self.status_map = messages.iter().map(|m| (m.id.clone(), m.status)).collect();
        self.messages = messages;
    }

    /// Whether the run has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }
}
