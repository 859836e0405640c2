//! Ordered message queue and its status transitions.
//!
//! [`MessageQueue`] is plain data owned by the orchestrator actor. It never
//! performs I/O; callers persist and publish after each mutation.

pub mod limits;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::models::{MessageItem, MessageStatus};
use crate::{AppError, Result};

pub use limits::{QueueStats, TRUNCATION_MARKER};

/// What eviction did when the queue grew past `max_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    /// Completed items dropped.
    pub removed: usize,
    /// The queue is still over its limit because nothing else was evictable.
    pub still_full: bool,
}

/// Result of [`MessageQueue::enqueue`] and [`MessageQueue::duplicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Identifier of the new item.
    pub id: String,
    /// Whether the text was cut to the message cap.
    pub truncated: bool,
    /// Completed items evicted to make room.
    pub evicted: usize,
}

/// Ordered sequence of [`MessageItem`]s with size limits.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    items: Vec<MessageItem>,
    limits: QueueConfig,
}

impl MessageQueue {
    /// Create an empty queue governed by `limits`.
    #[must_use]
    pub fn new(limits: QueueConfig) -> Self {
        Self {
            items: Vec::new(),
            limits,
        }
    }

    /// Size limits in force.
    #[must_use]
    pub fn limits(&self) -> &QueueConfig {
        &self.limits
    }

    /// All items in queue order.
    #[must_use]
    pub fn items(&self) -> &[MessageItem] {
        &self.items
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MessageItem> {
        self.items.iter().find(|m| m.id == id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut MessageItem> {
        self.items.iter_mut().find(|m| m.id == id)
    }

    /// Position of an item by id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|m| m.id == id)
    }

    /// Number of items with `status`.
    #[must_use]
    pub fn count(&self, status: MessageStatus) -> usize {
        self.items.iter().filter(|m| m.status == status).count()
    }

    /// Whether any item has `status`.
    #[must_use]
    pub fn has(&self, status: MessageStatus) -> bool {
        self.items.iter().any(|m| m.status == status)
    }

    /// First pending item by position.
    #[must_use]
    pub fn next_pending(&self) -> Option<&MessageItem> {
        self.items.iter().find(|m| m.status == MessageStatus::Pending)
    }

    /// The outstanding waiting `continue` ticket, if any.
    #[must_use]
    pub fn waiting_continue(&self) -> Option<&MessageItem> {
        self.items.iter().find(|m| m.is_continue_ticket())
    }

    /// Whether any item still has work ahead of it.
    #[must_use]
    pub fn has_unfinished(&self) -> bool {
        self.items.iter().any(|m| m.status.is_unfinished())
    }

    /// Append a pending item for `text`, applying caps and the length limit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` when the queue is at `max_size` and
    /// too few completed items exist to make room. Nothing is inserted or
    /// evicted in that case.
    pub fn enqueue(&mut self, text: impl Into<String>) -> Result<EnqueueOutcome> {
        let evicted = self.make_room()?;
        let mut item = MessageItem::new(text);
        let truncated = limits::enforce_message_limits(&mut item, &self.limits);
        let id = item.id.clone();
        self.items.push(item);
        debug!(message_id = %id, truncated, len = self.items.len(), "message enqueued");
        Ok(EnqueueOutcome {
            id,
            truncated,
            evicted,
        })
    }

    /// Insert a prepared item directly after `anchor` (or at the tail).
    ///
    /// Returns the index the item landed at.
    pub fn insert_after(&mut self, anchor: Option<&str>, item: MessageItem) -> usize {
        let index = anchor
            .and_then(|id| self.position(id))
            .map_or(self.items.len(), |pos| pos + 1);
        self.items.insert(index, item);
        index
    }

    /// Re-insert recovered items at the tail, preserving their state.
    pub fn restore(&mut self, recovered: Vec<MessageItem>) {
        for mut item in recovered {
            if self.get(&item.id).is_some() {
                continue;
            }
            limits::enforce_message_limits(&mut item, &self.limits);
            self.items.push(item);
        }
    }

    /// Replace the text of an item and refresh its timestamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no item has `id`.
    pub fn edit(&mut self, id: &str, text: impl Into<String>) -> Result<()> {
        let cap = self.limits.max_message_size;
        let item = self
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?;
        item.text = text.into();
        limits::truncate_field(&mut item.text, cap);
        item.enqueued_at = Utc::now();
        Ok(())
    }

    /// Remove an item, returning it if it existed.
    pub fn remove(&mut self, id: &str) -> Option<MessageItem> {
        let pos = self.position(id)?;
        Some(self.items.remove(pos))
    }

    /// Insert a fresh pending copy of an item.
    ///
    /// The copy goes right after the original, or at the tail when the
    /// original is already completed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no item has `id` and
    /// `AppError::InvalidInput` when the queue is full.
    pub fn duplicate(&mut self, id: &str) -> Result<EnqueueOutcome> {
        let original = self
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?;
        let text = original.text.clone();
        let completed = original.status == MessageStatus::Completed;

        // Eviction may drop a completed original; its copy goes to the tail anyway.
        let evicted = self.make_room()?;
        let copy = MessageItem::new(text);
        let copy_id = copy.id.clone();
        match self.position(id) {
            Some(pos) if !completed => self.items.insert(pos + 1, copy),
            _ => self.items.push(copy),
        }
        Ok(EnqueueOutcome {
            id: copy_id,
            truncated: false,
            evicted,
        })
    }

    /// Move the item at `from` to `to`; out-of-range indices are ignored.
    ///
    /// Returns `true` if the queue changed.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        true
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Mark `id` as processing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if another item is already
    /// processing or `id` is not pending, and `AppError::NotFound` if it
    /// does not exist.
    pub fn set_processing(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(active) = self
            .items
            .iter()
            .find(|m| m.status == MessageStatus::Processing && m.id != id)
        {
            return Err(AppError::InvalidInput(format!(
                "message {} is already processing",
                active.id
            )));
        }
        let item = self
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?;
        if item.status != MessageStatus::Pending {
            return Err(AppError::InvalidInput(format!(
                "message {id} is {} and cannot start processing",
                item.status.as_str()
            )));
        }
        item.mark_processing(now);
        Ok(())
    }

    /// Evict enough completed items for one more to fit under `max_size`.
    fn make_room(&mut self) -> Result<usize> {
        let max = self.limits.max_size;
        if self.items.len() < max {
            return Ok(0);
        }
        let needed = self.items.len() + 1 - max;
        if self.count(MessageStatus::Completed) < needed {
            warn!(len = self.items.len(), max, "queue full, nothing evictable");
            return Err(AppError::InvalidInput(format!(
                "queue is full ({max} messages)"
            )));
        }
        Ok(self.evict_oldest_completed(needed))
    }

    /// Evict the oldest completed items until the queue fits `max_size`.
    pub fn enforce_size_limit(&mut self) -> Eviction {
        let max = self.limits.max_size;
        if self.items.len() <= max {
            return Eviction::default();
        }
        warn!(len = self.items.len(), max, "queue size limit exceeded");
        let removed = self.evict_oldest_completed(self.items.len() - max);
        Eviction {
            removed,
            still_full: self.items.len() > max,
        }
    }

    fn evict_oldest_completed(&mut self, excess: usize) -> usize {
        let mut completed: Vec<(DateTime<Utc>, usize)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status == MessageStatus::Completed)
            .map(|(idx, m)| (m.enqueued_at, idx))
            .collect();
        completed.sort();
        let mut doomed: Vec<usize> = completed.into_iter().take(excess).map(|(_, idx)| idx).collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for idx in &doomed {
            self.items.remove(*idx);
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "evicted oldest completed messages");
        }
        doomed.len()
    }

    /// Drop completed items enqueued more than `retention_hours` ago.
    ///
    /// Returns the number of items removed.
    pub fn cleanup_completed_older_than(&mut self, now: DateTime<Utc>, retention_hours: u32) -> usize {
        let retention = chrono::Duration::hours(i64::from(retention_hours));
        let before = self.items.len();
        self.items
            .retain(|m| m.status != MessageStatus::Completed || now - m.enqueued_at < retention);
        let removed = before - self.items.len();
        if removed > 0 {
            info!(removed, retention_hours, "cleaned up old completed messages");
        }
        removed
    }

    /// Size-limited copies of the items that must survive a restart.
    #[must_use]
    pub fn pending_snapshot(&self) -> Vec<MessageItem> {
        self.items
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Pending | MessageStatus::Waiting))
            .map(|m| limits::limited_copy(m, &self.limits))
            .collect()
    }

    /// Size-limited copies of every item.
    #[must_use]
    pub fn limited_items(&self) -> Vec<MessageItem> {
        self.items
            .iter()
            .map(|m| limits::limited_copy(m, &self.limits))
            .collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        QueueStats::compute(&self.items, self.limits.cleanup_threshold, now)
    }
}
