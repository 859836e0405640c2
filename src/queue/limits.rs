//! Field truncation and queue statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::QueueConfig;
use crate::models::MessageItem;

/// Appended to any field cut down to its cap.
pub const TRUNCATION_MARKER: &str = "... [truncated due to size limit]";

/// Characters reserved at the end of a capped field.
const MARKER_RESERVE: usize = 100;

/// Per-item bookkeeping overhead counted by [`QueueStats::approx_bytes`].
const ITEM_OVERHEAD_BYTES: usize = 200;

/// Cut `value` down to at most `cap` characters, appending the marker.
///
/// Returns `true` when the value was changed.
pub fn truncate_field(value: &mut String, cap: usize) -> bool {
    let len = value.chars().count();
    if len <= cap {
        return false;
    }
    let keep = cap.saturating_sub(MARKER_RESERVE.max(TRUNCATION_MARKER.len()));
    let cut = value
        .char_indices()
        .nth(keep)
        .map_or(value.len(), |(idx, _)| idx);
    value.truncate(cut);
    value.push_str(TRUNCATION_MARKER);
    true
}

/// Apply the text, output and error caps to `item`.
///
/// Returns `true` if any field was truncated.
pub fn enforce_message_limits(item: &mut MessageItem, limits: &QueueConfig) -> bool {
    let mut changed = truncate_field(&mut item.text, limits.max_message_size);
    if changed {
        debug!(message_id = %item.id, cap = limits.max_message_size, "message text truncated");
    }
    if let Some(output) = item.output.as_mut() {
        if truncate_field(output, limits.max_output_size) {
            debug!(message_id = %item.id, cap = limits.max_output_size, "message output truncated");
            changed = true;
        }
    }
    if let Some(error) = item.error.as_mut() {
        if truncate_field(error, limits.max_error_size) {
            debug!(message_id = %item.id, cap = limits.max_error_size, "message error truncated");
            changed = true;
        }
    }
    changed
}

/// Size-limited clone of `item`, used for persistence and history.
#[must_use]
pub fn limited_copy(item: &MessageItem, limits: &QueueConfig) -> MessageItem {
    let mut copy = item.clone();
    enforce_message_limits(&mut copy, limits);
    copy
}

/// Memory and age summary of the queue.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Items in the queue.
    pub total: usize,
    /// Completed items.
    pub completed: usize,
    /// Pending items.
    pub pending: usize,
    /// Rough footprint of stored strings plus per-item overhead.
    pub approx_bytes: usize,
    /// Age of the oldest item in milliseconds.
    pub oldest_age_ms: i64,
    /// The queue is longer than the cleanup threshold.
    pub needs_cleanup: bool,
}

impl QueueStats {
    /// Compute statistics over `items`.
    #[must_use]
    pub fn compute(items: &[MessageItem], cleanup_threshold: usize, now: DateTime<Utc>) -> Self {
        let approx_bytes = items
            .iter()
            .map(|m| {
                m.text.len()
                    + m.output.as_ref().map_or(0, String::len)
                    + m.error.as_ref().map_or(0, String::len)
                    + ITEM_OVERHEAD_BYTES
            })
            .sum();
        let oldest_age_ms = items
            .iter()
            .map(|m| m.enqueued_at)
            .min()
            .map_or(0, |oldest| (now - oldest).num_milliseconds().max(0));

        Self {
            total: items.len(),
            completed: items
                .iter()
                .filter(|m| m.status == crate::models::MessageStatus::Completed)
                .count(),
            pending: items
                .iter()
                .filter(|m| m.status == crate::models::MessageStatus::Pending)
                .count(),
            approx_bytes,
            oldest_age_ms,
            needs_cleanup: items.len() > cleanup_threshold,
        }
    }

    /// Multi-line summary for the operator.
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_precision_loss)]
        let megabytes = self.approx_bytes as f64 / (1024.0 * 1024.0);
        #[allow(clippy::cast_precision_loss)]
        let oldest_hours = self.oldest_age_ms as f64 / 3_600_000.0;
        format!(
            "Queue: {} messages ({} completed, {} pending)\nMemory: ~{megabytes:.2}MB\nOldest message: {oldest_hours:.1}h ago\nCleanup needed: {}",
            self.total,
            self.completed,
            self.pending,
            if self.needs_cleanup { "Yes" } else { "No" },
        )
    }
}
