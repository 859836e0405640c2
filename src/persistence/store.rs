//! Workspace-keyed storage for the pending queue and run history.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{HistoryRun, MessageItem, MessageStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Storage seam used by the orchestrator.
pub trait QueueStore: Send + Sync {
    /// Replace the saved pending/waiting items of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    fn save_pending_queue<'a>(
        &'a self,
        workspace: &'a str,
        items: &'a [MessageItem],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Load the saved pending/waiting items of `workspace` in queue order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure or corrupt rows.
    fn load_pending_queue<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageItem>>> + Send + 'a>>;

    /// Insert or update `run`, keeping at most `max_runs` for its workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    fn save_history_run<'a>(
        &'a self,
        run: &'a HistoryRun,
        max_runs: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Runs of `workspace`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure or corrupt rows.
    fn list_history_runs<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryRun>>> + Send + 'a>>;

    /// Stamp `ended_at` on runs of `workspace` left open by a previous process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    fn close_open_runs<'a>(
        &'a self,
        workspace: &'a str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;
}

/// [`QueueStore`] backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    /// Create a store over `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    text: String,
    status: String,
    enqueued_at: String,
    error: Option<String>,
    wait_until: Option<i64>,
}

impl PendingRow {
    fn into_item(self) -> Result<MessageItem> {
        let status = MessageStatus::parse(&self.status)
            .map_err(|err| AppError::Db(format!("invalid pending status: {err}")))?;
        let enqueued_at = parse_ts(&self.enqueued_at, "enqueued_at")?;
        Ok(MessageItem {
            id: self.id,
            text: self.text,
            enqueued_at,
            status,
            output: None,
            error: self.error,
            processing_started_at: None,
            completed_at: None,
            wait_until: self.wait_until,
            wait_seconds: None,
        })
    }
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    workspace: String,
    started_at: String,
    ended_at: Option<String>,
    total: i64,
    completed: i64,
    errors: i64,
    waiting: i64,
    messages: String,
    status_map: String,
}

impl HistoryRow {
    fn into_run(self) -> Result<HistoryRun> {
        let count = |v: i64| usize::try_from(v).unwrap_or(0);
        Ok(HistoryRun {
            started_at: parse_ts(&self.started_at, "started_at")?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|s| parse_ts(s, "ended_at"))
                .transpose()?,
            messages: serde_json::from_str(&self.messages)
                .map_err(|e| AppError::Db(format!("invalid history messages: {e}")))?,
            status_map: serde_json::from_str(&self.status_map)
                .map_err(|e| AppError::Db(format!("invalid history status map: {e}")))?,
            total: count(self.total),
            completed: count(self.completed),
            errors: count(self.errors),
            waiting: count(self.waiting),
            id: self.id,
            workspace: self.workspace,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl QueueStore for SqliteStore {
    fn save_pending_queue<'a>(
        &'a self,
        workspace: &'a str,
        items: &'a [MessageItem],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self.db.begin().await?;
            sqlx::query("DELETE FROM pending_message WHERE workspace = ?1")
                .bind(workspace)
                .execute(&mut *tx)
                .await?;

            let persisted = items
                .iter()
                .filter(|m| matches!(m.status, MessageStatus::Pending | MessageStatus::Waiting));
            for (position, item) in persisted.enumerate() {
                sqlx::query(
                    "INSERT INTO pending_message (workspace, position, id, text, status, enqueued_at, error, wait_until)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .bind(workspace)
                .bind(to_i64(position))
                .bind(&item.id)
                .bind(&item.text)
                .bind(item.status.as_str())
                .bind(item.enqueued_at.to_rfc3339())
                .bind(&item.error)
                .bind(item.wait_until)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn load_pending_queue<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageItem>>> + Send + 'a>> {
        Box::pin(async move {
            let rows: Vec<PendingRow> = sqlx::query_as(
                "SELECT id, text, status, enqueued_at, error, wait_until
                 FROM pending_message
                 WHERE workspace = ?1
                 ORDER BY position ASC",
            )
            .bind(workspace)
            .fetch_all(self.db.as_ref())
            .await?;

            rows.into_iter().map(PendingRow::into_item).collect()
        })
    }

    fn save_history_run<'a>(
        &'a self,
        run: &'a HistoryRun,
        max_runs: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let messages = serde_json::to_string(&run.messages)
                .map_err(|e| AppError::Db(format!("failed to encode history messages: {e}")))?;
            let status_map = serde_json::to_string(&run.status_map)
                .map_err(|e| AppError::Db(format!("failed to encode status map: {e}")))?;

            sqlx::query(
                "INSERT INTO history_run (id, workspace, started_at, ended_at, total, completed, errors, waiting, messages, status_map)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    ended_at = excluded.ended_at,
                    total = excluded.total,
                    completed = excluded.completed,
                    errors = excluded.errors,
                    waiting = excluded.waiting,
                    messages = excluded.messages,
                    status_map = excluded.status_map",
            )
            .bind(&run.id)
            .bind(&run.workspace)
            .bind(run.started_at.to_rfc3339())
            .bind(run.ended_at.map(|t| t.to_rfc3339()))
            .bind(to_i64(run.total))
            .bind(to_i64(run.completed))
            .bind(to_i64(run.errors))
            .bind(to_i64(run.waiting))
            .bind(messages)
            .bind(status_map)
            .execute(self.db.as_ref())
            .await?;

            let trimmed = sqlx::query(
                "DELETE FROM history_run
                 WHERE workspace = ?1 AND id NOT IN (
                    SELECT id FROM history_run WHERE workspace = ?1
                    ORDER BY started_at DESC LIMIT ?2
                 )",
            )
            .bind(&run.workspace)
            .bind(to_i64(max_runs))
            .execute(self.db.as_ref())
            .await?
            .rows_affected();
            if trimmed > 0 {
                tracing::debug!(trimmed, "trimmed old history runs");
            }
            Ok(())
        })
    }

    fn list_history_runs<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryRun>>> + Send + 'a>> {
        Box::pin(async move {
            let rows: Vec<HistoryRow> = sqlx::query_as(
                "SELECT id, workspace, started_at, ended_at, total, completed, errors, waiting, messages, status_map
                 FROM history_run
                 WHERE workspace = ?1
                 ORDER BY started_at DESC",
            )
            .bind(workspace)
            .fetch_all(self.db.as_ref())
            .await?;

            rows.into_iter().map(HistoryRow::into_run).collect()
        })
    }

    fn close_open_runs<'a>(
        &'a self,
        workspace: &'a str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE history_run SET ended_at = ?2 WHERE workspace = ?1 AND ended_at IS NULL",
            )
            .bind(workspace)
            .bind(at.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
    }
}
