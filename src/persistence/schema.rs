//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so the bootstrap
//! is safe to re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS pending_message (
    workspace       TEXT NOT NULL,
    position        INTEGER NOT NULL,
    id              TEXT NOT NULL,
    text            TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','waiting')),
    enqueued_at     TEXT NOT NULL,
    error           TEXT,
    wait_until      INTEGER,
    PRIMARY KEY (workspace, id)
);

CREATE INDEX IF NOT EXISTS idx_pending_message_order
    ON pending_message (workspace, position);

CREATE TABLE IF NOT EXISTS history_run (
    id              TEXT PRIMARY KEY NOT NULL,
    workspace       TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    total           INTEGER NOT NULL DEFAULT 0,
    completed       INTEGER NOT NULL DEFAULT 0,
    errors          INTEGER NOT NULL DEFAULT 0,
    waiting         INTEGER NOT NULL DEFAULT 0,
    messages        TEXT NOT NULL,
    status_map      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_run_workspace
    ON history_run (workspace, started_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
