//! Poll run audit rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::parse_timestamp;
use crate::storage::database::{Database, Result};

/// One recorded poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    pub inboxes_polled: u32,
    pub emails_processed: u32,
    /// The serialized run summary.
    pub summary_json: String,
    pub error: Option<String>,
}

/// Inserts a run row.
pub async fn insert(db: &Database, run: &PollRun) -> Result<()> {
    let run = run.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO poll_runs (
                id, started_at, finished_at, success, duration_ms, inboxes_polled,
                emails_processed, summary_json, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                run.id,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.success as i32,
                run.duration_ms as i64,
                run.inboxes_polled,
                run.emails_processed,
                run.summary_json,
                run.error,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Returns the most recently started run.
pub async fn latest(db: &Database) -> Result<Option<PollRun>> {
    db.with_conn(|conn| {
        let run = conn
            .query_row(
                r#"
                SELECT id, started_at, finished_at, success, duration_ms, inboxes_polled,
                       emails_processed, summary_json, error
                FROM poll_runs ORDER BY started_at DESC LIMIT 1
                "#,
                [],
                |row| {
                    let started_at: Option<String> = row.get(1)?;
                    let finished_at: Option<String> = row.get(2)?;
                    let duration_ms: i64 = row.get(4)?;
                    Ok(PollRun {
                        id: row.get(0)?,
                        started_at: parse_timestamp(started_at).unwrap_or_else(Utc::now),
                        finished_at: parse_timestamp(finished_at).unwrap_or_else(Utc::now),
                        success: row.get::<_, i32>(3)? != 0,
                        duration_ms: duration_ms.max(0) as u64,
                        inboxes_polled: row.get(5)?,
                        emails_processed: row.get(6)?,
                        summary_json: row.get(7)?,
                        error: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(run)
    })
    .await
}
