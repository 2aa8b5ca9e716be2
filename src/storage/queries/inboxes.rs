//! Inbox registry queries.
//!
//! Inbox rows are created by an admin flow; the poller reads them and writes
//! back the cursor, counters and health once per cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::parse_timestamp;
use crate::domain::{CredentialSource, InboxConfig, InboxHealth, InboxId, InboxPurpose};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    id, email, display_name, purpose, refresh_token, refresh_token_ref, sync_cursor,
    poll_interval_seconds, label_filter, max_results, ai_parsing_enabled,
    ai_daily_budget_cents, is_active, poll_enabled, consecutive_errors, health,
    last_error, last_polled_at, total_emails_processed, total_pos_correlated
"#;

/// Inserts an inbox row.
pub async fn insert(db: &Database, inbox: &InboxConfig) -> Result<()> {
    let inbox = inbox.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let (token, reference) = match &inbox.credentials {
            CredentialSource::RefreshToken { token } => (Some(token.clone()), None),
            CredentialSource::Reference { reference } => (None, Some(reference.clone())),
            CredentialSource::Missing => (None, None),
        };

        conn.execute(
            r#"
            INSERT INTO inboxes (
                id, email, display_name, purpose, refresh_token, refresh_token_ref,
                sync_cursor, poll_interval_seconds, label_filter, max_results,
                ai_parsing_enabled, ai_daily_budget_cents, is_active, poll_enabled,
                consecutive_errors, health, last_error, last_polled_at,
                total_emails_processed, total_pos_correlated, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22
            )
            "#,
            params![
                inbox.id.0,
                inbox.email,
                inbox.display_name,
                inbox.purpose.as_str(),
                token,
                reference,
                inbox.sync_cursor,
                inbox.poll_interval.as_secs() as i64,
                inbox.label_filter,
                inbox.max_results,
                inbox.ai_parsing_enabled as i32,
                inbox.ai_daily_budget_cents,
                inbox.is_active as i32,
                inbox.poll_enabled as i32,
                inbox.consecutive_errors,
                inbox.health.as_str(),
                inbox.last_error,
                inbox.last_polled_at.map(|t| t.to_rfc3339()),
                inbox.total_emails_processed as i64,
                inbox.total_pos_correlated as i64,
                now,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves an inbox by id.
pub async fn get_by_id(db: &Database, id: &InboxId) -> Result<Option<InboxConfig>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let sql = format!("SELECT {} FROM inboxes WHERE id = ?1", SELECT_COLUMNS);
        let inbox = conn.query_row(&sql, [&id.0], row_to_inbox).optional()?;
        Ok(inbox)
    })
    .await
}

/// Lists inboxes that are active and have polling enabled.
pub async fn list_pollable(db: &Database) -> Result<Vec<InboxConfig>> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM inboxes WHERE is_active = 1 AND poll_enabled = 1 ORDER BY email",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_inbox)?;
        let inboxes: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(inboxes?)
    })
    .await
}

/// Records a successful cycle.
///
/// The cursor is only replaced when `cursor` is `Some`; counters are
/// incremented, and errors and health are reset.
pub async fn record_success(
    db: &Database,
    id: &InboxId,
    cursor: Option<String>,
    emails_processed: u64,
    pos_correlated: u64,
    polled_at: DateTime<Utc>,
) -> Result<()> {
    let id = id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            UPDATE inboxes SET
                sync_cursor = COALESCE(?1, sync_cursor),
                total_emails_processed = total_emails_processed + ?2,
                total_pos_correlated = total_pos_correlated + ?3,
                consecutive_errors = 0,
                health = 'healthy',
                last_error = NULL,
                last_polled_at = ?4,
                updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                cursor,
                emails_processed as i64,
                pos_correlated as i64,
                polled_at.to_rfc3339(),
                id.0,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Records a failed cycle and returns the resulting health.
///
/// The inbox stays active regardless of how many cycles fail.
pub async fn record_failure(
    db: &Database,
    id: &InboxId,
    error: &str,
    unhealthy_after: u32,
) -> Result<InboxHealth> {
    let id = id.clone();
    let error = error.to_string();

    db.transaction(move |tx| {
        let errors: u32 = tx
            .query_row(
                "SELECT consecutive_errors FROM inboxes WHERE id = ?1",
                [&id.0],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let errors = errors.saturating_add(1);
        let health = InboxHealth::from_error_count(errors, unhealthy_after);

        tx.execute(
            r#"
            UPDATE inboxes SET
                consecutive_errors = ?1,
                health = ?2,
                last_error = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
            params![errors, health.as_str(), error, Utc::now().to_rfc3339(), id.0],
        )?;
        Ok(health)
    })
    .await
}

fn row_to_inbox(row: &Row<'_>) -> std::result::Result<InboxConfig, rusqlite::Error> {
    let purpose: String = row.get(3)?;
    let interval_secs: i64 = row.get(7)?;
    let health: String = row.get(15)?;
    let emails_processed: i64 = row.get(18)?;
    let pos_correlated: i64 = row.get(19)?;

    Ok(InboxConfig {
        id: InboxId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        purpose: InboxPurpose::parse(&purpose),
        credentials: CredentialSource::from_columns(row.get(4)?, row.get(5)?),
        sync_cursor: row.get::<_, Option<String>>(6)?.filter(|c| !c.is_empty()),
        poll_interval: Duration::from_secs(interval_secs.max(0) as u64),
        label_filter: row.get::<_, Option<String>>(8)?.filter(|l| !l.is_empty()),
        max_results: row.get(9)?,
        ai_parsing_enabled: row.get::<_, i32>(10)? != 0,
        ai_daily_budget_cents: row.get(11)?,
        is_active: row.get::<_, i32>(12)? != 0,
        poll_enabled: row.get::<_, i32>(13)? != 0,
        consecutive_errors: row.get(14)?,
        health: InboxHealth::parse(&health),
        last_error: row.get(16)?,
        last_polled_at: parse_timestamp(row.get(17)?),
        total_emails_processed: emails_processed.max(0) as u64,
        total_pos_correlated: pos_correlated.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_inbox(id: &str) -> InboxConfig {
        InboxConfig {
            id: InboxId::from(id),
            email: format!("{}@acme.example", id),
            display_name: Some("Purchasing".to_string()),
            purpose: InboxPurpose::Purchasing,
            credentials: CredentialSource::Reference {
                reference: "env:ACME_RT".to_string(),
            },
            sync_cursor: Some("1000".to_string()),
            poll_interval: Duration::from_secs(300),
            label_filter: None,
            max_results: 50,
            ai_parsing_enabled: false,
            ai_daily_budget_cents: 0,
            is_active: true,
            poll_enabled: true,
            consecutive_errors: 0,
            health: InboxHealth::Healthy,
            last_error: None,
            last_polled_at: None,
            total_emails_processed: 0,
            total_pos_correlated: 0,
        }
    }

    #[tokio::test]
    async fn insert_and_get_inbox() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox = make_inbox("purchasing");
        insert(&db, &inbox).await.unwrap();

        let loaded = get_by_id(&db, &inbox.id).await.unwrap().unwrap();
        assert_eq!(loaded.email, inbox.email);
        assert_eq!(loaded.credentials, inbox.credentials);
        assert_eq!(loaded.sync_cursor.as_deref(), Some("1000"));
        assert_eq!(loaded.poll_interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn list_pollable_skips_inactive_and_disabled() {
        let db = Database::open_in_memory().await.unwrap();
        insert(&db, &make_inbox("a")).await.unwrap();

        let mut inactive = make_inbox("b");
        inactive.is_active = false;
        insert(&db, &inactive).await.unwrap();

        let mut disabled = make_inbox("c");
        disabled.poll_enabled = false;
        insert(&db, &disabled).await.unwrap();

        let pollable = list_pollable(&db).await.unwrap();
        assert_eq!(pollable.len(), 1);
        assert_eq!(pollable[0].id, InboxId::from("a"));
    }

    #[tokio::test]
    async fn failures_degrade_then_mark_unhealthy_but_stay_active() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox = make_inbox("a");
        insert(&db, &inbox).await.unwrap();

        let health = record_failure(&db, &inbox.id, "token revoked", 3)
            .await
            .unwrap();
        assert_eq!(health, InboxHealth::Degraded);
        record_failure(&db, &inbox.id, "token revoked", 3)
            .await
            .unwrap();
        let health = record_failure(&db, &inbox.id, "token revoked", 3)
            .await
            .unwrap();
        assert_eq!(health, InboxHealth::Unhealthy);

        let loaded = get_by_id(&db, &inbox.id).await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_errors, 3);
        assert_eq!(loaded.last_error.as_deref(), Some("token revoked"));
        assert!(loaded.is_active);
        assert_eq!(list_pollable(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_resets_health_and_accumulates_counters() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox = make_inbox("a");
        insert(&db, &inbox).await.unwrap();
        record_failure(&db, &inbox.id, "boom", 5).await.unwrap();

        let now = Utc::now();
        record_success(&db, &inbox.id, Some("1042".to_string()), 3, 1, now)
            .await
            .unwrap();
        record_success(&db, &inbox.id, None, 2, 0, now).await.unwrap();

        let loaded = get_by_id(&db, &inbox.id).await.unwrap().unwrap();
        assert_eq!(loaded.sync_cursor.as_deref(), Some("1042"));
        assert_eq!(loaded.total_emails_processed, 5);
        assert_eq!(loaded.total_pos_correlated, 1);
        assert_eq!(loaded.consecutive_errors, 0);
        assert_eq!(loaded.health, InboxHealth::Healthy);
        assert!(loaded.last_error.is_none());
        assert!(loaded.last_polled_at.is_some());
    }
}
