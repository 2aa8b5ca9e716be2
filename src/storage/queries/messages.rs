//! Processed-message queries.
//!
//! A row in `email_thread_messages` marks a provider message as handled.

use chrono::Utc;
use rusqlite::params;

use crate::domain::{InboxId, MessageId, ThreadMessage};
use crate::storage::database::{Database, Result};

/// Returns true if the message was already processed.
pub async fn exists(db: &Database, message_id: &MessageId) -> Result<bool> {
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let found: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM email_thread_messages WHERE message_id = ?1)",
            [&message_id.0],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    })
    .await
}

/// Inserts a processed message. Returns false if it was already recorded.
pub async fn insert(db: &Database, message: &ThreadMessage) -> Result<bool> {
    let message = message.clone();

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            r#"
            INSERT INTO email_thread_messages (
                message_id, thread_id, inbox_id, direction, from_email, from_name,
                subject, snippet, received_at, tracking_number, carrier, eta, po_id,
                has_attachments, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(message_id) DO NOTHING
            "#,
            params![
                message.message_id.0,
                message.thread_id.0,
                message.inbox_id.0,
                message.direction.as_str(),
                message.from_email,
                message.from_name,
                message.subject,
                message.snippet,
                message.received_at.to_rfc3339(),
                message.tracking_number,
                message.carrier,
                message.eta.map(|d| d.to_string()),
                message.po_id.map(|p| p.0),
                message.has_attachments as i32,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

/// Counts processed messages for an inbox.
pub async fn count_for_inbox(db: &Database, inbox_id: &InboxId) -> Result<u64> {
    let inbox_id = inbox_id.clone();

    db.with_conn(move |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM email_thread_messages WHERE inbox_id = ?1",
            [&inbox_id.0],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
    .await
}
