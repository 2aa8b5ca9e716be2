//! Alert queries.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::domain::{Alert, InboxId, MessageId, PoId, ThreadId};
use crate::storage::database::{Database, Result};

/// Inserts an alert. Returns false if this kind was already raised for the message.
pub async fn insert(
    db: &Database,
    alert: &Alert,
    message_id: &MessageId,
    inbox_id: &InboxId,
    thread_id: Option<&ThreadId>,
    po_id: Option<&PoId>,
) -> Result<bool> {
    let alert = alert.clone();
    let message_id = message_id.clone();
    let inbox_id = inbox_id.clone();
    let thread_id = thread_id.map(|t| t.0.clone());
    let po_id = po_id.map(|p| p.0.clone());

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            r#"
            INSERT INTO alerts (
                id, message_id, inbox_id, thread_id, po_id, kind, severity, route_to,
                matched, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(message_id, kind) DO NOTHING
            "#,
            params![
                Uuid::new_v4().to_string(),
                message_id.0,
                inbox_id.0,
                thread_id,
                po_id,
                alert.kind.as_str(),
                alert.severity.as_str(),
                alert.route_to,
                alert.matched,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

/// Counts alerts raised for a message.
pub async fn count_for_message(db: &Database, message_id: &MessageId) -> Result<u64> {
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE message_id = ?1",
            [&message_id.0],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertKind;

    #[tokio::test]
    async fn one_alert_per_kind_per_message() {
        let db = Database::open_in_memory().await.unwrap();
        let message = MessageId::from("m-1");
        let inbox = InboxId::from("a");

        let delay = Alert::new(AlertKind::Delay, "delayed");
        assert!(insert(&db, &delay, &message, &inbox, None, None).await.unwrap());
        assert!(!insert(&db, &Alert::new(AlertKind::Delay, "postponed"), &message, &inbox, None, None)
            .await
            .unwrap());
        assert!(insert(&db, &Alert::new(AlertKind::Backorder, "backorder"), &message, &inbox, None, None)
            .await
            .unwrap());

        assert_eq!(count_for_message(&db, &message).await.unwrap(), 2);
    }
}
