//! Email thread queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::parse_timestamp;
use crate::domain::{
    CorrelationMethod, EmailThread, InboxId, PoId, PoSource, ThreadCorrelation, ThreadId,
};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    id, inbox_id, external_thread_id, subject, correlation_method, correlation_confidence,
    po_id, po_source, correlated_at, message_count, last_message_at, created_at
"#;

/// Returns the thread for `(inbox, external_thread_id)`, creating it if needed.
///
/// The boolean is true when the thread was created by this call.
pub async fn find_or_create(
    db: &Database,
    inbox_id: &InboxId,
    external_thread_id: &str,
    subject: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(EmailThread, bool)> {
    let inbox_id = inbox_id.clone();
    let external_thread_id = external_thread_id.to_string();
    let subject = subject.map(str::to_string);

    db.transaction(move |tx| {
        let sql = format!(
            "SELECT {} FROM email_threads WHERE inbox_id = ?1 AND external_thread_id = ?2",
            SELECT_COLUMNS
        );
        if let Some(thread) = tx
            .query_row(&sql, params![inbox_id.0, external_thread_id], row_to_thread)
            .optional()?
        {
            return Ok((thread, false));
        }

        let thread = EmailThread {
            id: ThreadId(Uuid::new_v4().to_string()),
            inbox_id,
            external_thread_id,
            subject,
            correlation: None,
            message_count: 0,
            last_message_at: None,
            created_at: now,
        };
        tx.execute(
            r#"
            INSERT INTO email_threads (
                id, inbox_id, external_thread_id, subject, message_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
            "#,
            params![
                thread.id.0,
                thread.inbox_id.0,
                thread.external_thread_id,
                thread.subject,
                now.to_rfc3339(),
            ],
        )?;
        Ok((thread, true))
    })
    .await
}

/// Retrieves a thread by id.
pub async fn get_by_id(db: &Database, id: &ThreadId) -> Result<Option<EmailThread>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let sql = format!("SELECT {} FROM email_threads WHERE id = ?1", SELECT_COLUMNS);
        let thread = conn.query_row(&sql, [&id.0], row_to_thread).optional()?;
        Ok(thread)
    })
    .await
}

/// Writes the committed correlation onto a thread.
pub async fn commit_correlation(
    db: &Database,
    id: &ThreadId,
    correlation: &ThreadCorrelation,
) -> Result<()> {
    let id = id.clone();
    let correlation = correlation.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            UPDATE email_threads SET
                correlation_method = ?1,
                correlation_confidence = ?2,
                po_id = ?3,
                po_source = ?4,
                correlated_at = ?5,
                updated_at = ?5
            WHERE id = ?6
            "#,
            params![
                correlation.method.as_str(),
                correlation.confidence,
                correlation.po_id.0,
                correlation.po_source.as_str(),
                correlation.correlated_at.to_rfc3339(),
                id.0,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Bumps the message count and keeps the latest received time.
pub async fn record_message_activity(
    db: &Database,
    id: &ThreadId,
    received_at: DateTime<Utc>,
) -> Result<()> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let received = received_at.to_rfc3339();
        conn.execute(
            r#"
            UPDATE email_threads SET
                message_count = message_count + 1,
                last_message_at = CASE
                    WHEN last_message_at IS NULL OR last_message_at < ?1 THEN ?1
                    ELSE last_message_at
                END,
                updated_at = ?2
            WHERE id = ?3
            "#,
            params![received, Utc::now().to_rfc3339(), id.0],
        )?;
        Ok(())
    })
    .await
}

fn row_to_thread(row: &Row<'_>) -> std::result::Result<EmailThread, rusqlite::Error> {
    let method: Option<String> = row.get(4)?;
    let confidence: Option<f64> = row.get(5)?;
    let po_id: Option<String> = row.get(6)?;
    let po_source: Option<String> = row.get(7)?;
    let correlated_at = parse_timestamp(row.get(8)?);

    let correlation = match (method, confidence, po_id, po_source, correlated_at) {
        (Some(method), Some(confidence), Some(po_id), Some(source), Some(at)) => {
            PoSource::parse(&source).map(|po_source| ThreadCorrelation {
                po_id: PoId(po_id),
                po_source,
                method: CorrelationMethod::parse(&method),
                confidence,
                correlated_at: at,
            })
        }
        _ => None,
    };

    Ok(EmailThread {
        id: ThreadId(row.get(0)?),
        inbox_id: InboxId(row.get(1)?),
        external_thread_id: row.get(2)?,
        subject: row.get(3)?,
        correlation,
        message_count: row.get(9)?,
        last_message_at: parse_timestamp(row.get(10)?),
        created_at: parse_timestamp(row.get(11)?).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::test_support::insert_test_inbox;

    #[tokio::test]
    async fn find_or_create_is_keyed_per_inbox() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox_a = insert_test_inbox(&db, "a").await;
        let inbox_b = insert_test_inbox(&db, "b").await;
        let now = Utc::now();

        let (first, created) = find_or_create(&db, &inbox_a, "t-1", Some("PO-4821"), now)
            .await
            .unwrap();
        assert!(created);

        let (again, created) = find_or_create(&db, &inbox_a, "t-1", None, now)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(again.subject.as_deref(), Some("PO-4821"));

        let (other, created) = find_or_create(&db, &inbox_b, "t-1", None, now)
            .await
            .unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn committed_correlation_is_read_back() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox = insert_test_inbox(&db, "a").await;
        let (thread, _) = find_or_create(&db, &inbox, "t-1", None, Utc::now())
            .await
            .unwrap();
        assert!(thread.correlation.is_none());

        let correlation = ThreadCorrelation {
            po_id: PoId::from("po-1"),
            po_source: PoSource::Primary,
            method: CorrelationMethod::SubjectMatch,
            confidence: 0.9,
            correlated_at: Utc::now(),
        };
        commit_correlation(&db, &thread.id, &correlation).await.unwrap();

        let loaded = get_by_id(&db, &thread.id).await.unwrap().unwrap();
        let stored = loaded.correlation.unwrap();
        assert_eq!(stored.po_id, correlation.po_id);
        assert_eq!(stored.method, CorrelationMethod::SubjectMatch);
    }

    #[tokio::test]
    async fn message_activity_keeps_latest_time() {
        let db = Database::open_in_memory().await.unwrap();
        let inbox = insert_test_inbox(&db, "a").await;
        let (thread, _) = find_or_create(&db, &inbox, "t-1", None, Utc::now())
            .await
            .unwrap();

        let later = Utc::now();
        let earlier = later - chrono::Duration::hours(2);
        record_message_activity(&db, &thread.id, later).await.unwrap();
        record_message_activity(&db, &thread.id, earlier).await.unwrap();

        let loaded = get_by_id(&db, &thread.id).await.unwrap().unwrap();
        assert_eq!(loaded.message_count, 2);
        assert_eq!(
            loaded.last_message_at.map(|t| t.timestamp()),
            Some(later.timestamp())
        );
    }
}
