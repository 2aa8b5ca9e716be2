//! Vendor queries: lookup, learned sender domains and the trust ledger.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::domain::{MessageId, VendorId};
use crate::storage::database::{Database, Result};

/// A trust-ledger entry to record.
#[derive(Debug, Clone)]
pub struct TrustEvent {
    pub vendor_id: VendorId,
    pub message_id: MessageId,
    pub event_type: String,
    pub delta: f64,
    pub dispute_id: Option<String>,
    pub po_id: Option<String>,
}

/// Inserts a vendor with the default trust score.
pub async fn insert(db: &Database, id: &VendorId, name: &str) -> Result<()> {
    let id = id.clone();
    let name = name.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO vendors (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id.0, name, now],
        )?;
        Ok(())
    })
    .await
}

/// Finds a vendor by name, ignoring case and surrounding whitespace.
pub async fn find_by_name(db: &Database, name: &str) -> Result<Option<VendorId>> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Ok(None);
    }

    db.with_conn(move |conn| {
        let id = conn
            .query_row(
                "SELECT id FROM vendors WHERE lower(trim(name)) = lower(?1) ORDER BY created_at LIMIT 1",
                [&name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(VendorId))
    })
    .await
}

/// Returns the vendor a sender domain was learned for, with its confidence.
pub async fn domain_mapping(db: &Database, domain: &str) -> Result<Option<(VendorId, f64)>> {
    let domain = domain.trim().to_lowercase();

    db.with_conn(move |conn| {
        let mapping = conn
            .query_row(
                "SELECT vendor_id, confidence FROM vendor_email_domains WHERE domain = ?1",
                [&domain],
                |row| Ok((VendorId(row.get(0)?), row.get(1)?)),
            )
            .optional()?;
        Ok(mapping)
    })
    .await
}

/// Learns `domain` for `vendor_id`.
///
/// An existing mapping is only replaced by a strictly higher confidence.
/// Returns true if the row was written.
pub async fn learn_domain(
    db: &Database,
    domain: &str,
    vendor_id: &VendorId,
    confidence: f64,
    source: &str,
) -> Result<bool> {
    let domain = domain.trim().to_lowercase();
    let vendor_id = vendor_id.clone();
    let source = source.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            r#"
            INSERT INTO vendor_email_domains (domain, vendor_id, confidence, source, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(domain) DO UPDATE SET
                vendor_id = excluded.vendor_id,
                confidence = excluded.confidence,
                source = excluded.source,
                updated_at = excluded.updated_at
            WHERE excluded.confidence > vendor_email_domains.confidence
            "#,
            params![domain, vendor_id.0, confidence, source, now],
        )?;
        Ok(changed > 0)
    })
    .await
}

/// Records a trust event and applies its delta to the vendor's score.
///
/// Events are unique per message and type; a replay changes nothing and
/// returns false. The score is clamped to `[0, 1]`.
pub async fn record_trust_event(db: &Database, event: &TrustEvent) -> Result<bool> {
    let event = event.clone();

    db.transaction(move |tx| {
        let now = Utc::now().to_rfc3339();
        let inserted = tx.execute(
            r#"
            INSERT INTO vendor_trust_events (
                id, vendor_id, message_id, dispute_id, po_id, event_type, delta, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(message_id, event_type) DO NOTHING
            "#,
            params![
                Uuid::new_v4().to_string(),
                event.vendor_id.0,
                event.message_id.0,
                event.dispute_id,
                event.po_id,
                event.event_type,
                event.delta,
                now,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        if event.delta != 0.0 {
            tx.execute(
                r#"
                UPDATE vendors SET
                    trust_score = MAX(0.0, MIN(1.0, trust_score + ?1)),
                    updated_at = ?2
                WHERE id = ?3
                "#,
                params![event.delta, now, event.vendor_id.0],
            )?;
        }
        Ok(true)
    })
    .await
}

/// Returns a vendor's current trust score.
pub async fn trust_score(db: &Database, vendor_id: &VendorId) -> Result<Option<f64>> {
    let vendor_id = vendor_id.clone();

    db.with_conn(move |conn| {
        let score = conn
            .query_row(
                "SELECT trust_score FROM vendors WHERE id = ?1",
                [&vendor_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    })
    .await
}
