//! Shared tracking cache, keyed by tracking number.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use super::parse_date;
use crate::domain::{MessageId, PoRef, TrackingInfo};
use crate::storage::database::{Database, Result};

/// A tracking cache row.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTracking {
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub eta: Option<NaiveDate>,
    pub po_id: Option<String>,
    pub po_number: Option<String>,
    pub po_source: Option<String>,
    pub source_message_id: Option<String>,
}

/// Registers a tracking number, merging with any existing row.
///
/// Known values are never replaced by unknown ones.
pub async fn upsert(
    db: &Database,
    tracking: &TrackingInfo,
    po: Option<&PoRef>,
    message_id: &MessageId,
) -> Result<()> {
    let tracking = tracking.clone();
    let po = po.cloned();
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO tracking_cache (
                tracking_number, carrier, eta, po_id, po_number, po_source,
                source_message_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(tracking_number) DO UPDATE SET
                carrier = COALESCE(excluded.carrier, tracking_cache.carrier),
                eta = COALESCE(excluded.eta, tracking_cache.eta),
                po_id = COALESCE(excluded.po_id, tracking_cache.po_id),
                po_number = COALESCE(excluded.po_number, tracking_cache.po_number),
                po_source = COALESCE(excluded.po_source, tracking_cache.po_source),
                updated_at = excluded.updated_at
            "#,
            params![
                tracking.tracking_number,
                tracking.carrier.map(|c| c.as_str()),
                tracking.eta.map(|d| d.to_string()),
                po.as_ref().map(|p| p.id.0.clone()),
                po.as_ref().map(|p| p.number.clone()),
                po.as_ref().map(|p| p.source.as_str()),
                message_id.0,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Looks up a tracking number.
pub async fn get(db: &Database, tracking_number: &str) -> Result<Option<CachedTracking>> {
    let tracking_number = tracking_number.to_string();

    db.with_conn(move |conn| {
        let row = conn
            .query_row(
                r#"
                SELECT tracking_number, carrier, eta, po_id, po_number, po_source, source_message_id
                FROM tracking_cache WHERE tracking_number = ?1
                "#,
                [&tracking_number],
                |row| {
                    Ok(CachedTracking {
                        tracking_number: row.get(0)?,
                        carrier: row.get(1)?,
                        eta: parse_date(row.get(2)?),
                        po_id: row.get(3)?,
                        po_number: row.get(4)?,
                        po_source: row.get(5)?,
                        source_message_id: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Carrier, PoId, PoSource};

    #[tokio::test]
    async fn later_sightings_fill_gaps_without_erasing() {
        let db = Database::open_in_memory().await.unwrap();
        let first = TrackingInfo {
            tracking_number: "1Z9999999999999999".to_string(),
            carrier: Some(Carrier::Ups),
            eta: None,
        };
        upsert(&db, &first, None, &MessageId::from("m-1")).await.unwrap();

        let po = PoRef {
            id: PoId::from("po-1"),
            number: "PO-4821".to_string(),
            source: PoSource::Primary,
            vendor_id: None,
        };
        let second = TrackingInfo {
            tracking_number: "1Z9999999999999999".to_string(),
            carrier: None,
            eta: NaiveDate::from_ymd_opt(2025, 3, 14),
        };
        upsert(&db, &second, Some(&po), &MessageId::from("m-2"))
            .await
            .unwrap();

        let cached = get(&db, "1Z9999999999999999").await.unwrap().unwrap();
        assert_eq!(cached.carrier.as_deref(), Some("UPS"));
        assert_eq!(cached.eta, NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(cached.po_id.as_deref(), Some("po-1"));
        assert_eq!(cached.po_number.as_deref(), Some("PO-4821"));
        assert_eq!(cached.source_message_id.as_deref(), Some("m-1"));
    }
}
