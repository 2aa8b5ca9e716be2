//! Purchase order queries.
//!
//! Reads both PO tables into [`PurchaseOrder`]. Terminal statuses are filtered
//! in SQL; number matching and the recency window are applied on the loaded
//! rows because stored numbers are free-form.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use super::{parse_date, parse_timestamp, sql_status_list};
use crate::domain::{
    normalize_po_number, ExternalPurchaseOrder, InternalPurchaseOrder, PoId, PoRef, PoSource,
    PurchaseOrder, TrackingInfo, VendorId, PRIMARY_TERMINAL_STATUSES,
    SECONDARY_TERMINAL_STATUSES,
};
use crate::storage::database::{Database, Result};

const PRIMARY_COLUMNS: &str =
    "id, order_number, vendor_id, status, order_date, tracking_number, tracking_carrier";

const SECONDARY_COLUMNS: &str = "id, external_order_id, supplier_id, order_status, ordered_at, \
     estimated_delivery, tracking_number, tracking_carrier";

/// Inserts an internal purchase order.
pub async fn insert_internal(db: &Database, po: &InternalPurchaseOrder) -> Result<()> {
    let po = po.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO purchase_orders (
                id, order_number, vendor_id, status, order_date,
                tracking_number, tracking_carrier, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                po.id.0,
                po.order_number,
                po.vendor_id.map(|v| v.0),
                po.status,
                po.order_date.map(|d| d.to_rfc3339()),
                po.tracking_number,
                po.tracking_carrier,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Inserts an imported purchase order.
pub async fn insert_external(db: &Database, po: &ExternalPurchaseOrder) -> Result<()> {
    let po = po.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO external_purchase_orders (
                id, external_order_id, supplier_id, order_status, ordered_at,
                estimated_delivery, tracking_number, tracking_carrier, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
            params![
                po.id.0,
                po.external_order_id,
                po.supplier_id.map(|v| v.0),
                po.order_status,
                po.ordered_at.map(|d| d.to_rfc3339()),
                po.estimated_delivery.map(|d| d.to_string()),
                po.tracking_number,
                po.tracking_carrier,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a purchase order by id from the table named by `source`.
pub async fn get(db: &Database, id: &PoId, source: PoSource) -> Result<Option<PurchaseOrder>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let po = match source {
            PoSource::Primary => {
                let sql = format!("SELECT {} FROM purchase_orders WHERE id = ?1", PRIMARY_COLUMNS);
                conn.query_row(&sql, [&id.0], row_to_primary).optional()?
            }
            PoSource::Secondary => {
                let sql = format!(
                    "SELECT {} FROM external_purchase_orders WHERE id = ?1",
                    SECONDARY_COLUMNS
                );
                conn.query_row(&sql, [&id.0], row_to_secondary).optional()?
            }
        };
        Ok(po)
    })
    .await
}

/// Finds an open order whose number matches `number`, ordered within
/// `window` of `now`.
///
/// Internal orders are searched before imported ones; within a table the most
/// recent order wins.
pub async fn find_open_by_number(
    db: &Database,
    number: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Option<PurchaseOrder>> {
    let key = normalize_po_number(number);
    if key.is_empty() {
        return Ok(None);
    }

    db.with_conn(move |conn| {
        for source in [PoSource::Primary, PoSource::Secondary] {
            let found = load_open(conn, source, None, &[])?
                .into_iter()
                .filter(|po| normalize_po_number(po.number()) == key)
                .filter(|po| !po.is_terminal() && po.within_window(now, window))
                .max_by_key(|po| po.ordered_at());
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    })
    .await
}

/// Returns the most recent open order for a vendor within `window` of `now`.
pub async fn latest_open_for_vendor(
    db: &Database,
    vendor_id: &VendorId,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Option<PurchaseOrder>> {
    let vendor_id = vendor_id.clone();

    db.with_conn(move |conn| {
        let vendor: &dyn ToSql = &vendor_id.0;
        let mut candidates = load_open(conn, PoSource::Primary, Some("vendor_id"), &[vendor])?;
        candidates.extend(load_open(
            conn,
            PoSource::Secondary,
            Some("supplier_id"),
            &[vendor],
        )?);

        // Stable max keeps the last of equal keys, so reverse to prefer primary.
        let latest = candidates
            .into_iter()
            .rev()
            .filter(|po| !po.is_terminal() && po.within_window(now, window))
            .max_by_key(|po| po.ordered_at());
        Ok(latest)
    })
    .await
}

/// Writes tracking details onto the referenced order.
///
/// Existing values are kept where the new info has none.
pub async fn update_tracking(db: &Database, po: &PoRef, tracking: &TrackingInfo) -> Result<()> {
    let id = po.id.clone();
    let source = po.source;
    let tracking = tracking.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let carrier = tracking.carrier.map(|c| c.as_str().to_string());
        let eta = tracking.eta.map(|d| d.to_string());
        let sql = match source {
            PoSource::Primary => {
                r#"
                UPDATE purchase_orders SET
                    tracking_number = ?1,
                    tracking_carrier = COALESCE(?2, tracking_carrier),
                    expected_delivery = COALESCE(?3, expected_delivery),
                    tracking_updated_at = ?4,
                    updated_at = ?4
                WHERE id = ?5
                "#
            }
            PoSource::Secondary => {
                r#"
                UPDATE external_purchase_orders SET
                    tracking_number = ?1,
                    tracking_carrier = COALESCE(?2, tracking_carrier),
                    estimated_delivery = COALESCE(?3, estimated_delivery),
                    tracking_updated_at = ?4,
                    updated_at = ?4
                WHERE id = ?5
                "#
            }
        };
        conn.execute(sql, params![tracking.tracking_number, carrier, eta, now, id.0])?;
        Ok(())
    })
    .await
}

fn load_open(
    conn: &Connection,
    source: PoSource,
    filter_column: Option<&str>,
    filter_params: &[&dyn ToSql],
) -> Result<Vec<PurchaseOrder>> {
    let (table, columns, status_column, terminal, mapper) = match source {
        PoSource::Primary => (
            "purchase_orders",
            PRIMARY_COLUMNS,
            "status",
            PRIMARY_TERMINAL_STATUSES,
            row_to_primary as RowMapper,
        ),
        PoSource::Secondary => (
            "external_purchase_orders",
            SECONDARY_COLUMNS,
            "order_status",
            SECONDARY_TERMINAL_STATUSES,
            row_to_secondary as RowMapper,
        ),
    };

    let mut sql = format!(
        "SELECT {} FROM {} WHERE lower(trim({})) NOT IN ({})",
        columns,
        table,
        status_column,
        sql_status_list(terminal)
    );
    if let Some(column) = filter_column {
        sql.push_str(&format!(" AND {} = ?1", column));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter_params, mapper)?;
    let orders: std::result::Result<Vec<_>, _> = rows.collect();
    Ok(orders?)
}

type RowMapper = fn(&Row<'_>) -> std::result::Result<PurchaseOrder, rusqlite::Error>;

fn row_to_primary(row: &Row<'_>) -> std::result::Result<PurchaseOrder, rusqlite::Error> {
    Ok(PurchaseOrder::Primary(InternalPurchaseOrder {
        id: PoId(row.get(0)?),
        order_number: row.get(1)?,
        vendor_id: row.get::<_, Option<String>>(2)?.map(VendorId),
        status: row.get(3)?,
        order_date: parse_timestamp(row.get(4)?),
        tracking_number: row.get(5)?,
        tracking_carrier: row.get(6)?,
    }))
}

fn row_to_secondary(row: &Row<'_>) -> std::result::Result<PurchaseOrder, rusqlite::Error> {
    Ok(PurchaseOrder::Secondary(ExternalPurchaseOrder {
        id: PoId(row.get(0)?),
        external_order_id: row.get(1)?,
        supplier_id: row.get::<_, Option<String>>(2)?.map(VendorId),
        order_status: row.get(3)?,
        ordered_at: parse_timestamp(row.get(4)?),
        estimated_delivery: parse_date(row.get(5)?),
        tracking_number: row.get(6)?,
        tracking_carrier: row.get(7)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Carrier;
    use crate::storage::queries::vendors;
    use chrono::NaiveDate;

    fn internal(id: &str, number: &str, status: &str, days_ago: i64) -> InternalPurchaseOrder {
        InternalPurchaseOrder {
            id: PoId::from(id),
            order_number: number.to_string(),
            vendor_id: Some(VendorId::from("v-1")),
            status: status.to_string(),
            order_date: Some(Utc::now() - Duration::days(days_ago)),
            tracking_number: None,
            tracking_carrier: None,
        }
    }

    fn external(id: &str, number: &str, status: &str, days_ago: i64) -> ExternalPurchaseOrder {
        ExternalPurchaseOrder {
            id: PoId::from(id),
            external_order_id: number.to_string(),
            supplier_id: Some(VendorId::from("v-1")),
            order_status: status.to_string(),
            ordered_at: Some(Utc::now() - Duration::days(days_ago)),
            estimated_delivery: None,
            tracking_number: None,
            tracking_carrier: None,
        }
    }

    async fn setup() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        vendors::insert(&db, &VendorId::from("v-1"), "Acme Supply")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn finds_open_order_by_normalized_number() {
        let db = setup().await;
        insert_internal(&db, &internal("po-1", "PO-4821", "sent", 3))
            .await
            .unwrap();

        let found = find_open_by_number(&db, "po 4821", Utc::now(), Duration::days(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), &PoId::from("po-1"));
        assert_eq!(found.source(), PoSource::Primary);
    }

    #[tokio::test]
    async fn terminal_and_stale_orders_are_excluded() {
        let db = setup().await;
        insert_internal(&db, &internal("po-1", "PO-4821", "Received", 3))
            .await
            .unwrap();
        insert_internal(&db, &internal("po-2", "PO-5000", "sent", 45))
            .await
            .unwrap();

        let window = Duration::days(30);
        assert!(find_open_by_number(&db, "4821", Utc::now(), window)
            .await
            .unwrap()
            .is_none());
        assert!(find_open_by_number(&db, "5000", Utc::now(), window)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn primary_is_preferred_over_secondary() {
        let db = setup().await;
        insert_external(&db, &external("ext-1", "4821", "open", 1))
            .await
            .unwrap();
        insert_internal(&db, &internal("po-1", "PO-4821", "sent", 5))
            .await
            .unwrap();

        let found = find_open_by_number(&db, "PO-4821", Utc::now(), Duration::days(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.source(), PoSource::Primary);
    }

    #[tokio::test]
    async fn secondary_cancelled_is_terminal() {
        let db = setup().await;
        insert_external(&db, &external("ext-1", "4821", "cancelled", 1))
            .await
            .unwrap();

        assert!(find_open_by_number(&db, "4821", Utc::now(), Duration::days(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn latest_open_for_vendor_picks_most_recent() {
        let db = setup().await;
        insert_internal(&db, &internal("po-old", "PO-1000", "sent", 20))
            .await
            .unwrap();
        insert_external(&db, &external("ext-new", "2000", "open", 2))
            .await
            .unwrap();
        insert_internal(&db, &internal("po-done", "PO-3000", "completed", 1))
            .await
            .unwrap();

        let latest =
            latest_open_for_vendor(&db, &VendorId::from("v-1"), Utc::now(), Duration::days(30))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(latest.id(), &PoId::from("ext-new"));
    }

    #[tokio::test]
    async fn update_tracking_writes_both_shapes() {
        let db = setup().await;
        insert_internal(&db, &internal("po-1", "PO-4821", "sent", 3))
            .await
            .unwrap();
        insert_external(&db, &external("ext-1", "7000", "open", 3))
            .await
            .unwrap();

        let tracking = TrackingInfo {
            tracking_number: "1Z9999999999999999".to_string(),
            carrier: Some(Carrier::Ups),
            eta: NaiveDate::from_ymd_opt(2025, 3, 14),
        };
        for (id, source) in [("po-1", PoSource::Primary), ("ext-1", PoSource::Secondary)] {
            let po = get(&db, &PoId::from(id), source).await.unwrap().unwrap();
            update_tracking(&db, &po.to_ref(), &tracking).await.unwrap();
        }

        match get(&db, &PoId::from("po-1"), PoSource::Primary).await.unwrap() {
            Some(PurchaseOrder::Primary(po)) => {
                assert_eq!(po.tracking_number.as_deref(), Some("1Z9999999999999999"));
                assert_eq!(po.tracking_carrier.as_deref(), Some("UPS"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        match get(&db, &PoId::from("ext-1"), PoSource::Secondary).await.unwrap() {
            Some(PurchaseOrder::Secondary(po)) => {
                assert_eq!(po.estimated_delivery, NaiveDate::from_ymd_opt(2025, 3, 14));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
