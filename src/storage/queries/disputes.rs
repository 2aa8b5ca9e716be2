//! Dispute queries.
//!
//! Responses are applied through [`record_response`], which logs the
//! communication and moves the dispute in one transaction.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::parse_timestamp;
use crate::domain::{
    Direction, Dispute, DisputeId, DisputeState, DisputeTransition, MessageId, PoId, Resolution,
    ResponseType, VendorId,
};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    id, po_id, po_number, vendor_id, state, resolution, resolved_at, escalated_at,
    needs_review, review_note, follow_up_count, next_follow_up_at, created_at
"#;

/// A vendor reply to be logged against a dispute.
#[derive(Debug, Clone)]
pub struct DisputeResponse {
    pub dispute_id: DisputeId,
    pub message_id: MessageId,
    pub direction: Direction,
    pub response_type: ResponseType,
    pub summary: Option<String>,
    pub transition: DisputeTransition,
}

/// Inserts a dispute.
pub async fn insert(db: &Database, dispute: &Dispute) -> Result<()> {
    let dispute = dispute.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO disputes (
                id, po_id, po_number, vendor_id, state, resolution, resolved_at, escalated_at,
                needs_review, review_note, follow_up_count, next_follow_up_at, created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
            params![
                dispute.id.0,
                dispute.po_id.map(|p| p.0),
                dispute.po_number,
                dispute.vendor_id.map(|v| v.0),
                dispute.state.as_str(),
                dispute.resolution.map(|r| r.as_str()),
                dispute.resolved_at.map(|t| t.to_rfc3339()),
                dispute.escalated_at.map(|t| t.to_rfc3339()),
                dispute.needs_review as i32,
                dispute.review_note,
                dispute.follow_up_count,
                dispute.next_follow_up_at.map(|t| t.to_rfc3339()),
                dispute.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a dispute by id.
pub async fn get_by_id(db: &Database, id: &DisputeId) -> Result<Option<Dispute>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let sql = format!("SELECT {} FROM disputes WHERE id = ?1", SELECT_COLUMNS);
        let dispute = conn.query_row(&sql, [&id.0], row_to_dispute).optional()?;
        Ok(dispute)
    })
    .await
}

/// Finds the dispute whose id contains `fragment`, ignoring case and hyphens.
///
/// Returns nothing when the fragment is ambiguous.
pub async fn find_by_id_fragment(db: &Database, fragment: &str) -> Result<Option<Dispute>> {
    let fragment: String = fragment
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if fragment.is_empty() {
        return Ok(None);
    }

    db.with_conn(move |conn| {
        let sql = format!(
            "SELECT {} FROM disputes WHERE replace(lower(id), '-', '') LIKE '%' || ?1 || '%' LIMIT 2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([&fragment], row_to_dispute)?;
        let mut matches: Vec<Dispute> = rows.collect::<std::result::Result<_, _>>()?;
        if matches.len() == 1 {
            Ok(matches.pop())
        } else {
            Ok(None)
        }
    })
    .await
}

/// Returns the most recently opened open dispute for a purchase order.
pub async fn latest_open_for_po(db: &Database, po_id: &PoId) -> Result<Option<Dispute>> {
    let po_id = po_id.clone();

    db.with_conn(move |conn| {
        let sql = format!(
            "SELECT {} FROM disputes WHERE po_id = ?1 AND state = 'open' \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let dispute = conn.query_row(&sql, [&po_id.0], row_to_dispute).optional()?;
        Ok(dispute)
    })
    .await
}

/// Logs a response and applies its transition.
///
/// Nothing is written when the dispute is no longer open or the message was
/// already logged for it. Returns true if the transition was applied.
pub async fn record_response(db: &Database, response: &DisputeResponse) -> Result<bool> {
    let response = response.clone();

    db.transaction(move |tx| {
        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM disputes WHERE id = ?1",
                [&response.dispute_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if state.as_deref().map(DisputeState::parse) != Some(DisputeState::Open) {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let logged = tx.execute(
            r#"
            INSERT INTO dispute_communications (
                id, dispute_id, message_id, direction, response_type, summary, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(dispute_id, message_id) DO NOTHING
            "#,
            params![
                Uuid::new_v4().to_string(),
                response.dispute_id.0,
                response.message_id.0,
                response.direction.as_str(),
                response.response_type.as_str(),
                response.summary,
                now,
            ],
        )?;
        if logged == 0 {
            return Ok(false);
        }

        let id = &response.dispute_id.0;
        match &response.transition {
            DisputeTransition::Resolve { resolution, at } => tx.execute(
                r#"
                UPDATE disputes SET state = 'resolved', resolution = ?1, resolved_at = ?2,
                    updated_at = ?3
                WHERE id = ?4 AND state = 'open'
                "#,
                params![resolution.as_str(), at.to_rfc3339(), now, id],
            )?,
            DisputeTransition::Escalate { at, note } => tx.execute(
                r#"
                UPDATE disputes SET state = 'escalated', escalated_at = ?1, needs_review = 1,
                    review_note = ?2, updated_at = ?3
                WHERE id = ?4 AND state = 'open'
                "#,
                params![at.to_rfc3339(), note, now, id],
            )?,
            DisputeTransition::FollowUp { next_at } => tx.execute(
                r#"
                UPDATE disputes SET follow_up_count = follow_up_count + 1,
                    next_follow_up_at = ?1, updated_at = ?2
                WHERE id = ?3 AND state = 'open'
                "#,
                params![next_at.to_rfc3339(), now, id],
            )?,
            DisputeTransition::FlagForReview { note } => tx.execute(
                r#"
                UPDATE disputes SET needs_review = 1, review_note = ?1, updated_at = ?2
                WHERE id = ?3 AND state = 'open'
                "#,
                params![note, now, id],
            )?,
        };
        Ok(true)
    })
    .await
}

fn row_to_dispute(row: &Row<'_>) -> std::result::Result<Dispute, rusqlite::Error> {
    let state: String = row.get(4)?;
    let resolution: Option<String> = row.get(5)?;

    Ok(Dispute {
        id: DisputeId(row.get(0)?),
        po_id: row.get::<_, Option<String>>(1)?.map(PoId),
        po_number: row.get(2)?,
        vendor_id: row.get::<_, Option<String>>(3)?.map(VendorId),
        state: DisputeState::parse(&state),
        resolution: resolution.as_deref().and_then(Resolution::parse),
        resolved_at: parse_timestamp(row.get(6)?),
        escalated_at: parse_timestamp(row.get(7)?),
        needs_review: row.get::<_, i32>(8)? != 0,
        review_note: row.get(9)?,
        follow_up_count: row.get(10)?,
        next_follow_up_at: parse_timestamp(row.get(11)?),
        created_at: parse_timestamp(row.get(12)?).unwrap_or_else(Utc::now),
    })
}
