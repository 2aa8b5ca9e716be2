//! Attachment queries and the rows attachment side effects produce.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::parse_timestamp;
use crate::domain::{
    AttachmentId, AttachmentRecord, AttachmentType, InboxId, MessageId, PoRef, ProcessingStatus,
    VendorId,
};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    id, inbox_id, message_id, part_id, filename, mime_type, size, content_hash,
    attachment_type, confidence, reason, needs_review, status, duplicate_of, created_at
"#;

/// Invoice awaiting review, created from an invoice attachment.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub attachment_id: AttachmentId,
    pub message_id: MessageId,
    pub inbox_id: InboxId,
    pub vendor_id: Option<VendorId>,
    pub po: Option<PoRef>,
    pub status: String,
}

/// A draft reorder for one vendor group of a stock-alert file.
#[derive(Debug, Clone)]
pub struct DraftPurchaseAction {
    pub source_attachment_id: AttachmentId,
    pub vendor_name: String,
    pub vendor_id: Option<VendorId>,
    pub items_json: String,
    pub item_count: u32,
}

/// Returns true if this message part was already recorded.
pub async fn exists_for_part(db: &Database, message_id: &MessageId, part_id: &str) -> Result<bool> {
    let message_id = message_id.clone();
    let part_id = part_id.to_string();

    db.with_conn(move |conn| {
        let found: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM email_attachments WHERE message_id = ?1 AND part_id = ?2)",
            params![message_id.0, part_id],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    })
    .await
}

/// Returns the non-duplicate attachment with this content hash.
pub async fn find_original_by_hash(db: &Database, hash: &str) -> Result<Option<AttachmentRecord>> {
    let hash = hash.to_string();

    db.with_conn(move |conn| {
        let sql = format!(
            "SELECT {} FROM email_attachments WHERE content_hash = ?1 AND duplicate_of IS NULL",
            SELECT_COLUMNS
        );
        let record = conn.query_row(&sql, [&hash], row_to_attachment).optional()?;
        Ok(record)
    })
    .await
}

/// Retrieves an attachment by id.
pub async fn get_by_id(db: &Database, id: &AttachmentId) -> Result<Option<AttachmentRecord>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let sql = format!("SELECT {} FROM email_attachments WHERE id = ?1", SELECT_COLUMNS);
        let record = conn.query_row(&sql, [&id.0], row_to_attachment).optional()?;
        Ok(record)
    })
    .await
}

/// Inserts an attachment record.
///
/// Returns false when the part is already recorded, or when another original
/// with the same hash won a race.
pub async fn insert(db: &Database, record: &AttachmentRecord) -> Result<bool> {
    let record = record.clone();

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            r#"
            INSERT INTO email_attachments (
                id, inbox_id, message_id, part_id, filename, mime_type, size, content_hash,
                attachment_type, confidence, reason, needs_review, status, duplicate_of,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT DO NOTHING
            "#,
            params![
                record.id.0,
                record.inbox_id.0,
                record.message_id.0,
                record.part_id,
                record.filename,
                record.mime_type,
                record.size as i64,
                record.content_hash,
                record.attachment_type.as_str(),
                record.confidence,
                record.reason,
                record.needs_review as i32,
                record.status.as_str(),
                record.duplicate_of.map(|d| d.0),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

/// Updates the processing status of an attachment.
pub async fn set_status(db: &Database, id: &AttachmentId, status: ProcessingStatus) -> Result<()> {
    let id = id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE email_attachments SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.0],
        )?;
        Ok(())
    })
    .await
}

/// Inserts an invoice document. At most one exists per attachment.
pub async fn insert_invoice_document(db: &Database, doc: &InvoiceDocument) -> Result<bool> {
    let doc = doc.clone();

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            r#"
            INSERT INTO invoice_documents (
                id, attachment_id, message_id, inbox_id, vendor_id, po_id, po_source, status,
                approved, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
            ON CONFLICT(attachment_id) DO NOTHING
            "#,
            params![
                Uuid::new_v4().to_string(),
                doc.attachment_id.0,
                doc.message_id.0,
                doc.inbox_id.0,
                doc.vendor_id.map(|v| v.0),
                doc.po.as_ref().map(|p| p.id.0.clone()),
                doc.po.as_ref().map(|p| p.source.as_str()),
                doc.status,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

/// Inserts a draft purchase action. At most one exists per attachment and vendor.
pub async fn insert_draft_action(db: &Database, action: &DraftPurchaseAction) -> Result<bool> {
    let action = action.clone();

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            r#"
            INSERT INTO draft_purchase_actions (
                id, source_attachment_id, vendor_name, vendor_id, items_json, item_count,
                status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'draft', ?7)
            ON CONFLICT(source_attachment_id, vendor_name) DO NOTHING
            "#,
            params![
                Uuid::new_v4().to_string(),
                action.source_attachment_id.0,
                action.vendor_name,
                action.vendor_id.map(|v| v.0),
                action.items_json,
                action.item_count,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

fn row_to_attachment(row: &Row<'_>) -> std::result::Result<AttachmentRecord, rusqlite::Error> {
    let size: i64 = row.get(6)?;
    let attachment_type: String = row.get(8)?;
    let status: String = row.get(12)?;

    Ok(AttachmentRecord {
        id: AttachmentId(row.get(0)?),
        inbox_id: InboxId(row.get(1)?),
        message_id: MessageId(row.get(2)?),
        part_id: row.get(3)?,
        filename: row.get(4)?,
        mime_type: row.get(5)?,
        size: size.max(0) as u64,
        content_hash: row.get(7)?,
        attachment_type: AttachmentType::parse(&attachment_type),
        confidence: row.get(9)?,
        reason: row.get(10)?,
        needs_review: row.get::<_, i32>(11)? != 0,
        status: ProcessingStatus::parse(&status),
        duplicate_of: row.get::<_, Option<String>>(13)?.map(AttachmentId),
        created_at: parse_timestamp(row.get(14)?).unwrap_or_else(Utc::now),
    })
}
