//! Attachment download, deduplication, classification and side effects.

use ring::digest::{digest, SHA256};
use thiserror::Error;
use uuid::Uuid;

use super::classifier::{self, ClassificationInput};
use super::{stock_alert, PollContext};
use crate::domain::{
    AttachmentId, AttachmentPart, AttachmentRecord, AttachmentType, InboxConfig,
    NormalizedMessage, PoRef, ProcessingStatus,
};
use crate::providers::email::{MailProvider, ProviderError};
use crate::storage::queries::attachments::{self, InvoiceDocument};
use crate::storage::DatabaseError;

/// Errors that leave a message's attachments incomplete.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error(transparent)]
    Storage(#[from] DatabaseError),

    /// A download failed in a way a later poll may not repeat.
    #[error("download {filename}: {source}")]
    Download {
        filename: String,
        #[source]
        source: ProviderError,
    },
}

pub type Result<T> = std::result::Result<T, AttachmentError>;

/// Counters for one message's attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentSummary {
    /// Newly recorded attachments, duplicates included.
    pub processed: u32,
    pub duplicates: u32,
    pub invoices: u32,
    pub statements: u32,
    pub stock_alerts: u32,
    /// Download failures, one entry per attachment.
    pub errors: Vec<String>,
}

/// Hex-encoded SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(digest(&SHA256, content).as_ref())
}

/// Processes every document attachment of a message.
///
/// A transient download failure is returned so the message is processed
/// again on the next poll; attachments already recorded are skipped then.
/// A permanent failure (attachment gone, nothing to download) is recorded in
/// [`AttachmentSummary::errors`] and the remaining attachments are still
/// processed. Storage errors are returned.
pub async fn process_attachments(
    ctx: &PollContext<'_>,
    provider: &dyn MailProvider,
    inbox: &InboxConfig,
    message: &NormalizedMessage,
    committed_po: Option<&PoRef>,
) -> Result<AttachmentSummary> {
    let mut summary = AttachmentSummary::default();

    for part in &message.attachments {
        if !classifier::is_document(&part.filename, &part.mime_type) {
            tracing::trace!(filename = %part.filename, mime_type = %part.mime_type, "Skipping non-document part");
            continue;
        }
        if attachments::exists_for_part(ctx.db, &message.id, &part.part_id).await? {
            continue;
        }

        let content = match load_content(provider, message, part).await {
            Ok(content) => content,
            Err(error) if error.is_transient() => {
                return Err(AttachmentError::Download {
                    filename: part.filename.clone(),
                    source: error,
                });
            }
            Err(error) => {
                tracing::warn!(
                    message_id = %message.id,
                    filename = %part.filename,
                    error = %error,
                    "Skipping attachment that cannot be downloaded"
                );
                summary
                    .errors
                    .push(format!("{}: {}", part.filename, error));
                continue;
            }
        };

        process_one(ctx, inbox, message, part, &content, committed_po, &mut summary).await?;
    }

    Ok(summary)
}

async fn load_content(
    provider: &dyn MailProvider,
    message: &NormalizedMessage,
    part: &AttachmentPart,
) -> std::result::Result<Vec<u8>, ProviderError> {
    if let Some(data) = &part.inline_data {
        return Ok(data.clone());
    }
    match &part.attachment_id {
        Some(attachment_id) => provider.download_attachment(&message.id, attachment_id).await,
        None => Err(ProviderError::InvalidRequest(
            "attachment has neither inline data nor an id".to_string(),
        )),
    }
}

async fn process_one(
    ctx: &PollContext<'_>,
    inbox: &InboxConfig,
    message: &NormalizedMessage,
    part: &AttachmentPart,
    content: &[u8],
    committed_po: Option<&PoRef>,
    summary: &mut AttachmentSummary,
) -> Result<()> {
    let hash = content_hash(content);
    let mut record = AttachmentRecord {
        id: AttachmentId(Uuid::new_v4().to_string()),
        inbox_id: inbox.id.clone(),
        message_id: message.id.clone(),
        part_id: part.part_id.clone(),
        filename: part.filename.clone(),
        mime_type: part.mime_type.clone(),
        size: part.size.max(content.len() as u64),
        content_hash: hash.clone(),
        attachment_type: AttachmentType::Other,
        confidence: 0.0,
        reason: String::new(),
        needs_review: false,
        status: ProcessingStatus::Processed,
        duplicate_of: None,
        created_at: ctx.now,
    };

    if let Some(original) = attachments::find_original_by_hash(ctx.db, &hash).await? {
        record.attachment_type = original.attachment_type;
        record.confidence = original.confidence;
        record.reason = "duplicate_content".to_string();
        record.needs_review = original.needs_review;
        record.status = ProcessingStatus::Duplicate;
        record.duplicate_of = Some(original.id.clone());
        if attachments::insert(ctx.db, &record).await? {
            summary.processed += 1;
            summary.duplicates += 1;
            tracing::debug!(
                filename = %part.filename,
                original_id = %original.id,
                "Duplicate attachment"
            );
        }
        return Ok(());
    }

    let classification = classifier::classify(&ClassificationInput::new(
        &part.filename,
        &part.mime_type,
        &message.subject,
        &message.snippet,
        &message.from.email,
    ));
    record.attachment_type = classification.attachment_type;
    record.confidence = classification.confidence;
    record.needs_review = classification.needs_review();
    record.reason = classification.reason;
    if record.attachment_type == AttachmentType::Statement {
        record.status = ProcessingStatus::Deferred;
    }

    if !attachments::insert(ctx.db, &record).await? {
        // Lost a race on the part or the hash; the other row wins.
        return Ok(());
    }
    summary.processed += 1;

    tracing::info!(
        attachment_id = %record.id,
        filename = %record.filename,
        attachment_type = record.attachment_type.as_str(),
        confidence = record.confidence,
        needs_review = record.needs_review,
        "Recorded attachment"
    );

    match record.attachment_type {
        AttachmentType::Invoice => {
            let doc = InvoiceDocument {
                attachment_id: record.id.clone(),
                message_id: message.id.clone(),
                inbox_id: inbox.id.clone(),
                vendor_id: committed_po.and_then(|po| po.vendor_id.clone()),
                po: committed_po.cloned(),
                status: if committed_po.is_some() {
                    "linked".to_string()
                } else {
                    "pending_po_match".to_string()
                },
            };
            attachments::insert_invoice_document(ctx.db, &doc).await?;
            summary.invoices += 1;
        }
        AttachmentType::Statement => {
            summary.statements += 1;
        }
        AttachmentType::StockAlert => {
            if let Err(error) = stock_alert::process(ctx, &record.id, content).await {
                tracing::warn!(attachment_id = %record.id, error = %error, "Stock alert processing failed");
                attachments::set_status(ctx.db, &record.id, ProcessingStatus::Failed).await?;
            } else {
                summary.stock_alerts += 1;
            }
        }
        _ => {}
    }

    Ok(())
}
