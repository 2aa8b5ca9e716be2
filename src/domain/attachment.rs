//! Attachment classification and storage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentId, InboxId, MessageId};

/// Confidence below which a classification is flagged for review.
pub const REVIEW_THRESHOLD: f64 = 0.6;

/// Document type assigned to an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Invoice,
    Statement,
    PackingSlip,
    ProofOfDelivery,
    Quote,
    CreditMemo,
    StockAlert,
    Other,
}

impl AttachmentType {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Statement => "statement",
            Self::PackingSlip => "packing_slip",
            Self::ProofOfDelivery => "proof_of_delivery",
            Self::Quote => "quote",
            Self::CreditMemo => "credit_memo",
            Self::StockAlert => "stock_alert",
            Self::Other => "other",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "invoice" => Self::Invoice,
            "statement" => Self::Statement,
            "packing_slip" => Self::PackingSlip,
            "proof_of_delivery" => Self::ProofOfDelivery,
            "quote" => Self::Quote,
            "credit_memo" => Self::CreditMemo,
            "stock_alert" => Self::StockAlert,
            _ => Self::Other,
        }
    }
}

/// Result of running the classification rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub attachment_type: AttachmentType,
    pub confidence: f64,
    /// Reason code of the rule that fired.
    pub reason: String,
}

impl Classification {
    pub fn needs_review(&self) -> bool {
        self.confidence < REVIEW_THRESHOLD
    }
}

/// Processing state of a stored attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Recorded and its side effect ran.
    Processed,
    /// Recorded; content handling intentionally postponed.
    Deferred,
    /// Same bytes seen before; linked to the original.
    Duplicate,
    /// Side effect failed.
    Failed,
}

impl ProcessingStatus {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Deferred => "deferred",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "deferred" => Self::Deferred,
            "duplicate" => Self::Duplicate,
            "failed" => Self::Failed,
            _ => Self::Processed,
        }
    }
}

/// A stored attachment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub inbox_id: InboxId,
    pub message_id: MessageId,
    pub part_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub content_hash: String,
    pub attachment_type: AttachmentType,
    pub confidence: f64,
    pub reason: String,
    pub needs_review: bool,
    pub status: ProcessingStatus,
    pub duplicate_of: Option<AttachmentId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_needs_review() {
        let c = Classification {
            attachment_type: AttachmentType::Invoice,
            confidence: 0.4,
            reason: "pdf_default".to_string(),
        };
        assert!(c.needs_review());
    }

    #[test]
    fn unknown_type_parses_as_other() {
        assert_eq!(AttachmentType::parse("spreadsheet"), AttachmentType::Other);
        assert_eq!(
            AttachmentType::parse(AttachmentType::ProofOfDelivery.as_str()),
            AttachmentType::ProofOfDelivery
        );
    }
}
