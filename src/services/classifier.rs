//! Attachment document-type classification.
//!
//! Classification is a priority-ordered rule table. Every rule sees the same
//! lower-cased view of the attachment and its message; the first rule whose
//! predicate holds decides the type.

use crate::domain::{AttachmentType, Classification};

/// Confidence of the fallback when no rule matches.
const OTHER_CONFIDENCE: f64 = 0.30;

const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/csv",
    "application/csv",
    "text/plain",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/tiff",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "csv", "txt", "xls", "xlsx", "doc", "docx", "png", "jpg", "jpeg", "tif", "tiff",
];

const STOCK_KEYWORDS: &[&str] = &["reorder", "re-order", "restock", "stock", "inventory"];

/// The attachment and message fields the rules look at, lower-cased.
#[derive(Debug, Clone)]
pub struct ClassificationInput {
    pub filename: String,
    pub mime_type: String,
    pub subject: String,
    pub snippet: String,
    pub sender: String,
}

impl ClassificationInput {
    pub fn new(filename: &str, mime_type: &str, subject: &str, snippet: &str, sender: &str) -> Self {
        Self {
            filename: filename.trim().to_lowercase(),
            mime_type: mime_type.trim().to_lowercase(),
            subject: subject.to_lowercase(),
            snippet: snippet.to_lowercase(),
            sender: sender.to_lowercase(),
        }
    }

    fn extension(&self) -> Option<&str> {
        self.filename.rsplit_once('.').map(|(_, ext)| ext)
    }

    fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf" || self.extension() == Some("pdf")
    }

    fn is_csv(&self) -> bool {
        matches!(self.mime_type.as_str(), "text/csv" | "application/csv")
            || self.extension() == Some("csv")
    }

    /// Filename with `_`, `-` and `.` read as spaces.
    fn filename_words(&self) -> String {
        self.filename.replace(['_', '-', '.'], " ")
    }

    fn filename_has(&self, needles: &[&str]) -> bool {
        let words = self.filename_words();
        needles.iter().any(|n| words.contains(n))
    }

    fn subject_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.subject.contains(n))
    }
}

/// One row of the classification table.
pub struct ClassificationRule {
    pub priority: u32,
    pub reason: &'static str,
    pub attachment_type: AttachmentType,
    pub confidence: f64,
    pub predicate: fn(&ClassificationInput) -> bool,
}

/// Rules in evaluation order.
pub const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        priority: 10,
        reason: "stock_csv_keywords",
        attachment_type: AttachmentType::StockAlert,
        confidence: 0.90,
        predicate: |i| {
            i.is_csv()
                && STOCK_KEYWORDS.iter().any(|k| {
                    i.subject.contains(k) || i.snippet.contains(k) || i.sender.contains(k)
                })
        },
    },
    ClassificationRule {
        priority: 11,
        reason: "stock_csv_filename",
        attachment_type: AttachmentType::StockAlert,
        confidence: 0.85,
        predicate: |i| i.is_csv() && i.filename_has(&["inventory", "stock"]),
    },
    ClassificationRule {
        priority: 20,
        reason: "statement_filename",
        attachment_type: AttachmentType::Statement,
        confidence: 0.90,
        predicate: |i| i.filename_has(&["statement", "stmt"]),
    },
    ClassificationRule {
        priority: 21,
        reason: "statement_subject_pdf",
        attachment_type: AttachmentType::Statement,
        confidence: 0.80,
        predicate: |i| i.is_pdf() && i.subject_has(&["statement"]),
    },
    ClassificationRule {
        priority: 30,
        reason: "invoice_filename",
        attachment_type: AttachmentType::Invoice,
        confidence: 0.90,
        predicate: |i| i.filename_has(&["invoice", "inv "]),
    },
    ClassificationRule {
        priority: 31,
        reason: "invoice_subject_pdf",
        attachment_type: AttachmentType::Invoice,
        confidence: 0.75,
        predicate: |i| i.is_pdf() && i.subject_has(&["invoice"]),
    },
    ClassificationRule {
        priority: 40,
        reason: "packing_slip",
        attachment_type: AttachmentType::PackingSlip,
        confidence: 0.85,
        predicate: |i| {
            i.filename_has(&["packing slip", "packingslip", "packing list"])
                || i.subject_has(&["packing slip", "packing list"])
        },
    },
    ClassificationRule {
        priority: 41,
        reason: "proof_of_delivery",
        attachment_type: AttachmentType::ProofOfDelivery,
        confidence: 0.85,
        predicate: |i| {
            i.filename_has(&["proof of delivery", "delivery receipt", "pod "])
                || i.subject_has(&["proof of delivery"])
        },
    },
    ClassificationRule {
        priority: 42,
        reason: "quote",
        attachment_type: AttachmentType::Quote,
        confidence: 0.80,
        predicate: |i| {
            i.filename_has(&["quote", "quotation"]) || i.subject_has(&["quote", "quotation"])
        },
    },
    ClassificationRule {
        priority: 43,
        reason: "credit_memo",
        attachment_type: AttachmentType::CreditMemo,
        confidence: 0.85,
        predicate: |i| {
            i.filename_has(&["credit memo", "creditmemo", "credit note"])
                || i.subject_has(&["credit memo", "credit note"])
        },
    },
    ClassificationRule {
        priority: 90,
        reason: "pdf_default",
        attachment_type: AttachmentType::Invoice,
        confidence: 0.40,
        predicate: |i| i.is_pdf(),
    },
];

/// Returns true if the part is a document worth classifying.
pub fn is_document(filename: &str, mime_type: &str) -> bool {
    if filename.trim().is_empty() {
        return false;
    }
    let mime_type = mime_type.trim().to_lowercase();
    if DOCUMENT_MIME_TYPES.contains(&mime_type.as_str()) {
        return true;
    }
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    mime_type == "application/octet-stream" && DOCUMENT_EXTENSIONS.contains(&extension.as_str())
}

/// Classifies an attachment. Never fails; unknown documents become `other`.
pub fn classify(input: &ClassificationInput) -> Classification {
    CLASSIFICATION_RULES
        .iter()
        .find(|rule| (rule.predicate)(input))
        .map(|rule| Classification {
            attachment_type: rule.attachment_type,
            confidence: rule.confidence,
            reason: rule.reason.to_string(),
        })
        .unwrap_or_else(|| Classification {
            attachment_type: AttachmentType::Other,
            confidence: OTHER_CONFIDENCE,
            reason: "no_rule".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_file(filename: &str, mime: &str, subject: &str) -> Classification {
        classify(&ClassificationInput::new(
            filename,
            mime,
            subject,
            "",
            "ar@vendor.example",
        ))
    }

    #[test]
    fn rules_are_sorted_by_priority() {
        let priorities: Vec<u32> = CLASSIFICATION_RULES.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn statement_wins_over_invoice() {
        let c = classify_file("Invoice_123.pdf", "application/pdf", "Your monthly statement");
        assert_eq!(c.attachment_type, AttachmentType::Statement);
        assert_eq!(c.reason, "statement_subject_pdf");

        let c = classify_file("statement-march.pdf", "application/pdf", "Invoice attached");
        assert_eq!(c.attachment_type, AttachmentType::Statement);
        assert_eq!(c.confidence, 0.90);
        let c = classify_file("account-statement-invoice.pdf", "application/pdf", "Documents");
        assert_eq!(c.attachment_type, AttachmentType::Statement);
        assert_eq!(c.reason, "statement_filename");
        assert_eq!(c.confidence, 0.90);
    }

    #[test]
    fn invoice_by_filename_and_subject() {
        let c = classify_file("INV-1001.pdf", "application/pdf", "Documents");
        assert_eq!(c.attachment_type, AttachmentType::Invoice);
        assert_eq!(c.reason, "invoice_filename");

        let c = classify_file("scan0001.pdf", "application/pdf", "Invoice for PO-4821");
        assert_eq!(c.reason, "invoice_subject_pdf");
        assert_eq!(c.confidence, 0.75);
    }

    #[test]
    fn ambiguous_pdf_defaults_to_invoice_for_review() {
        let c = classify_file("scan0001.pdf", "application/pdf", "Documents");
        assert_eq!(c.attachment_type, AttachmentType::Invoice);
        assert_eq!(c.reason, "pdf_default");
        assert!(c.needs_review());
    }

    #[test]
    fn stock_csv_rules() {
        let c = classify_file("export.csv", "text/csv", "Reorder report");
        assert_eq!(c.attachment_type, AttachmentType::StockAlert);
        assert_eq!(c.confidence, 0.90);

        let c = classify_file("stock_levels.csv", "application/octet-stream", "Weekly");
        assert_eq!(c.reason, "stock_csv_filename");

        let c = classify_file("stock_levels.pdf", "application/pdf", "Weekly");
        assert_ne!(c.attachment_type, AttachmentType::StockAlert);
    }

    #[test]
    fn specific_types_and_fallback() {
        assert_eq!(
            classify_file("Packing_Slip_88.pdf", "application/pdf", "").attachment_type,
            AttachmentType::PackingSlip
        );
        assert_eq!(
            classify_file("POD-4821.jpg", "image/jpeg", "").attachment_type,
            AttachmentType::ProofOfDelivery
        );
        assert_eq!(
            classify_file("quotation.docx", "application/msword", "").attachment_type,
            AttachmentType::Quote
        );
        assert_eq!(
            classify_file("credit-memo-7.pdf", "application/pdf", "").attachment_type,
            AttachmentType::CreditMemo
        );
        let other = classify_file("photo.png", "image/png", "");
        assert_eq!(other.attachment_type, AttachmentType::Other);
        assert!(other.needs_review());
    }

    #[test]
    fn document_filter() {
        assert!(is_document("INV-1.pdf", "application/pdf"));
        assert!(is_document("stock.xlsx", "application/octet-stream"));
        assert!(!is_document("logo.gif", "image/gif"));
        assert!(!is_document("", "application/pdf"));
        assert!(!is_document("archive.zip", "application/octet-stream"));
    }
}
