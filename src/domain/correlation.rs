//! Correlation result types.

use serde::{Deserialize, Serialize};

use super::PoRef;

/// Minimum confidence at which a correlation is written to its thread.
pub const COMMIT_THRESHOLD: f64 = 0.7;

/// How a message was linked to a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    /// The thread was already correlated in an earlier cycle.
    ThreadHistory,
    /// PO number found in the subject.
    SubjectMatch,
    /// Sender domain mapped to a vendor with a recent open order.
    SenderDomain,
    /// PO number found in the body.
    BodyMatch,
    /// Nothing matched.
    None,
}

impl CorrelationMethod {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreadHistory => "thread_history",
            Self::SubjectMatch => "subject_match",
            Self::SenderDomain => "sender_domain",
            Self::BodyMatch => "body_match",
            Self::None => "none",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "thread_history" => Self::ThreadHistory,
            "subject_match" => Self::SubjectMatch,
            "sender_domain" => Self::SenderDomain,
            "body_match" => Self::BodyMatch,
            _ => Self::None,
        }
    }
}

/// Outcome of a correlation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// The matched order, if any.
    pub po: Option<PoRef>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which strategy produced the match.
    pub method: CorrelationMethod,
}

impl CorrelationResult {
    /// A result with no match.
    pub fn none() -> Self {
        Self {
            po: None,
            confidence: 0.0,
            method: CorrelationMethod::None,
        }
    }

    /// A match at the given confidence.
    pub fn matched(po: PoRef, confidence: f64, method: CorrelationMethod) -> Self {
        Self {
            po: Some(po),
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    /// Returns true if this result should be written to the thread.
    pub fn is_committable(&self) -> bool {
        self.po.is_some() && self.confidence >= COMMIT_THRESHOLD
    }
}
