//! Invoice dispute domain types.
//!
//! A dispute moves `open -> resolved` or `open -> escalated`. Neither end
//! state is left again by the poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DisputeId, PoId, VendorId};

/// Lifecycle state of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeState {
    Open,
    Resolved,
    Escalated,
}

impl DisputeState {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "resolved" => Self::Resolved,
            "escalated" => Self::Escalated,
            _ => Self::Open,
        }
    }
}

/// How a resolved dispute was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Credit,
    Reshipped,
}

impl Resolution {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Reshipped => "reshipped",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "credit" => Some(Self::Credit),
            "reshipped" => Some(Self::Reshipped),
            _ => None,
        }
    }
}

/// Classified intent of a vendor reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    CreditIssued,
    Reshipping,
    Pushback,
    ClarificationRequest,
    Unclassified,
}

impl ResponseType {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditIssued => "credit_issued",
            Self::Reshipping => "reshipping",
            Self::Pushback => "pushback",
            Self::ClarificationRequest => "clarification_request",
            Self::Unclassified => "unclassified",
        }
    }
}

/// An invoice dispute against a vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub po_id: Option<PoId>,
    pub po_number: Option<String>,
    pub vendor_id: Option<VendorId>,
    pub state: DisputeState,
    pub resolution: Option<Resolution>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub needs_review: bool,
    pub review_note: Option<String>,
    pub follow_up_count: u32,
    pub next_follow_up_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.state == DisputeState::Open
    }
}

/// A state change produced by a classified vendor reply.
#[derive(Debug, Clone, PartialEq)]
pub enum DisputeTransition {
    /// `open -> resolved`.
    Resolve {
        resolution: Resolution,
        at: DateTime<Utc>,
    },
    /// `open -> escalated`, flagged for a human.
    Escalate { at: DateTime<Utc>, note: String },
    /// Stays open; another follow-up is scheduled.
    FollowUp { next_at: DateTime<Utc> },
    /// Stays open; flagged for a human.
    FlagForReview { note: String },
}

impl DisputeTransition {
    /// State the dispute ends up in.
    pub fn target_state(&self) -> DisputeState {
        match self {
            Self::Resolve { .. } => DisputeState::Resolved,
            Self::Escalate { .. } => DisputeState::Escalated,
            Self::FollowUp { .. } | Self::FlagForReview { .. } => DisputeState::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_targets() {
        let now = Utc::now();
        assert_eq!(
            DisputeTransition::Resolve {
                resolution: Resolution::Credit,
                at: now
            }
            .target_state(),
            DisputeState::Resolved
        );
        assert_eq!(
            DisputeTransition::FollowUp { next_at: now }.target_state(),
            DisputeState::Open
        );
    }

    #[test]
    fn state_parse_defaults_to_open() {
        assert_eq!(DisputeState::parse("escalated"), DisputeState::Escalated);
        assert_eq!(DisputeState::parse("weird"), DisputeState::Open);
        assert_eq!(Resolution::parse("credit"), Some(Resolution::Credit));
        assert_eq!(Resolution::parse(""), None);
    }
}
