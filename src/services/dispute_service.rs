//! Applies vendor replies to open invoice disputes.
//!
//! A reply is matched to a dispute by an id fragment in the text, or else by
//! the latest open dispute on the thread's committed order. The classified
//! reply is logged and the dispute moved in one transaction; replays of the
//! same message change nothing.

use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;

use super::PollContext;
use crate::domain::{
    Dispute, DisputeTransition, MessageSignals, NormalizedMessage, PoRef, PoSource, Resolution,
    ResponseType, VendorId,
};
use crate::storage::queries::disputes::{self, DisputeResponse};
use crate::storage::queries::vendors::{self, TrustEvent};
use crate::storage::queries::{purchase_orders, tracking};
use crate::storage::Result;

const FOLLOW_UP_HOURS: i64 = 48;
const RESOLVED_TRUST_DELTA: f64 = 0.05;
const ESCALATED_TRUST_DELTA: f64 = -0.10;
const SUMMARY_MAX_CHARS: usize = 280;

const GENERIC_REVIEW_NOTE: &str = "Vendor reply could not be classified; review manually";

fn gate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(dispute[sd]?|DSP-|discrepanc(?:y|ies)|short[\s-]?ship(?:ped|ment)?|shortage|overcharge[sd]?|credit\s+(?:memo|note|request)|invoice\s+(?:error|issue))")
            .expect("dispute gate pattern is valid")
    })
}

fn id_fragment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:\bdispute\s*(?:id)?\s*[#:]?\s*|\bDSP-)([0-9a-f][0-9a-f-]{7,35})")
            .expect("dispute id pattern is valid")
    })
}

struct ResponseRule {
    response_type: ResponseType,
    pattern: &'static str,
}

/// Checked in order; the first match classifies the reply.
const RESPONSE_RULES: &[ResponseRule] = &[
    ResponseRule {
        response_type: ResponseType::CreditIssued,
        pattern: r"(?i)\b(credit(?:ed)?\s+(?:has\s+been\s+)?(?:issued|applied|processed)|issued\s+(?:a|the)\s+credit|credit\s+memo\s+(?:attached|issued)|refund(?:ed)?\s+(?:has\s+been\s+)?(?:issued|processed))\b",
    },
    ResponseRule {
        response_type: ResponseType::Reshipping,
        pattern: r"(?i)\b(re-?ship(?:ped|ping|ment)?|(?:will|are\s+going\s+to)\s+ship\s+the\s+(?:missing|remaining|replacement)|replacement\s+(?:has\s+)?(?:shipped|sent|on\s+the\s+way)|sending\s+(?:a\s+)?replacement)\b",
    },
    ResponseRule {
        response_type: ResponseType::Pushback,
        pattern: r"(?i)\b(we\s+shipped|shipped\s+in\s+full|proof\s+of\s+delivery|signed\s+for|reject(?:ed|ing)?|decline[sd]?|not\s+(?:our|at)\s+fault|invoice\s+is\s+correct|disagree)\b",
    },
    ResponseRule {
        response_type: ResponseType::ClarificationRequest,
        pattern: r"(?i)\b(please\s+(?:provide|send|confirm|clarify)|can\s+you\s+(?:provide|send|confirm|clarify)|could\s+you\s+(?:provide|send|confirm|clarify)|need\s+more\s+(?:information|info|details)|which\s+(?:items|invoice|po))\b",
    },
];

fn response_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RESPONSE_RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("response pattern is valid"))
            .collect()
    })
}

/// Returns true if the message looks like dispute correspondence.
pub fn is_dispute_related(message: &NormalizedMessage) -> bool {
    gate_pattern().is_match(&message.subject) || gate_pattern().is_match(&message.body)
}

/// Returns hex id fragments mentioned in `text`, dashes removed.
pub fn extract_id_fragments(text: &str) -> Vec<String> {
    id_fragment_pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .chars()
                .filter(|c| c.is_ascii_hexdigit())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|fragment| fragment.len() >= 8)
        .collect()
}

/// Classifies a vendor reply.
///
/// A tracking number counts as a reshipment even without shipping words.
pub fn classify_response(text: &str, signals: &MessageSignals) -> ResponseType {
    for (rule, pattern) in RESPONSE_RULES.iter().zip(response_patterns()) {
        if rule.response_type == ResponseType::Reshipping && signals.tracking.is_some() {
            return ResponseType::Reshipping;
        }
        if pattern.is_match(text) {
            return rule.response_type;
        }
    }
    ResponseType::Unclassified
}

/// Maps a reply type to the dispute transition it drives.
pub fn transition_for(response_type: ResponseType, ctx: &PollContext<'_>) -> DisputeTransition {
    match response_type {
        ResponseType::CreditIssued => DisputeTransition::Resolve {
            resolution: Resolution::Credit,
            at: ctx.now,
        },
        ResponseType::Reshipping => DisputeTransition::Resolve {
            resolution: Resolution::Reshipped,
            at: ctx.now,
        },
        ResponseType::Pushback => DisputeTransition::Escalate {
            at: ctx.now,
            note: "Vendor disputes the claim; review required".to_string(),
        },
        ResponseType::ClarificationRequest => DisputeTransition::FollowUp {
            next_at: ctx.now + Duration::hours(FOLLOW_UP_HOURS),
        },
        ResponseType::Unclassified => DisputeTransition::FlagForReview {
            note: GENERIC_REVIEW_NOTE.to_string(),
        },
    }
}

/// What happened to a dispute for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct DisputeOutcome {
    pub dispute_id: String,
    pub response_type: ResponseType,
    /// False when the reply was already logged or the dispute was not open.
    pub applied: bool,
}

/// Processes a message as a possible dispute reply.
///
/// Returns `None` when the message is not a reply to a known open dispute.
pub async fn process(
    ctx: &PollContext<'_>,
    message: &NormalizedMessage,
    committed_po: Option<&PoRef>,
    signals: &MessageSignals,
) -> Result<Option<DisputeOutcome>> {
    if !message.is_inbound() || !is_dispute_related(message) {
        return Ok(None);
    }

    let Some(dispute) = resolve_dispute(ctx, message, committed_po).await? else {
        tracing::debug!(message_id = %message.id, "Dispute reply without a matching dispute");
        return Ok(None);
    };
    if !dispute.is_open() {
        tracing::debug!(
            dispute_id = %dispute.id,
            state = dispute.state.as_str(),
            "Ignoring reply to closed dispute"
        );
        return Ok(None);
    }

    let text = format!("{}\n{}", message.subject, message.body);
    let response_type = classify_response(&text, signals);
    let transition = transition_for(response_type, ctx);

    let response = DisputeResponse {
        dispute_id: dispute.id.clone(),
        message_id: message.id.clone(),
        direction: message.direction,
        response_type,
        summary: Some(summarize(message)),
        transition: transition.clone(),
    };
    let applied = disputes::record_response(ctx.db, &response).await?;

    if applied {
        tracing::info!(
            dispute_id = %dispute.id,
            response_type = response_type.as_str(),
            state = transition.target_state().as_str(),
            "Applied dispute response"
        );

        if response_type == ResponseType::Reshipping {
            if let Some(info) = &signals.tracking {
                let po = dispute_po(ctx, &dispute, committed_po).await?;
                tracking::upsert(ctx.db, info, po.as_ref(), &message.id).await?;
            }
        }

        if let Some(vendor_id) = dispute_vendor(&dispute, committed_po) {
            record_trust(ctx, &dispute, &vendor_id, message, &transition).await?;
        }
    }

    Ok(Some(DisputeOutcome {
        dispute_id: dispute.id.to_string(),
        response_type,
        applied,
    }))
}

async fn resolve_dispute(
    ctx: &PollContext<'_>,
    message: &NormalizedMessage,
    committed_po: Option<&PoRef>,
) -> Result<Option<Dispute>> {
    for text in [&message.subject, &message.body] {
        for fragment in extract_id_fragments(text) {
            if let Some(dispute) = disputes::find_by_id_fragment(ctx.db, &fragment).await? {
                return Ok(Some(dispute));
            }
        }
    }
    match committed_po {
        Some(po) => disputes::latest_open_for_po(ctx.db, &po.id).await,
        None => Ok(None),
    }
}

/// The order the dispute is about, for tracking registration.
async fn dispute_po(
    ctx: &PollContext<'_>,
    dispute: &Dispute,
    committed_po: Option<&PoRef>,
) -> Result<Option<PoRef>> {
    let Some(po_id) = &dispute.po_id else {
        return Ok(committed_po.cloned());
    };
    if let Some(po) = committed_po.filter(|po| &po.id == po_id) {
        return Ok(Some(po.clone()));
    }
    for source in [PoSource::Primary, PoSource::Secondary] {
        if let Some(po) = purchase_orders::get(ctx.db, po_id, source).await? {
            return Ok(Some(po.to_ref()));
        }
    }
    Ok(None)
}

fn dispute_vendor(dispute: &Dispute, committed_po: Option<&PoRef>) -> Option<VendorId> {
    dispute
        .vendor_id
        .clone()
        .or_else(|| committed_po.and_then(|po| po.vendor_id.clone()))
}

async fn record_trust(
    ctx: &PollContext<'_>,
    dispute: &Dispute,
    vendor_id: &VendorId,
    message: &NormalizedMessage,
    transition: &DisputeTransition,
) -> Result<()> {
    let (event_type, delta) = match transition {
        DisputeTransition::Resolve { .. } => ("dispute_resolved", RESOLVED_TRUST_DELTA),
        DisputeTransition::Escalate { .. } => ("dispute_escalated", ESCALATED_TRUST_DELTA),
        _ => return Ok(()),
    };
    let event = TrustEvent {
        vendor_id: vendor_id.clone(),
        message_id: message.id.clone(),
        event_type: event_type.to_string(),
        delta,
        dispute_id: Some(dispute.id.to_string()),
        po_id: dispute.po_id.as_ref().map(|p| p.to_string()),
    };
    vendors::record_trust_event(ctx.db, &event).await?;
    Ok(())
}

fn summarize(message: &NormalizedMessage) -> String {
    let source = if message.snippet.trim().is_empty() {
        &message.body
    } else {
        &message.snippet
    };
    source.trim().chars().take(SUMMARY_MAX_CHARS).collect()
}
