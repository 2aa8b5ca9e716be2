//! Links messages to open purchase orders.
//!
//! Strategies run in a fixed order and the first hit wins:
//! thread history, subject PO number, learned sender domain, body PO number.

use std::sync::OnceLock;

use regex::Regex;

use super::PollContext;
use crate::domain::{
    CorrelationMethod, CorrelationResult, EmailThread, InboxConfig, NormalizedMessage,
    ThreadCorrelation,
};
use crate::storage::queries::{purchase_orders, threads, vendors};
use crate::storage::Result;

const THREAD_HISTORY_CONFIDENCE: f64 = 0.95;
const SUBJECT_MATCH_CONFIDENCE: f64 = 0.90;
const BODY_MATCH_CONFIDENCE: f64 = 0.80;
const SENDER_DOMAIN_FACTOR: f64 = 0.8;
const SENDER_DOMAIN_CAP: f64 = 0.75;

fn po_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:p\.?\s?o\.?|purchase\s+order)\s*[#:\-]?\s*([a-z0-9]{2,9}[0-9])\b")
            .expect("PO number pattern is valid")
    })
}

/// Returns PO numbers mentioned in `text`, in order of appearance.
pub fn extract_po_numbers(text: &str) -> Vec<String> {
    let mut numbers: Vec<String> = Vec::new();
    for captures in po_number_pattern().captures_iter(text) {
        if let Some(number) = captures.get(1) {
            let number = number.as_str().to_uppercase();
            if !numbers.contains(&number) {
                numbers.push(number);
            }
        }
    }
    numbers
}

/// Runs the correlation strategies for one message.
pub async fn correlate(
    ctx: &PollContext<'_>,
    inbox: &InboxConfig,
    thread: &EmailThread,
    message: &NormalizedMessage,
) -> Result<CorrelationResult> {
    if let Some(existing) = &thread.correlation {
        if let Some(po) = purchase_orders::get(ctx.db, &existing.po_id, existing.po_source).await? {
            return Ok(CorrelationResult::matched(
                po.to_ref(),
                THREAD_HISTORY_CONFIDENCE,
                CorrelationMethod::ThreadHistory,
            ));
        }
    }

    if let Some(result) = match_numbers(
        ctx,
        &message.subject,
        SUBJECT_MATCH_CONFIDENCE,
        CorrelationMethod::SubjectMatch,
    )
    .await?
    {
        return Ok(result);
    }

    if let Some(domain) = message.from.domain() {
        if is_usable_domain(ctx, inbox, &domain) {
            if let Some((vendor_id, learned)) = vendors::domain_mapping(ctx.db, &domain).await? {
                let po = purchase_orders::latest_open_for_vendor(
                    ctx.db,
                    &vendor_id,
                    ctx.now,
                    ctx.recency_window(),
                )
                .await?;
                if let Some(po) = po {
                    let confidence = (learned * SENDER_DOMAIN_FACTOR).min(SENDER_DOMAIN_CAP);
                    return Ok(CorrelationResult::matched(
                        po.to_ref(),
                        confidence,
                        CorrelationMethod::SenderDomain,
                    ));
                }
            }
        }
    }

    if let Some(result) = match_numbers(
        ctx,
        &message.body,
        BODY_MATCH_CONFIDENCE,
        CorrelationMethod::BodyMatch,
    )
    .await?
    {
        return Ok(result);
    }

    Ok(CorrelationResult::none())
}

/// Writes a committable result to the thread and learns the sender domain.
///
/// Returns true when a new correlation was written. Thread-history results
/// are never rewritten.
pub async fn commit(
    ctx: &PollContext<'_>,
    inbox: &InboxConfig,
    thread: &mut EmailThread,
    message: &NormalizedMessage,
    result: &CorrelationResult,
) -> Result<bool> {
    let Some(po) = result.po.as_ref().filter(|_| result.is_committable()) else {
        return Ok(false);
    };

    if message.is_inbound() && result.method != CorrelationMethod::SenderDomain {
        if let (Some(domain), Some(vendor_id)) = (message.from.domain(), po.vendor_id.as_ref()) {
            if is_usable_domain(ctx, inbox, &domain) {
                let learned = vendors::learn_domain(
                    ctx.db,
                    &domain,
                    vendor_id,
                    ctx.settings.correlation.learned_domain_confidence,
                    result.method.as_str(),
                )
                .await?;
                if learned {
                    tracing::debug!(domain = %domain, vendor_id = %vendor_id, "Learned sender domain");
                }
            }
        }
    }

    if result.method == CorrelationMethod::ThreadHistory {
        return Ok(false);
    }

    let correlation = ThreadCorrelation {
        po_id: po.id.clone(),
        po_source: po.source,
        method: result.method,
        confidence: result.confidence,
        correlated_at: ctx.now,
    };
    threads::commit_correlation(ctx.db, &thread.id, &correlation).await?;
    thread.correlation = Some(correlation);

    tracing::info!(
        thread_id = %thread.id,
        po_id = %po.id,
        method = result.method.as_str(),
        confidence = result.confidence,
        "Correlated thread to purchase order"
    );
    Ok(true)
}

/// Free-mail hosts and the inbox's own domain say nothing about the vendor.
fn is_usable_domain(ctx: &PollContext<'_>, inbox: &InboxConfig, domain: &str) -> bool {
    let free_mail = ctx
        .settings
        .correlation
        .free_mail_domains
        .iter()
        .any(|d| d.eq_ignore_ascii_case(domain));
    !free_mail && inbox.domain().as_deref() != Some(domain)
}

async fn match_numbers(
    ctx: &PollContext<'_>,
    text: &str,
    confidence: f64,
    method: CorrelationMethod,
) -> Result<Option<CorrelationResult>> {
    for number in extract_po_numbers(text) {
        let po =
            purchase_orders::find_open_by_number(ctx.db, &number, ctx.now, ctx.recency_window())
                .await?;
        if let Some(po) = po {
            return Ok(Some(CorrelationResult::matched(po.to_ref(), confidence, method)));
        }
    }
    Ok(None)
}
