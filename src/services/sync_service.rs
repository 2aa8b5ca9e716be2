//! Fetch planning and execution for one inbox.
//!
//! A poll either reads the provider's change history since the stored cursor
//! or, without a usable cursor, runs a prioritized set of searches. The
//! choice is a [`FetchStrategy`] value; when an incremental read reports an
//! expired cursor, [`fallback_for`] yields the full strategy and the loop in
//! [`fetch_messages`] runs again.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, RawMessage};
use crate::providers::email::{MailProvider, MessageRef, ProviderError};

/// Subject keywords searched when no label is usable.
const SUBJECT_KEYWORD_QUERY: &str =
    r#"subject:(PO OR "purchase order" OR invoice OR tracking OR shipment OR statement)"#;

/// Why a full fetch was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullFetchReason {
    /// The inbox has never been polled successfully.
    NoCursor,
    /// The provider no longer recognises the stored cursor.
    CursorExpired,
}

/// How messages are listed for a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Changes since the stored cursor.
    Incremental { cursor: String },
    /// Prioritized searches; the cursor is reset to the mailbox's current one.
    Full { reason: FullFetchReason },
}

impl FetchStrategy {
    /// Short name used in run summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental { .. } => "incremental",
            Self::Full {
                reason: FullFetchReason::NoCursor,
            } => "full",
            Self::Full {
                reason: FullFetchReason::CursorExpired,
            } => "full_cursor_expired",
        }
    }
}

/// Chooses the initial strategy from the stored cursor.
pub fn plan_fetch(cursor: Option<&str>) -> FetchStrategy {
    match cursor.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cursor) => FetchStrategy::Incremental {
            cursor: cursor.to_string(),
        },
        None => FetchStrategy::Full {
            reason: FullFetchReason::NoCursor,
        },
    }
}

/// Returns the strategy to try after `strategy` failed with `error`, if any.
pub fn fallback_for(strategy: &FetchStrategy, error: &ProviderError) -> Option<FetchStrategy> {
    match (strategy, error) {
        (FetchStrategy::Incremental { .. }, ProviderError::NotFound(_)) => {
            Some(FetchStrategy::Full {
                reason: FullFetchReason::CursorExpired,
            })
        }
        _ => None,
    }
}

/// Per-inbox fetch limits.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Provider label searched first on a full fetch.
    pub label: String,
    /// Age limit of the general inbox search, in days.
    pub lookback_days: u32,
    /// Maximum messages per poll.
    pub limit: u32,
}

impl FetchOptions {
    /// Search queries of a full fetch, highest priority first.
    pub fn full_fetch_queries(&self) -> Vec<String> {
        let mut queries = Vec::with_capacity(3);
        let label = self.label.trim();
        if !label.is_empty() {
            queries.push(format!("label:{}", label.replace(' ', "-")));
        }
        queries.push(SUBJECT_KEYWORD_QUERY.to_string());
        queries.push(format!("in:inbox newer_than:{}d", self.lookback_days.max(1)));
        queries
    }
}

/// A listed message that could not be fetched.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub message_id: MessageId,
    pub error: String,
    /// A later poll may succeed, so the cursor is held.
    pub transient: bool,
}

/// Messages fetched for one poll.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    /// The strategy that produced the listing.
    pub strategy: FetchStrategy,
    /// Fully fetched messages, in listing order.
    pub messages: Vec<RawMessage>,
    /// Number of ids listed before fetching.
    pub listed: usize,
    /// Cursor to store after processing. `None` when a fetch failed transiently.
    pub cursor: Option<String>,
    /// Messages that could not be fetched.
    pub failures: Vec<FetchFailure>,
}

/// Lists and fetches messages for an inbox.
///
/// Listing errors other than an expired cursor are returned. Errors fetching
/// individual messages are collected in [`FetchedBatch::failures`]. A
/// transient failure holds the cursor so the next poll sees the message
/// again; a permanent one (deleted message, bad request) is skipped.
pub async fn fetch_messages(
    provider: &dyn MailProvider,
    cursor: Option<&str>,
    options: &FetchOptions,
) -> Result<FetchedBatch, ProviderError> {
    let mut strategy = plan_fetch(cursor);

    let (refs, next_cursor) = loop {
        match list(provider, &strategy, options).await {
            Ok(listing) => break listing,
            Err(error) => match fallback_for(&strategy, &error) {
                Some(next) => {
                    tracing::warn!(
                        error = %error,
                        strategy = next.as_str(),
                        "Stored cursor rejected, falling back"
                    );
                    strategy = next;
                }
                None => return Err(error),
            },
        }
    };

    let listed = refs.len();
    let mut messages = Vec::with_capacity(listed);
    let mut failures = Vec::new();
    for message_ref in refs {
        match provider.get_message(&message_ref.id).await {
            Ok(message) => messages.push(message),
            Err(error) => {
                tracing::warn!(
                    message_id = %message_ref.id,
                    error = %error,
                    "Failed to fetch message"
                );
                failures.push(FetchFailure {
                    message_id: message_ref.id,
                    error: error.to_string(),
                    transient: error.is_transient(),
                });
            }
        }
    }

    let cursor = if failures.iter().any(|f| f.transient) {
        None
    } else {
        next_cursor
    };

    Ok(FetchedBatch {
        strategy,
        messages,
        listed,
        cursor,
        failures,
    })
}

async fn list(
    provider: &dyn MailProvider,
    strategy: &FetchStrategy,
    options: &FetchOptions,
) -> Result<(Vec<MessageRef>, Option<String>), ProviderError> {
    let limit = options.limit.max(1);

    match strategy {
        FetchStrategy::Incremental { cursor } => {
            // The provider budgets history by whole records and its cursor
            // covers every listed message, so nothing is dropped here.
            let batch = provider.list_changes(cursor, limit).await?;
            let refs = dedupe(batch.messages, usize::MAX);
            Ok((refs, batch.cursor))
        }
        FetchStrategy::Full { .. } => {
            // Read the cursor first so mail arriving during the searches is
            // picked up by the next incremental poll.
            let cursor = provider.current_cursor().await?;

            let mut refs = Vec::new();
            for query in options.full_fetch_queries() {
                let remaining = limit as usize - refs.len();
                if remaining == 0 {
                    break;
                }
                let found = provider.search_messages(&query, remaining as u32).await?;
                tracing::debug!(query = %query, found = found.len(), "Full fetch query");
                refs.extend(found);
                refs = dedupe(refs, limit as usize);
            }
            Ok((refs, Some(cursor)))
        }
    }
}

fn dedupe(refs: Vec<MessageRef>, limit: usize) -> Vec<MessageRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .take(limit)
        .collect()
}
