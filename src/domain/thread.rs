//! Thread domain types.
//!
//! Represents persisted email threads and the per-message rows written under
//! them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{CorrelationMethod, Direction, InboxId, MessageId, PoId, PoSource, ThreadId};

/// A provider thread as tracked for one inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailThread {
    /// Internal row id.
    pub id: ThreadId,
    /// Inbox the thread belongs to.
    pub inbox_id: InboxId,
    /// Provider thread id; unique per inbox.
    pub external_thread_id: String,
    /// Subject of the first message seen.
    pub subject: Option<String>,
    /// Committed correlation, if any.
    pub correlation: Option<ThreadCorrelation>,
    /// Number of messages recorded.
    pub message_count: u32,
    /// Received time of the latest recorded message.
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The correlation committed to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadCorrelation {
    pub po_id: PoId,
    pub po_source: PoSource,
    pub method: CorrelationMethod,
    pub confidence: f64,
    pub correlated_at: DateTime<Utc>,
}

/// One processed message. Written once and never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Provider message id; the idempotency key.
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub inbox_id: InboxId,
    pub direction: Direction,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub eta: Option<NaiveDate>,
    pub po_id: Option<PoId>,
    pub has_attachments: bool,
}
