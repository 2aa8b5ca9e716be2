//! Domain layer types for the inbox poller.
//!
//! This module contains the core domain types used throughout the crate:
//! inboxes, messages, threads, purchase orders, correlation results, extracted
//! signals, attachments and disputes.

mod attachment;
mod correlation;
mod dispute;
mod inbox;
mod message;
mod purchase_order;
mod signals;
mod thread;
mod types;

pub use attachment::{
    AttachmentRecord, AttachmentType, Classification, ProcessingStatus, REVIEW_THRESHOLD,
};
pub use correlation::{CorrelationMethod, CorrelationResult, COMMIT_THRESHOLD};
pub use dispute::{Dispute, DisputeState, DisputeTransition, Resolution, ResponseType};
pub use inbox::{CredentialSource, InboxConfig, InboxHealth, InboxPurpose};
pub use message::{
    Address, AttachmentPart, Direction, Header, MessagePart, NormalizedMessage, RawMessage,
};
pub use purchase_order::{
    normalize_po_number, ExternalPurchaseOrder, InternalPurchaseOrder, PoRef, PoSource,
    PurchaseOrder, PRIMARY_TERMINAL_STATUSES, SECONDARY_TERMINAL_STATUSES,
};
pub use signals::{Alert, AlertKind, Carrier, MessageSignals, Severity, TrackingInfo};
pub use thread::{EmailThread, ThreadCorrelation, ThreadMessage};
pub use types::{AttachmentId, DisputeId, InboxId, MessageId, PoId, ThreadId, VendorId};
