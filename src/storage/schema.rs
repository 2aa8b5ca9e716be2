//! SQL schema definitions as const strings.
//!
//! Contains the SQLite schema for the poller: inbox registry, the purchase
//! order tables it correlates against, and every row it writes downstream.

/// SQL to create the inboxes table.
pub const CREATE_INBOXES: &str = r#"
CREATE TABLE IF NOT EXISTS inboxes (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    display_name TEXT,
    purpose TEXT NOT NULL DEFAULT 'purchasing',
    refresh_token TEXT,
    refresh_token_ref TEXT,
    sync_cursor TEXT,
    poll_interval_seconds INTEGER NOT NULL DEFAULT 300,
    label_filter TEXT,
    max_results INTEGER NOT NULL DEFAULT 50,
    ai_parsing_enabled INTEGER NOT NULL DEFAULT 0,
    ai_daily_budget_cents INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    poll_enabled INTEGER NOT NULL DEFAULT 1,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    health TEXT NOT NULL DEFAULT 'healthy',
    last_error TEXT,
    last_polled_at TEXT,
    total_emails_processed INTEGER NOT NULL DEFAULT 0,
    total_pos_correlated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the vendors table.
pub const CREATE_VENDORS: &str = r#"
CREATE TABLE IF NOT EXISTS vendors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    trust_score REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the internal purchase orders table.
pub const CREATE_PURCHASE_ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS purchase_orders (
    id TEXT PRIMARY KEY,
    order_number TEXT NOT NULL,
    vendor_id TEXT REFERENCES vendors(id),
    status TEXT NOT NULL,
    order_date TEXT,
    tracking_number TEXT,
    tracking_carrier TEXT,
    expected_delivery TEXT,
    tracking_updated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the imported purchase orders table.
pub const CREATE_EXTERNAL_PURCHASE_ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS external_purchase_orders (
    id TEXT PRIMARY KEY,
    external_order_id TEXT NOT NULL,
    supplier_id TEXT REFERENCES vendors(id),
    order_status TEXT NOT NULL,
    ordered_at TEXT,
    estimated_delivery TEXT,
    tracking_number TEXT,
    tracking_carrier TEXT,
    tracking_updated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create purchase order indexes.
pub const CREATE_PURCHASE_ORDER_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_purchase_orders_vendor ON purchase_orders(vendor_id);
CREATE INDEX IF NOT EXISTS idx_purchase_orders_date ON purchase_orders(order_date DESC);
CREATE INDEX IF NOT EXISTS idx_external_pos_supplier ON external_purchase_orders(supplier_id);
CREATE INDEX IF NOT EXISTS idx_external_pos_date ON external_purchase_orders(ordered_at DESC)
"#;

/// SQL to create the learned sender-domain table.
pub const CREATE_VENDOR_EMAIL_DOMAINS: &str = r#"
CREATE TABLE IF NOT EXISTS vendor_email_domains (
    domain TEXT PRIMARY KEY,
    vendor_id TEXT NOT NULL REFERENCES vendors(id),
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the email threads table.
pub const CREATE_EMAIL_THREADS: &str = r#"
CREATE TABLE IF NOT EXISTS email_threads (
    id TEXT PRIMARY KEY,
    inbox_id TEXT NOT NULL REFERENCES inboxes(id),
    external_thread_id TEXT NOT NULL,
    subject TEXT,
    correlation_method TEXT,
    correlation_confidence REAL,
    po_id TEXT,
    po_source TEXT,
    correlated_at TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    last_message_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(inbox_id, external_thread_id)
)
"#;

/// SQL to create the processed-message table.
///
/// The primary key is the provider message id and guards idempotency.
pub const CREATE_EMAIL_THREAD_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS email_thread_messages (
    message_id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES email_threads(id),
    inbox_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    from_email TEXT NOT NULL,
    from_name TEXT,
    subject TEXT,
    snippet TEXT,
    received_at TEXT NOT NULL,
    tracking_number TEXT,
    carrier TEXT,
    eta TEXT,
    po_id TEXT,
    has_attachments INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create email thread indexes.
pub const CREATE_EMAIL_THREAD_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_email_threads_po ON email_threads(po_id);
CREATE INDEX IF NOT EXISTS idx_thread_messages_thread ON email_thread_messages(thread_id)
"#;

/// SQL to create the shared tracking cache.
pub const CREATE_TRACKING_CACHE: &str = r#"
CREATE TABLE IF NOT EXISTS tracking_cache (
    tracking_number TEXT PRIMARY KEY,
    carrier TEXT,
    eta TEXT,
    po_id TEXT,
    po_number TEXT,
    po_source TEXT,
    source_message_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the alerts table.
pub const CREATE_ALERTS: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL,
    inbox_id TEXT NOT NULL,
    thread_id TEXT,
    po_id TEXT,
    kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    route_to TEXT NOT NULL,
    matched TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(message_id, kind)
)
"#;

/// SQL to create the vendor trust ledger.
pub const CREATE_VENDOR_TRUST_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS vendor_trust_events (
    id TEXT PRIMARY KEY,
    vendor_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    dispute_id TEXT,
    po_id TEXT,
    event_type TEXT NOT NULL,
    delta REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(message_id, event_type)
)
"#;

/// SQL to create the disputes table.
pub const CREATE_DISPUTES: &str = r#"
CREATE TABLE IF NOT EXISTS disputes (
    id TEXT PRIMARY KEY,
    po_id TEXT,
    po_number TEXT,
    vendor_id TEXT,
    state TEXT NOT NULL DEFAULT 'open',
    resolution TEXT,
    resolved_at TEXT,
    escalated_at TEXT,
    needs_review INTEGER NOT NULL DEFAULT 0,
    review_note TEXT,
    follow_up_count INTEGER NOT NULL DEFAULT 0,
    next_follow_up_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the dispute communications log.
pub const CREATE_DISPUTE_COMMUNICATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS dispute_communications (
    id TEXT PRIMARY KEY,
    dispute_id TEXT NOT NULL REFERENCES disputes(id),
    message_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    response_type TEXT NOT NULL,
    summary TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(dispute_id, message_id)
)
"#;

/// SQL to create the attachments table.
pub const CREATE_EMAIL_ATTACHMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS email_attachments (
    id TEXT PRIMARY KEY,
    inbox_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    part_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    attachment_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    reason TEXT NOT NULL,
    needs_review INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    duplicate_of TEXT REFERENCES email_attachments(id),
    created_at TEXT NOT NULL,
    UNIQUE(message_id, part_id)
)
"#;

/// SQL to create attachment indexes.
///
/// A content hash appears on at most one non-duplicate row.
pub const CREATE_EMAIL_ATTACHMENT_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_attachments_original_hash
    ON email_attachments(content_hash) WHERE duplicate_of IS NULL;
CREATE INDEX IF NOT EXISTS idx_attachments_hash ON email_attachments(content_hash)
"#;

/// SQL to create the invoice documents table.
pub const CREATE_INVOICE_DOCUMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS invoice_documents (
    id TEXT PRIMARY KEY,
    attachment_id TEXT NOT NULL UNIQUE REFERENCES email_attachments(id),
    message_id TEXT NOT NULL,
    inbox_id TEXT NOT NULL,
    vendor_id TEXT,
    po_id TEXT,
    po_source TEXT,
    status TEXT NOT NULL,
    approved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the draft purchasing action queue.
pub const CREATE_DRAFT_PURCHASE_ACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS draft_purchase_actions (
    id TEXT PRIMARY KEY,
    source_attachment_id TEXT NOT NULL,
    vendor_name TEXT NOT NULL,
    vendor_id TEXT,
    items_json TEXT NOT NULL,
    item_count INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    created_at TEXT NOT NULL,
    UNIQUE(source_attachment_id, vendor_name)
)
"#;

/// SQL to create the run audit table.
pub const CREATE_POLL_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS poll_runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    inboxes_polled INTEGER NOT NULL,
    emails_processed INTEGER NOT NULL,
    summary_json TEXT NOT NULL,
    error TEXT
)
"#;

/// Returns all migration statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_INBOXES,
        CREATE_VENDORS,
        CREATE_PURCHASE_ORDERS,
        CREATE_EXTERNAL_PURCHASE_ORDERS,
        CREATE_PURCHASE_ORDER_INDEXES,
        CREATE_VENDOR_EMAIL_DOMAINS,
        CREATE_EMAIL_THREADS,
        CREATE_EMAIL_THREAD_MESSAGES,
        CREATE_EMAIL_THREAD_INDEXES,
        CREATE_TRACKING_CACHE,
        CREATE_ALERTS,
        CREATE_VENDOR_TRUST_EVENTS,
        CREATE_DISPUTES,
        CREATE_DISPUTE_COMMUNICATIONS,
        CREATE_EMAIL_ATTACHMENTS,
        CREATE_EMAIL_ATTACHMENT_INDEXES,
        CREATE_INVOICE_DOCUMENTS,
        CREATE_DRAFT_PURCHASE_ACTIONS,
        CREATE_POLL_RUNS,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_migrations_returns_statements() {
        let migrations = all_migrations();
        assert_eq!(migrations.len(), 19);
    }

    #[test]
    fn message_table_keys_on_provider_id() {
        assert!(CREATE_EMAIL_THREAD_MESSAGES.contains("message_id TEXT PRIMARY KEY"));
    }

    #[test]
    fn thread_is_unique_per_inbox() {
        assert!(CREATE_EMAIL_THREADS.contains("UNIQUE(inbox_id, external_thread_id)"));
    }

    #[test]
    fn original_hash_index_is_partial() {
        assert!(CREATE_EMAIL_ATTACHMENT_INDEXES.contains("WHERE duplicate_of IS NULL"));
    }

    #[test]
    fn indexes_use_if_not_exists() {
        assert!(CREATE_PURCHASE_ORDER_INDEXES.contains("IF NOT EXISTS"));
        assert!(CREATE_EMAIL_THREAD_INDEXES.contains("IF NOT EXISTS"));
        assert!(CREATE_EMAIL_ATTACHMENT_INDEXES.contains("IF NOT EXISTS"));
    }
}
