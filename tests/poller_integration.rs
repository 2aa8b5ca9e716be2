//! End-to-end poll cycles against an in-memory database and a fake mailbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use inbox_poller::config::PollerSettings;
use inbox_poller::domain::{
    AttachmentType, CorrelationMethod, CredentialSource, Header, InboxConfig, InboxHealth,
    InboxId, InboxPurpose, InternalPurchaseOrder, MessageId, MessagePart, PoId, PoSource,
    PurchaseOrder, RawMessage, VendorId,
};
use inbox_poller::providers::email::{
    ChangeBatch, MailProvider, MessageRef, OAuthCredentials, ProviderConnector, ProviderError,
    Result as ProviderResult,
};
use inbox_poller::services::attachment_service::content_hash;
use inbox_poller::storage::queries::{
    attachments, inboxes, messages, purchase_orders, runs, threads, tracking, vendors,
};
use inbox_poller::storage::{Database, KeychainAccess};
use inbox_poller::PollerService;

/// A mailbox whose contents the test controls.
#[derive(Default)]
struct FakeMailbox {
    messages: Vec<RawMessage>,
    /// Current history position.
    cursor: u64,
    /// Message-added records, oldest first.
    history: Vec<(u64, MessageId)>,
    attachments: HashMap<String, Vec<u8>>,
    /// Downloads that fail with a backend error before one succeeds.
    failing_downloads: u32,
}

impl FakeMailbox {
    /// Adds a history record for `id` without storing the message, as when
    /// mail is deleted between listing and fetching.
    fn record(&mut self, id: &str) {
        self.cursor += 1;
        self.history.push((self.cursor, MessageId::from(id)));
    }

    fn deliver(&mut self, message: RawMessage) {
        self.record(&message.id.to_string());
        self.messages.push(message);
    }
}

#[derive(Clone, Default)]
struct FakeConnector {
    mailbox: Arc<Mutex<FakeMailbox>>,
}

struct FakeProvider {
    mailbox: Arc<Mutex<FakeMailbox>>,
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(
        &self,
        _inbox: &InboxConfig,
        credentials: &OAuthCredentials,
    ) -> ProviderResult<Box<dyn MailProvider>> {
        if credentials.refresh_token != "rt-valid" {
            return Err(ProviderError::Authentication("invalid_grant".into()));
        }
        Ok(Box::new(FakeProvider {
            mailbox: self.mailbox.clone(),
        }))
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn current_cursor(&self) -> ProviderResult<String> {
        Ok(self.mailbox.lock().unwrap().cursor.to_string())
    }

    async fn list_changes(&self, cursor: &str, limit: u32) -> ProviderResult<ChangeBatch> {
        let mailbox = self.mailbox.lock().unwrap();
        let start: u64 = cursor
            .parse()
            .map_err(|_| ProviderError::NotFound("startHistoryId".into()))?;
        let pending: Vec<&(u64, MessageId)> =
            mailbox.history.iter().filter(|(id, _)| *id > start).collect();
        let taken = &pending[..pending.len().min(limit as usize)];
        let next = if taken.len() < pending.len() {
            taken.last().map(|(id, _)| *id).unwrap_or(start)
        } else {
            mailbox.cursor
        };
        Ok(ChangeBatch {
            messages: taken
                .iter()
                .map(|(_, id)| MessageRef::new(id.clone(), format!("t-{}", id)))
                .collect(),
            cursor: Some(next.to_string()),
        })
    }

    async fn search_messages(&self, query: &str, limit: u32) -> ProviderResult<Vec<MessageRef>> {
        let mailbox = self.mailbox.lock().unwrap();
        if !query.starts_with("label:") {
            return Ok(Vec::new());
        }
        Ok(mailbox
            .messages
            .iter()
            .take(limit as usize)
            .map(|m| MessageRef::new(m.id.clone(), m.thread_id.clone()))
            .collect())
    }

    async fn get_message(&self, id: &MessageId) -> ProviderResult<RawMessage> {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn download_attachment(
        &self,
        _message_id: &MessageId,
        attachment_id: &str,
    ) -> ProviderResult<Vec<u8>> {
        let mut mailbox = self.mailbox.lock().unwrap();
        if mailbox.failing_downloads > 0 {
            mailbox.failing_downloads -= 1;
            return Err(ProviderError::Provider("503 backend error".into()));
        }
        mailbox
            .attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(attachment_id.to_string()))
    }
}

fn email(id: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage {
        id: MessageId::from(id),
        thread_id: format!("t-{}", id),
        label_ids: vec!["INBOX".to_string()],
        snippet: body.chars().take(60).collect(),
        internal_date_ms: Some(Utc::now().timestamp_millis()),
        headers: vec![
            Header::new("From", "Acme Shipping <ship@acmesupply.example>"),
            Header::new("To", "purchasing@acme.example"),
            Header::new("Subject", subject),
        ],
        payload: MessagePart {
            part_id: "0".to_string(),
            mime_type: "text/plain".to_string(),
            data: Some(body.as_bytes().to_vec()),
            ..Default::default()
        },
    }
}

const SHIPMENT_BODY: &str =
    "Your order shipped via UPS. Tracking: 1Z9999999999999999. ETA: 2025-03-14";

fn shipment_email() -> RawMessage {
    email("m-1", "PO-4821 shipped", SHIPMENT_BODY)
}

fn invoice_email(id: &str, attachment_id: &str) -> RawMessage {
    let mut message = email(id, "Invoice INV-1001 for PO-4821", "Invoice attached.");
    let body = std::mem::take(&mut message.payload);
    message.payload = MessagePart {
        mime_type: "multipart/mixed".to_string(),
        parts: vec![
            body,
            MessagePart {
                part_id: "1".to_string(),
                mime_type: "application/pdf".to_string(),
                filename: "INV-1001.pdf".to_string(),
                attachment_id: Some(attachment_id.to_string()),
                size: 2048,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    message
}

fn inbox(id: &str, credentials: CredentialSource) -> InboxConfig {
    InboxConfig {
        id: InboxId::from(id),
        email: "purchasing@acme.example".to_string(),
        display_name: Some("Purchasing".to_string()),
        purpose: InboxPurpose::Purchasing,
        credentials,
        sync_cursor: None,
        poll_interval: Duration::from_secs(300),
        label_filter: Some("purchasing".to_string()),
        max_results: 50,
        ai_parsing_enabled: false,
        ai_daily_budget_cents: 0,
        is_active: true,
        poll_enabled: true,
        consecutive_errors: 0,
        health: InboxHealth::Healthy,
        last_error: None,
        last_polled_at: None,
        total_emails_processed: 0,
        total_pos_correlated: 0,
    }
}

fn settings() -> PollerSettings {
    let mut settings = PollerSettings::default();
    settings.oauth.client_id = Some("client".to_string());
    settings.oauth.client_secret = Some("secret".to_string());
    settings
}

async fn seed(db: &Database) {
    vendors::insert(db, &VendorId::from("v-1"), "Acme Supply")
        .await
        .unwrap();
    purchase_orders::insert_internal(
        db,
        &InternalPurchaseOrder {
            id: PoId::from("po-1"),
            order_number: "PO-4821".to_string(),
            vendor_id: Some(VendorId::from("v-1")),
            status: "ordered".to_string(),
            order_date: Some(Utc::now() - chrono::Duration::days(3)),
            tracking_number: None,
            tracking_carrier: None,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn shipment_email_is_correlated_and_tracked_once() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = settings();
    seed(&db).await;
    inboxes::insert(
        &db,
        &inbox(
            "inbox-1",
            CredentialSource::RefreshToken {
                token: "rt-valid".to_string(),
            },
        ),
    )
    .await
    .unwrap();

    let connector = FakeConnector::default();
    {
        let mut mailbox = connector.mailbox.lock().unwrap();
        mailbox.messages.push(shipment_email());
        mailbox.cursor = 5000;
    }
    let poller = PollerService::new(Arc::new(connector.clone()), KeychainAccess::new());

    let summary = poller.run_cycle(&db, &settings, true).await;
    assert!(summary.success);
    assert_eq!(summary.inboxes_polled, 1);
    assert_eq!(summary.emails_fetched, 1);
    assert_eq!(summary.emails_processed, 1);
    assert_eq!(summary.threads_created, 1);
    assert_eq!(summary.pos_correlated, 1);
    assert_eq!(summary.tracking_numbers_found, 1);
    assert_eq!(summary.engagements_recorded, 1);
    assert_eq!(summary.alerts_generated, 0);
    let result = &summary.results[0];
    assert_eq!(result.fetch_strategy.as_deref(), Some("full"));
    assert_eq!(result.new_cursor.as_deref(), Some("5000"));

    let cached = tracking::get(&db, "1Z9999999999999999")
        .await
        .unwrap()
        .expect("tracking cached");
    assert_eq!(cached.carrier.as_deref(), Some("UPS"));
    assert_eq!(cached.po_id.as_deref(), Some("po-1"));
    assert_eq!(cached.po_number.as_deref(), Some("PO-4821"));

    match purchase_orders::get(&db, &PoId::from("po-1"), PoSource::Primary)
        .await
        .unwrap()
    {
        Some(PurchaseOrder::Primary(po)) => {
            assert_eq!(po.tracking_number.as_deref(), Some("1Z9999999999999999"));
            assert_eq!(po.tracking_carrier.as_deref(), Some("UPS"));
        }
        other => panic!("unexpected order: {:?}", other),
    }

    let (vendor_id, confidence) = vendors::domain_mapping(&db, "acmesupply.example")
        .await
        .unwrap()
        .expect("domain learned");
    assert_eq!(vendor_id, VendorId::from("v-1"));
    assert!((confidence - 0.85).abs() < 1e-9);

    // The same message arrives again through the history feed.
    connector.mailbox.lock().unwrap().record("m-1");
    let summary = poller.run_cycle(&db, &settings, true).await;
    assert!(summary.success);
    assert_eq!(summary.emails_processed, 0);
    assert_eq!(summary.pos_correlated, 0);
    let result = &summary.results[0];
    assert_eq!(result.fetch_strategy.as_deref(), Some("incremental"));
    assert_eq!(result.skipped_duplicates, 1);
    assert_eq!(result.new_cursor.as_deref(), Some("5001"));

    let stored = inboxes::get_by_id(&db, &InboxId::from("inbox-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_emails_processed, 1);
    assert_eq!(stored.total_pos_correlated, 1);
    assert_eq!(stored.sync_cursor.as_deref(), Some("5001"));
    assert_eq!(
        messages::count_for_inbox(&db, &InboxId::from("inbox-1"))
            .await
            .unwrap(),
        1
    );

    let run = runs::latest(&db).await.unwrap().expect("run recorded");
    assert!(run.success);
    assert_eq!(run.inboxes_polled, 1);
}

#[tokio::test]
async fn credential_failure_aborts_only_that_inbox() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = settings();
    seed(&db).await;
    inboxes::insert(&db, &inbox("inbox-broken", CredentialSource::Missing))
        .await
        .unwrap();

    let mut healthy = inbox(
        "inbox-ok",
        CredentialSource::RefreshToken {
            token: "rt-valid".to_string(),
        },
    );
    healthy.email = "ap@acme.example".to_string();
    inboxes::insert(&db, &healthy).await.unwrap();

    let connector = FakeConnector::default();
    connector
        .mailbox
        .lock()
        .unwrap()
        .messages
        .push(shipment_email());
    let poller = PollerService::new(Arc::new(connector), KeychainAccess::new());

    let summary = poller.run_cycle(&db, &settings, true).await;
    assert!(summary.success);
    assert_eq!(summary.inboxes_polled, 2);
    assert_eq!(summary.emails_processed, 1);

    let results: HashMap<_, _> = summary
        .results
        .iter()
        .map(|r| (r.inbox_id.as_str(), r))
        .collect();
    assert!(results["inbox-ok"].success);
    assert!(!results["inbox-broken"].success);
    assert_eq!(results["inbox-broken"].errors.len(), 1);

    let broken = inboxes::get_by_id(&db, &InboxId::from("inbox-broken"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broken.consecutive_errors, 1);
    assert!(broken.last_error.is_some());
    assert!(broken.is_active);
}

fn inbox_at(id: &str, cursor: &str) -> InboxConfig {
    let mut config = inbox(
        id,
        CredentialSource::RefreshToken {
            token: "rt-valid".to_string(),
        },
    );
    config.sync_cursor = Some(cursor.to_string());
    config
}

#[tokio::test]
async fn reply_from_stored_cursor_commits_subject_match() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = settings();
    seed(&db).await;
    inboxes::insert(&db, &inbox_at("inbox-1", "1000")).await.unwrap();

    let connector = FakeConnector::default();
    {
        let mut mailbox = connector.mailbox.lock().unwrap();
        mailbox.cursor = 1000;
        mailbox.deliver(email("m-1", "RE: PO-4821 shipment", SHIPMENT_BODY));
    }
    let poller = PollerService::new(Arc::new(connector), KeychainAccess::new());

    let summary = poller.run_cycle(&db, &settings, true).await;
    assert!(summary.success);
    assert_eq!(summary.emails_processed, 1);
    assert_eq!(summary.pos_correlated, 1);
    assert_eq!(summary.tracking_numbers_found, 1);
    let result = &summary.results[0];
    assert_eq!(result.fetch_strategy.as_deref(), Some("incremental"));
    assert_eq!(result.new_cursor.as_deref(), Some("1001"));

    let (thread, created) = threads::find_or_create(
        &db,
        &InboxId::from("inbox-1"),
        "t-m-1",
        None,
        Utc::now(),
    )
    .await
    .unwrap();
    assert!(!created);
    let correlation = thread.correlation.expect("thread correlated");
    assert_eq!(correlation.po_id, PoId::from("po-1"));
    assert_eq!(correlation.method, CorrelationMethod::SubjectMatch);
    assert!((correlation.confidence - 0.90).abs() < 1e-9);

    let stored = inboxes::get_by_id(&db, &InboxId::from("inbox-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_cursor.as_deref(), Some("1001"));
}

#[tokio::test]
async fn deleted_message_does_not_stall_the_cursor() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = settings();
    let mut config = inbox_at("inbox-1", "5000");
    config.max_results = 2;
    inboxes::insert(&db, &config).await.unwrap();

    let connector = FakeConnector::default();
    {
        let mut mailbox = connector.mailbox.lock().unwrap();
        mailbox.cursor = 5000;
        mailbox.record("m-gone");
        for id in ["m-1", "m-2", "m-3"] {
            mailbox.deliver(email(id, "Weekly update", "Nothing to report."));
        }
    }
    let poller = PollerService::new(Arc::new(connector), KeychainAccess::new());

    let first = poller.run_cycle(&db, &settings, true).await;
    let result = &first.results[0];
    assert_eq!(result.emails_processed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.new_cursor.as_deref(), Some("5002"));

    let second = poller.run_cycle(&db, &settings, true).await;
    assert_eq!(second.results[0].emails_processed, 2);
    assert!(second.results[0].errors.is_empty());

    let stored = inboxes::get_by_id(&db, &InboxId::from("inbox-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_emails_processed, 3);
    assert_eq!(stored.sync_cursor.as_deref(), Some("5004"));
}

#[tokio::test]
async fn failed_attachment_download_retries_the_whole_message() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = settings();
    seed(&db).await;
    inboxes::insert(&db, &inbox_at("inbox-1", "5000")).await.unwrap();

    let connector = FakeConnector::default();
    {
        let mut mailbox = connector.mailbox.lock().unwrap();
        mailbox.cursor = 5000;
        mailbox.deliver(invoice_email("m-inv", "att-inv"));
        mailbox
            .attachments
            .insert("att-inv".to_string(), b"%PDF-1.4 INV-1001".to_vec());
        mailbox.failing_downloads = 1;
    }
    let poller = PollerService::new(Arc::new(connector), KeychainAccess::new());

    let first = poller.run_cycle(&db, &settings, true).await;
    let result = &first.results[0];
    assert!(result.success);
    assert_eq!(result.emails_processed, 0);
    assert_eq!(result.invoices_found, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.new_cursor.is_none());
    assert!(!messages::exists(&db, &MessageId::from("m-inv")).await.unwrap());

    let second = poller.run_cycle(&db, &settings, true).await;
    let result = &second.results[0];
    assert_eq!(result.emails_processed, 1);
    assert_eq!(result.invoices_found, 1);
    assert_eq!(result.new_cursor.as_deref(), Some("5001"));

    let stored = attachments::find_original_by_hash(&db, &content_hash(b"%PDF-1.4 INV-1001"))
        .await
        .unwrap()
        .expect("invoice recorded");
    assert_eq!(stored.attachment_type, AttachmentType::Invoice);
}
