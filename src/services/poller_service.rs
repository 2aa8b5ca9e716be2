//! The poll cycle.
//!
//! [`PollerService::run_cycle`] polls every pollable inbox in turn and
//! returns the run summary. Inboxes, and messages within an inbox, are
//! processed sequentially in fetch order: correlating a message may depend
//! on thread state written for an earlier message in the same cycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::attachment_service::AttachmentError;
use super::sync_service::{self, FetchOptions};
use super::{
    attachment_service, correlation_service, dispute_service, normalizer, signal_service,
    PollContext,
};
use crate::config::PollerSettings;
use crate::domain::{InboxConfig, RawMessage, ThreadMessage};
use crate::providers::email::{credentials, CredentialError, MailProvider, ProviderConnector, ProviderError};
use crate::storage::queries::runs::{self, PollRun};
use crate::storage::queries::vendors::{self, TrustEvent};
use crate::storage::queries::{alerts, inboxes, messages, purchase_orders, threads, tracking};
use crate::storage::{Database, DatabaseError, KeychainAccess};

/// Trust-ledger event recorded for vendor mail tied to an order.
const ENGAGEMENT_EVENT: &str = "email_engagement";
/// Engagement is logged for the scoring system without moving the score.
const ENGAGEMENT_TRUST_DELTA: f64 = 0.0;

/// Errors that abort one inbox's cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("credentials: {0}")]
    Credential(#[from] CredentialError),

    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage: {0}")]
    Storage(#[from] DatabaseError),

    #[error("attachments: {0}")]
    Attachment(#[from] AttachmentError),
}

impl PollError {
    /// Whether processing the same message again may succeed.
    ///
    /// Storage failures count as transient: the message is not recorded, so
    /// holding the cursor is the only way it is seen again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Credential(_) => false,
            Self::Provider(e) => e.is_transient(),
            Self::Storage(_) | Self::Attachment(_) => true,
        }
    }
}

/// Outcome of polling one inbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    pub inbox_id: String,
    pub inbox_email: String,
    pub success: bool,
    pub emails_fetched: u32,
    pub emails_processed: u32,
    pub skipped_duplicates: u32,
    pub threads_created: u32,
    pub pos_correlated: u32,
    pub tracking_numbers_found: u32,
    pub alerts_generated: u32,
    pub engagements_recorded: u32,
    pub attachments_processed: u32,
    pub duplicate_attachments: u32,
    pub invoices_found: u32,
    pub statements_found: u32,
    pub stock_alerts_processed: u32,
    pub disputes_updated: u32,
    pub fetch_strategy: Option<String>,
    pub new_cursor: Option<String>,
    pub errors: Vec<String>,
}

impl PollResult {
    fn for_inbox(inbox: &InboxConfig) -> Self {
        Self {
            inbox_id: inbox.id.to_string(),
            inbox_email: inbox.email.clone(),
            ..Default::default()
        }
    }
}

/// Aggregated outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    pub duration: u64,
    pub inboxes_polled: u32,
    pub emails_fetched: u32,
    pub emails_processed: u32,
    pub threads_created: u32,
    pub pos_correlated: u32,
    pub tracking_numbers_found: u32,
    pub alerts_generated: u32,
    pub engagements_recorded: u32,
    pub invoices_found: u32,
    pub statements_found: u32,
    pub stock_alerts_processed: u32,
    pub results: Vec<PollResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    fn add(&mut self, result: PollResult) {
        self.inboxes_polled += 1;
        self.emails_fetched += result.emails_fetched;
        self.emails_processed += result.emails_processed;
        self.threads_created += result.threads_created;
        self.pos_correlated += result.pos_correlated;
        self.tracking_numbers_found += result.tracking_numbers_found;
        self.alerts_generated += result.alerts_generated;
        self.engagements_recorded += result.engagements_recorded;
        self.invoices_found += result.invoices_found;
        self.statements_found += result.statements_found;
        self.stock_alerts_processed += result.stock_alerts_processed;
        self.results.push(result);
    }
}

/// Runs poll cycles against a mail provider.
pub struct PollerService {
    connector: Arc<dyn ProviderConnector>,
    keychain: KeychainAccess,
}

impl PollerService {
    pub fn new(connector: Arc<dyn ProviderConnector>, keychain: KeychainAccess) -> Self {
        Self {
            connector,
            keychain,
        }
    }

    /// Polls every active, poll-enabled inbox once.
    ///
    /// Inboxes whose poll interval has not elapsed are skipped unless `force`
    /// is set. Only failing to list inboxes fails the run; inbox failures are
    /// recorded on the inbox and in its result.
    pub async fn run_cycle(
        &self,
        db: &Database,
        settings: &PollerSettings,
        force: bool,
    ) -> RunSummary {
        let started = Instant::now();
        let ctx = PollContext::new(db, settings, Utc::now());
        let mut summary = RunSummary {
            success: true,
            ..Default::default()
        };

        match inboxes::list_pollable(db).await {
            Ok(pollable) => {
                tracing::info!(inboxes = pollable.len(), force, "Starting poll cycle");
                for inbox in pollable {
                    if !force && !inbox.is_due(ctx.now) {
                        tracing::debug!(inbox_id = %inbox.id, "Inbox not due, skipping");
                        continue;
                    }
                    let result = self.poll_inbox_recorded(&ctx, &inbox).await;
                    summary.add(result);
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to list inboxes");
                summary.success = false;
                summary.error = Some(error.to_string());
            }
        }

        summary.duration = started.elapsed().as_millis() as u64;
        self.record_run(&ctx, &summary).await;

        tracing::info!(
            success = summary.success,
            duration_ms = summary.duration,
            inboxes = summary.inboxes_polled,
            processed = summary.emails_processed,
            correlated = summary.pos_correlated,
            "Poll cycle finished"
        );
        summary
    }

    /// Polls one inbox and writes its health either way.
    async fn poll_inbox_recorded(&self, ctx: &PollContext<'_>, inbox: &InboxConfig) -> PollResult {
        match self.poll_inbox(ctx, inbox).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(inbox_id = %inbox.id, error = %error, "Inbox poll failed");
                let message = error.to_string();
                match inboxes::record_failure(
                    ctx.db,
                    &inbox.id,
                    &message,
                    ctx.settings.polling.unhealthy_after_errors,
                )
                .await
                {
                    Ok(health) => {
                        tracing::debug!(inbox_id = %inbox.id, health = health.as_str(), "Recorded inbox failure")
                    }
                    Err(e) => {
                        tracing::error!(inbox_id = %inbox.id, error = %e, "Failed to record inbox failure")
                    }
                }
                let mut result = PollResult::for_inbox(inbox);
                result.errors.push(message);
                result
            }
        }
    }

    async fn poll_inbox(
        &self,
        ctx: &PollContext<'_>,
        inbox: &InboxConfig,
    ) -> Result<PollResult, PollError> {
        let mut result = PollResult::for_inbox(inbox);

        let creds = credentials::resolve(inbox, &ctx.settings.oauth, &self.keychain).await?;
        let provider = self.connector.connect(inbox, &creds).await?;

        let options = FetchOptions {
            label: inbox
                .label_filter
                .clone()
                .unwrap_or_else(|| ctx.settings.polling.default_label.clone()),
            lookback_days: ctx.settings.polling.lookback_days,
            limit: inbox.max_results,
        };
        let batch =
            sync_service::fetch_messages(provider.as_ref(), inbox.sync_cursor.as_deref(), &options)
                .await?;

        result.fetch_strategy = Some(batch.strategy.as_str().to_string());
        result.emails_fetched = batch.messages.len() as u32;
        for failure in &batch.failures {
            result
                .errors
                .push(format!("fetch {}: {}", failure.message_id, failure.error));
        }

        let mut cursor = batch.cursor;
        for raw in &batch.messages {
            if let Err(error) = self
                .process_message(ctx, provider.as_ref(), inbox, raw, &mut result)
                .await
            {
                tracing::warn!(
                    inbox_id = %inbox.id,
                    message_id = %raw.id,
                    error = %error,
                    "Failed to process message"
                );
                result.errors.push(format!("message {}: {}", raw.id, error));
                if error.is_transient() {
                    // Hold the cursor so the message is seen again next cycle.
                    cursor = None;
                }
            }
        }

        inboxes::record_success(
            ctx.db,
            &inbox.id,
            cursor.clone(),
            result.emails_processed as u64,
            result.pos_correlated as u64,
            ctx.now,
        )
        .await?;

        result.new_cursor = cursor;
        result.success = true;

        tracing::info!(
            inbox_id = %inbox.id,
            strategy = result.fetch_strategy.as_deref().unwrap_or_default(),
            fetched = result.emails_fetched,
            processed = result.emails_processed,
            duplicates = result.skipped_duplicates,
            errors = result.errors.len(),
            "Inbox polled"
        );
        Ok(result)
    }

    async fn process_message(
        &self,
        ctx: &PollContext<'_>,
        provider: &dyn MailProvider,
        inbox: &InboxConfig,
        raw: &RawMessage,
        result: &mut PollResult,
    ) -> Result<(), PollError> {
        if messages::exists(ctx.db, &raw.id).await? {
            result.skipped_duplicates += 1;
            return Ok(());
        }

        let message = normalizer::normalize(
            raw,
            &inbox.email,
            ctx.settings.polling.body_max_chars,
            ctx.now,
        );

        let subject = Some(message.subject.as_str()).filter(|s| !s.is_empty());
        let (mut thread, created) =
            threads::find_or_create(ctx.db, &inbox.id, &message.thread_id, subject, ctx.now).await?;
        if created {
            result.threads_created += 1;
        }

        let correlation = correlation_service::correlate(ctx, inbox, &thread, &message).await?;
        if correlation_service::commit(ctx, inbox, &mut thread, &message, &correlation).await? {
            result.pos_correlated += 1;
        }
        let committed_po = correlation.po.as_ref().filter(|_| correlation.is_committable());

        let signals = signal_service::extract(
            &message.searchable_text(),
            ctx.now.date_naive(),
            message.is_inbound(),
        );
        for alert in &signals.alerts {
            let inserted = alerts::insert(
                ctx.db,
                alert,
                &message.id,
                &inbox.id,
                Some(&thread.id),
                committed_po.map(|po| &po.id),
            )
            .await?;
            if inserted {
                result.alerts_generated += 1;
                tracing::info!(
                    message_id = %message.id,
                    kind = alert.kind.as_str(),
                    severity = alert.severity.as_str(),
                    "Raised alert"
                );
            }
        }

        if let Some(info) = &signals.tracking {
            result.tracking_numbers_found += 1;
            tracking::upsert(ctx.db, info, committed_po, &message.id).await?;
            if let Some(po) = committed_po {
                purchase_orders::update_tracking(ctx.db, po, info).await?;
            }
        }

        if message.is_inbound() {
            if let Some((po, vendor_id)) =
                committed_po.and_then(|po| po.vendor_id.as_ref().map(|v| (po, v)))
            {
                let event = TrustEvent {
                    vendor_id: vendor_id.clone(),
                    message_id: message.id.clone(),
                    event_type: ENGAGEMENT_EVENT.to_string(),
                    delta: ENGAGEMENT_TRUST_DELTA,
                    dispute_id: None,
                    po_id: Some(po.id.to_string()),
                };
                if vendors::record_trust_event(ctx.db, &event).await? {
                    result.engagements_recorded += 1;
                }
            }
        }

        if let Some(outcome) =
            dispute_service::process(ctx, &message, committed_po, &signals).await?
        {
            if outcome.applied {
                result.disputes_updated += 1;
            }
        }

        let attachments =
            attachment_service::process_attachments(ctx, provider, inbox, &message, committed_po)
                .await?;
        result.attachments_processed += attachments.processed;
        result.duplicate_attachments += attachments.duplicates;
        result.invoices_found += attachments.invoices;
        result.statements_found += attachments.statements;
        result.stock_alerts_processed += attachments.stock_alerts;
        result.errors.extend(attachments.errors);

        let row = ThreadMessage {
            message_id: message.id.clone(),
            thread_id: thread.id.clone(),
            inbox_id: inbox.id.clone(),
            direction: message.direction,
            from_email: message.from.email.clone(),
            from_name: message.from.name.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            received_at: message.received_at,
            tracking_number: signals.tracking.as_ref().map(|t| t.tracking_number.clone()),
            carrier: signals
                .tracking
                .as_ref()
                .and_then(|t| t.carrier)
                .or(signals.carrier)
                .map(|c| c.as_str().to_string()),
            eta: signals.eta,
            po_id: committed_po.map(|po| po.id.clone()),
            has_attachments: !message.attachments.is_empty(),
        };
        if messages::insert(ctx.db, &row).await? {
            result.emails_processed += 1;
            threads::record_message_activity(ctx.db, &thread.id, message.received_at).await?;
        }

        Ok(())
    }

    async fn record_run(&self, ctx: &PollContext<'_>, summary: &RunSummary) {
        let summary_json = match serde_json::to_string(summary) {
            Ok(json) => json,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to serialize run summary");
                String::from("{}")
            }
        };
        let run = PollRun {
            id: Uuid::new_v4().to_string(),
            started_at: ctx.now,
            finished_at: Utc::now(),
            success: summary.success,
            duration_ms: summary.duration,
            inboxes_polled: summary.inboxes_polled,
            emails_processed: summary.emails_processed,
            summary_json,
            error: summary.error.clone(),
        };
        if let Err(error) = runs::insert(ctx.db, &run).await {
            tracing::error!(error = %error, "Failed to record poll run");
        }
    }
}
