//! Gmail API provider implementation.
//!
//! This module provides a [`MailProvider`] implementation using the Gmail REST
//! API, and [`GmailConnector`], which exchanges an inbox's refresh token for an
//! access token and hands back an authenticated provider.
//!
//! # API Usage
//!
//! This provider uses the Gmail API v1:
//! - `users.getProfile` for the current history id
//! - `users.history.list` for incremental sync
//! - `users.messages.list` for query-based full fetch
//! - `users.messages.get` for complete messages
//! - `users.messages.attachments.get` for attachment bodies

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde::Deserialize;

use super::retry::{send_with_retry, RetryPolicy};
use super::{
    ChangeBatch, MailProvider, MessageRef, OAuthCredentials, ProviderConnector, ProviderError,
    Result,
};
use crate::domain::{Header, InboxConfig, InboxId, MessageId, MessagePart, RawMessage};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Largest page the Gmail list endpoints accept.
const MAX_PAGE_SIZE: u32 = 500;

/// Gmail API profile response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    history_id: String,
}

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<GmailMessageRef>>,
    next_page_token: Option<String>,
}

/// Gmail message id pair as returned by list and history calls.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    thread_id: String,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: String,
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    payload: Option<GmailPart>,
    internal_date: Option<String>,
}

/// Gmail message part. The payload is itself a part.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    part_id: Option<String>,
    mime_type: Option<String>,
    filename: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailBody {
    data: Option<String>,
    size: Option<u64>,
    attachment_id: Option<String>,
}

/// Gmail history list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    history: Option<Vec<GmailHistory>>,
    next_page_token: Option<String>,
    history_id: Option<String>,
}

/// Gmail history record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistory {
    id: String,
    messages_added: Option<Vec<GmailHistoryMessage>>,
}

/// Gmail history message reference.
#[derive(Debug, Deserialize)]
struct GmailHistoryMessage {
    message: GmailMessageRef,
}

/// Gmail attachment body response.
#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: Option<String>,
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Decodes Gmail's URL-safe base64, with or without padding.
fn decode_base64url(data: &str) -> Option<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .ok()
}

/// Maps a non-success response to a provider error.
async fn handle_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        400 => ProviderError::InvalidRequest(body),
        401 | 403 => ProviderError::Authentication(format!("unauthorized: {}", body)),
        404 => ProviderError::NotFound(body),
        429 => ProviderError::RateLimited { retry_after_secs },
        500..=599 => ProviderError::Provider(format!("API error ({}): {}", status, body)),
        _ => ProviderError::Internal(format!("API error ({}): {}", status, body)),
    }
}

/// Builds authenticated [`GmailProvider`]s.
#[derive(Debug, Clone)]
pub struct GmailConnector {
    client: reqwest::Client,
    retry: RetryPolicy,
    api_base: String,
    token_url: String,
}

impl GmailConnector {
    /// Creates a connector whose HTTP calls time out after `timeout`.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            retry,
            api_base: GMAIL_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    /// Overrides the API and token endpoints.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.token_url = token_url.into();
        self
    }

    /// Exchanges the refresh token for an access token.
    async fn refresh_access_token(&self, credentials: &OAuthCredentials) -> Result<String> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let request = self.client.post(&self.token_url).form(&params);
        let response = send_with_retry(request, &self.retry).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse token response: {}", e)))?;
        tracing::debug!(expires_in = ?token_response.expires_in, "Access token refreshed");

        Ok(token_response.access_token)
    }
}

#[async_trait]
impl ProviderConnector for GmailConnector {
    async fn connect(
        &self,
        inbox: &InboxConfig,
        credentials: &OAuthCredentials,
    ) -> Result<Box<dyn MailProvider>> {
        let access_token = self.refresh_access_token(credentials).await?;
        tracing::info!(inbox_id = %inbox.id, "Gmail provider authenticated");

        Ok(Box::new(GmailProvider {
            inbox_id: inbox.id.clone(),
            client: self.client.clone(),
            retry: self.retry.clone(),
            api_base: self.api_base.clone(),
            access_token,
        }))
    }
}

/// Gmail API provider for one authenticated mailbox.
pub struct GmailProvider {
    /// Inbox this provider reads, for logging.
    inbox_id: InboxId,
    /// HTTP client for API requests.
    client: reqwest::Client,
    /// Retry policy for each request.
    retry: RetryPolicy,
    /// API base URL.
    api_base: String,
    /// OAuth access token.
    access_token: String,
}

impl GmailProvider {
    /// Builds authorization headers for API requests.
    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.access_token))
                .map_err(|e| ProviderError::Internal(format!("invalid header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.api_base, endpoint);
        let request = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .query(query);

        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
    }
}

/// History records collected up to a message budget.
///
/// Records are taken whole. The cursor of a truncated listing is the id of
/// the last record taken, so every message it covers has been listed.
struct HistoryListing {
    start: String,
    limit: usize,
    seen: HashSet<String>,
    messages: Vec<MessageRef>,
    last_record_id: Option<String>,
}

impl HistoryListing {
    fn new(start: &str, limit: u32) -> Self {
        Self {
            start: start.to_string(),
            limit: limit.max(1) as usize,
            seen: HashSet::new(),
            messages: Vec::new(),
            last_record_id: None,
        }
    }

    /// Takes a record, or returns false when it would overrun the budget.
    /// The first record is always taken so a listing never stalls.
    fn push(&mut self, record: GmailHistory) -> bool {
        let added: Vec<GmailMessageRef> = record
            .messages_added
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.message)
            .filter(|m| !self.seen.contains(&m.id))
            .collect();
        if self.last_record_id.is_some() && self.messages.len() + added.len() > self.limit {
            return false;
        }
        for message in added {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(MessageRef::new(message.id, message.thread_id));
            }
        }
        self.last_record_id = Some(record.id);
        true
    }

    /// `history_id` is the mailbox position reported with the final page.
    fn finish(self, history_id: Option<String>) -> ChangeBatch {
        ChangeBatch {
            messages: self.messages,
            cursor: history_id.or(self.last_record_id).or(Some(self.start)),
        }
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn current_cursor(&self) -> Result<String> {
        let profile: ProfileResponse = self.get("/profile", &[]).await?;
        Ok(profile.history_id)
    }

    async fn list_changes(&self, cursor: &str, limit: u32) -> Result<ChangeBatch> {
        let mut listing = HistoryListing::new(cursor, limit);
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startHistoryId", cursor.to_string()),
                ("historyTypes", "messageAdded".to_string()),
                ("maxResults", MAX_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response: HistoryListResponse = self.get("/history", &query).await?;

            for record in response.history.unwrap_or_default() {
                if !listing.push(record) {
                    tracing::debug!(
                        inbox_id = %self.inbox_id,
                        limit,
                        "History listing truncated at result budget"
                    );
                    return Ok(listing.finish(None));
                }
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(listing.finish(response.history_id)),
            }
        }
    }

    async fn search_messages(&self, query: &str, limit: u32) -> Result<Vec<MessageRef>> {
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        while refs.len() < limit as usize {
            let remaining = (limit as usize - refs.len()).min(MAX_PAGE_SIZE as usize);
            let mut params = vec![
                ("q", query.to_string()),
                ("maxResults", remaining.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response: MessageListResponse = self.get("/messages", &params).await?;
            refs.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| MessageRef::new(m.id, m.thread_id)),
            );

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        refs.truncate(limit as usize);
        Ok(refs)
    }

    async fn get_message(&self, id: &MessageId) -> Result<RawMessage> {
        let endpoint = format!("/messages/{}", id);
        let message: GmailMessage = self
            .get(&endpoint, &[("format", "full".to_string())])
            .await?;
        Ok(gmail_message_to_raw(message))
    }

    async fn download_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let endpoint = format!("/messages/{}/attachments/{}", message_id, attachment_id);
        let response: AttachmentResponse = self.get(&endpoint, &[]).await?;
        response
            .data
            .as_deref()
            .and_then(decode_base64url)
            .ok_or_else(|| {
                ProviderError::Internal(format!(
                    "attachment {} on {} has no decodable body",
                    attachment_id, message_id
                ))
            })
    }
}

/// Converts a Gmail message into the provider-neutral shape.
fn gmail_message_to_raw(message: GmailMessage) -> RawMessage {
    let payload = message.payload.map(convert_part).unwrap_or_default();

    RawMessage {
        id: MessageId::from(message.id),
        thread_id: message.thread_id,
        label_ids: message.label_ids.unwrap_or_default(),
        snippet: message.snippet.unwrap_or_default(),
        internal_date_ms: message.internal_date.and_then(|d| d.parse::<i64>().ok()),
        headers: payload.headers.clone(),
        payload,
    }
}

/// Recursively converts a Gmail part, decoding inline body data.
fn convert_part(part: GmailPart) -> MessagePart {
    let (data, size, attachment_id) = match part.body {
        Some(body) => (
            body.data.as_deref().and_then(decode_base64url),
            body.size.unwrap_or(0),
            body.attachment_id,
        ),
        None => (None, 0, None),
    };

    MessagePart {
        part_id: part.part_id.unwrap_or_default(),
        mime_type: part.mime_type.unwrap_or_default().to_lowercase(),
        filename: part.filename.unwrap_or_default(),
        headers: part
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|h| Header::new(h.name, h.value))
            .collect(),
        attachment_id,
        size,
        data,
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(convert_part)
            .collect(),
    }
}
