//! Mail provider trait definition.
//!
//! This module defines the [`MailProvider`] trait which abstracts over the mail
//! backend the poller reads from, and [`ProviderConnector`], which turns an
//! inbox's credentials into an authenticated provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::OAuthCredentials;
use crate::domain::{InboxConfig, MessageId, RawMessage};

/// Result type alias for mail provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during mail provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found. For history requests this means the
    /// cursor has expired.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-side failure (5xx).
    #[error("provider error: {0}")]
    Provider(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Returns true for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::RateLimited { .. } | Self::Provider(_)
        )
    }
}

/// A message id returned by a listing call, before the full fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    /// Provider message id.
    pub id: MessageId,
    /// Provider thread id.
    pub thread_id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<MessageId>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// Messages added since a cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Added messages in provider order.
    pub messages: Vec<MessageRef>,
    /// Cursor to store once these messages are processed.
    pub cursor: Option<String>,
}

/// Read access to one mailbox.
///
/// Implementations handle authentication, pagination and retry; callers see
/// whole results or a [`ProviderError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Returns the mailbox's current change cursor.
    async fn current_cursor(&self) -> Result<String>;

    /// Lists messages added since `cursor`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the cursor is no longer valid.
    async fn list_changes(&self, cursor: &str, limit: u32) -> Result<ChangeBatch>;

    /// Lists messages matching a provider search query, up to `limit`.
    async fn search_messages(&self, query: &str, limit: u32) -> Result<Vec<MessageRef>>;

    /// Fetches a complete message with decoded headers and parts.
    async fn get_message(&self, id: &MessageId) -> Result<RawMessage>;

    /// Downloads an attachment body.
    async fn download_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<Vec<u8>>;
}

/// Builds an authenticated [`MailProvider`] for an inbox.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Exchanges the refresh token for access and returns a provider.
    async fn connect(
        &self,
        inbox: &InboxConfig,
        credentials: &OAuthCredentials,
    ) -> Result<Box<dyn MailProvider>>;
}
