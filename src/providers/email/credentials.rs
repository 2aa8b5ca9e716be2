//! OAuth credential resolution for inboxes.
//!
//! An inbox carries either a refresh token directly or a reference to one:
//!
//! - `env:NAME` reads the environment variable `NAME`
//! - `keychain:KEY` reads `KEY` from the OS keychain
//! - `vault:PATH` is reserved for a secret vault and not supported yet

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OAuthSettings;
use crate::domain::{CredentialSource, InboxConfig};
use crate::storage::{KeychainAccess, KeychainError};

/// Errors resolving an inbox's credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no refresh token configured for inbox {0}")]
    Missing(String),

    #[error("OAuth client {0} is not configured")]
    MissingClient(&'static str),

    #[error("unsupported credential reference: {0}")]
    UnsupportedReference(String),

    #[error("environment variable {0} is not set")]
    Environment(String),

    #[error("keychain entry {0} not found")]
    KeychainEntryMissing(String),

    #[error(transparent)]
    Keychain(#[from] KeychainError),
}

/// Material needed to exchange a refresh token for an access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    /// OAuth refresh token.
    pub refresh_token: String,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Resolves the refresh token and client registration for an inbox.
pub async fn resolve(
    inbox: &InboxConfig,
    oauth: &OAuthSettings,
    keychain: &KeychainAccess,
) -> Result<OAuthCredentials, CredentialError> {
    let refresh_token = resolve_refresh_token(inbox, keychain, |name| std::env::var(name).ok())
        .await?;
    let client_id = oauth
        .client_id
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or(CredentialError::MissingClient("client_id"))?;
    let client_secret = oauth
        .client_secret
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or(CredentialError::MissingClient("client_secret"))?;

    Ok(OAuthCredentials {
        refresh_token,
        client_id,
        client_secret,
    })
}

/// Resolves only the refresh token, with an injectable environment lookup.
pub async fn resolve_refresh_token<F>(
    inbox: &InboxConfig,
    keychain: &KeychainAccess,
    env: F,
) -> Result<String, CredentialError>
where
    F: Fn(&str) -> Option<String>,
{
    match &inbox.credentials {
        CredentialSource::RefreshToken { token } => Ok(token.clone()),
        CredentialSource::Missing => Err(CredentialError::Missing(inbox.id.to_string())),
        CredentialSource::Reference { reference } => {
            let reference = reference.trim();
            if let Some(name) = reference.strip_prefix("env:") {
                env(name)
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| CredentialError::Environment(name.to_string()))
            } else if let Some(key) = reference.strip_prefix("keychain:") {
                keychain
                    .retrieve(key)
                    .await?
                    .ok_or_else(|| CredentialError::KeychainEntryMissing(key.to_string()))
            } else {
                Err(CredentialError::UnsupportedReference(reference.to_string()))
            }
        }
    }
}
