//! Mail provider implementations.
//!
//! This module contains the [`MailProvider`] trait and the Gmail REST
//! implementation the poller reads vendor mail through.
//!
//! # Architecture
//!
//! - [`credentials`] resolves an inbox's refresh token and OAuth client
//! - [`GmailConnector`] exchanges those credentials for an access token
//! - [`GmailProvider`] lists and fetches messages for one mailbox
//! - [`retry`] wraps every HTTP call in bounded backoff

pub mod credentials;
mod gmail;
pub mod retry;
mod traits;

pub use credentials::{CredentialError, OAuthCredentials};
pub use gmail::{GmailConnector, GmailProvider};
pub use retry::RetryPolicy;
pub use traits::{
    ChangeBatch, MailProvider, MessageRef, ProviderConnector, ProviderError, Result,
};

#[cfg(test)]
pub use traits::MockMailProvider;
