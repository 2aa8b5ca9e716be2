//! Configuration and settings management.
//!
//! This module provides the poller's settings types and loading. Settings are
//! stored in the user's config directory as JSON.

mod settings;

pub use settings::{
    CorrelationSettings, DatabaseSettings, HttpSettings, OAuthSettings, PollerSettings,
    PollingSettings, SettingsError,
};
