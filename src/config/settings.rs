//! Poller settings and configuration types.
//!
//! Settings are read from `settings.json` in the platform config directory
//! (or a path given on the command line). Every section has defaults, so an
//! empty object is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::email::RetryPolicy;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Top-level poller settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    /// Local database location.
    pub database: DatabaseSettings,
    /// OAuth client registration used for token refresh.
    pub oauth: OAuthSettings,
    /// Scheduling and fetch limits.
    pub polling: PollingSettings,
    /// Correlation tuning.
    pub correlation: CorrelationSettings,
    /// Outbound HTTP behaviour.
    pub http: HttpSettings,
    /// Keychain service that `keychain:` credential references resolve against.
    pub keychain_service: Option<String>,
}

impl PollerSettings {
    /// Environment variable overriding the database path.
    pub const DATABASE_ENV: &'static str = "INBOX_POLLER_DB";
    /// Environment variable overriding the OAuth client id.
    pub const CLIENT_ID_ENV: &'static str = "GOOGLE_CLIENT_ID";
    /// Environment variable overriding the OAuth client secret.
    pub const CLIENT_SECRET_ENV: &'static str = "GOOGLE_CLIENT_SECRET";

    /// Loads settings from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Parses a settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns `<config dir>/settings.json` for this application.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "inbox-poller", "inbox-poller")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Applies environment overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(Self::DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(id) = lookup(Self::CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.oauth.client_id = Some(id);
        }
        if let Some(secret) = lookup(Self::CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.oauth.client_secret = Some(secret);
        }
    }

    /// Resolves the database path, falling back to the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        directories::ProjectDirs::from("io", "inbox-poller", "inbox-poller")
            .map(|dirs| dirs.data_dir().join("poller.db"))
            .unwrap_or_else(|| PathBuf::from("poller.db"))
    }
}

/// Database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path.
    pub path: Option<PathBuf>,
}

/// OAuth client registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Scheduling and fetch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Consecutive failed cycles before an inbox is marked unhealthy.
    pub unhealthy_after_errors: u32,
    /// Label searched first on a full fetch when the inbox has none.
    pub default_label: String,
    /// How far back the general-inbox query looks on a full fetch.
    pub lookback_days: u32,
    /// Upper bound on flattened body length, in characters.
    pub body_max_chars: usize,
    /// Seconds between cycles in watch mode.
    pub watch_interval_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            unhealthy_after_errors: 5,
            default_label: "purchasing".to_string(),
            lookback_days: 14,
            body_max_chars: 50_000,
            watch_interval_seconds: 300,
        }
    }
}

/// Correlation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Orders older than this many days are not correlation candidates.
    pub recency_days: i64,
    /// Confidence stored when a sender domain is learned.
    pub learned_domain_confidence: f64,
    /// Domains never learned or matched (shared mail hosts).
    pub free_mail_domains: Vec<String>,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            recency_days: 30,
            learned_domain_confidence: 0.85,
            free_mail_domains: [
                "gmail.com",
                "yahoo.com",
                "outlook.com",
                "hotmail.com",
                "icloud.com",
                "aol.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

/// Outbound HTTP behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry: RetryPolicy::default(),
        }
    }
}
