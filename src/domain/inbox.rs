//! Inbox configuration domain types.
//!
//! An inbox is a mailbox the poller reads on a schedule. Rows are created by
//! an external admin flow; the poller only mutates the cursor, counters and
//! health fields once per cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InboxId;

/// A configured inbox and its polling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Unique identifier for this inbox.
    pub id: InboxId,
    /// Email address of the mailbox.
    pub email: String,
    /// Display name used in logs and summaries.
    pub display_name: Option<String>,
    /// What kind of traffic this inbox receives.
    pub purpose: InboxPurpose,
    /// Where the OAuth refresh token comes from.
    pub credentials: CredentialSource,
    /// Opaque provider cursor recorded by the previous successful poll.
    pub sync_cursor: Option<String>,
    /// Minimum time between polls of this inbox.
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// Provider label searched first on a full fetch.
    pub label_filter: Option<String>,
    /// Maximum messages fetched per poll.
    pub max_results: u32,
    /// Whether AI parsing is enabled for this inbox (carried as data only).
    pub ai_parsing_enabled: bool,
    /// Daily AI parsing budget in cents.
    pub ai_daily_budget_cents: u32,
    /// Whether the inbox is active.
    pub is_active: bool,
    /// Whether scheduled polling is enabled.
    pub poll_enabled: bool,
    /// Number of consecutive failed cycles.
    pub consecutive_errors: u32,
    /// Current health status.
    pub health: InboxHealth,
    /// Last error message, cleared on success.
    pub last_error: Option<String>,
    /// When the inbox was last polled successfully.
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Running total of processed messages.
    pub total_emails_processed: u64,
    /// Running total of PO correlations committed.
    pub total_pos_correlated: u64,
}

impl InboxConfig {
    /// Returns the domain part of the inbox address, lowercased.
    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().to_lowercase())
    }

    /// Returns true if enough time has passed since the last poll.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_polled_at {
            None => true,
            Some(last) => {
                let interval = chrono::Duration::from_std(self.poll_interval)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                last + interval <= now
            }
        }
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Kind of mail traffic an inbox receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxPurpose {
    /// Vendor order traffic.
    Purchasing,
    /// Invoices and statements.
    Accounting,
    /// Mixed traffic.
    General,
}

impl InboxPurpose {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchasing => "purchasing",
            Self::Accounting => "accounting",
            Self::General => "general",
        }
    }

    /// Parses the stored string form, defaulting to general.
    pub fn parse(value: &str) -> Self {
        match value {
            "purchasing" => Self::Purchasing,
            "accounting" => Self::Accounting,
            _ => Self::General,
        }
    }
}

/// Source of OAuth refresh-token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Refresh token stored directly on the inbox row.
    RefreshToken {
        /// The refresh token.
        token: String,
    },
    /// Indirect reference (`env:NAME`, `keychain:KEY`, `vault:PATH`).
    Reference {
        /// The reference string.
        reference: String,
    },
    /// No credential material configured.
    Missing,
}

impl CredentialSource {
    /// Builds a source from the two stored columns, preferring the direct token.
    pub fn from_columns(token: Option<String>, reference: Option<String>) -> Self {
        match (token, reference) {
            (Some(token), _) if !token.trim().is_empty() => Self::RefreshToken { token },
            (_, Some(reference)) if !reference.trim().is_empty() => Self::Reference { reference },
            _ => Self::Missing,
        }
    }
}

/// Health of an inbox as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxHealth {
    /// Last cycle succeeded.
    Healthy,
    /// Recent failures below the unhealthy threshold.
    Degraded,
    /// Failures reached the threshold; needs investigation.
    Unhealthy,
}

impl InboxHealth {
    /// Derives health from a consecutive error count.
    pub fn from_error_count(errors: u32, unhealthy_after: u32) -> Self {
        if errors == 0 {
            Self::Healthy
        } else if errors >= unhealthy_after.max(1) {
            Self::Unhealthy
        } else {
            Self::Degraded
        }
    }

    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "degraded" => Self::Degraded,
            "unhealthy" => Self::Unhealthy,
            _ => Self::Healthy,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inbox() -> InboxConfig {
        InboxConfig {
            id: InboxId::from("inbox-1"),
            email: "Purchasing@Acme.example".to_string(),
            display_name: None,
            purpose: InboxPurpose::Purchasing,
            credentials: CredentialSource::RefreshToken {
                token: "rt".to_string(),
            },
            sync_cursor: Some("1000".to_string()),
            poll_interval: Duration::from_secs(300),
            label_filter: None,
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

    #[test]
    fn inbox_serialization() {
        let inbox = sample_inbox();
        let json = serde_json::to_string(&inbox).unwrap();
        let deserialized: InboxConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.email, inbox.email);
        assert_eq!(deserialized.poll_interval, Duration::from_secs(300));
        assert_eq!(deserialized.credentials, inbox.credentials);
    }

    #[test]
    fn domain_is_lowercased() {
        assert_eq!(sample_inbox().domain(), Some("acme.example".to_string()));
    }

    #[test]
    fn due_check_respects_interval() {
        let now = Utc::now();
        let mut inbox = sample_inbox();
        assert!(inbox.is_due(now));

        inbox.last_polled_at = Some(now - chrono::Duration::seconds(60));
        assert!(!inbox.is_due(now));

        inbox.last_polled_at = Some(now - chrono::Duration::seconds(301));
        assert!(inbox.is_due(now));
    }

    #[test]
    fn credential_source_prefers_direct_token() {
        let source =
            CredentialSource::from_columns(Some("tok".into()), Some("env:GMAIL_RT".into()));
        assert!(matches!(source, CredentialSource::RefreshToken { .. }));

        let source = CredentialSource::from_columns(Some("  ".into()), Some("env:GMAIL_RT".into()));
        assert_eq!(
            source,
            CredentialSource::Reference {
                reference: "env:GMAIL_RT".to_string()
            }
        );

        assert_eq!(
            CredentialSource::from_columns(None, None),
            CredentialSource::Missing
        );
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(InboxHealth::from_error_count(0, 5), InboxHealth::Healthy);
        assert_eq!(InboxHealth::from_error_count(2, 5), InboxHealth::Degraded);
        assert_eq!(InboxHealth::from_error_count(5, 5), InboxHealth::Unhealthy);
    }
}
