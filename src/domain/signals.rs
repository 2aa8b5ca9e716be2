//! Shipping and risk signals extracted from message text.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Known parcel carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Carrier {
    #[serde(rename = "UPS")]
    Ups,
    #[serde(rename = "FedEx")]
    FedEx,
    #[serde(rename = "USPS")]
    Usps,
    #[serde(rename = "DHL")]
    Dhl,
}

impl Carrier {
    /// Returns the display/stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ups => "UPS",
            Self::FedEx => "FedEx",
            Self::Usps => "USPS",
            Self::Dhl => "DHL",
        }
    }
}

/// Tracking details found in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub carrier: Option<Carrier>,
    pub eta: Option<NaiveDate>,
}

/// Category of risk detected in vendor mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Delay,
    Backorder,
    TrackingException,
}

impl AlertKind {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Backorder => "backorder",
            Self::TrackingException => "tracking_exception",
        }
    }

    /// Severity attached to alerts of this kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Delay => Severity::Medium,
            Self::Backorder => Severity::Critical,
            Self::TrackingException => Severity::High,
        }
    }

    /// Suggested team to route the alert to.
    pub fn route_to(&self) -> &'static str {
        match self {
            Self::Delay => "purchasing",
            Self::Backorder => "purchasing_manager",
            Self::TrackingException => "receiving",
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A risk alert raised for a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub route_to: String,
    /// The keyword that triggered the alert.
    pub matched: String,
}

impl Alert {
    /// Builds an alert with the kind's default severity and routing.
    pub fn new(kind: AlertKind, matched: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            route_to: kind.route_to().to_string(),
            matched: matched.into(),
        }
    }
}

/// Everything the extractors found in one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSignals {
    pub tracking: Option<TrackingInfo>,
    /// Carrier named in the text, even without a tracking number.
    pub carrier: Option<Carrier>,
    pub eta: Option<NaiveDate>,
    pub alerts: Vec<Alert>,
}
