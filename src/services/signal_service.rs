//! Tracking, ETA and risk-keyword extraction.
//!
//! Everything here is a pure function of the message text so the rules can be
//! tested without storage.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::domain::{Alert, AlertKind, Carrier, MessageSignals, TrackingInfo};

/// Characters after a delivery keyword searched for a date.
const ETA_WINDOW_CHARS: usize = 40;

/// A tracking-number rule. The first rule that matches wins.
struct TrackingRule {
    pattern: &'static str,
    /// Carrier implied by the number format.
    carrier: Option<Carrier>,
    /// Only applies when this carrier is named in the text.
    requires_keyword: Option<Carrier>,
}

const TRACKING_RULES: &[TrackingRule] = &[
    TrackingRule {
        pattern: r"(?i)\b(1Z[0-9A-Z]{16})\b",
        carrier: Some(Carrier::Ups),
        requires_keyword: None,
    },
    TrackingRule {
        pattern: r"\b(9[2-5][0-9]{18,24})\b",
        carrier: Some(Carrier::Usps),
        requires_keyword: None,
    },
    TrackingRule {
        pattern: r"\b([0-9]{15}|[0-9]{12})\b",
        carrier: Some(Carrier::FedEx),
        requires_keyword: Some(Carrier::FedEx),
    },
    TrackingRule {
        pattern: r"\b([0-9]{10})\b",
        carrier: Some(Carrier::Dhl),
        requires_keyword: Some(Carrier::Dhl),
    },
    TrackingRule {
        pattern: r"(?i)\btracking\s*(?:number|no\.?|#)?\s*(?:is)?\s*[:#]?\s*([A-Z0-9]{8,30})\b",
        carrier: None,
        requires_keyword: None,
    },
];

fn tracking_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        TRACKING_RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("tracking pattern is valid"))
            .collect()
    })
}

fn carrier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(UPS|FedEx|USPS|DHL)\b").expect("carrier pattern is valid")
    })
}

fn eta_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:eta|estimated\s+delivery|expected\s+delivery|arriv(?:e|es|ing|al)|deliver(?:ed|y)?\s+(?:by|on))\b",
        )
        .expect("eta keyword pattern is valid")
    })
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)
            (?P<iso>(?P<iy>\d{4})-(?P<im>\d{1,2})-(?P<id>\d{1,2}))
            | (?P<us>(?P<um>\d{1,2})/(?P<ud>\d{1,2})(?:/(?P<uy>\d{4}|\d{2}))?)
            | (?P<named>(?P<mon>jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+
                 (?P<nd>\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(?P<ny>\d{4}))?)
            ",
        )
        .expect("date pattern is valid")
    })
}

struct RiskRule {
    kind: AlertKind,
    pattern: &'static str,
}

const RISK_RULES: &[RiskRule] = &[
    RiskRule {
        kind: AlertKind::Delay,
        pattern: r"(?i)\b(delay(?:ed|s)?|postpone(?:d|ment)?|reschedul(?:e|ed|ing))\b",
    },
    RiskRule {
        kind: AlertKind::Backorder,
        pattern: r"(?i)\b(back[\s-]?order(?:ed|s)?|out[\s-]of[\s-]stock)\b",
    },
    RiskRule {
        kind: AlertKind::TrackingException,
        pattern: r"(?i)\b(exception|undeliverable)\b",
    },
];

fn risk_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RISK_RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("risk pattern is valid"))
            .collect()
    })
}

/// Extracts all signals from `text`.
///
/// Risk alerts are only raised for inbound mail. Dates without a year take
/// the year of `today`.
pub fn extract(text: &str, today: NaiveDate, inbound: bool) -> MessageSignals {
    let carrier = detect_carrier(text);
    let eta = extract_eta(text, today);
    let tracking = extract_tracking(text).map(|(number, implied)| TrackingInfo {
        tracking_number: number,
        carrier: carrier.or(implied),
        eta,
    });
    let alerts = if inbound { detect_risks(text) } else { Vec::new() };

    MessageSignals {
        tracking,
        carrier,
        eta,
        alerts,
    }
}

/// Returns the first carrier named in `text`.
pub fn detect_carrier(text: &str) -> Option<Carrier> {
    carrier_pattern()
        .find(text)
        .and_then(|m| match m.as_str().to_ascii_uppercase().as_str() {
            "UPS" => Some(Carrier::Ups),
            "FEDEX" => Some(Carrier::FedEx),
            "USPS" => Some(Carrier::Usps),
            "DHL" => Some(Carrier::Dhl),
            _ => None,
        })
}

fn mentions(text: &str, carrier: Carrier) -> bool {
    carrier_pattern()
        .find_iter(text)
        .any(|m| m.as_str().eq_ignore_ascii_case(carrier.as_str()))
}

/// Finds a tracking number and the carrier its format implies.
pub fn extract_tracking(text: &str) -> Option<(String, Option<Carrier>)> {
    for (rule, pattern) in TRACKING_RULES.iter().zip(tracking_patterns()) {
        if let Some(required) = rule.requires_keyword {
            if !mentions(text, required) {
                continue;
            }
        }
        for captures in pattern.captures_iter(text) {
            let Some(number) = captures.get(1) else {
                continue;
            };
            let number = number.as_str().to_uppercase();
            if number.chars().any(|c| c.is_ascii_digit()) {
                return Some((number, rule.carrier));
            }
        }
    }
    None
}

/// Finds a delivery date following a delivery keyword.
pub fn extract_eta(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    for keyword in eta_keyword_pattern().find_iter(text) {
        let rest = &text[keyword.end()..];
        let window_end = rest
            .char_indices()
            .nth(ETA_WINDOW_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if let Some(date) = parse_first_date(&rest[..window_end], today.year()) {
            return Some(date);
        }
    }
    None
}

fn parse_first_date(window: &str, default_year: i32) -> Option<NaiveDate> {
    for captures in date_pattern().captures_iter(window) {
        let parsed = if captures.name("iso").is_some() {
            ymd(
                captures.name("iy").and_then(|m| m.as_str().parse().ok()),
                number(&captures, "im"),
                number(&captures, "id"),
            )
        } else if captures.name("us").is_some() {
            let year = captures
                .name("uy")
                .and_then(|m| m.as_str().parse::<i32>().ok())
                .map(|y| if y < 100 { 2000 + y } else { y })
                .unwrap_or(default_year);
            ymd(Some(year), number(&captures, "um"), number(&captures, "ud"))
        } else {
            let month = captures
                .name("mon")
                .and_then(|m| month_number(&m.as_str().to_ascii_lowercase()));
            let year = captures
                .name("ny")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(default_year);
            ymd(Some(year), month, number(&captures, "nd"))
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

fn number(captures: &regex::Captures<'_>, name: &str) -> Option<u32> {
    captures.name(name).and_then(|m| m.as_str().parse().ok())
}

fn ymd(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year?, month?, day?)
}

fn month_number(prefix: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| prefix.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// Returns at most one alert per risk category.
pub fn detect_risks(text: &str) -> Vec<Alert> {
    RISK_RULES
        .iter()
        .zip(risk_patterns())
        .filter_map(|(rule, pattern)| {
            pattern
                .find(text)
                .map(|m| Alert::new(rule.kind, m.as_str().to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn ups_tracking_number_implies_carrier() {
        let signals = extract(
            "Your order shipped. Tracking: 1Z9999999999999999",
            today(),
            true,
        );
        let tracking = signals.tracking.unwrap();
        assert_eq!(tracking.tracking_number, "1Z9999999999999999");
        assert_eq!(tracking.carrier, Some(Carrier::Ups));
    }

    #[test]
    fn fedex_digits_require_keyword() {
        assert_eq!(extract_tracking("Ref 123456789012 for your records"), None);
        assert_eq!(
            extract_tracking("Shipped via FedEx 123456789012"),
            Some(("123456789012".to_string(), Some(Carrier::FedEx)))
        );
    }

    #[test]
    fn usps_is_not_mistaken_for_ups() {
        assert_eq!(detect_carrier("sent with USPS priority"), Some(Carrier::Usps));
        let (number, carrier) = extract_tracking("9400111899223456789012").unwrap();
        assert_eq!(number, "9400111899223456789012");
        assert_eq!(carrier, Some(Carrier::Usps));
    }

    #[test]
    fn generic_tracking_needs_a_digit() {
        assert_eq!(extract_tracking("tracking number: PENDINGXX"), None);
        assert_eq!(
            extract_tracking("Tracking # AB12CD34EF"),
            Some(("AB12CD34EF".to_string(), None))
        );
    }

    #[test]
    fn keyword_carrier_overrides_implied_carrier() {
        let signals = extract("DHL tracking number 4455667788", today(), true);
        let tracking = signals.tracking.unwrap();
        assert_eq!(tracking.tracking_number, "4455667788");
        assert_eq!(tracking.carrier, Some(Carrier::Dhl));
    }

    #[test]
    fn eta_formats() {
        assert_eq!(
            extract_eta("ETA: 2025-03-14", today()),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(
            extract_eta("Expected delivery 3/14/25", today()),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(
            extract_eta("should arrive on March 14th", today()),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(extract_eta("Shipped 2025-03-14", today()), None);
    }

    #[test]
    fn one_alert_per_category() {
        let alerts = detect_risks("Shipment delayed, then delayed again. Item is on backorder.");
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::Delay);
        assert_eq!(alerts[1].kind, AlertKind::Backorder);
        assert_eq!(alerts[1].severity, Severity::Critical);
        assert_eq!(alerts[1].route_to, "purchasing_manager");
    }

    #[test]
    fn outbound_mail_raises_no_alerts() {
        let signals = extract("We postponed the order", today(), false);
        assert!(signals.alerts.is_empty());
        let signals = extract("Package undeliverable", today(), true);
        assert_eq!(signals.alerts[0].kind, AlertKind::TrackingException);
    }
}
