//! Database query modules.
//!
//! Each module provides async functions that operate on the database.
//! Timestamps are stored as RFC 3339 text and dates as `YYYY-MM-DD`.

pub mod alerts;
pub mod attachments;
pub mod disputes;
pub mod inboxes;
pub mod messages;
pub mod purchase_orders;
pub mod runs;
pub mod threads;
pub mod tracking;
pub mod vendors;

use chrono::{DateTime, NaiveDate, Utc};

/// Parses a stored timestamp. Date-only values are read as midnight UTC.
pub(crate) fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parses a stored `YYYY-MM-DD` date, tolerating a time suffix.
pub(crate) fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    let value = value?;
    let head = value.get(..10).unwrap_or(&value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Renders a status list as a SQL literal list.
///
/// Only used with the crate's own status constants.
pub(crate) fn sql_status_list(statuses: &[&str]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_plain_dates() {
        let ts = parse_timestamp(Some("2025-03-01T10:00:00+00:00".into())).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:00:00+00:00");

        let midnight = parse_timestamp(Some("2025-03-01".into())).unwrap();
        assert_eq!(midnight.to_rfc3339(), "2025-03-01T00:00:00+00:00");

        assert!(parse_timestamp(Some("yesterday".into())).is_none());
        assert!(parse_timestamp(None).is_none());
    }

    #[test]
    fn parses_dates_with_time_suffix() {
        assert_eq!(
            parse_date(Some("2025-03-01T10:00:00Z".into())),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert!(parse_date(Some("3/1/25".into())).is_none());
    }

    #[test]
    fn status_list_is_quoted() {
        assert_eq!(sql_status_list(&["a", "b"]), "'a', 'b'");
    }
}
