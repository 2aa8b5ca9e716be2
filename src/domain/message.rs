//! Email message domain types.
//!
//! [`RawMessage`] is the provider-neutral shape a mail provider returns: a
//! header list plus a MIME part tree with decoded bodies. The normalizer turns
//! it into a [`NormalizedMessage`], which is what the rest of the pipeline sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "Jane Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Parses a header value like `"Name" <email@example.com>`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Some(start) = value.find('<') {
            if let Some(end) = value[start..].find('>') {
                let email = value[start + 1..start + end].trim().to_string();
                let name = value[..start].trim().trim_matches('"').trim().to_string();
                return Address {
                    email,
                    name: if name.is_empty() { None } else { Some(name) },
                };
            }
        }
        Address {
            email: value.to_string(),
            name: None,
        }
    }

    /// Parses a comma-separated list of addresses. Commas inside quoted
    /// display names or angle brackets do not split.
    pub fn parse_list(value: &str) -> Vec<Address> {
        let mut entries = Vec::new();
        let mut start = 0;
        let mut in_quotes = false;
        let mut in_angle = false;
        let mut escaped = false;
        for (i, c) in value.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' if in_quotes => escaped = true,
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    entries.push(&value[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        entries.push(&value[start..]);

        entries
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Returns the lowercased domain part of the address.
    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().trim_end_matches('>').to_lowercase())
            .filter(|d| !d.is_empty())
    }

    /// Returns the display representation of this address.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// A message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Creates a header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One node in a message's MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePart {
    /// Provider part id (e.g. "0", "1.2").
    pub part_id: String,
    /// MIME type of this part.
    pub mime_type: String,
    /// Filename, empty for body parts.
    pub filename: String,
    /// Part-level headers.
    pub headers: Vec<Header>,
    /// Provider attachment id, when the body must be downloaded separately.
    pub attachment_id: Option<String>,
    /// Declared body size in bytes.
    pub size: u64,
    /// Decoded body bytes, when delivered inline.
    pub data: Option<Vec<u8>>,
    /// Child parts of a multipart node.
    pub parts: Vec<MessagePart>,
}

/// A message as fetched from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider message id.
    pub id: MessageId,
    /// Provider thread id.
    pub thread_id: String,
    /// Provider labels.
    pub label_ids: Vec<String>,
    /// Short preview text.
    pub snippet: String,
    /// Provider receive time in epoch milliseconds.
    pub internal_date_ms: Option<i64>,
    /// Top-level headers.
    pub headers: Vec<Header>,
    /// Root MIME part.
    pub payload: MessagePart,
}

impl RawMessage {
    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Whether a message was sent to or from the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from someone else.
    Inbound,
    /// Sent by the inbox owner.
    Outbound,
}

impl Direction {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// An attachment part found while walking the MIME tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPart {
    /// Provider part id; unique within the message.
    pub part_id: String,
    /// Provider attachment id for download.
    pub attachment_id: Option<String>,
    /// Original filename.
    pub filename: String,
    /// MIME content type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Inline bytes, when the provider delivered them with the message.
    #[serde(skip)]
    pub inline_data: Option<Vec<u8>>,
}

/// Canonical form of a message used by the processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Provider message id.
    pub id: MessageId,
    /// Provider thread id.
    pub thread_id: String,
    /// Sender.
    pub from: Address,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Subject line, empty when absent.
    pub subject: String,
    /// Short preview text.
    pub snippet: String,
    /// Flattened body text, truncated.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Attachment parts.
    pub attachments: Vec<AttachmentPart>,
    /// Inbound or outbound relative to the inbox.
    pub direction: Direction,
}

impl NormalizedMessage {
    /// Returns true if the message was received from a third party.
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Subject and body joined for pattern scans.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_with_name() {
        let addr = Address::parse("\"Jane Doe\" <jane@vendor.example>");
        assert_eq!(addr.email, "jane@vendor.example");
        assert_eq!(addr.name.as_deref(), Some("Jane Doe"));
        assert_eq!(addr.display(), "Jane Doe <jane@vendor.example>");
    }

    #[test]
    fn address_parse_bare() {
        let addr = Address::parse("  orders@vendor.example ");
        assert_eq!(addr.email, "orders@vendor.example");
        assert!(addr.name.is_none());
    }

    #[test]
    fn address_domain() {
        assert_eq!(
            Address::new("Sales@Vendor.Example").domain(),
            Some("vendor.example".to_string())
        );
        assert_eq!(Address::new("no-at-sign").domain(), None);
    }

    #[test]
    fn address_parse_list() {
        let list = Address::parse_list("a@x.example, \"B\" <b@y.example>,");
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].email, "b@y.example");
    }

    #[test]
    fn address_list_keeps_quoted_commas() {
        let list = Address::parse_list(
            r#""Doe, Jane" <jane@vendor.example>, ap@acme.example, "Ops \"East, 2\"" <ops@acme.example>"#,
        );
        let emails: Vec<_> = list.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(
            emails,
            vec!["jane@vendor.example", "ap@acme.example", "ops@acme.example"]
        );
        assert_eq!(list[0].name.as_deref(), Some("Doe, Jane"));
    }

    #[test]
    fn raw_message_header_lookup_is_case_insensitive() {
        let msg = RawMessage {
            id: MessageId::from("m1"),
            thread_id: "t1".to_string(),
            label_ids: vec![],
            snippet: String::new(),
            internal_date_ms: None,
            headers: vec![Header::new("Subject", "Hello")],
            payload: MessagePart::default(),
        };
        assert_eq!(msg.header("subject"), Some("Hello"));
        assert_eq!(msg.header("From"), None);
    }
}
