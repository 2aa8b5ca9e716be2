//! Turns provider messages into [`NormalizedMessage`]s.

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    Address, AttachmentPart, Direction, MessagePart, NormalizedMessage, RawMessage,
};

/// Normalizes a raw message as seen from `inbox_email`.
///
/// The first `text/plain` part is the body; HTML is converted only when no
/// plain part exists. Every part with a filename is an attachment.
pub fn normalize(
    raw: &RawMessage,
    inbox_email: &str,
    body_max_chars: usize,
    now: DateTime<Utc>,
) -> NormalizedMessage {
    let from = raw.header("From").map(Address::parse).unwrap_or_else(|| Address::new(""));
    let to = raw.header("To").map(Address::parse_list).unwrap_or_default();
    let subject = raw.header("Subject").unwrap_or_default().trim().to_string();

    let body = match find_body(&raw.payload, "text/plain") {
        Some(text) => text,
        None => find_body(&raw.payload, "text/html")
            .map(|html| html_to_text(&html))
            .unwrap_or_default(),
    };

    let mut attachments = Vec::new();
    collect_attachments(&raw.payload, &mut attachments);

    let direction = if from.email.trim().eq_ignore_ascii_case(inbox_email.trim()) {
        Direction::Outbound
    } else {
        Direction::Inbound
    };

    NormalizedMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        from,
        to,
        subject,
        snippet: raw.snippet.clone(),
        body: truncate_chars(body.trim(), body_max_chars),
        received_at: received_at(raw).unwrap_or(now),
        attachments,
        direction,
    }
}

fn received_at(raw: &RawMessage) -> Option<DateTime<Utc>> {
    if let Some(ms) = raw.internal_date_ms {
        if let Some(at) = Utc.timestamp_millis_opt(ms).single() {
            return Some(at);
        }
    }
    raw.header("Date")
        .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn find_body(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.filename.is_empty() && part.mime_type.eq_ignore_ascii_case(mime_type) {
        if let Some(data) = &part.data {
            return Some(String::from_utf8_lossy(data).into_owned());
        }
    }
    part.parts.iter().find_map(|child| find_body(child, mime_type))
}

fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentPart>) {
    if !part.filename.trim().is_empty() {
        out.push(AttachmentPart {
            part_id: part.part_id.clone(),
            attachment_id: part.attachment_id.clone(),
            filename: part.filename.trim().to_string(),
            mime_type: part.mime_type.to_lowercase(),
            size: part.size,
            inline_data: part.data.clone(),
        });
    }
    for child in &part.parts {
        collect_attachments(child, out);
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 120).unwrap_or_else(|_| html.to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Header, MessageId};

    fn part(id: &str, mime: &str, data: &str) -> MessagePart {
        MessagePart {
            part_id: id.to_string(),
            mime_type: mime.to_string(),
            data: Some(data.as_bytes().to_vec()),
            ..Default::default()
        }
    }

    fn message(payload: MessagePart, from: &str) -> RawMessage {
        RawMessage {
            id: MessageId::from("m-1"),
            thread_id: "t-1".to_string(),
            label_ids: vec![],
            snippet: "snippet".to_string(),
            internal_date_ms: Some(1_741_000_000_000),
            headers: vec![
                Header::new("From", from),
                Header::new("To", "purchasing@acme.example"),
                Header::new("Subject", " PO-4821 shipped "),
            ],
            payload,
        }
    }

    #[test]
    fn plain_text_wins_over_html() {
        let payload = MessagePart {
            mime_type: "multipart/alternative".to_string(),
            parts: vec![
                part("0", "text/html", "<p>html body</p>"),
                part("1", "text/plain", "plain body"),
            ],
            ..Default::default()
        };
        let msg = normalize(
            &message(payload, "Ship <ship@vendor.example>"),
            "purchasing@acme.example",
            100,
            Utc::now(),
        );
        assert_eq!(msg.body, "plain body");
        assert_eq!(msg.subject, "PO-4821 shipped");
        assert_eq!(msg.from.email, "ship@vendor.example");
        assert!(msg.is_inbound());
    }

    #[test]
    fn html_is_flattened_when_no_plain_part() {
        let payload = part("0", "text/html", "<html><body><p>Your order shipped</p></body></html>");
        let msg = normalize(
            &message(payload, "ship@vendor.example"),
            "purchasing@acme.example",
            1000,
            Utc::now(),
        );
        assert!(msg.body.contains("Your order shipped"));
        assert!(!msg.body.contains("<p>"));
    }

    #[test]
    fn body_is_truncated_on_char_boundary() {
        let payload = part("0", "text/plain", "héllo wörld");
        let msg = normalize(
            &message(payload, "ship@vendor.example"),
            "purchasing@acme.example",
            4,
            Utc::now(),
        );
        assert_eq!(msg.body, "héll");
    }

    #[test]
    fn attachments_are_collected_recursively() {
        let mut pdf = part("1.1", "Application/PDF", "%PDF");
        pdf.filename = "INV-1001.pdf".to_string();
        let mut csv = part("2", "text/csv", "sku,qty");
        csv.filename = "stock.csv".to_string();
        csv.data = None;
        csv.attachment_id = Some("att-2".to_string());

        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            parts: vec![
                part("0", "text/plain", "see attached"),
                MessagePart {
                    part_id: "1".to_string(),
                    mime_type: "multipart/related".to_string(),
                    parts: vec![pdf],
                    ..Default::default()
                },
                csv,
            ],
            ..Default::default()
        };
        let msg = normalize(
            &message(payload, "ar@vendor.example"),
            "purchasing@acme.example",
            1000,
            Utc::now(),
        );
        assert_eq!(msg.body, "see attached");
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].mime_type, "application/pdf");
        assert!(msg.attachments[0].inline_data.is_some());
        assert_eq!(msg.attachments[1].attachment_id.as_deref(), Some("att-2"));
    }

    #[test]
    fn sender_matching_inbox_is_outbound() {
        let payload = part("0", "text/plain", "following up");
        let msg = normalize(
            &message(payload, "Purchasing <PURCHASING@acme.example>"),
            "purchasing@acme.example",
            1000,
            Utc::now(),
        );
        assert_eq!(msg.direction, Direction::Outbound);
    }

    #[test]
    fn received_time_falls_back_to_date_header() {
        let mut raw = message(part("0", "text/plain", "x"), "a@b.example");
        raw.internal_date_ms = None;
        raw.headers
            .push(Header::new("Date", "Tue, 4 Mar 2025 10:00:00 +0000"));
        let msg = normalize(&raw, "purchasing@acme.example", 10, Utc::now());
        assert_eq!(msg.received_at.to_rfc3339(), "2025-03-04T10:00:00+00:00");
    }
}
