//! Provider message normalization
//!
//! Turns a `google_gmail1` [`Message`] fetched with `format=full` into the
//! immutable [`CanonicalMessage`] the classifier works on.

use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::{AssistantError, Result};
use crate::models::CanonicalMessage;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

static HTML_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());

/// Build a canonical record from a full-format provider message
pub fn normalize(msg: Message) -> Result<CanonicalMessage> {
    let id = msg
        .id
        .ok_or_else(|| AssistantError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let thread_id = msg
        .thread_id
        .ok_or_else(|| AssistantError::InvalidMessageFormat("Missing thread ID".to_string()))?;

    let payload = msg.payload.unwrap_or_default();

    let mut headers = BTreeMap::new();
    for header in payload.headers.iter().flatten() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            // First occurrence wins, later Received-style duplicates are dropped
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    let sender = header_value(&headers, "From");
    let recipient = header_value(&headers, "To");
    let subject = header_value(&headers, "Subject");

    let received_at = msg
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("Date"))
                .and_then(|(_, v)| parse_date(v).ok())
        });

    let body = extract_body(&payload);

    Ok(CanonicalMessage {
        id,
        thread_id,
        labels: msg.label_ids.unwrap_or_default(),
        sender,
        recipient,
        subject,
        body,
        headers,
        snippet: msg.snippet.unwrap_or_default(),
        size_estimate: msg.size_estimate.unwrap_or(0).max(0) as u64,
        received_at,
    })
}

/// Case-insensitive header lookup, empty when absent
fn header_value(headers: &BTreeMap<String, String>, name: &str) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

/// Parse RFC 2822 date string
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| AssistantError::InvalidMessageFormat(format!("Invalid date format: {}", e)))
}

/// Plain-text parts concatenated in order; falls back to the first HTML part
/// with markup removed. A single-part payload is used as-is.
pub fn extract_body(payload: &MessagePart) -> String {
    let mut plain = String::new();
    let mut html: Option<String> = None;

    match &payload.parts {
        Some(parts) if !parts.is_empty() => {
            for part in parts {
                collect_parts(part, &mut plain, &mut html);
            }
        }
        _ => {
            let text = part_text(payload);
            if is_mime(payload, "text/html") {
                html = Some(text);
            } else {
                plain = text;
            }
        }
    }

    if plain.trim().is_empty() {
        if let Some(markup) = html {
            return strip_html(&markup);
        }
    }

    plain.trim().to_string()
}

fn collect_parts(part: &MessagePart, plain: &mut String, html: &mut Option<String>) {
    if let Some(children) = &part.parts {
        for child in children {
            collect_parts(child, plain, html);
        }
        return;
    }

    if is_mime(part, "text/plain") {
        plain.push_str(&part_text(part));
    } else if is_mime(part, "text/html") && html.is_none() {
        *html = Some(part_text(part));
    }
}

fn is_mime(part: &MessagePart, mime: &str) -> bool {
    part.mime_type
        .as_deref()
        .map(|m| m.eq_ignore_ascii_case(mime))
        .unwrap_or(false)
}

/// Body bytes arrive already base64url-decoded from the API layer
fn part_text(part: &MessagePart) -> String {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_ref())
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .unwrap_or_default()
}

/// Drop tags and decode the handful of entities that show up in mail bodies
pub fn strip_html(markup: &str) -> String {
    let without_blocks = HTML_BLOCK.replace_all(markup, " ");
    let text = HTML_TAG.replace_all(&without_blocks, " ");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn leaf(mime: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn message_with_payload(payload: MessagePart) -> Message {
        Message {
            id: Some("msg-1".to_string()),
            thread_id: Some("thread-1".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: Some("Hello there".to_string()),
            size_estimate: Some(2048),
            internal_date: Some(1_700_000_000_000),
            payload: Some(payload),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_single_part() {
        let mut payload = leaf("text/plain", "  Hi Bob,\nsee you tomorrow.  ");
        payload.headers = Some(vec![
            header("From", "Alice <alice@example.com>"),
            header("To", "bob@example.com"),
            header("Subject", "Tomorrow"),
        ]);

        let msg = normalize(message_with_payload(payload)).unwrap();

        assert_eq!(msg.id, "msg-1");
        assert_eq!(msg.thread_id, "thread-1");
        assert_eq!(msg.sender, "Alice <alice@example.com>");
        assert_eq!(msg.recipient, "bob@example.com");
        assert_eq!(msg.subject, "Tomorrow");
        assert_eq!(msg.body, "Hi Bob,\nsee you tomorrow.");
        assert_eq!(msg.labels, vec!["INBOX", "UNREAD"]);
        assert_eq!(msg.size_estimate, 2048);
        assert_eq!(msg.headers.len(), 3);
        assert_eq!(
            msg.received_at.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_missing_headers_become_empty() {
        let msg = normalize(message_with_payload(leaf("text/plain", "body"))).unwrap();
        assert_eq!(msg.sender, "");
        assert_eq!(msg.recipient, "");
        assert_eq!(msg.subject, "");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut payload = leaf("text/plain", "x");
        payload.headers = Some(vec![header("subject", "lower"), header("FROM", "a@b.com")]);
        let msg = normalize(message_with_payload(payload)).unwrap();
        assert_eq!(msg.subject, "lower");
        assert_eq!(msg.sender, "a@b.com");
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let mut raw = message_with_payload(leaf("text/plain", "x"));
        raw.id = None;
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidMessageFormat(_)));
    }

    #[test]
    fn test_multipart_concatenates_plain_parts() {
        let payload = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("multipart/alternative".to_string()),
                    parts: Some(vec![
                        leaf("text/plain", "first "),
                        leaf("text/html", "<p>ignored</p>"),
                    ]),
                    ..Default::default()
                },
                leaf("text/plain", "second"),
                leaf("application/pdf", "%PDF"),
            ]),
            ..Default::default()
        };

        assert_eq!(extract_body(&payload), "first second");
    }

    #[test]
    fn test_multipart_falls_back_to_html() {
        let payload = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![
                leaf("text/html", "<html><style>p{}</style><p>Big&nbsp;<b>sale</b> &amp; more</p></html>"),
                leaf("text/html", "<p>second html</p>"),
            ]),
            ..Default::default()
        };

        assert_eq!(extract_body(&payload), "Big sale & more");
    }

    #[test]
    fn test_single_part_html_is_stripped() {
        let payload = leaf("text/html", "<div>Hello <a href=\"x\">world</a></div>");
        assert_eq!(extract_body(&payload), "Hello world");
    }

    #[test]
    fn test_date_header_fallback() {
        let mut payload = leaf("text/plain", "x");
        payload.headers = Some(vec![header("Date", "Mon, 24 Nov 2025 10:30:00 +0000")]);
        let mut raw = message_with_payload(payload);
        raw.internal_date = None;

        let msg = normalize(raw).unwrap();
        assert_eq!(msg.received_at.unwrap().to_rfc3339(), "2025-11-24T10:30:00+00:00");
    }

    #[test]
    fn test_no_payload() {
        let mut raw = message_with_payload(MessagePart::default());
        raw.payload = None;
        let msg = normalize(raw).unwrap();
        assert_eq!(msg.body, "");
        assert!(msg.headers.is_empty());
    }
}
