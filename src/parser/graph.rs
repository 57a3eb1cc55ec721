//! Microsoft Graph JSON message → [`CanonicalMessage`] (spec §4.4).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{MailmeshError, MailmeshResult};

use super::canonical::{format_address, html_to_plaintext, plaintext_to_html, CanonicalMessage, ParsedAttachment};

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: String,
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphMessage {
    #[serde(rename = "internetMessageId")]
    internet_message_id: Option<String>,
    id: String,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients", default)]
    to_recipients: Vec<GraphRecipient>,
    subject: Option<String>,
    body: Option<GraphBody>,
    #[serde(rename = "isRead", default)]
    is_read: bool,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<DateTime<Utc>>,
}

/// Parses one Graph `message` resource (as returned under `value[]` by
/// `/me/mailFolders/{id}/messages`) into a canonical record. Attachments
/// are not expanded here — Graph returns them via a separate
/// `/attachments` expansion that the orchestrator fetches only when
/// `hasAttachments` is true; this parser accepts an already-fetched list.
pub fn parse(value: &Value, attachments: Vec<ParsedAttachment>) -> MailmeshResult<CanonicalMessage> {
    let msg: GraphMessage = serde_json::from_value(value.clone())
        .map_err(|e| MailmeshError::Parse(format!("malformed Graph message payload: {e}")))?;

    let message_id = msg.internet_message_id.or(Some(msg.id));

    let from = msg
        .from
        .map(|r| format_address(r.email_address.name.as_deref(), r.email_address.address.as_deref()))
        .unwrap_or_default();

    let to: Vec<String> = msg
        .to_recipients
        .into_iter()
        .filter_map(|r| r.email_address.address)
        .collect();

    let subject = msg
        .subject
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(No Subject)".to_string());

    let (body, html_body) = match msg.body {
        Some(b) if b.content_type.eq_ignore_ascii_case("html") => {
            (html_to_plaintext(&b.content), Some(b.content))
        }
        Some(b) => {
            let html = plaintext_to_html(&b.content);
            (b.content, Some(html))
        }
        None => (String::new(), None),
    };

    let received_at = msg.received_date_time.unwrap_or_else(Utc::now);

    Ok(CanonicalMessage {
        message_id,
        from,
        to,
        subject,
        body,
        html_body,
        is_read: msg.is_read,
        received_at,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_graph_message() {
        let value = json!({
            "id": "AAMk-opaque-id",
            "internetMessageId": "<abc@example.com>",
            "from": { "emailAddress": { "name": "Jane Doe", "address": "jane@example.com" } },
            "toRecipients": [{ "emailAddress": { "name": "John", "address": "john@example.com" } }],
            "subject": "Hi there",
            "body": { "contentType": "text", "content": "plain body" },
            "isRead": true,
            "receivedDateTime": "2024-01-01T12:00:00Z"
        });
        let parsed = parse(&value, vec![]).unwrap();
        assert_eq!(parsed.message_id, Some("<abc@example.com>".to_string()));
        assert_eq!(parsed.from, "\"Jane Doe\" <jane@example.com>");
        assert_eq!(parsed.to, vec!["john@example.com".to_string()]);
        assert!(parsed.is_read);
        assert_eq!(parsed.body, "plain body");
    }

    #[test]
    fn missing_internet_message_id_falls_back_to_opaque_id() {
        let value = json!({
            "id": "AAMk-opaque-id",
            "toRecipients": [],
            "isRead": false,
        });
        let parsed = parse(&value, vec![]).unwrap();
        assert_eq!(parsed.message_id, Some("AAMk-opaque-id".to_string()));
        assert_eq!(parsed.subject, "(No Subject)");
    }
}
