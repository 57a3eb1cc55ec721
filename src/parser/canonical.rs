//! The canonical message record produced by both provider parsers
//! (spec §4.4).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub content_id: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    /// Upstream `Message-ID` header or Graph `internetMessageId`; falls
    /// back to the provider's opaque id.
    pub message_id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub is_read: bool,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<ParsedAttachment>,
}

/// Renders a display name + address pair the way the spec requires:
/// `"Name" <addr>` when both are present, else the bare address, else
/// empty.
pub fn format_address(name: Option<&str>, address: Option<&str>) -> String {
    match (name, address) {
        (Some(name), Some(addr)) if !name.is_empty() => format!("\"{name}\" <{addr}>"),
        (_, Some(addr)) => addr.to_string(),
        _ => String::new(),
    }
}

/// Strips HTML tags and collapses whitespace, used as the plaintext
/// fallback when a message carries only an HTML body.
pub fn html_to_plaintext(html: &str) -> String {
    html2text::from_read(html.as_bytes(), usize::MAX)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wraps plaintext in a `<div>` for the `htmlBody` field when only a
/// plaintext body was available upstream.
pub fn plaintext_to_html(text: &str) -> String {
    format!("<div>{}</div>", html_escape(text))
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_name_and_address() {
        assert_eq!(
            format_address(Some("Jane Doe"), Some("jane@example.com")),
            "\"Jane Doe\" <jane@example.com>"
        );
    }

    #[test]
    fn formats_bare_address_without_name() {
        assert_eq!(format_address(None, Some("jane@example.com")), "jane@example.com");
    }

    #[test]
    fn formats_empty_string_when_absent() {
        assert_eq!(format_address(None, None), "");
    }

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let html = "<p>Hello   <b>world</b></p>\n<p>again</p>";
        assert_eq!(html_to_plaintext(html), "Hello world again");
    }
}
