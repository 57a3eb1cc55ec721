//! Raw RFC 5322 bytes → [`CanonicalMessage`] (spec §4.4).

use chrono::Utc;
use mail_parser::MessageParser;

use crate::error::{MailmeshError, MailmeshResult};

use super::canonical::{format_address, html_to_plaintext, plaintext_to_html, CanonicalMessage, ParsedAttachment};

/// Parses one message's raw bytes plus its IMAP flags into a canonical
/// record. A malformed message yields [`MailmeshError::Parse`]; callers
/// must isolate this per-message (spec §7: a parse failure skips the
/// message, not the chunk).
pub fn parse(raw: &[u8], flags: &[String]) -> MailmeshResult<CanonicalMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailmeshError::Parse("mail-parser could not decode message".to_string()))?;

    let message_id = message.message_id().map(|s| s.to_string());

    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| format_address(addr.name(), addr.address()))
        .unwrap_or_default();

    let to: Vec<String> = message
        .to()
        .map(|addrs| {
            addrs
                .iter()
                .filter_map(|addr| addr.address().map(|a| a.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let subject = message
        .subject()
        .filter(|s| !s.is_empty())
        .unwrap_or("(No Subject)")
        .to_string();

    let plain_body = message.body_text(0).map(|s| s.to_string());
    let html_body_raw = message.body_html(0).map(|s| s.to_string());

    let (body, html_body) = match (plain_body, html_body_raw) {
        (Some(plain), html) => (plain, html),
        (None, Some(html)) => (html_to_plaintext(&html), Some(html)),
        (None, None) => (String::new(), None),
    };

    // the htmlBody field is populated even when only a plaintext body
    // was present upstream, wrapped per spec §4.4.
    let html_body = html_body.or_else(|| Some(plaintext_to_html(&body)));

    let is_read = flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"));

    let received_at = message
        .date()
        .and_then(|d| {
            chrono::DateTime::from_timestamp(d.to_timestamp(), 0)
        })
        .unwrap_or_else(Utc::now);

    let attachments = message
        .attachments()
        .map(|att| ParsedAttachment {
            filename: att.attachment_name().unwrap_or("attachment").to_string(),
            content_type: attachment_content_type(att),
            size: att.len() as i64,
            content_id: att.content_id().map(|s| s.to_string()),
            bytes: att.contents().to_vec(),
        })
        .collect();

    Ok(CanonicalMessage {
        message_id,
        from,
        to,
        subject,
        body,
        html_body,
        is_read,
        received_at,
        attachments,
    })
}

/// Joins an attachment's `type/subtype` and validates it parses as a
/// real MIME type, falling back to `application/octet-stream` for a
/// missing or malformed value (spec §4.4 attachment structural list).
fn attachment_content_type(att: &mail_parser::MessagePart<'_>) -> String {
    const FALLBACK: &str = "application/octet-stream";
    let joined = att.content_type().map(|ct| match ct.subtype() {
        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
        None => ct.ctype().to_string(),
    });
    match joined {
        Some(candidate) if candidate.parse::<mime::Mime>().is_ok() => candidate,
        _ => FALLBACK.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text_message() {
        let raw = b"From: Jane Doe <jane@example.com>\r\n\
                    To: john@example.com\r\n\
                    Subject: Hello\r\n\
                    Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
                    \r\n\
                    Hello, world!\r\n";
        let parsed = parse(raw, &["\\Seen".to_string()]).unwrap();
        assert_eq!(parsed.subject, "Hello");
        assert_eq!(parsed.from, "\"Jane Doe\" <jane@example.com>");
        assert_eq!(parsed.to, vec!["john@example.com".to_string()]);
        assert!(parsed.is_read);
        assert!(parsed.body.contains("Hello, world!"));
    }

    #[test]
    fn missing_subject_defaults_to_placeholder() {
        let raw = b"From: jane@example.com\r\nTo: john@example.com\r\n\r\nBody only\r\n";
        let parsed = parse(raw, &[]).unwrap();
        assert_eq!(parsed.subject, "(No Subject)");
        assert!(!parsed.is_read);
    }

    #[test]
    fn garbage_bytes_yield_parse_error_not_panic() {
        let raw = [0xff, 0xfe, 0x00, 0x01];
        // mail-parser is lenient on most byte soup; this asserts the
        // call never panics, success or failure both acceptable.
        let _ = parse(&raw, &[]);
    }

    #[test]
    fn attachment_content_type_includes_subtype() {
        let raw: &[u8] = b"From: jane@example.com\r\n\
                    To: john@example.com\r\n\
                    Subject: With attachment\r\n\
                    MIME-Version: 1.0\r\n\
                    Content-Type: multipart/mixed; boundary=\"b\"\r\n\
                    \r\n\
                    --b\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    body\r\n\
                    --b\r\n\
                    Content-Type: image/png\r\n\
                    Content-Disposition: attachment; filename=\"pic.png\"\r\n\
                    Content-Transfer-Encoding: base64\r\n\
                    \r\n\
                    aGVsbG8=\r\n\
                    --b--\r\n";
        let parsed = parse(raw, &[]).unwrap();
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].content_type, "image/png");
    }
}
