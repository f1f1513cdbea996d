//! MIME decoding of fetched messages.
//!
//! [`parse`] turns the raw RFC 822 bytes of one message into a [`ParsedMessage`]:
//! decoded headers, body text and every attachment found anywhere in the MIME tree.

use crate::error::{Error, Result};
use crate::message::{Attachment, Disposition, ParsedMessage};
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use std::path::Path;
use tracing::debug;

/// Decodes a raw message.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] when the bytes cannot be decoded as a MIME
/// message: no header section, a multipart part without a boundary or with a
/// truncated closing boundary, or a part whose transfer encoding cannot be decoded.
pub fn parse(raw: &[u8]) -> Result<ParsedMessage> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::malformed("empty message"));
    }

    let mail = mailparse::parse_mail(raw).map_err(|source| Error::MalformedMessage {
        reason: "MIME structure could not be decoded".into(),
        source: Some(source),
    })?;

    if mail.headers.is_empty() {
        return Err(Error::malformed("message has no header section"));
    }

    let mut parsed = ParsedMessage {
        from: header(&mail, "From"),
        to: header(&mail, "To"),
        subject: header(&mail, "Subject"),
        date: header(&mail, "Date").as_deref().and_then(parse_date),
        message_id: header(&mail, "Message-ID"),
        ..ParsedMessage::default()
    };

    walk(&mail, raw, &mut parsed)?;

    debug!(
        subject = ?parsed.subject,
        attachments = parsed.attachments.len(),
        "Parsed message"
    );

    Ok(parsed)
}

/// Visits every part depth-first, collecting body text and attachments.
fn walk(part: &ParsedMail<'_>, raw: &[u8], parsed: &mut ParsedMessage) -> Result<()> {
    let mimetype = part.ctype.mimetype.to_lowercase();

    if mimetype.starts_with("multipart/") {
        check_boundary(part, &mimetype, raw)?;
        for sub in &part.subparts {
            walk(sub, raw, parsed)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let declared_name = declared_filename(part, &disposition);
    let is_attachment = disposition.disposition == DispositionType::Attachment
        || declared_name.is_some()
        || !mimetype.starts_with("text/");

    if !is_attachment {
        let body = part.get_body().map_err(|source| Error::MalformedMessage {
            reason: format!("undecodable {mimetype} body"),
            source: Some(source),
        })?;
        let slot = if mimetype == "text/html" {
            &mut parsed.html
        } else {
            &mut parsed.text
        };
        *slot = Some(match slot.take() {
            Some(mut existing) => {
                existing.push('\n');
                existing.push_str(&body);
                existing
            }
            None => body,
        });
        return Ok(());
    }

    let content = part.get_body_raw().map_err(|source| Error::MalformedMessage {
        reason: format!("undecodable {mimetype} attachment"),
        source: Some(source),
    })?;

    let index = parsed.attachments.len() + 1;
    let (filename, generated_name) = match declared_name.as_deref().and_then(sanitize_filename) {
        Some(name) => (name, false),
        None => (generated_filename(index, &mimetype), true),
    };

    parsed.attachments.push(Attachment {
        filename,
        generated_name,
        content_type: mimetype,
        disposition: match disposition.disposition {
            DispositionType::Attachment => Disposition::Attachment,
            _ => Disposition::Inline,
        },
        content_id: header(part, "Content-ID")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
        content,
    });

    Ok(())
}

/// Rejects multipart parts that are missing their boundary or their closing delimiter.
fn check_boundary(part: &ParsedMail<'_>, mimetype: &str, raw: &[u8]) -> Result<()> {
    let Some(boundary) = part.ctype.params.get("boundary") else {
        return Err(Error::malformed(format!("{mimetype} part has no boundary")));
    };

    let closing = format!("--{boundary}--");
    if !contains(raw, closing.as_bytes()) {
        return Err(Error::malformed(format!(
            "{mimetype} part is missing its closing boundary"
        )));
    }

    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// File name from `Content-Disposition: ...; filename=` or `Content-Type: ...; name=`.
fn declared_filename(
    part: &ParsedMail<'_>,
    disposition: &mailparse::ParsedContentDisposition,
) -> Option<String> {
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| decode_encoded_words(name))
        .filter(|name| !name.trim().is_empty())
}

/// Decodes RFC 2047 encoded words that some clients put inside quoted parameters.
fn decode_encoded_words(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }
    let line = format!("X: {value}");
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

/// Reduces a declared file name to its last path component.
///
/// Returns `None` when nothing usable is left.
pub(crate) fn sanitize_filename(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let file_name = Path::new(&normalized).file_name()?.to_str()?;
    let cleaned: String = file_name.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Name for a part that declared none: `attachment_<n>.<subtype>`.
fn generated_filename(index: usize, mimetype: &str) -> String {
    let subtype = mimetype
        .split_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or("bin")
        .split(['+', ';'])
        .next()
        .filter(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.'))
        .unwrap_or("bin");
    format!("attachment_{index}.{subtype}")
}

fn header(part: &ParsedMail<'_>, name: &str) -> Option<String> {
    part.headers
        .get_first_value(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let timestamp = mailparse::dateparse(value).ok()?;
    DateTime::from_timestamp(timestamp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MIXED: &[u8] = b"From: Billing <billing@example.com>\r\n\
To: user@example.com\r\n\
Subject: Invoice #1\r\n\
Date: Tue, 02 Jan 2024 03:04:05 +0000\r\n\
Message-ID: <inv-1@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find your invoice attached.\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Please find your invoice attached.</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SGVsbG8sIFBERiE=\r\n\
--outer--\r\n";

    #[test]
    fn test_parse_nested_multipart() {
        let parsed = parse(MIXED).unwrap();

        assert_eq!(parsed.subject.as_deref(), Some("Invoice #1"));
        assert_eq!(
            parsed.from.as_deref(),
            Some("Billing <billing@example.com>")
        );
        assert_eq!(
            parsed.date,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert!(parsed.text.as_deref().unwrap().contains("invoice attached"));
        assert!(parsed.html.as_deref().unwrap().contains("<p>"));

        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.filename, "invoice.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.disposition, Disposition::Attachment);
        assert_eq!(attachment.content, b"Hello, PDF!");
        assert_eq!(attachment.size(), 11);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let first = parse(MIXED).unwrap();
        let second = parse(MIXED).unwrap();
        assert_eq!(first.subject, second.subject);
        assert_eq!(first.date, second.date);
        assert_eq!(first.attachments, second.attachments);
    }

    #[test]
    fn test_truncated_boundary_is_malformed() {
        let truncated = &MIXED[..MIXED.len() - "--outer--\r\n".len()];
        let err = parse(truncated).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_missing_boundary_param_is_malformed() {
        let raw = b"Subject: x\r\nContent-Type: multipart/mixed\r\n\r\nbody";
        assert!(matches!(
            parse(raw).unwrap_err(),
            Error::MalformedMessage { .. }
        ));
    }

    #[test]
    fn test_empty_input_is_malformed() {
        assert!(parse(b"").is_err());
        assert!(parse(b"\r\n\r\n").is_err());
    }

    #[test]
    fn test_encoded_subject_and_quoted_printable_attachment() {
        let raw = b"From: =?UTF-8?Q?Ren=C3=A9?= <rene@example.com>\r\n\
Subject: =?UTF-8?B?UmFwcG9ydCBtZW5zdWVs?=\r\n\
Content-Type: multipart/mixed; boundary=b1\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--b1\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"=?UTF-8?B?ZGF0YS5jc3Y=?=\"\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
col1,col2=3D\r\n\
--b1--\r\n";

        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Rapport mensuel"));
        assert_eq!(parsed.from.as_deref(), Some("René <rene@example.com>"));
        assert_eq!(parsed.text.as_deref().map(str::trim), Some("see attached"));

        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.filename, "data.csv");
        assert!(attachment.content.starts_with(b"col1,col2="));
    }

    #[test]
    fn test_inline_image_without_name_gets_generated_name() {
        let raw = b"Subject: pic\r\n\
Content-Type: multipart/related; boundary=rel\r\n\
\r\n\
--rel\r\n\
Content-Type: text/html\r\n\
\r\n\
<img src=\"cid:logo@x\">\r\n\
--rel\r\n\
Content-Type: image/png\r\n\
Content-ID: <logo@x>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SGVsbG8sIFBERiE=\r\n\
--rel--\r\n";

        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.filename, "attachment_1.png");
        assert!(attachment.generated_name);
        assert_eq!(attachment.disposition, Disposition::Inline);
        assert_eq!(attachment.content_id.as_deref(), Some("logo@x"));
    }

    #[test]
    fn test_missing_date_and_subject() {
        let parsed = parse(b"From: a@example.com\r\n\r\nhello").unwrap();
        assert!(parsed.subject.is_none());
        assert!(parsed.date.is_none());
        assert_eq!(parsed.text.as_deref(), Some("hello"));
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(
            sanitize_filename("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\scan.png").as_deref(),
            Some("scan.png")
        );
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("   "), None);
    }

    #[test]
    fn test_generated_filename_subtypes() {
        assert_eq!(generated_filename(2, "application/pdf"), "attachment_2.pdf");
        assert_eq!(
            generated_filename(1, "image/svg+xml"),
            "attachment_1.svg"
        );
        assert_eq!(generated_filename(3, "weird"), "attachment_3.bin");
    }
}
