//! MIME parsing for the IMAP Fetcher (§4.1 "Parsing"). Walks a parsed
//! message, decoding headers and body text through the multi-charset
//! fallback chain, and harvests attachment candidates for the caller to
//! validate against the attachment policy.

pub mod attachments;
pub mod encoding;

use mailparse::body::Body;
use mailparse::{MailHeaderMap, ParsedMail};

use crate::errors::ParseError;

#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    pub original_filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub subject: String,
    pub from: String,
    /// All `To` headers, joined in header order (§4.1 "To*").
    pub to: Vec<String>,
    /// Raw `Date` header text; the caller is responsible for parsing this
    /// into an aware instant and normalizing to UTC (§4.1 step 5 of
    /// parsing, §3 invariant).
    pub date_raw: Option<String>,
    pub body: String,
    pub body_html: Option<String>,
    pub attachments: Vec<ParsedAttachment>,
    /// Every top-level header in wire order, decoded through the same
    /// fallback chain as `subject`/`from` — the Forward Detector's
    /// `X-Forwarded-*`/`Resent-*` signal (§4.2) reads these.
    pub headers: Vec<(String, String)>,
}

pub fn parse(raw: &[u8]) -> Result<ParsedMessage, ParseError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| ParseError::Mime(e.to_string()))?;

    let subject = decode_header(&parsed, "Subject").unwrap_or_default();
    let from = decode_header(&parsed, "From").unwrap_or_default();
    let to = parsed
        .headers
        .get_all_values("To")
        .into_iter()
        .map(|raw_value| encoding::decode_lossy(raw_value.as_bytes()))
        .collect();
    let date_raw = parsed.headers.get_first_value("Date");
    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), encoding::decode_lossy(h.get_value_raw())))
        .collect();

    let mut body = String::new();
    let mut body_html: Option<String> = None;
    let mut attachments = Vec::new();
    walk(&parsed, &mut body, &mut body_html, &mut attachments);

    // Single-part messages: the payload is decoded as body regardless of
    // declared subtype, per §4.1.
    if parsed.subparts.is_empty() && body.is_empty() && body_html.is_none() {
        if let Ok(raw_body) = parsed.get_body_raw() {
            body = encoding::decode_lossy(&raw_body);
        }
    }

    // HTML-only messages: render a plaintext body so keyword matching,
    // forward detection, and digest stats have text to scan (§4.1).
    if body.is_empty() {
        if let Some(html) = &body_html {
            if let Ok(text) = html2text::from_read(html.as_bytes(), 1000) {
                body = text;
            }
        }
    }

    Ok(ParsedMessage {
        subject,
        from,
        to,
        date_raw,
        body,
        body_html,
        attachments,
        headers,
    })
}

fn decode_header(parsed: &ParsedMail, key: &str) -> Option<String> {
    let decoded = parsed.headers.get_first_value(key)?;
    if decoded.chars().any(|c| c == '\u{fffd}') {
        // mailparse's own RFC2047 decode produced replacement characters;
        // retry against the raw bytes through our fallback chain.
        if let Some(header) = parsed
            .headers
            .iter()
            .find(|h| h.get_key().eq_ignore_ascii_case(key))
        {
            return Some(encoding::decode_lossy(header.get_value_raw()));
        }
    }
    Some(decoded)
}

fn walk(
    part: &ParsedMail,
    body: &mut String,
    body_html: &mut Option<String>,
    attachments: &mut Vec<ParsedAttachment>,
) {
    let disp = part.get_content_disposition();
    if matches!(disp.disposition, mailparse::DispositionType::Attachment) {
        harvest_attachment(part, attachments);
        return;
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if part.subparts.is_empty() {
        let filename = extract_filename(part);
        if filename.is_some() && !mimetype.starts_with("text/") {
            harvest_attachment(part, attachments);
            return;
        }

        let raw = raw_body_bytes(part);
        if mimetype == "text/plain" {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&encoding::decode_lossy(&raw));
        } else if mimetype == "text/html" {
            let decoded = encoding::decode_lossy(&raw);
            match body_html {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&decoded);
                }
                None => *body_html = Some(decoded),
            }
        } else if filename.is_some() {
            harvest_attachment(part, attachments);
        }
        return;
    }

    for child in &part.subparts {
        walk(child, body, body_html, attachments);
    }
}

fn raw_body_bytes(part: &ParsedMail) -> Vec<u8> {
    match part.get_body_encoded() {
        Body::Base64(b) => b.get_decoded().unwrap_or_default(),
        Body::QuotedPrintable(b) => b.get_decoded().unwrap_or_default(),
        Body::SevenBit(b) => b.get_raw().to_vec(),
        Body::EightBit(b) => b.get_raw().to_vec(),
        Body::Binary(b) => b.get_raw().to_vec(),
    }
}

fn extract_filename(part: &ParsedMail) -> Option<String> {
    let disp = part.get_content_disposition();
    let disp_name = disp
        .params
        .get("filename")
        .or_else(|| disp.params.get("name"))
        .cloned();
    let ctype_name = part
        .ctype
        .params
        .get("name")
        .or_else(|| part.ctype.params.get("filename"))
        .cloned();

    disp_name.or(ctype_name).and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn harvest_attachment(part: &ParsedMail, attachments: &mut Vec<ParsedAttachment>) {
    let original_filename = extract_filename(part).unwrap_or_else(|| "attachment".to_string());
    let bytes = raw_body_bytes(part);
    attachments.push(ParsedAttachment {
        original_filename,
        content_type: part.ctype.mimetype.clone(),
        bytes,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_text_body_and_attachment() {
        let raw = concat!(
            "Subject: test\r\n",
            "From: sender@example.com\r\n",
            "To: a@example.com\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "Hello\r\n",
            "--b\r\n",
            "Content-Type: application/pdf; name=\"file.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"file.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "SGVsbG8=\r\n",
            "--b--\r\n",
        )
        .as_bytes();

        let parsed = parse(raw).expect("parse");
        assert_eq!(parsed.subject, "test");
        assert!(parsed.body.contains("Hello"));
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].original_filename, "file.pdf");
    }

    #[test]
    fn single_part_message_decodes_payload_as_body() {
        let raw = concat!(
            "Subject: plain\r\n",
            "From: sender@example.com\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "just text\r\n",
        )
        .as_bytes();

        let parsed = parse(raw).expect("parse");
        assert!(parsed.body.contains("just text"));
        assert!(parsed.attachments.is_empty());
    }
}
