//! Forward Detector (§4.2): decide whether a message is forwarded and, if
//! so, extract the original sender and forward chain.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::types::ForwardChainEntry;

#[derive(Debug, Clone, Default)]
pub struct ForwardDetection {
    pub is_forwarded: bool,
    pub confidence: i32,
    pub original_sender: Option<String>,
    pub original_sender_email: Option<String>,
    pub forward_level: i32,
    pub forward_chain: Vec<ForwardChainEntry>,
}

pub struct MessageView<'a> {
    pub headers: &'a [(String, String)],
    pub subject: &'a str,
    pub body: &'a str,
    pub body_html: Option<&'a str>,
}

const FORWARD_HEADERS: &[&str] = &[
    "X-Forwarded-For",
    "X-Forwarded-Message-Id",
    "Resent-From",
    "Resent-Sender",
    "X-Forwarded-To",
];

static SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^(re:\s*)?(fwd:|fw:|转发:|trans:|forward:|转:)")
        .case_insensitive(true)
        .build()
        .unwrap()
});

static BODY_SEPARATOR_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    let patterns = [
        r"(?i)-+\s*(original message|forwarded message|转发邮件)\s*-+",
        r"(?i)begin forwarded message:",
        r"-{10}\s*forwarded message\s*-{10}",
        r"(?im)^From:.*\n^To:.*\n^Subject:.*",
        r"(?s)发件人[:：].*主题[:：]",
        r"(?im)^>\s*From:",
        r"(?i)on\s+.+\s+wrote:",
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static HTML_MARKER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    let patterns = [
        r#"(?i)class="?gmail_quote"?"#,
        r"(?is)<blockquote[^>]*>\s*From:",
        r#"(?i)class="?[a-z_]*forward[a-z_]*"?"#,
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

// Ordered original-sender extraction patterns, each with a named `name` and
// `email` capture group (§4.2 "ordered regex set").
static SENDER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let patterns = [
        // 126-style: 发件人: "Name" <email>
        r#"(?m)^发件人[:：]\s*"?(?P<name>[^"<\n]*?)"?\s*<(?P<email>[^<>\s]+@[^<>\s]+)>"#,
        // Generic: From: Name <email>
        r"(?m)^From:\s*(?P<name>[^<\n]*?)\s*<(?P<email>[^<>\s]+@[^<>\s]+)>",
        // Chinese Outlook block
        r#"(?m)^原始发件人[:：]\s*(?P<name>[^<\n]*?)\s*<(?P<email>[^<>\s]+@[^<>\s]+)>"#,
        // bare domestic: 发件人：email
        r"(?m)^发件人[:：]\s*(?P<email>[^\s<>]+@[^\s<>]+)\s*$",
        // quoted line
        r"(?m)^>\s*From:\s*(?P<name>[^<\n]*?)\s*<(?P<email>[^<>\s]+@[^<>\s]+)>",
        // Chinese 原始发件人 bare
        r"(?m)^原始发件人[:：]\s*(?P<email>[^\s<>]+@[^\s<>]+)\s*$",
        // bare From: email@...
        r"(?m)^From:\s*(?P<email>[^\s<>]+@[^\s<>]+)\s*$",
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// Paired with each sender pattern: the forwarded block's subject/date
// lines, harvested from the same block (§4.2 "(from_name, from_email,
// subject?, date?) tuples").
static SUBJECT_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:主题|转发主题|Subject)[:：]\s*(.+?)\s*$").unwrap());
static DATE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:发送日期|发件时间|日期|Date|Sent)[:：]\s*(.+?)\s*$").unwrap()
});

fn extract_subject_and_date(block: &str) -> (Option<String>, Option<String>) {
    let subject = SUBJECT_LABEL_RE
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty());
    let date = DATE_LABEL_RE
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty());
    (subject, date)
}

pub fn detect(view: &MessageView) -> ForwardDetection {
    let mut confidence = 0;

    let has_forward_header = view.headers.iter().any(|(name, _)| {
        FORWARD_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    });
    if has_forward_header {
        confidence += 40;
    }

    if SUBJECT_RE.is_match(view.subject) {
        confidence += 25;
    }

    let separator_matches: Vec<&Regex> = BODY_SEPARATOR_RES
        .iter()
        .filter(|re| re.is_match(view.body))
        .collect();
    if !separator_matches.is_empty() {
        confidence += 20;
    }

    let html_hit = view
        .body_html
        .map(|html| HTML_MARKER_RES.iter().any(|re| re.is_match(html)))
        .unwrap_or(false);
    if html_hit {
        confidence += 15;
    }

    let is_forwarded = confidence > 0;
    if !is_forwarded {
        return ForwardDetection::default();
    }

    let (original_sender, original_sender_email, forward_chain) = extract_original_sender(view);

    let forward_level = if !separator_matches.is_empty() {
        separator_matches.len() as i32
    } else if original_sender_email.is_some() {
        1
    } else {
        0
    };

    ForwardDetection {
        is_forwarded,
        confidence,
        original_sender,
        original_sender_email,
        forward_level,
        forward_chain,
    }
}

fn extract_original_sender(
    view: &MessageView,
) -> (Option<String>, Option<String>, Vec<ForwardChainEntry>) {
    // (a) Resent-From header.
    if let Some((_, value)) = view
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Resent-From"))
    {
        if let Some(email) = EMAIL_RE.find(value) {
            let email = email.as_str().to_ascii_lowercase();
            let name = clean_display_name(value, &email);
            let (subject, date) = extract_subject_and_date(view.body);
            let entry = ForwardChainEntry {
                from_name: name.clone(),
                from_email: Some(email.clone()),
                subject,
                date,
            };
            return (name, Some(email), vec![entry]);
        }
    }

    // (b) ordered regex set over the body.
    for re in SENDER_PATTERNS.iter() {
        if let Some(caps) = re.captures(view.body) {
            if let Some(email_match) = caps.name("email") {
                let email = email_match.as_str().to_ascii_lowercase();
                let name = caps
                    .name("name")
                    .map(|m| clean_display_name_str(m.as_str()))
                    .filter(|n| !n.is_empty());
                let block_start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let (subject, date) = extract_subject_and_date(&view.body[block_start..]);
                let entry = ForwardChainEntry {
                    from_name: name.clone(),
                    from_email: Some(email.clone()),
                    subject,
                    date,
                };
                return (name, Some(email), vec![entry]);
            }
        }
    }

    // (c) HTML DOM probes: Gmail `div.gmail_quote` / Outlook `blockquote`
    // containing a From line. No DOM parser in the dependency stack; probe
    // with a targeted regex over the raw HTML instead.
    if let Some(html) = view.body_html {
        static HTML_FROM_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?is)From:\s*(?P<name>[^<\n]*?)\s*&lt;(?P<email>[^&\s]+@[^&\s]+)&gt;")
                .unwrap()
        });
        if let Some(caps) = HTML_FROM_RE.captures(html) {
            if let Some(email_match) = caps.name("email") {
                let email = email_match.as_str().to_ascii_lowercase();
                let name = caps
                    .name("name")
                    .map(|m| clean_display_name_str(m.as_str()))
                    .filter(|n| !n.is_empty());
                let block_start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let (subject, date) = extract_subject_and_date(&html[block_start..]);
                let entry = ForwardChainEntry {
                    from_name: name.clone(),
                    from_email: Some(email.clone()),
                    subject,
                    date,
                };
                return (name, Some(email), vec![entry]);
            }
        }
    }

    (None, None, Vec::new())
}

fn clean_display_name(raw: &str, email: &str) -> Option<String> {
    let without_email = raw.replace(&format!("<{email}>"), "");
    let cleaned = clean_display_name_str(&without_email);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn clean_display_name_str(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"');
    let without_prefix = trimmed
        .strip_prefix("From:")
        .or_else(|| trimmed.strip_prefix("发件人:"))
        .or_else(|| trimmed.strip_prefix("发件人："))
        .unwrap_or(trimmed);
    without_prefix.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_forwarded_subject_and_body_block() {
        let body = "发件人: \"Alice Zhou\" <alice@corp.com>\n主题: Project status\n发送日期: 2025-09-30";
        let view = MessageView {
            headers: &[],
            subject: "Fwd: Project status",
            body,
            body_html: None,
        };
        let detection = detect(&view);
        assert!(detection.is_forwarded);
        assert!(detection.confidence >= 45);
        assert_eq!(detection.original_sender_email.as_deref(), Some("alice@corp.com"));
        assert_eq!(detection.original_sender.as_deref(), Some("Alice Zhou"));
        assert!(detection.forward_level >= 1);
        assert_eq!(detection.forward_chain.len(), 1);
        assert_eq!(detection.forward_chain[0].subject.as_deref(), Some("Project status"));
        assert_eq!(detection.forward_chain[0].date.as_deref(), Some("2025-09-30"));
    }

    #[test]
    fn plain_message_is_not_forwarded() {
        let view = MessageView {
            headers: &[],
            subject: "Quarterly report",
            body: "Please find attached the quarterly report.",
            body_html: None,
        };
        let detection = detect(&view);
        assert!(!detection.is_forwarded);
        assert_eq!(detection.confidence, 0);
        assert_eq!(detection.forward_level, 0);
    }

    #[test]
    fn header_only_signal_still_counts_as_forwarded() {
        let view = MessageView {
            headers: &[("X-Forwarded-For".to_string(), "someone@example.com".to_string())],
            subject: "Hello",
            body: "nothing special here",
            body_html: None,
        };
        let detection = detect(&view);
        assert!(detection.is_forwarded);
        assert_eq!(detection.confidence, 40);
    }
}
