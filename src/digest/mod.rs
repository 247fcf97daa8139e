//! Digest Assembler (§4.5): groups a just-saved batch, computes statistics,
//! and synthesizes a `Digest` record.

use chrono::{Datelike, Timelike, Utc};
use std::collections::BTreeMap;

use crate::summarize::Summarizer;
use crate::types::{
    Digest, DigestContent, DigestEmailView, DigestKeywordItem, DigestStats, Email,
};

const STATS_BODY_PROBE_CHARS: usize = 500;

const MEETING_KEYWORDS: &[&str] = &["会议", "meeting", "例会", "讨论", "discussion", "面谈", "zoom", "腾讯会议"];
const TASK_KEYWORDS: &[&str] = &["任务", "task", "todo", "待办", "需要完成", "请处理", "请完成"];
const DEADLINE_KEYWORDS: &[&str] = &["截止", "deadline", "最迟", "截至", "due date", "到期"];

pub async fn assemble(
    user_id: i64,
    emails: &[Email],
    is_manual_fetch: bool,
    summarizer: &dyn Summarizer,
) -> Digest {
    let content = build_content(emails);
    let summary = synthesize_summary(&content.stats, is_manual_fetch, summarizer).await;
    let now = Utc::now();

    Digest {
        id: None,
        user_id,
        date: now.naive_utc(),
        title: generate_title(emails.len()),
        email_count: emails.len() as i64,
        content,
        summary,
        created_at: now.timestamp(),
    }
}

fn build_content(emails: &[Email]) -> DigestContent {
    let mut groups: BTreeMap<String, Vec<DigestEmailView>> = BTreeMap::new();
    let mut stats = DigestStats::default();
    let mut views = Vec::with_capacity(emails.len());

    for email in emails {
        let view = to_view(email);
        views.push(view.clone());

        // Grouping: "important" (importance >= 2) and the email's category
        // bucket; "urgent" additionally for importance >= 3 (§4.5).
        if email.importance >= 2 {
            groups.entry("important".to_string()).or_default().push(view.clone());
        }
        if email.importance >= 3 {
            groups.entry("urgent".to_string()).or_default().push(view.clone());
        }
        groups
            .entry(email.category.clone())
            .or_default()
            .push(view.clone());

        stats.total_emails += 1;
        if email.importance >= 2 {
            stats.important_count += 1;
        }
        if email.importance >= 3 {
            stats.urgent_count += 1;
        }
        *stats.by_category.entry(email.category.clone()).or_insert(0) += 1;
        *stats.by_provider.entry(email.provider_tag.clone()).or_insert(0) += 1;
        *stats.by_account.entry(email.account_address.clone()).or_insert(0) += 1;
        let hour = email.date.hour();
        let slot = format!("{hour:02}:00-{:02}:00", (hour + 1) % 24);
        *stats.by_hour.entry(slot).or_insert(0) += 1;

        let probe: String = format!(
            "{} {}",
            email.subject,
            email.body.chars().take(STATS_BODY_PROBE_CHARS).collect::<String>()
        )
        .to_ascii_lowercase();

        if MEETING_KEYWORDS.iter().any(|k| probe.contains(k)) {
            stats.meetings.push(DigestKeywordItem {
                subject: email.subject.clone(),
                sender: email.sender.clone(),
                time: Some(email.date.format("%H:%M").to_string()),
            });
        }
        if TASK_KEYWORDS.iter().any(|k| probe.contains(k)) {
            stats.tasks.push(DigestKeywordItem {
                subject: email.subject.clone(),
                sender: email.sender.clone(),
                time: None,
            });
        }
        if DEADLINE_KEYWORDS.iter().any(|k| probe.contains(k)) {
            stats.deadlines.push(DigestKeywordItem {
                subject: email.subject.clone(),
                sender: email.sender.clone(),
                time: None,
            });
        }
        if email.category == "finance" {
            stats.financial_items.push(DigestKeywordItem {
                subject: email.subject.clone(),
                sender: email.sender.clone(),
                time: None,
            });
        }
    }

    groups.retain(|_, v| !v.is_empty());

    DigestContent {
        groups,
        stats,
        emails: views,
    }
}

fn to_view(email: &Email) -> DigestEmailView {
    DigestEmailView {
        email_id: email.email_id.clone(),
        subject: email.subject.clone(),
        sender: email.sender.clone(),
        sender_name: extract_sender_name(&email.sender),
        time: email.date.format("%H:%M").to_string(),
        summary: email
            .ai_summary
            .clone()
            .or_else(|| email.summary.clone())
            .unwrap_or_default(),
        category: email.category.clone(),
        importance: email.importance,
    }
}

/// Parses `"Name <email>"` or falls back to the local-part before `@`.
fn extract_sender_name(sender: &str) -> String {
    if let Some(lt) = sender.find('<') {
        let name = sender[..lt].trim().trim_matches('"');
        if !name.is_empty() {
            return name.to_string();
        }
    }
    sender.split('@').next().unwrap_or(sender).to_string()
}

async fn synthesize_summary(
    stats: &DigestStats,
    is_manual_fetch: bool,
    summarizer: &dyn Summarizer,
) -> String {
    let top_meetings: Vec<_> = stats.meetings.iter().take(3).cloned().collect();
    let top_tasks: Vec<_> = stats.tasks.iter().take(3).cloned().collect();
    let top_deadlines: Vec<_> = stats.deadlines.iter().take(3).cloned().collect();
    let top_financial_items: Vec<_> = stats.financial_items.iter().take(3).cloned().collect();

    match summarizer
        .summarize_digest(
            stats,
            &top_meetings,
            &top_tasks,
            &top_deadlines,
            &top_financial_items,
            is_manual_fetch,
        )
        .await
    {
        Ok(text) if !text.trim().is_empty() => text,
        _ => fallback_summary(stats, is_manual_fetch),
    }
}

/// Deterministic fallback template (§4.5): a greeting by Asia/Shanghai
/// hour-of-day, totals, and conditional alert clauses.
fn fallback_summary(stats: &DigestStats, is_manual_fetch: bool) -> String {
    let mut parts = Vec::new();

    if !is_manual_fetch {
        let shanghai_hour = (Utc::now().hour() + 8) % 24;
        let greeting = if shanghai_hour < 6 {
            "夜深了"
        } else if shanghai_hour < 12 {
            "早上好"
        } else if shanghai_hour < 18 {
            "下午好"
        } else {
            "晚上好"
        };
        parts.push(greeting.to_string());
    }

    parts.push(format!("共收到 {} 封邮件", stats.total_emails));
    if stats.urgent_count > 0 {
        parts.push(format!("其中 {} 封紧急", stats.urgent_count));
    }
    if stats.important_count > 0 {
        parts.push(format!("{} 封重要", stats.important_count));
    }
    if !stats.meetings.is_empty() {
        parts.push(format!("{} 个会议提醒", stats.meetings.len()));
    }
    if !stats.deadlines.is_empty() {
        parts.push(format!("{} 个截止提醒", stats.deadlines.len()));
    }
    if !stats.financial_items.is_empty() {
        parts.push(format!("{} 笔财务相关", stats.financial_items.len()));
    }

    parts.join("，")
}

/// `"YYYY-MM-DD (Weekday) Email Digest - N emails"` (§4.5), date is current
/// UTC.
fn generate_title(email_count: usize) -> String {
    let now = Utc::now();
    let weekday = match now.weekday() {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    };
    format!(
        "{} ({}) Email Digest - {} emails",
        now.format("%Y-%m-%d"),
        weekday,
        email_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::NullSummarizer;
    use crate::types::now_naive;

    fn email(category: &str, importance: i32, subject: &str) -> Email {
        Email {
            id: None,
            user_id: 1,
            email_id: "a@b.com:1".into(),
            content_hash: None,
            subject: subject.into(),
            sender: "Alice <alice@b.com>".into(),
            recipients: vec![],
            date: now_naive(),
            account_address: "a@b.com".into(),
            provider_tag: "gmail".into(),
            body: "".into(),
            body_html: None,
            body_chinese_translation: None,
            body_english_translation: None,
            summary: None,
            ai_summary: None,
            category: category.into(),
            importance,
            classification_method: None,
            processed: true,
            deleted: false,
            is_forwarded: false,
            forward_level: 0,
            original_sender: None,
            original_sender_email: None,
            forwarded_by: None,
            forwarded_by_email: None,
            forward_chain: vec![],
            attachments: vec![],
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn buckets_important_at_importance_two() {
        let emails = vec![email("general", 2, "S1")];
        let content = build_content(&emails);
        assert!(content.groups.contains_key("important"));
        assert!(!content.groups.contains_key("urgent"));
    }

    #[tokio::test]
    async fn urgent_requires_importance_three() {
        let emails = vec![email("general", 3, "S1")];
        let content = build_content(&emails);
        assert!(content.groups.contains_key("important"));
        assert!(content.groups.contains_key("urgent"));
    }

    #[tokio::test]
    async fn digest_email_count_matches_content_emails() {
        let summarizer = NullSummarizer;
        let emails = vec![email("finance", 3, "Invoice"), email("general", 1, "Hi")];
        let digest = assemble(1, &emails, false, &summarizer).await;
        assert_eq!(digest.email_count, digest.content.emails.len() as i64);
        let category_sum: i64 = digest.content.stats.by_category.values().sum();
        assert_eq!(category_sum, digest.email_count);
    }

    #[test]
    fn sender_name_extracted_from_display_form() {
        assert_eq!(extract_sender_name("Alice <alice@b.com>"), "Alice");
        assert_eq!(extract_sender_name("bob@b.com"), "bob");
    }
}
