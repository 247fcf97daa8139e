//! Summarizer capability (§6 "Summarizer capability contract"), the one
//! external collaborator the pipeline calls synchronously per email and
//! once per digest.

use async_trait::async_trait;

use crate::config::SystemConfig;
use crate::errors::SummarizeError;
use crate::types::{DigestKeywordItem, DigestStats, Email};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// A short Chinese summary, <= `summary_max_length` chars. On any
    /// failure the caller falls back to a deterministic template; this
    /// method itself may return `Err` to signal that.
    async fn summarize_one(&self, email: &Email) -> Result<String, SummarizeError>;

    /// <= 500 words of Chinese; tone biased by `is_manual_fetch` (manual
    /// runs omit the time-of-day greeting).
    async fn summarize_digest(
        &self,
        stats: &DigestStats,
        top_meetings: &[DigestKeywordItem],
        top_tasks: &[DigestKeywordItem],
        top_deadlines: &[DigestKeywordItem],
        top_financial_items: &[DigestKeywordItem],
        is_manual_fetch: bool,
    ) -> Result<String, SummarizeError>;
}

/// Deterministic per-email fallback template (§4.7): used whenever the
/// Summarizer fails or is unconfigured.
pub fn fallback_one(email: &Email) -> String {
    let sender_name = email
        .sender
        .find('<')
        .map(|lt| email.sender[..lt].trim().trim_matches('"').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.sender.clone());
    let preview: String = email.body.chars().take(100).collect();
    format!("Email from {sender_name}: {}. Preview: {preview}", email.subject)
}

/// Always returns empty, exercising every fallback path. Used in tests and
/// by operators who haven't configured a provider.
pub struct NullSummarizer;

#[async_trait]
impl Summarizer for NullSummarizer {
    async fn summarize_one(&self, _email: &Email) -> Result<String, SummarizeError> {
        Ok(String::new())
    }

    async fn summarize_digest(
        &self,
        _stats: &DigestStats,
        _top_meetings: &[DigestKeywordItem],
        _top_tasks: &[DigestKeywordItem],
        _top_deadlines: &[DigestKeywordItem],
        _top_financial_items: &[DigestKeywordItem],
        _is_manual_fetch: bool,
    ) -> Result<String, SummarizeError> {
        Ok(String::new())
    }
}

/// HTTP client against an OpenAI-chat-completions-shaped endpoint (§6),
/// matching the teacher's `reqwest` feature set.
pub struct HttpSummarizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_length: usize,
    temperature: f32,
}

impl HttpSummarizer {
    pub fn from_config(config: &SystemConfig) -> Option<Self> {
        let base_url = config.summarizer_base_url.clone()?;
        let api_key = config.summarizer_api_key.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model: config.summarizer_model.clone(),
            max_length: config.summarizer_max_length,
            temperature: config.summarizer_temperature,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, SummarizeError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_length,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = resp.json().await?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| SummarizeError::Protocol("missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize_one(&self, email: &Email) -> Result<String, SummarizeError> {
        let system = "你是一个邮件摘要助手，请用简洁的中文总结这封邮件的核心内容。";
        let user = format!("主题: {}\n发件人: {}\n正文:\n{}", email.subject, email.sender, email.body);
        self.chat(system, &user).await
    }

    async fn summarize_digest(
        &self,
        stats: &DigestStats,
        top_meetings: &[DigestKeywordItem],
        top_tasks: &[DigestKeywordItem],
        top_deadlines: &[DigestKeywordItem],
        top_financial_items: &[DigestKeywordItem],
        is_manual_fetch: bool,
    ) -> Result<String, SummarizeError> {
        let system = "你是一个邮件摘要助手，请用不超过500字的中文总结今天的邮件情况。";
        let tone_hint = if is_manual_fetch {
            "这是一次手动拉取，不要使用时间问候语。"
        } else {
            "这是一次定时拉取，可以使用时间问候语。"
        };
        let user = format!(
            "{tone_hint}\n总数: {}\n紧急: {}\n重要: {}\n会议: {:?}\n任务: {:?}\n截止日期: {:?}\n财务相关: {:?}",
            stats.total_emails,
            stats.urgent_count,
            stats.important_count,
            top_meetings.iter().map(|m| &m.subject).collect::<Vec<_>>(),
            top_tasks.iter().map(|t| &t.subject).collect::<Vec<_>>(),
            top_deadlines.iter().map(|d| &d.subject).collect::<Vec<_>>(),
            top_financial_items.iter().map(|f| &f.subject).collect::<Vec<_>>(),
        );
        self.chat(system, &user).await
    }
}
