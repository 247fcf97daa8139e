use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// A registered tenant. Created on registration, never auto-deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub created_at: i64,
}

/// `provider_tag` selects an entry in the Provider Registry (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
    pub provider_tag: String,
    /// Opaque app-password blob; never interpreted beyond IMAP login.
    pub credential_secret: String,
    pub active: bool,
    pub last_check: Option<i64>,
    pub total_emails: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderMatchType {
    Exact,
    Contains,
    Domain,
    Wildcard,
    Regex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeywordLogic {
    And,
    Or,
}

impl Default for KeywordLogic {
    fn default() -> Self {
        KeywordLogic::Or
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: i64,
    pub user_id: i64,
    pub rule_name: String,
    pub sender_pattern: Option<String>,
    pub sender_match_type: Option<SenderMatchType>,
    pub subject_keywords: Vec<String>,
    pub subject_logic: KeywordLogic,
    pub body_keywords: Vec<String>,
    pub target_category: String,
    pub target_importance: i32,
    pub priority: i32,
    pub is_active: bool,
    pub match_count: i64,
    pub last_matched_at: Option<i64>,
}

impl ClassificationRule {
    /// A rule with no pattern field configured is inert (§3).
    pub fn is_inert(&self) -> bool {
        self.sender_pattern.is_none()
            && self.subject_keywords.is_empty()
            && self.body_keywords.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForwardChainEntry {
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub original_filename: String,
    pub stored_filename: String,
    pub content_type: String,
    pub size: u64,
    pub stored_path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMethod {
    Rule,
    Keyword,
    Default,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::Rule => "rule",
            ClassificationMethod::Keyword => "keyword",
            ClassificationMethod::Default => "default",
        }
    }
}

/// The enriched stored message (§3). Fields populated by the Fetcher carry
/// `summary`, `ai_summary`, `content_hash`, and `id` unset; those are filled
/// in by later pipeline stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Email {
    pub id: Option<i64>,
    pub user_id: i64,
    /// `"<account_address>:<imap_uid>"`, stable per message.
    pub email_id: String,
    pub content_hash: Option<String>,

    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    /// Always UTC naive; IMAP zone-offset dates are converted before storage.
    pub date: NaiveDateTime,
    pub account_address: String,
    pub provider_tag: String,

    pub body: String,
    pub body_html: Option<String>,
    pub body_chinese_translation: Option<String>,
    pub body_english_translation: Option<String>,

    pub summary: Option<String>,
    pub ai_summary: Option<String>,
    pub category: String,
    pub importance: i32,
    pub classification_method: Option<ClassificationMethod>,
    pub processed: bool,
    pub deleted: bool,

    pub is_forwarded: bool,
    pub forward_level: i32,
    pub original_sender: Option<String>,
    pub original_sender_email: Option<String>,
    pub forwarded_by: Option<String>,
    pub forwarded_by_email: Option<String>,
    pub forward_chain: Vec<ForwardChainEntry>,

    pub attachments: Vec<Attachment>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Email {
    /// `recipients_joined` for the content-hash fingerprint (§4.4): `,`-joined
    /// preserving order.
    pub fn recipients_joined(&self) -> String {
        self.recipients.join(",")
    }

    pub fn date_iso(&self) -> String {
        DateTime::<Utc>::from_naive_utc_and_offset(self.date, Utc)
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DigestEmailView {
    pub email_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: String,
    pub time: String,
    pub summary: String,
    pub category: String,
    pub importance: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DigestKeywordItem {
    pub subject: String,
    pub sender: String,
    pub time: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DigestStats {
    pub total_emails: i64,
    pub important_count: i64,
    pub urgent_count: i64,
    pub by_category: std::collections::BTreeMap<String, i64>,
    pub by_provider: std::collections::BTreeMap<String, i64>,
    pub by_account: std::collections::BTreeMap<String, i64>,
    pub by_hour: std::collections::BTreeMap<String, i64>,
    pub meetings: Vec<DigestKeywordItem>,
    pub tasks: Vec<DigestKeywordItem>,
    pub deadlines: Vec<DigestKeywordItem>,
    pub financial_items: Vec<DigestKeywordItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DigestContent {
    /// Grouping by bucket name (`"important"`, `"urgent"`, category tags) to
    /// the list of emails in that bucket. Empty buckets are omitted.
    pub groups: std::collections::BTreeMap<String, Vec<DigestEmailView>>,
    pub stats: DigestStats,
    pub emails: Vec<DigestEmailView>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Digest {
    pub id: Option<i64>,
    pub user_id: i64,
    pub date: NaiveDateTime,
    pub title: String,
    pub content: DigestContent,
    pub email_count: i64,
    pub summary: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManualClassificationRecord {
    pub user_id: i64,
    pub email_id: String,
    pub original_category: String,
    pub new_category: String,
    pub original_importance: i32,
    pub new_importance: i32,
    pub sender: String,
    pub subject: String,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Info => "info",
            NotificationType::Success => "success",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: Option<i64>,
    pub user_id: i64,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemNotification {
    pub id: Option<i64>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub created_at: i64,
}

/// Cache invalidation scope passed alongside every mutating Store call
/// (§4.6). The Store does not perform cache reads itself; it hands these off
/// to a `CacheInvalidator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheScope {
    NewEmail,
    DeleteEmail,
    PurgeEmail,
    RestoreEmail,
    ClearAllEmails,
    NewDigest,
    ConfigChange,
    All,
}
