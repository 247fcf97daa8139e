//! The persistence contract the pipeline invokes (§4.6). The concrete
//! implementation lives in [`sqlite`]; everything above this trait talks
//! only to `dyn Store`.

pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    ClassificationRule, Digest, Email, EmailAccount, ManualClassificationRecord, NotificationType,
    User,
};

#[async_trait]
pub trait Store: Send + Sync {
    // -- users / accounts --------------------------------------------------
    async fn list_active_accounts(&self, user_id: i64) -> Result<Vec<EmailAccount>>;
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn update_account_stats(&self, account_id: i64, new_email_count: i64) -> Result<()>;

    // -- config -------------------------------------------------------------
    async fn get_user_config(&self, user_id: i64) -> Result<HashMap<String, String>>;
    async fn get_system_config(&self) -> Result<HashMap<String, String>>;

    // -- emails ---------------------------------------------------------------
    /// Keyed by `(user_id, email_id)` OR `(user_id, content_hash)`; on
    /// conflict, overwrite all mutable fields and bump `updated_at`.
    async fn upsert_email(&self, email: &Email) -> Result<i64>;
    async fn get_recent_saved(&self, user_id: i64, limit: i64) -> Result<Vec<Email>>;
    async fn update_email_summary(&self, email_id: &str, ai_summary: &str) -> Result<()>;
    async fn update_email_classification(
        &self,
        email_id: &str,
        category: &str,
        importance: i32,
        method: &str,
    ) -> Result<()>;
    async fn soft_delete(&self, email_id: &str, user_id: i64) -> Result<()>;
    async fn restore(&self, email_id: &str, user_id: i64) -> Result<()>;
    async fn purge(&self, email_id: &str, user_id: i64) -> Result<()>;
    async fn clear_all_emails(&self, user_id: i64) -> Result<i64>;

    /// The complete set of `email_id`s ever stored for `user_id` (§4.4).
    async fn all_email_ids(&self, user_id: i64) -> Result<Vec<String>>;
    /// `content_hash`es stored for `user_id` within the last
    /// `duplicate_check_days` (§4.4).
    async fn content_hashes_since(&self, user_id: i64, duplicate_check_days: u32) -> Result<Vec<String>>;

    // -- translations -----------------------------------------------------
    async fn save_translation(&self, email_id: &str, language: &str, text: &str) -> Result<()>;
    async fn get_translation(&self, email_id: &str, language: &str) -> Result<Option<String>>;
    async fn clear_translations(&self, email_id: &str) -> Result<()>;

    // -- digests ------------------------------------------------------------
    async fn save_digest(&self, digest: &Digest) -> Result<i64>;
    async fn list_digests(&self, user_id: i64, page: i64, page_size: i64) -> Result<Vec<Digest>>;
    async fn get_digest(&self, digest_id: i64, user_id: i64) -> Result<Option<Digest>>;

    // -- rules --------------------------------------------------------------
    async fn list_active_rules(&self, user_id: i64) -> Result<Vec<ClassificationRule>>;
    async fn create_rule(&self, rule: &ClassificationRule) -> Result<i64>;
    async fn update_rule(&self, rule: &ClassificationRule) -> Result<()>;
    async fn delete_rule(&self, rule_id: i64, user_id: i64) -> Result<()>;
    async fn increment_rule_match(&self, rule_id: i64) -> Result<()>;

    // -- manual reclassification / notifications --------------------------
    async fn record_manual_reclassification(
        &self,
        record: &ManualClassificationRecord,
    ) -> Result<()>;
    async fn save_notification(
        &self,
        user_id: i64,
        notification_type: NotificationType,
        title: &str,
        message: &str,
    ) -> Result<()>;

    // -- scheduler bookkeeping ----------------------------------------------
    async fn set_account_last_check(&self, account_id: i64, ts: i64) -> Result<()>;
}

/// Convenience wrapper so pipeline code can call `store.notify(...)` and
/// get a single log line regardless of the notification's terminal state
/// (§4.7 "Two terminal notifications matter for observability").
pub async fn notify(
    store: &dyn Store,
    user_id: i64,
    notification_type: NotificationType,
    title: &str,
    message: &str,
) {
    if let Err(err) = store
        .save_notification(user_id, notification_type, title, message)
        .await
    {
        tracing::warn!(user_id, error = %err, "failed to persist notification");
    }
}
