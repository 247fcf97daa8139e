//! The daemon: loads `SystemConfig`, wires the Store/Summarizer/Cache
//! collaborators, registers one Scheduler trigger per user with active
//! accounts, and runs until `SIGINT`/`SIGTERM`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mailkeeper_core::config::{ScheduleConfig, SystemConfig, UserPipelineConfig};
use mailkeeper_core::gate::ConcurrencyGate;
use mailkeeper_core::pipeline::Pipeline;
use mailkeeper_core::scheduler::Scheduler;
use mailkeeper_core::store::sqlite::SqliteStore;
use mailkeeper_core::summarize::{HttpSummarizer, NullSummarizer, Summarizer};
use mailkeeper_core::{cache::LoggingCacheInvalidator, logging};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = SystemConfig::load()?;

    let _log_guard = logging::init(&config.data_dir.join("logs"))?;
    tracing::info!("mailkeeperd starting");

    let store = Arc::new(SqliteStore::connect(&config.db_path).await?);

    let summarizer: Arc<dyn Summarizer> = match HttpSummarizer::from_config(&config) {
        Some(s) => Arc::new(s),
        None => {
            tracing::warn!("no summarizer configured, using NullSummarizer (deterministic fallbacks only)");
            Arc::new(NullSummarizer)
        }
    };

    let pipeline = Arc::new(Pipeline {
        store: Box::new(SqliteStoreHandle(store.clone())),
        summarizer: Box::new(SummarizerHandle(summarizer.clone())),
        cache: Box::new(LoggingCacheInvalidator),
        attachments_root: config.data_dir.join("attachments"),
    });

    let gate = ConcurrencyGate::new(config.max_concurrent_users);
    let scheduler = Arc::new(Scheduler::new(gate, pipeline));

    let mut paused: HashSet<i64> = HashSet::new();
    for user in store.list_users().await? {
        let accounts = store.list_active_accounts(user.id).await.unwrap_or_default();
        if accounts.is_empty() {
            continue;
        }
        let rows: HashMap<String, String> = store.get_user_config(user.id).await.unwrap_or_default();
        if rows.get("schedule_removed").map(String::as_str) == Some("true") {
            continue;
        }
        let user_config = UserPipelineConfig::from_rows(user.id, &rows);
        register_trigger(&scheduler, user.id, user_config.schedule).await;
        if rows.get("schedule_paused").map(String::as_str) == Some("true") {
            scheduler.pause_trigger(user.id).await;
            paused.insert(user.id);
        }
    }

    let reconcile_handle = tokio::spawn(reconcile_loop(store.clone(), scheduler.clone(), paused));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining scheduler");
    reconcile_handle.abort();
    scheduler.shutdown().await;

    Ok(())
}

async fn register_trigger<R: mailkeeper_core::scheduler::PipelineRunner + 'static>(
    scheduler: &Scheduler<R>,
    user_id: i64,
    schedule: ScheduleConfig,
) {
    scheduler.upsert_trigger(user_id, schedule).await;
}

/// Polls `user_config` for `mkctl`-written pause/resume/remove/schedule
/// changes, since there is no control-plane RPC between the two binaries.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

async fn reconcile_loop<R: mailkeeper_core::scheduler::PipelineRunner + 'static>(
    store: Arc<SqliteStore>,
    scheduler: Arc<Scheduler<R>>,
    mut paused: HashSet<i64>,
) {
    loop {
        tokio::time::sleep(RECONCILE_INTERVAL).await;

        let Ok(users) = store.list_users().await else { continue };
        for user in users {
            let rows: HashMap<String, String> = store.get_user_config(user.id).await.unwrap_or_default();

            if rows.get("schedule_removed").map(String::as_str) == Some("true") {
                scheduler.remove_trigger(user.id).await;
                paused.remove(&user.id);
                continue;
            }

            let is_paused = rows.get("schedule_paused").map(String::as_str) == Some("true");
            if is_paused && !paused.contains(&user.id) {
                scheduler.pause_trigger(user.id).await;
                paused.insert(user.id);
            } else if !is_paused && paused.remove(&user.id) {
                scheduler.resume_trigger(user.id).await;
            }
        }
    }
}

/// Thin `Arc`-sharing adapters so the same `Store`/`Summarizer` instance can
/// back both the Scheduler's long-lived registry and each `Pipeline`.
struct SqliteStoreHandle(Arc<SqliteStore>);

#[async_trait::async_trait]
impl mailkeeper_core::store::Store for SqliteStoreHandle {
    async fn list_active_accounts(&self, user_id: i64) -> Result<Vec<mailkeeper_core::types::EmailAccount>> {
        self.0.list_active_accounts(user_id).await
    }
    async fn get_user(&self, user_id: i64) -> Result<Option<mailkeeper_core::types::User>> {
        self.0.get_user(user_id).await
    }
    async fn list_users(&self) -> Result<Vec<mailkeeper_core::types::User>> {
        self.0.list_users().await
    }
    async fn update_account_stats(&self, account_id: i64, new_email_count: i64) -> Result<()> {
        self.0.update_account_stats(account_id, new_email_count).await
    }
    async fn get_user_config(&self, user_id: i64) -> Result<HashMap<String, String>> {
        self.0.get_user_config(user_id).await
    }
    async fn get_system_config(&self) -> Result<HashMap<String, String>> {
        self.0.get_system_config().await
    }
    async fn upsert_email(&self, email: &mailkeeper_core::types::Email) -> Result<i64> {
        self.0.upsert_email(email).await
    }
    async fn get_recent_saved(&self, user_id: i64, limit: i64) -> Result<Vec<mailkeeper_core::types::Email>> {
        self.0.get_recent_saved(user_id, limit).await
    }
    async fn update_email_summary(&self, email_id: &str, ai_summary: &str) -> Result<()> {
        self.0.update_email_summary(email_id, ai_summary).await
    }
    async fn update_email_classification(
        &self,
        email_id: &str,
        category: &str,
        importance: i32,
        method: &str,
    ) -> Result<()> {
        self.0.update_email_classification(email_id, category, importance, method).await
    }
    async fn soft_delete(&self, email_id: &str, user_id: i64) -> Result<()> {
        self.0.soft_delete(email_id, user_id).await
    }
    async fn restore(&self, email_id: &str, user_id: i64) -> Result<()> {
        self.0.restore(email_id, user_id).await
    }
    async fn purge(&self, email_id: &str, user_id: i64) -> Result<()> {
        self.0.purge(email_id, user_id).await
    }
    async fn clear_all_emails(&self, user_id: i64) -> Result<i64> {
        self.0.clear_all_emails(user_id).await
    }
    async fn all_email_ids(&self, user_id: i64) -> Result<Vec<String>> {
        self.0.all_email_ids(user_id).await
    }
    async fn content_hashes_since(&self, user_id: i64, duplicate_check_days: u32) -> Result<Vec<String>> {
        self.0.content_hashes_since(user_id, duplicate_check_days).await
    }
    async fn save_translation(&self, email_id: &str, language: &str, text: &str) -> Result<()> {
        self.0.save_translation(email_id, language, text).await
    }
    async fn get_translation(&self, email_id: &str, language: &str) -> Result<Option<String>> {
        self.0.get_translation(email_id, language).await
    }
    async fn clear_translations(&self, email_id: &str) -> Result<()> {
        self.0.clear_translations(email_id).await
    }
    async fn save_digest(&self, digest: &mailkeeper_core::types::Digest) -> Result<i64> {
        self.0.save_digest(digest).await
    }
    async fn list_digests(&self, user_id: i64, page: i64, page_size: i64) -> Result<Vec<mailkeeper_core::types::Digest>> {
        self.0.list_digests(user_id, page, page_size).await
    }
    async fn get_digest(&self, digest_id: i64, user_id: i64) -> Result<Option<mailkeeper_core::types::Digest>> {
        self.0.get_digest(digest_id, user_id).await
    }
    async fn list_active_rules(&self, user_id: i64) -> Result<Vec<mailkeeper_core::types::ClassificationRule>> {
        self.0.list_active_rules(user_id).await
    }
    async fn create_rule(&self, rule: &mailkeeper_core::types::ClassificationRule) -> Result<i64> {
        self.0.create_rule(rule).await
    }
    async fn update_rule(&self, rule: &mailkeeper_core::types::ClassificationRule) -> Result<()> {
        self.0.update_rule(rule).await
    }
    async fn delete_rule(&self, rule_id: i64, user_id: i64) -> Result<()> {
        self.0.delete_rule(rule_id, user_id).await
    }
    async fn increment_rule_match(&self, rule_id: i64) -> Result<()> {
        self.0.increment_rule_match(rule_id).await
    }
    async fn record_manual_reclassification(
        &self,
        record: &mailkeeper_core::types::ManualClassificationRecord,
    ) -> Result<()> {
        self.0.record_manual_reclassification(record).await
    }
    async fn save_notification(
        &self,
        user_id: i64,
        notification_type: mailkeeper_core::types::NotificationType,
        title: &str,
        message: &str,
    ) -> Result<()> {
        self.0.save_notification(user_id, notification_type, title, message).await
    }
    async fn set_account_last_check(&self, account_id: i64, ts: i64) -> Result<()> {
        self.0.set_account_last_check(account_id, ts).await
    }
}

struct SummarizerHandle(Arc<dyn Summarizer>);

#[async_trait::async_trait]
impl Summarizer for SummarizerHandle {
    async fn summarize_one(
        &self,
        email: &mailkeeper_core::types::Email,
    ) -> Result<String, mailkeeper_core::errors::SummarizeError> {
        self.0.summarize_one(email).await
    }

    async fn summarize_digest(
        &self,
        stats: &mailkeeper_core::types::DigestStats,
        top_meetings: &[mailkeeper_core::types::DigestKeywordItem],
        top_tasks: &[mailkeeper_core::types::DigestKeywordItem],
        top_deadlines: &[mailkeeper_core::types::DigestKeywordItem],
        top_financial_items: &[mailkeeper_core::types::DigestKeywordItem],
        is_manual_fetch: bool,
    ) -> Result<String, mailkeeper_core::errors::SummarizeError> {
        self.0
            .summarize_digest(
                stats,
                top_meetings,
                top_tasks,
                top_deadlines,
                top_financial_items,
                is_manual_fetch,
            )
            .await
    }
}
