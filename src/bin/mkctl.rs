//! `mkctl`: the administrative CLI that exposes the out-of-process
//! operations a real deployment needs on top of a running `mailkeeperd` —
//! register a user's schedule, pause/resume/remove a user's trigger, and
//! run one user's pipeline once (manual fetch). Mirrors the seams
//! `app.py`'s Flask routes called directly into `scheduler_manager` and
//! `process_user_emails` for.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use mailkeeper_core::cache::NoopCacheInvalidator;
use mailkeeper_core::config::SystemConfig;
use mailkeeper_core::pipeline::Pipeline;
use mailkeeper_core::store::sqlite::SqliteStore;
use mailkeeper_core::summarize::{HttpSummarizer, NullSummarizer, Summarizer};

#[derive(Parser, Debug)]
#[command(author, version, about = "mailkeeper administrative CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user if missing, print its id.
    AddUser { username: String },
    /// Register or update an IMAP account for a user.
    AddAccount {
        user_id: i64,
        address: String,
        provider_tag: String,
        credential_secret: String,
    },
    /// Set a user's schedule to fixed-interval firing.
    ScheduleInterval { user_id: i64, minutes: u32 },
    /// Set a user's schedule to specific hours/minutes (comma-separated).
    ScheduleCron { user_id: i64, hours: String, minutes: String },
    /// Set a user's schedule to one of the named custom rules.
    ScheduleCustom {
        user_id: i64,
        /// hourly | even_hours | odd_hours | every_n_hours
        rule: String,
        #[arg(long, default_value_t = 0)]
        custom_minute: u32,
        #[arg(long, default_value_t = 2)]
        n_hours: u32,
    },
    /// Mark a user's trigger paused. Picked up by the daemon's
    /// reconciliation loop within its poll interval.
    Pause { user_id: i64 },
    /// Clear a user's paused flag.
    Resume { user_id: i64 },
    /// Remove a user's trigger entirely (daemon stops scheduling it).
    Remove { user_id: i64 },
    /// Run one user's pipeline once, immediately, with no `max_emails` cap
    /// (the one place an unlimited fetch is reachable).
    Run { user_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SystemConfig::load()?;
    let store = SqliteStore::connect(&config.db_path).await?;

    match cli.command {
        Command::AddUser { username } => {
            let id = store.upsert_user(&username).await?;
            println!("user {username} -> id {id}");
        }
        Command::AddAccount { user_id, address, provider_tag, credential_secret } => {
            let id = store
                .upsert_account(user_id, &address, &provider_tag, &credential_secret)
                .await?;
            println!("account {address} -> id {id}");
        }
        Command::ScheduleInterval { user_id, minutes } => {
            store.set_user_config(user_id, "schedule_type", "interval").await?;
            store
                .set_user_config(user_id, "check_interval_minutes", &minutes.to_string())
                .await?;
            println!("user {user_id}: interval schedule every {minutes}m");
        }
        Command::ScheduleCron { user_id, hours, minutes } => {
            store.set_user_config(user_id, "schedule_type", "cron").await?;
            store.set_user_config(user_id, "cron_hours", &hours).await?;
            store.set_user_config(user_id, "cron_minutes", &minutes).await?;
            println!("user {user_id}: cron schedule hours=[{hours}] minutes=[{minutes}]");
        }
        Command::ScheduleCustom { user_id, rule, custom_minute, n_hours } => {
            let normalized = match rule.as_str() {
                "hourly" | "even_hours" | "odd_hours" | "every_n_hours" => rule.as_str(),
                other => bail!("unknown custom rule '{other}', expected hourly|even_hours|odd_hours|every_n_hours"),
            };
            store.set_user_config(user_id, "schedule_type", "custom").await?;
            store.set_user_config(user_id, "custom_rule", normalized).await?;
            store
                .set_user_config(user_id, "custom_minute", &custom_minute.to_string())
                .await?;
            store.set_user_config(user_id, "n_hours", &n_hours.to_string()).await?;
            println!("user {user_id}: custom schedule '{normalized}'");
        }
        Command::Pause { user_id } => {
            store.set_user_config(user_id, "schedule_paused", "true").await?;
            println!("user {user_id}: paused");
        }
        Command::Resume { user_id } => {
            store.set_user_config(user_id, "schedule_paused", "false").await?;
            println!("user {user_id}: resumed");
        }
        Command::Remove { user_id } => {
            store.set_user_config(user_id, "schedule_removed", "true").await?;
            println!("user {user_id}: trigger marked for removal");
        }
        Command::Run { user_id } => {
            run_once(&config, store, user_id).await?;
            println!("user {user_id}: manual run complete");
        }
    }

    Ok(())
}

async fn run_once(config: &SystemConfig, store: SqliteStore, user_id: i64) -> Result<()> {
    let summarizer: Arc<dyn Summarizer> = match HttpSummarizer::from_config(config) {
        Some(s) => Arc::new(s),
        None => Arc::new(NullSummarizer),
    };

    let pipeline = Pipeline {
        store: Box::new(StoreRef(store)),
        summarizer: Box::new(SummarizerRef(summarizer)),
        cache: Box::new(NoopCacheInvalidator),
        attachments_root: config.data_dir.join("attachments"),
    };

    pipeline.run(user_id, true).await.map_err(Into::into)
}

struct StoreRef(SqliteStore);

#[async_trait::async_trait]
impl mailkeeper_core::store::Store for StoreRef {
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
    async fn get_user_config(&self, user_id: i64) -> Result<std::collections::HashMap<String, String>> {
        let mut rows = self.0.get_user_config(user_id).await?;
        // Manual fetches are the one reachable path with no per-account cap.
        rows.insert("max_emails_per_account".to_string(), "null".to_string());
        Ok(rows)
    }
    async fn get_system_config(&self) -> Result<std::collections::HashMap<String, String>> {
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

struct SummarizerRef(Arc<dyn Summarizer>);

#[async_trait::async_trait]
impl Summarizer for SummarizerRef {
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
