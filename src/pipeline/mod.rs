//! User Pipeline (§4.7): orchestrates Fetch -> Parse -> Merge -> Dedupe ->
//! Classify+Summarize -> Persist -> Digest -> Notify for one user's run.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheInvalidator;
use crate::classify;
use crate::config::UserPipelineConfig;
use crate::dedupe;
use crate::digest;
use crate::errors::PipelineError;
use crate::imap;
use crate::scheduler::PipelineRunner;
use crate::store::{self, Store};
use crate::summarize::{self, Summarizer};
use crate::types::{CacheScope, NotificationType};

use async_trait::async_trait;

/// Per-email delay respecting the Summarizer provider's implicit rate limit
/// (§5 "Suspension and blocking points").
const SUMMARIZER_INTER_CALL_DELAY: Duration = Duration::from_millis(500);

pub struct Pipeline {
    pub store: Box<dyn Store>,
    pub summarizer: Box<dyn Summarizer>,
    pub cache: Box<dyn CacheInvalidator>,
    pub attachments_root: PathBuf,
}

#[async_trait]
impl PipelineRunner for Pipeline {
    async fn run_for_user(&self, user_id: i64, is_manual_fetch: bool) -> anyhow::Result<()> {
        self.run(user_id, is_manual_fetch).await.map_err(Into::into)
    }
}

impl Pipeline {
    pub async fn run(&self, user_id: i64, is_manual_fetch: bool) -> Result<(), PipelineError> {
        // LOAD_CONFIG
        let raw_config = self
            .store
            .get_user_config(user_id)
            .await
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let config = UserPipelineConfig::from_rows(user_id, &raw_config);

        let accounts = self
            .store
            .list_active_accounts(user_id)
            .await
            .map_err(|e| PipelineError::Internal(e))?;

        if accounts.is_empty() {
            if is_manual_fetch {
                // Manual trigger on a zero-account user: refuse (§8).
                return Err(PipelineError::Config("user has no active accounts".to_string()));
            }
            // Scheduled trigger on a zero-account user: skip, no notification (§8).
            tracing::info!(user_id, "no active accounts, skipping run");
            return Ok(());
        }

        // FOR EACH ACTIVE ACCOUNT [FETCH -> PARSE], preserving insertion
        // order (§5 "Ordering guarantees").
        let mut candidates = Vec::new();
        for account in &accounts {
            match imap::fetch_account(
                account,
                config.check_days_back,
                config.max_emails_per_account,
                &self.attachments_root,
            )
            .await
            {
                Ok(mut emails) => {
                    for email in &mut emails {
                        truncate_fields(email, &config);
                    }
                    candidates.append(&mut emails);
                }
                Err(err) => {
                    tracing::warn!(user_id, account = account.address, error = %err, "account fetch failed, skipping");
                }
            }
        }

        let found_count = candidates.len();

        // DEDUPE
        let (survivors, tally) =
            dedupe::filter(self.store.as_ref(), user_id, config.duplicate_check_days, candidates)
                .await;

        if survivors.is_empty() {
            let message = if found_count == 0 {
                "没有新邮件".to_string()
            } else {
                format!("共发现 {found_count} 封邮件，全部为重复邮件")
            };
            store::notify(
                self.store.as_ref(),
                user_id,
                NotificationType::Info,
                "邮件收取完成",
                &message,
            )
            .await;
            return Ok(());
        }

        // CLASSIFY_AND_SUMMARIZE
        let active_rules = self
            .store
            .list_active_rules(user_id)
            .await
            .map_err(|e| PipelineError::Internal(e))?;

        let mut enriched = Vec::with_capacity(survivors.len());
        for mut email in survivors {
            let classification = classify::classify(&email, &active_rules);
            email.category = classification.category;
            email.importance = classification.importance;
            email.classification_method = Some(classification.method);

            if let Some(rule_id) = classification.matched_rule_id {
                if let Err(err) = self.store.increment_rule_match(rule_id).await {
                    tracing::warn!(user_id, rule_id, error = %err, "failed to bump rule match_count");
                }
            }

            email.ai_summary = Some(match self.summarizer.summarize_one(&email).await {
                Ok(text) if !text.trim().is_empty() => text,
                _ => summarize::fallback_one(&email),
            });
            email.processed = true;

            tokio::time::sleep(SUMMARIZER_INTER_CALL_DELAY).await;
            enriched.push(email);
        }

        // PERSIST
        let mut saved_count = 0i64;
        for email in &enriched {
            match self.store.upsert_email(email).await {
                Ok(_) => {
                    saved_count += 1;
                    self.cache.invalidate(user_id, CacheScope::NewEmail).await;
                }
                Err(err) => {
                    tracing::warn!(user_id, email_id = email.email_id, error = %err, "failed to persist email, skipping");
                }
            }
        }

        // UPDATE_ACCOUNT_STATS
        for account in &accounts {
            let account_saved = enriched
                .iter()
                .filter(|e| e.account_address == account.address)
                .count() as i64;
            if account_saved > 0 {
                if let Err(err) = self.store.update_account_stats(account.id, account_saved).await
                {
                    tracing::warn!(user_id, account = account.address, error = %err, "failed to update account stats");
                }
            }
            if let Err(err) = self
                .store
                .set_account_last_check(account.id, crate::types::now_ts())
                .await
            {
                tracing::warn!(user_id, account = account.address, error = %err, "failed to stamp last_check");
            }
        }

        // ASSEMBLE_DIGEST from exactly what was just saved (§4.6
        // `get_recent_saved`).
        let saved_for_digest = self
            .store
            .get_recent_saved(user_id, saved_count.max(1))
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(user_id, error = %err, "failed to reload saved batch, using in-memory set");
                enriched.clone()
            });

        let digest = digest::assemble(user_id, &saved_for_digest, is_manual_fetch, self.summarizer.as_ref())
            .await;

        // SAVE_DIGEST
        match self.store.save_digest(&digest).await {
            Ok(_) => self.cache.invalidate(user_id, CacheScope::NewDigest).await,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "failed to save digest, run still counts as partially successful");
            }
        }

        // NOTIFY_SUCCESS
        store::notify(
            self.store.as_ref(),
            user_id,
            NotificationType::Success,
            "新邮件到达",
            &format!("成功保存 {saved_count} 封邮件，共发现 {found_count} 封（去重前）"),
        )
        .await;

        tracing::info!(
            user_id,
            found = found_count,
            survivors = tally.survivor_count,
            saved = saved_count,
            "pipeline run complete"
        );

        Ok(())
    }
}

fn truncate_fields(email: &mut crate::types::Email, config: &UserPipelineConfig) {
    if email.body.chars().count() > config.email_body_max_length {
        email.body = email.body.chars().take(config.email_body_max_length).collect();
    }
    if email.subject.chars().count() > config.email_subject_max_length {
        email.subject = email.subject.chars().take(config.email_subject_max_length).collect();
    }
}
