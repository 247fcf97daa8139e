//! sqlx-backed `Store` implementation, following the teacher's `Database`
//! pattern: migration-on-connect, `ON CONFLICT ... DO UPDATE` upserts, and
//! `QueryBuilder` for dynamic `IN (...)` lists.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::types::{
    Attachment, ClassificationMethod, ClassificationRule, Digest, DigestContent, Email,
    EmailAccount, ForwardChainEntry, KeywordLogic, ManualClassificationRecord, NotificationType,
    SenderMatchType, User,
};

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to sqlite store")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Administrative helper used by `mkctl`: creates a user if `username`
    /// is new, otherwise returns the existing id.
    pub async fn upsert_user(&self, username: &str) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO users (username, is_admin, created_at) VALUES (?, 0, ?)")
            .bind(username)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Administrative helper used by `mkctl`: registers or updates one
    /// user's IMAP account.
    pub async fn upsert_account(
        &self,
        user_id: i64,
        address: &str,
        provider_tag: &str,
        credential_secret: &str,
    ) -> Result<i64> {
        sqlx::query(
            "INSERT INTO email_accounts (user_id, address, provider_tag, credential_secret, active, total_emails)
             VALUES (?, ?, ?, ?, 1, 0)
             ON CONFLICT(user_id, address) DO UPDATE SET
                provider_tag = excluded.provider_tag,
                credential_secret = excluded.credential_secret,
                active = 1",
        )
        .bind(user_id)
        .bind(address)
        .bind(provider_tag)
        .bind(credential_secret)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query("SELECT id FROM email_accounts WHERE user_id = ? AND address = ?")
            .bind(user_id)
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Administrative helper used by `mkctl`: writes one `user_config` key.
    /// The daemon's reconciliation loop is the only other writer of this
    /// table's schedule-related keys, so this is safe to call while
    /// `mailkeeperd` is running.
    pub async fn set_user_config(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_config (user_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS email_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                provider_tag TEXT NOT NULL,
                credential_secret TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_check INTEGER,
                total_emails INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, address)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                email_id TEXT NOT NULL,
                content_hash TEXT,
                subject TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipients_json TEXT NOT NULL,
                date TEXT NOT NULL,
                account_address TEXT NOT NULL,
                provider_tag TEXT NOT NULL,
                body TEXT NOT NULL,
                body_html TEXT,
                body_chinese_translation TEXT,
                body_english_translation TEXT,
                summary TEXT,
                ai_summary TEXT,
                category TEXT NOT NULL,
                importance INTEGER NOT NULL,
                classification_method TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                is_forwarded INTEGER NOT NULL DEFAULT 0,
                forward_level INTEGER NOT NULL DEFAULT 0,
                original_sender TEXT,
                original_sender_email TEXT,
                forwarded_by TEXT,
                forwarded_by_email TEXT,
                forward_chain_json TEXT NOT NULL DEFAULT '[]',
                attachments_json TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(user_id, email_id),
                UNIQUE(user_id, content_hash)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_user_date ON emails(user_id, date)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_emails_user_hash ON emails(user_id, content_hash)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_user_eid ON emails(user_id, email_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_forwarded ON emails(is_forwarded)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_emails_orig_sender ON emails(original_sender_email)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS digests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                title TEXT NOT NULL,
                content_json TEXT NOT NULL,
                email_count INTEGER NOT NULL,
                summary TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_digests_date ON digests(date)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS classification_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                rule_name TEXT NOT NULL,
                sender_pattern TEXT,
                sender_match_type TEXT,
                subject_keywords_json TEXT NOT NULL DEFAULT '[]',
                subject_logic TEXT NOT NULL DEFAULT 'OR',
                body_keywords_json TEXT NOT NULL DEFAULT '[]',
                target_category TEXT NOT NULL,
                target_importance INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                match_count INTEGER NOT NULL DEFAULT 0,
                last_matched_at INTEGER,
                created_at INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS manual_classification_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                email_id TEXT NOT NULL,
                original_category TEXT NOT NULL,
                new_category TEXT NOT NULL,
                original_importance INTEGER NOT NULL,
                new_importance INTEGER NOT NULL,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                notification_type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                notification_type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_config (
                user_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY(user_id, key)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translations (
                email_id TEXT NOT NULL,
                language TEXT NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY(email_id, language)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn method_to_str(method: Option<ClassificationMethod>) -> Option<&'static str> {
    method.map(|m| m.as_str())
}

fn method_from_str(s: Option<&str>) -> Option<ClassificationMethod> {
    match s {
        Some("rule") => Some(ClassificationMethod::Rule),
        Some("keyword") => Some(ClassificationMethod::Keyword),
        Some("default") => Some(ClassificationMethod::Default),
        _ => None,
    }
}

fn row_to_email(row: &sqlx::sqlite::SqliteRow) -> Result<Email> {
    let recipients: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("recipients_json")?.as_str())
            .unwrap_or_default();
    let forward_chain: Vec<ForwardChainEntry> =
        serde_json::from_str(row.try_get::<String, _>("forward_chain_json")?.as_str())
            .unwrap_or_default();
    let attachments: Vec<Attachment> =
        serde_json::from_str(row.try_get::<String, _>("attachments_json")?.as_str())
            .unwrap_or_default();
    let date_str: String = row.try_get("date")?;
    let date = NaiveDateTime::parse_from_str(&date_str, "%Y-%m-%dT%H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());

    Ok(Email {
        id: Some(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        email_id: row.try_get("email_id")?,
        content_hash: row.try_get("content_hash")?,
        subject: row.try_get("subject")?,
        sender: row.try_get("sender")?,
        recipients,
        date,
        account_address: row.try_get("account_address")?,
        provider_tag: row.try_get("provider_tag")?,
        body: row.try_get("body")?,
        body_html: row.try_get("body_html")?,
        body_chinese_translation: row.try_get("body_chinese_translation")?,
        body_english_translation: row.try_get("body_english_translation")?,
        summary: row.try_get("summary")?,
        ai_summary: row.try_get("ai_summary")?,
        category: row.try_get("category")?,
        importance: row.try_get("importance")?,
        classification_method: method_from_str(
            row.try_get::<Option<String>, _>("classification_method")?.as_deref(),
        ),
        processed: row.try_get::<i64, _>("processed")? != 0,
        deleted: row.try_get::<i64, _>("deleted")? != 0,
        is_forwarded: row.try_get::<i64, _>("is_forwarded")? != 0,
        forward_level: row.try_get("forward_level")?,
        original_sender: row.try_get("original_sender")?,
        original_sender_email: row.try_get("original_sender_email")?,
        forwarded_by: row.try_get("forwarded_by")?,
        forwarded_by_email: row.try_get("forwarded_by_email")?,
        forward_chain,
        attachments,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_active_accounts(&self, user_id: i64) -> Result<Vec<EmailAccount>> {
        let rows = sqlx::query(
            "SELECT id, user_id, address, provider_tag, credential_secret, active, last_check, total_emails
             FROM email_accounts WHERE user_id = ? AND active = 1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(EmailAccount {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    address: row.try_get("address")?,
                    provider_tag: row.try_get("provider_tag")?,
                    credential_secret: row.try_get("credential_secret")?,
                    active: row.try_get::<i64, _>("active")? != 0,
                    last_check: row.try_get("last_check")?,
                    total_emails: row.try_get("total_emails")?,
                })
            })
            .collect()
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, is_admin, created_at FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                is_admin: row.try_get::<i64, _>("is_admin")? != 0,
                created_at: row.try_get("created_at")?,
            }),
            None => None,
        })
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT id, username, is_admin, created_at FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(User {
                    id: row.try_get("id")?,
                    username: row.try_get("username")?,
                    is_admin: row.try_get::<i64, _>("is_admin")? != 0,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn update_account_stats(&self, account_id: i64, new_email_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE email_accounts SET total_emails = total_emails + ?, last_check = ? WHERE id = ?",
        )
        .bind(new_email_count)
        .bind(Utc::now().timestamp())
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_config(&self, user_id: i64) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM user_config WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::new();
        for row in rows {
            map.insert(row.try_get::<String, _>("key")?, row.try_get::<String, _>("value")?);
        }
        Ok(map)
    }

    async fn get_system_config(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM system_config")
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::new();
        for row in rows {
            map.insert(row.try_get::<String, _>("key")?, row.try_get::<String, _>("value")?);
        }
        Ok(map)
    }

    async fn upsert_email(&self, email: &Email) -> Result<i64> {
        let recipients_json = serde_json::to_string(&email.recipients)?;
        let forward_chain_json = serde_json::to_string(&email.forward_chain)?;
        let attachments_json = serde_json::to_string(&email.attachments)?;
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            "INSERT INTO emails (
                user_id, email_id, content_hash, subject, sender, recipients_json, date,
                account_address, provider_tag, body, body_html, body_chinese_translation,
                body_english_translation, summary, ai_summary, category, importance,
                classification_method, processed, deleted, is_forwarded, forward_level,
                original_sender, original_sender_email, forwarded_by, forwarded_by_email,
                forward_chain_json, attachments_json, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(user_id, email_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                subject = excluded.subject,
                sender = excluded.sender,
                recipients_json = excluded.recipients_json,
                date = excluded.date,
                body = excluded.body,
                body_html = excluded.body_html,
                summary = excluded.summary,
                ai_summary = excluded.ai_summary,
                category = excluded.category,
                importance = excluded.importance,
                classification_method = excluded.classification_method,
                processed = excluded.processed,
                is_forwarded = excluded.is_forwarded,
                forward_level = excluded.forward_level,
                original_sender = excluded.original_sender,
                original_sender_email = excluded.original_sender_email,
                forwarded_by = excluded.forwarded_by,
                forwarded_by_email = excluded.forwarded_by_email,
                forward_chain_json = excluded.forward_chain_json,
                attachments_json = excluded.attachments_json,
                updated_at = excluded.updated_at
            ON CONFLICT(user_id, content_hash) DO UPDATE SET
                email_id = excluded.email_id,
                subject = excluded.subject,
                sender = excluded.sender,
                recipients_json = excluded.recipients_json,
                date = excluded.date,
                body = excluded.body,
                body_html = excluded.body_html,
                summary = excluded.summary,
                ai_summary = excluded.ai_summary,
                category = excluded.category,
                importance = excluded.importance,
                classification_method = excluded.classification_method,
                processed = excluded.processed,
                is_forwarded = excluded.is_forwarded,
                forward_level = excluded.forward_level,
                original_sender = excluded.original_sender,
                original_sender_email = excluded.original_sender_email,
                forwarded_by = excluded.forwarded_by,
                forwarded_by_email = excluded.forwarded_by_email,
                forward_chain_json = excluded.forward_chain_json,
                attachments_json = excluded.attachments_json,
                updated_at = excluded.updated_at
            RETURNING id",
        )
        .bind(email.user_id)
        .bind(&email.email_id)
        .bind(&email.content_hash)
        .bind(&email.subject)
        .bind(&email.sender)
        .bind(recipients_json)
        .bind(email.date_iso())
        .bind(&email.account_address)
        .bind(&email.provider_tag)
        .bind(&email.body)
        .bind(&email.body_html)
        .bind(&email.body_chinese_translation)
        .bind(&email.body_english_translation)
        .bind(&email.summary)
        .bind(&email.ai_summary)
        .bind(&email.category)
        .bind(email.importance)
        .bind(method_to_str(email.classification_method))
        .bind(email.processed as i64)
        .bind(email.deleted as i64)
        .bind(email.is_forwarded as i64)
        .bind(email.forward_level)
        .bind(&email.original_sender)
        .bind(&email.original_sender_email)
        .bind(&email.forwarded_by)
        .bind(&email.forwarded_by_email)
        .bind(forward_chain_json)
        .bind(attachments_json)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("upserting email")?;

        Ok(row.try_get("id")?)
    }

    async fn get_recent_saved(&self, user_id: i64, limit: i64) -> Result<Vec<Email>> {
        let rows = sqlx::query(
            "SELECT * FROM emails WHERE user_id = ? AND deleted = 0 ORDER BY date DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_email).collect()
    }

    async fn update_email_summary(&self, email_id: &str, ai_summary: &str) -> Result<()> {
        sqlx::query("UPDATE emails SET ai_summary = ?, updated_at = ? WHERE email_id = ?")
            .bind(ai_summary)
            .bind(Utc::now().timestamp())
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_email_classification(
        &self,
        email_id: &str,
        category: &str,
        importance: i32,
        method: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE emails SET category = ?, importance = ?, classification_method = ?, updated_at = ? WHERE email_id = ?",
        )
        .bind(category)
        .bind(importance)
        .bind(method)
        .bind(Utc::now().timestamp())
        .bind(email_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete(&self, email_id: &str, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE emails SET deleted = 1 WHERE email_id = ? AND user_id = ?")
            .bind(email_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn restore(&self, email_id: &str, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE emails SET deleted = 0 WHERE email_id = ? AND user_id = ?")
            .bind(email_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge(&self, email_id: &str, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM emails WHERE email_id = ? AND user_id = ?")
            .bind(email_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_all_emails(&self, user_id: i64) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM emails WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as i64)
    }

    async fn all_email_ids(&self, user_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT email_id FROM emails WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(r.try_get("email_id")?)).collect()
    }

    async fn content_hashes_since(&self, user_id: i64, duplicate_check_days: u32) -> Result<Vec<String>> {
        let cutoff = (Utc::now() - chrono::Duration::days(duplicate_check_days as i64))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let rows = sqlx::query(
            "SELECT content_hash FROM emails WHERE user_id = ? AND date >= ? AND content_hash IS NOT NULL",
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok(r.try_get::<String, _>("content_hash")?))
            .collect()
    }

    async fn save_translation(&self, email_id: &str, language: &str, text: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO translations (email_id, language, text) VALUES (?, ?, ?)
             ON CONFLICT(email_id, language) DO UPDATE SET text = excluded.text",
        )
        .bind(email_id)
        .bind(language)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_translation(&self, email_id: &str, language: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT text FROM translations WHERE email_id = ? AND language = ?")
            .bind(email_id)
            .bind(language)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("text")?),
            None => None,
        })
    }

    async fn clear_translations(&self, email_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM translations WHERE email_id = ?")
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_digest(&self, digest: &Digest) -> Result<i64> {
        let content_json = serde_json::to_string(&digest.content)?;
        let row = sqlx::query(
            "INSERT INTO digests (user_id, date, title, content_json, email_count, summary, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(digest.user_id)
        .bind(digest.date.format("%Y-%m-%dT%H:%M:%S").to_string())
        .bind(&digest.title)
        .bind(content_json)
        .bind(digest.email_count)
        .bind(&digest.summary)
        .bind(digest.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn list_digests(&self, user_id: i64, page: i64, page_size: i64) -> Result<Vec<Digest>> {
        let offset = page.max(0) * page_size;
        let rows = sqlx::query(
            "SELECT * FROM digests WHERE user_id = ? ORDER BY date DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_digest).collect()
    }

    async fn get_digest(&self, digest_id: i64, user_id: i64) -> Result<Option<Digest>> {
        let row = sqlx::query("SELECT * FROM digests WHERE id = ? AND user_id = ?")
            .bind(digest_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_digest).transpose()
    }

    async fn list_active_rules(&self, user_id: i64) -> Result<Vec<ClassificationRule>> {
        let rows = sqlx::query(
            "SELECT * FROM classification_rules WHERE user_id = ? AND is_active = 1
             ORDER BY priority DESC, created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn create_rule(&self, rule: &ClassificationRule) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO classification_rules (
                user_id, rule_name, sender_pattern, sender_match_type, subject_keywords_json,
                subject_logic, body_keywords_json, target_category, target_importance, priority,
                is_active, match_count, last_matched_at, created_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?) RETURNING id",
        )
        .bind(rule.user_id)
        .bind(&rule.rule_name)
        .bind(&rule.sender_pattern)
        .bind(rule.sender_match_type.map(sender_match_type_to_str))
        .bind(serde_json::to_string(&rule.subject_keywords)?)
        .bind(keyword_logic_to_str(rule.subject_logic))
        .bind(serde_json::to_string(&rule.body_keywords)?)
        .bind(&rule.target_category)
        .bind(rule.target_importance)
        .bind(rule.priority)
        .bind(rule.is_active as i64)
        .bind(rule.match_count)
        .bind(rule.last_matched_at)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_rule(&self, rule: &ClassificationRule) -> Result<()> {
        sqlx::query(
            "UPDATE classification_rules SET rule_name=?, sender_pattern=?, sender_match_type=?,
             subject_keywords_json=?, subject_logic=?, body_keywords_json=?, target_category=?,
             target_importance=?, priority=?, is_active=? WHERE id = ? AND user_id = ?",
        )
        .bind(&rule.rule_name)
        .bind(&rule.sender_pattern)
        .bind(rule.sender_match_type.map(sender_match_type_to_str))
        .bind(serde_json::to_string(&rule.subject_keywords)?)
        .bind(keyword_logic_to_str(rule.subject_logic))
        .bind(serde_json::to_string(&rule.body_keywords)?)
        .bind(&rule.target_category)
        .bind(rule.target_importance)
        .bind(rule.priority)
        .bind(rule.is_active as i64)
        .bind(rule.id)
        .bind(rule.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM classification_rules WHERE id = ? AND user_id = ?")
            .bind(rule_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_rule_match(&self, rule_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE classification_rules SET match_count = match_count + 1, last_matched_at = ? WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_manual_reclassification(
        &self,
        record: &ManualClassificationRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO manual_classification_records (
                user_id, email_id, original_category, new_category, original_importance,
                new_importance, sender, subject, created_at
            ) VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(record.user_id)
        .bind(&record.email_id)
        .bind(&record.original_category)
        .bind(&record.new_category)
        .bind(record.original_importance)
        .bind(record.new_importance)
        .bind(&record.sender)
        .bind(&record.subject)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_notification(
        &self,
        user_id: i64,
        notification_type: NotificationType,
        title: &str,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (user_id, notification_type, title, message, is_read, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(user_id)
        .bind(notification_type.as_str())
        .bind(title)
        .bind(message)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_account_last_check(&self, account_id: i64, ts: i64) -> Result<()> {
        sqlx::query("UPDATE email_accounts SET last_check = ? WHERE id = ?")
            .bind(ts)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_digest(row: &sqlx::sqlite::SqliteRow) -> Result<Digest> {
    let date_str: String = row.try_get("date")?;
    let date = NaiveDateTime::parse_from_str(&date_str, "%Y-%m-%dT%H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let content: DigestContent = serde_json::from_str(row.try_get::<String, _>("content_json")?.as_str())?;

    Ok(Digest {
        id: Some(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        date,
        title: row.try_get("title")?,
        content,
        email_count: row.try_get("email_count")?,
        summary: row.try_get("summary")?,
        created_at: row.try_get("created_at")?,
    })
}

fn sender_match_type_to_str(t: SenderMatchType) -> &'static str {
    match t {
        SenderMatchType::Exact => "exact",
        SenderMatchType::Contains => "contains",
        SenderMatchType::Domain => "domain",
        SenderMatchType::Wildcard => "wildcard",
        SenderMatchType::Regex => "regex",
    }
}

fn sender_match_type_from_str(s: Option<&str>) -> Option<SenderMatchType> {
    match s {
        Some("exact") => Some(SenderMatchType::Exact),
        Some("contains") => Some(SenderMatchType::Contains),
        Some("domain") => Some(SenderMatchType::Domain),
        Some("wildcard") => Some(SenderMatchType::Wildcard),
        Some("regex") => Some(SenderMatchType::Regex),
        _ => None,
    }
}

fn keyword_logic_to_str(l: KeywordLogic) -> &'static str {
    match l {
        KeywordLogic::And => "AND",
        KeywordLogic::Or => "OR",
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ClassificationRule> {
    let subject_keywords: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("subject_keywords_json")?.as_str())
            .unwrap_or_default();
    let body_keywords: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("body_keywords_json")?.as_str())
            .unwrap_or_default();
    let subject_logic = match row.try_get::<String, _>("subject_logic")?.as_str() {
        "AND" => KeywordLogic::And,
        _ => KeywordLogic::Or,
    };

    Ok(ClassificationRule {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        rule_name: row.try_get("rule_name")?,
        sender_pattern: row.try_get("sender_pattern")?,
        sender_match_type: sender_match_type_from_str(
            row.try_get::<Option<String>, _>("sender_match_type")?.as_deref(),
        ),
        subject_keywords,
        subject_logic,
        body_keywords,
        target_category: row.try_get("target_category")?,
        target_importance: row.try_get("target_importance")?,
        priority: row.try_get("priority")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        match_count: row.try_get("match_count")?,
        last_matched_at: row.try_get("last_matched_at")?,
    })
}
