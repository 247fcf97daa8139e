//! Dedupe Engine (§4.4): content fingerprinting and per-user batch
//! filtering against the persistent store's history.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::store::Store;
use crate::types::Email;

/// `md5(subject | sender | date_iso | recipients_joined | body_prefix_2000)`.
pub fn content_hash(email: &Email) -> String {
    const BODY_PREFIX_LEN: usize = 2000;
    let body_prefix: String = email.body.chars().take(BODY_PREFIX_LEN).collect();
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        email.subject,
        email.sender,
        email.date_iso(),
        email.recipients_joined(),
        body_prefix
    );
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DedupeTally {
    pub input_count: usize,
    pub survivor_count: usize,
    pub email_id_duplicates: usize,
    pub content_hash_duplicates: usize,
}

/// `filter(candidates, user_id) -> survivors` (§4.4). On any internal
/// failure, fails open: the input is returned unchanged and the failure is
/// logged, never surfaced as an error to the caller (dedupe is a cost saver,
/// not a correctness guarantee).
pub async fn filter(
    store: &dyn Store,
    user_id: i64,
    duplicate_check_days: u32,
    mut candidates: Vec<Email>,
) -> (Vec<Email>, DedupeTally) {
    let mut tally = DedupeTally {
        input_count: candidates.len(),
        ..Default::default()
    };

    let (historical_ids, windowed_hashes) =
        match load_known_sets(store, user_id, duplicate_check_days).await {
            Ok(sets) => sets,
            Err(err) => {
                warn!(user_id, error = %err, "dedupe query failed, failing open");
                tally.survivor_count = candidates.len();
                return (candidates, tally);
            }
        };

    for email in candidates.iter_mut() {
        email.content_hash = Some(content_hash(email));
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_hashes: HashSet<String> = HashSet::new();
    let mut survivors = Vec::with_capacity(candidates.len());

    for email in candidates {
        let hash = email.content_hash.clone().unwrap_or_default();

        if historical_ids.contains(&email.email_id) || seen_ids.contains(&email.email_id) {
            tally.email_id_duplicates += 1;
            continue;
        }
        if windowed_hashes.contains(&hash) || seen_hashes.contains(&hash) {
            tally.content_hash_duplicates += 1;
            continue;
        }

        seen_ids.insert(email.email_id.clone());
        seen_hashes.insert(hash);
        survivors.push(email);
    }

    tally.survivor_count = survivors.len();
    info!(
        user_id,
        input = tally.input_count,
        survivors = tally.survivor_count,
        email_id_dupes = tally.email_id_duplicates,
        content_hash_dupes = tally.content_hash_duplicates,
        "dedupe batch complete"
    );

    (survivors, tally)
}

async fn load_known_sets(
    store: &dyn Store,
    user_id: i64,
    duplicate_check_days: u32,
) -> Result<(HashSet<String>, HashSet<String>)> {
    let historical_ids = store.all_email_ids(user_id).await?;
    let windowed_hashes = store
        .content_hashes_since(user_id, duplicate_check_days)
        .await?;
    Ok((
        historical_ids.into_iter().collect(),
        windowed_hashes.into_iter().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_naive;

    fn email(email_id: &str, subject: &str) -> Email {
        Email {
            id: None,
            user_id: 1,
            email_id: email_id.into(),
            content_hash: None,
            subject: subject.into(),
            sender: "a@b.com".into(),
            recipients: vec!["u@x.com".into()],
            date: now_naive(),
            account_address: "a@b.com".into(),
            provider_tag: "gmail".into(),
            body: "hello world".into(),
            body_html: None,
            body_chinese_translation: None,
            body_english_translation: None,
            summary: None,
            ai_summary: None,
            category: "general".into(),
            importance: 1,
            classification_method: None,
            processed: false,
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

    #[test]
    fn same_content_yields_same_hash() {
        let e1 = email("a@b.com:1", "Hello");
        let e2 = email("a@b.com:2", "Hello");
        assert_eq!(content_hash(&e1), content_hash(&e2));
    }

    #[test]
    fn different_subject_yields_different_hash() {
        let e1 = email("a@b.com:1", "Hello");
        let e2 = email("a@b.com:1", "Goodbye");
        assert_ne!(content_hash(&e1), content_hash(&e2));
    }
}
