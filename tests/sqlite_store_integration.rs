//! Exercises `SqliteStore` against a temp-file database: the dedupe/persist
//! seam the pipeline drives, without requiring a live IMAP server.

use mailkeeper_core::dedupe;
use mailkeeper_core::store::sqlite::SqliteStore;
use mailkeeper_core::store::Store;
use mailkeeper_core::types::{now_naive, ClassificationMethod, Email, NotificationType};

fn sample_email(user_id: i64, uid: u32, subject: &str, sender: &str, body: &str) -> Email {
    Email {
        id: None,
        user_id,
        email_id: format!("acct@example.com:{uid}"),
        content_hash: None,
        subject: subject.into(),
        sender: sender.into(),
        recipients: vec!["me@example.com".into()],
        date: now_naive(),
        account_address: "acct@example.com".into(),
        provider_tag: "gmail".into(),
        body: body.into(),
        body_html: None,
        body_chinese_translation: None,
        body_english_translation: None,
        summary: None,
        ai_summary: Some("summary".into()),
        category: "general".into(),
        importance: 1,
        classification_method: Some(ClassificationMethod::Default),
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

async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mailkeeper.sqlite3");
    let store = SqliteStore::connect(&db_path).await.unwrap();
    (store, dir)
}

#[tokio::test]
async fn happy_path_persists_and_survives_dedupe_window() {
    let (store, _dir) = temp_store().await;
    let user_id = store.upsert_user("alice").await.unwrap();

    let candidates = vec![
        sample_email(user_id, 1, "Invoice #1", "billing@corp.com", "due next week"),
        sample_email(user_id, 2, "Team sync", "boss@corp.com", "meeting at noon"),
        sample_email(user_id, 3, "Newsletter", "news@corp.com", "weekly digest"),
    ];

    let (survivors, tally) = dedupe::filter(&store, user_id, 30, candidates).await;
    assert_eq!(survivors.len(), 3);
    assert_eq!(tally.content_hash_duplicates, 0);

    for email in &survivors {
        store.upsert_email(email).await.unwrap();
    }

    let saved = store.get_recent_saved(user_id, 10).await.unwrap();
    assert_eq!(saved.len(), 3);

    store
        .save_notification(user_id, NotificationType::Success, "新邮件到达", "3 saved")
        .await
        .unwrap();
}

#[tokio::test]
async fn repeated_fetch_of_same_messages_dedupes_to_zero_survivors() {
    let (store, _dir) = temp_store().await;
    let user_id = store.upsert_user("bob").await.unwrap();

    let first_batch = vec![
        sample_email(user_id, 10, "Invoice #2", "billing@corp.com", "due now"),
        sample_email(user_id, 11, "Team sync", "boss@corp.com", "meeting at 3pm"),
        sample_email(user_id, 12, "Newsletter", "news@corp.com", "weekly digest v2"),
    ];
    let (survivors, _) = dedupe::filter(&store, user_id, 30, first_batch.clone()).await;
    for email in &survivors {
        store.upsert_email(email).await.unwrap();
    }

    // Same UIDs refetched: email_id collisions should drop every candidate.
    let refetched = first_batch;
    let (survivors_again, tally) = dedupe::filter(&store, user_id, 30, refetched).await;
    assert!(survivors_again.is_empty());
    assert_eq!(tally.email_id_duplicates, 3);
}

#[tokio::test]
async fn upsert_email_updates_in_place_on_content_hash_collision_with_new_email_id() {
    let (store, _dir) = temp_store().await;
    let user_id = store.upsert_user("carol").await.unwrap();

    let mut first = sample_email(user_id, 1, "Invoice #1", "billing@corp.com", "due next week");
    first.content_hash = Some("same-hash".into());
    store.upsert_email(&first).await.unwrap();

    // A different email_id (e.g. refetched under a new UID) but the same
    // content_hash must update the existing row instead of raising a
    // constraint violation.
    let mut second = sample_email(user_id, 2, "Invoice #1 (resent)", "billing@corp.com", "due next week");
    second.content_hash = Some("same-hash".into());
    store.upsert_email(&second).await.unwrap();

    let saved = store.get_recent_saved(user_id, 10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].email_id, second.email_id);
    assert_eq!(saved[0].subject, "Invoice #1 (resent)");
}

#[tokio::test]
async fn classification_rule_roundtrips_and_match_count_increments() {
    use mailkeeper_core::types::{ClassificationRule, KeywordLogic, SenderMatchType};

    let (store, _dir) = temp_store().await;
    let user_id = store.upsert_user("carol").await.unwrap();

    let rule = ClassificationRule {
        id: 0,
        user_id,
        rule_name: "billing".into(),
        sender_pattern: Some("@billing.example.com".into()),
        sender_match_type: Some(SenderMatchType::Domain),
        subject_keywords: vec![],
        subject_logic: KeywordLogic::Or,
        body_keywords: vec![],
        target_category: "finance".into(),
        target_importance: 3,
        priority: 10,
        is_active: true,
        match_count: 0,
        last_matched_at: None,
    };
    let rule_id = store.create_rule(&rule).await.unwrap();

    let rules = store.list_active_rules(user_id).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].match_count, 0);

    store.increment_rule_match(rule_id).await.unwrap();
    let rules = store.list_active_rules(user_id).await.unwrap();
    assert_eq!(rules[0].match_count, 1);
    assert!(rules[0].last_matched_at.is_some());
}
