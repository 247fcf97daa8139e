//! Classifier (§4.3.2): four-layer decision over an email -
//! custom rules -> (reserved AI layer) -> keyword fallback -> default.

use crate::rules;
use crate::types::{ClassificationMethod, ClassificationRule, Email};

#[derive(Debug, Clone)]
pub struct Classification {
    pub category: String,
    pub importance: i32,
    pub method: ClassificationMethod,
    /// Set only when `method == Rule`, so the caller can bump `match_count`
    /// and `last_matched_at` on the winning rule.
    pub matched_rule_id: Option<i64>,
}

const HIGH_IMPORTANCE_TOKENS: &[&str] = &[
    "urgent", "紧急", "重要", "important", "急", "立即", "asap", "截止", "deadline", "会议",
    "meeting", "面试", "interview",
];

const MEDIUM_IMPORTANCE_TOKENS: &[&str] = &[
    "通知",
    "notice",
    "公告",
    "announcement",
    "更新",
    "update",
    "邀请",
    "invitation",
    "确认",
    "confirmation",
];

/// Ordered category keyword sets (§Glossary, §4.3.2). Order matters: the
/// first category whose set intersects the scratch string wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "work",
        &["工作", "会议", "项目", "任务", "报告", "work", "meeting", "project", "task", "report"],
    ),
    (
        "finance",
        &["账单", "付款", "发票", "银行", "finance", "invoice", "payment", "bill", "bank"],
    ),
    (
        "social",
        &["朋友", "聚会", "社交", "friend", "party", "social", "invite"],
    ),
    (
        "shopping",
        &["订单", "购物", "快递", "发货", "order", "shopping", "shipment", "delivery"],
    ),
    (
        "news",
        &["新闻", "资讯", "news", "newsletter", "bulletin"],
    ),
    (
        "education",
        &["课程", "学习", "考试", "作业", "course", "study", "exam", "homework", "education"],
    ),
    (
        "travel",
        &["旅行", "机票", "酒店", "行程", "travel", "flight", "hotel", "itinerary"],
    ),
    (
        "health",
        &["健康", "医院", "体检", "health", "hospital", "checkup", "medical"],
    ),
    (
        "system",
        &["系统", "维护", "升级", "system", "maintenance", "upgrade"],
    ),
    (
        "advertising",
        &["广告", "促销", "折扣", "advertisement", "promotion", "discount", "sale"],
    ),
    ("spam", &["spam", "垃圾邮件", "中奖", "lottery"]),
];

/// Keyword fallback scratch string limit (§4.3.2: "first 500 chars of
/// body").
const BODY_PROBE_CHARS: usize = 500;

/// Layer 1 + 3 + 4 combined. The AI layer (2) is reserved and always
/// skipped in this scope.
pub fn classify(email: &Email, active_rules: &[ClassificationRule]) -> Classification {
    if let Some(rule) = rules::best_match(active_rules, email) {
        return Classification {
            category: rule.target_category.clone(),
            importance: rule.target_importance,
            method: ClassificationMethod::Rule,
            matched_rule_id: Some(rule.id),
        };
    }

    // Layer 2 (AI) is reserved; scope always falls through to keywords.

    if let Some(classification) = classify_with_keywords(email) {
        return classification;
    }

    Classification {
        category: "general".to_string(),
        importance: 1,
        method: ClassificationMethod::Default,
        matched_rule_id: None,
    }
}

fn classify_with_keywords(email: &Email) -> Option<Classification> {
    let body_probe: String = email.body.chars().take(BODY_PROBE_CHARS).collect();
    let scratch = format!("{} {} {}", email.subject, email.sender, body_probe).to_ascii_lowercase();

    let importance = if HIGH_IMPORTANCE_TOKENS.iter().any(|t| scratch.contains(t)) {
        3
    } else if MEDIUM_IMPORTANCE_TOKENS.iter().any(|t| scratch.contains(t)) {
        2
    } else {
        1
    };

    let category = CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| scratch.contains(k)))
        .map(|(name, _)| *name)?;

    Some(Classification {
        category: category.to_string(),
        importance,
        method: ClassificationMethod::Keyword,
        matched_rule_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_naive, KeywordLogic, SenderMatchType};

    fn email_with(subject: &str, sender: &str, body: &str) -> Email {
        Email {
            id: None,
            user_id: 7,
            email_id: "a@b.com:1".into(),
            content_hash: None,
            subject: subject.into(),
            sender: sender.into(),
            recipients: vec![],
            date: now_naive(),
            account_address: "a@b.com".into(),
            provider_tag: "gmail".into(),
            body: body.into(),
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
    fn keyword_fallback_picks_first_matching_category() {
        let email = email_with("Team meeting notes", "boss@corp.com", "discuss the project");
        let classification = classify_with_keywords(&email).unwrap();
        assert_eq!(classification.category, "work");
        assert_eq!(classification.importance, 3); // "meeting" is a high-importance token
    }

    #[test]
    fn no_category_match_falls_through_to_default_layer() {
        let email = email_with("hi", "friend@corp.com", "just saying hello");
        let classification = classify(&email, &[]);
        assert_eq!(classification.category, "general");
        assert_eq!(classification.importance, 1);
        assert_eq!(classification.method, ClassificationMethod::Default);
    }

    #[test]
    fn rule_takes_precedence_over_keyword_fallback() {
        let rule = ClassificationRule {
            id: 1,
            user_id: 7,
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
        let email = email_with("Invoice", "noreply@billing.example.com", "note the 会议 agenda");
        let classification = classify(&email, std::slice::from_ref(&rule));
        assert_eq!(classification.category, "finance");
        assert_eq!(classification.importance, 3);
        assert_eq!(classification.method, ClassificationMethod::Rule);
        assert_eq!(classification.matched_rule_id, Some(1));
    }
}
