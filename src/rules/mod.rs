//! Rule Matcher (§4.3.1): primitive operations used by the Classifier to
//! evaluate a `ClassificationRule` against an email.

use regex::RegexBuilder;

use crate::types::{ClassificationRule, Email, KeywordLogic, SenderMatchType};

/// `match_sender(sender, pattern, type)` (§4.3.1).
pub fn match_sender(sender: &str, pattern: &str, match_type: SenderMatchType) -> bool {
    let sender = sender.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match match_type {
        SenderMatchType::Exact => sender == pattern,
        SenderMatchType::Contains => sender.contains(&pattern),
        SenderMatchType::Domain => {
            if let Some(domain) = pattern.strip_prefix('@') {
                sender.ends_with(domain)
            } else {
                sender.contains(&pattern)
            }
        }
        SenderMatchType::Wildcard => wildcard_match(&sender, &pattern),
        SenderMatchType::Regex => RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(&sender))
            .unwrap_or(false),
    }
}

/// Glob semantics over `*` and `?`, compiled once per call (patterns are
/// small and this runs per-rule, per-email, which is cheap at the scale of a
/// single user's rule set).
fn wildcard_match(text: &str, pattern: &str) -> bool {
    let mut regex_str = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            c => regex_str.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// `match_keywords(text, keywords, logic)` (§4.3.1). Empty keywords returns
/// true; each non-empty keyword is a case-insensitive substring test.
pub fn match_keywords(text: &str, keywords: &[String], logic: KeywordLogic) -> bool {
    let non_empty: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return true;
    }
    let lower = text.to_ascii_lowercase();
    match logic {
        KeywordLogic::And => non_empty
            .iter()
            .all(|k| lower.contains(&k.to_ascii_lowercase())),
        KeywordLogic::Or => non_empty
            .iter()
            .any(|k| lower.contains(&k.to_ascii_lowercase())),
    }
}

/// Score for a matched rule, used to break ties (§4.3.1).
pub fn calculate_rule_score(rule: &ClassificationRule) -> i32 {
    let mut score = rule.priority;

    if let Some(match_type) = rule.sender_match_type {
        match match_type {
            SenderMatchType::Exact => score += 10,
            SenderMatchType::Domain => score += 5,
            _ => {}
        }
    }

    if rule.sender_pattern.is_some() {
        score += 5;
    }
    if !rule.subject_keywords.is_empty() {
        score += 5;
    }
    if !rule.body_keywords.is_empty() {
        score += 5;
    }

    score
}

static BODY_SCRATCH_LIMIT: usize = 2000;

/// A rule matches an email iff every configured dimension matches. Sender
/// mismatch short-circuits to `false` immediately; a rule with no pattern
/// field configured never matches (§3, §4.3.1).
pub fn match_rule(rule: &ClassificationRule, email: &Email) -> bool {
    if rule.is_inert() {
        return false;
    }

    if let (Some(pattern), Some(match_type)) = (&rule.sender_pattern, rule.sender_match_type) {
        if !match_sender(&email.sender, pattern, match_type) {
            return false;
        }
    }

    if !rule.subject_keywords.is_empty()
        && !match_keywords(&email.subject, &rule.subject_keywords, rule.subject_logic)
    {
        return false;
    }

    if !rule.body_keywords.is_empty() {
        let body_scratch: String = email.body.chars().take(BODY_SCRATCH_LIMIT).collect();
        // Body keywords always use OR, independent of the rule's subject
        // logic — the original never exposes a separate body logic knob.
        if !match_keywords(&body_scratch, &rule.body_keywords, KeywordLogic::Or) {
            return false;
        }
    }

    true
}

/// Picks the highest-scoring rule among a user's active rules, already
/// ordered `priority DESC, created_at DESC` by the caller (§4.3.2 step 1).
pub fn best_match<'a>(rules: &'a [ClassificationRule], email: &Email) -> Option<&'a ClassificationRule> {
    rules
        .iter()
        .filter(|r| r.is_active && match_rule(r, email))
        .max_by_key(|r| calculate_rule_score(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_naive;

    fn base_email() -> Email {
        Email {
            id: None,
            user_id: 1,
            email_id: "a@b.com:1".into(),
            content_hash: None,
            subject: "Invoice".into(),
            sender: "noreply@billing.example.com".into(),
            recipients: vec!["u@x.com".into()],
            date: now_naive(),
            account_address: "a@b.com".into(),
            provider_tag: "gmail".into(),
            body: "please settle the 会议 notes".into(),
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
    fn domain_rule_matches_sender_suffix() {
        assert!(match_sender(
            "noreply@billing.example.com",
            "@billing.example.com",
            SenderMatchType::Domain
        ));
    }

    #[test]
    fn exact_rule_requires_full_equality() {
        assert!(!match_sender(
            "noreply@billing.example.com",
            "billing.example.com",
            SenderMatchType::Exact
        ));
    }

    #[test]
    fn empty_keywords_always_match() {
        assert!(match_keywords("anything", &[], KeywordLogic::Or));
    }

    #[test]
    fn rule_with_no_pattern_fields_never_matches() {
        let mut rule = sample_rule();
        rule.sender_pattern = None;
        rule.subject_keywords = vec![];
        rule.body_keywords = vec![];
        assert!(!match_rule(&rule, &base_email()));
    }

    #[test]
    fn rule_wins_over_keyword_classification_inputs() {
        let rule = sample_rule();
        let email = base_email();
        assert!(match_rule(&rule, &email));
    }

    #[test]
    fn body_keywords_always_use_or_even_when_subject_logic_is_and() {
        let mut rule = sample_rule();
        rule.subject_logic = KeywordLogic::And;
        rule.body_keywords = vec!["会议".into(), "nonexistent-token".into()];
        // An AND over these two body keywords would fail; OR must still match.
        assert!(match_rule(&rule, &base_email()));
    }

    fn sample_rule() -> ClassificationRule {
        ClassificationRule {
            id: 1,
            user_id: 1,
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
        }
    }
}
