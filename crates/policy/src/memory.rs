//! Memory policy: what gets remembered, how important it is, and for
//! how long.

use chrono::{DateTime, Duration, Utc};
use domovoy_core::conversation::{Importance, MemoryKind, Role};
use serde_json::Value;
use std::collections::HashMap;

/// Acknowledgement-only messages that are never worth saving.
const ACK_ONLY: &[&str] = &["ok", "да", "нет", "yes", "no", "хорошо", "понял"];

/// Markers that bump importance to high.
const EMPHATIC_MARKERS: &[&str] = &[
    "важно",
    "запомни",
    "всегда",
    "никогда",
    "обязательно",
    "important",
    "remember",
    "always",
    "never",
    "must",
];

const RULE_KEYWORDS: &[&str] = &[
    "запомни",
    "всегда",
    "никогда",
    "правило",
    "remember",
    "always",
    "never",
    "rule",
];

const PREFERENCE_KEYWORDS: &[&str] = &[
    "предпочитаю",
    "люблю",
    "не люблю",
    "prefer",
    "like",
    "dislike",
];

const FACT_KEYWORDS: &[&str] = &["это", "такое", "означает", "is", "means", "refers"];

const MIN_CONTENT_LEN: usize = 3;
const MIN_CONVERSATION_LEN: usize = 20;
const LONG_CONTENT_LEN: usize = 100;

/// Classify raw content into a memory kind. Metadata intent labels take
/// effect for actions; keyword tables cover the rest.
pub fn classify(content: &str, _role: Role, metadata: Option<&HashMap<String, Value>>) -> MemoryKind {
    let content_lower = content.to_lowercase();

    if RULE_KEYWORDS.iter().any(|kw| content_lower.contains(kw)) {
        return MemoryKind::Rule;
    }
    if PREFERENCE_KEYWORDS.iter().any(|kw| content_lower.contains(kw)) {
        return MemoryKind::Preference;
    }
    if FACT_KEYWORDS.iter().any(|kw| content_lower.contains(kw)) {
        return MemoryKind::Fact;
    }
    if let Some(meta) = metadata {
        if let Some(intent) = meta.get("intent").and_then(Value::as_str) {
            if intent == "ha_control" || intent == "ha_automation" {
                return MemoryKind::Action;
            }
        }
    }
    if content_lower.contains("ошибка") || content_lower.contains("error") {
        return MemoryKind::Error;
    }

    MemoryKind::Conversation
}

/// Whether content should be saved at all.
pub fn should_save(content: &str, kind: MemoryKind, role: Role) -> bool {
    let trimmed = content.trim();
    if trimmed.chars().count() < MIN_CONTENT_LEN {
        return false;
    }
    if role == Role::System {
        return false;
    }
    if ACK_ONLY.contains(&trimmed.to_lowercase().as_str()) {
        return false;
    }

    match kind {
        MemoryKind::Rule | MemoryKind::Preference | MemoryKind::Fact | MemoryKind::Action => true,
        MemoryKind::Conversation => content.chars().count() >= MIN_CONVERSATION_LEN,
        MemoryKind::Error => true,
    }
}

/// Importance of one entry.
pub fn importance(content: &str, kind: MemoryKind) -> Importance {
    match kind {
        MemoryKind::Rule | MemoryKind::Preference => return Importance::Critical,
        MemoryKind::Action | MemoryKind::Fact => return Importance::High,
        MemoryKind::Error => return Importance::Medium,
        MemoryKind::Conversation => {}
    }

    let content_lower = content.to_lowercase();
    if EMPHATIC_MARKERS.iter().any(|kw| content_lower.contains(kw)) {
        return Importance::High;
    }
    if content.chars().count() > LONG_CONTENT_LEN {
        return Importance::Medium;
    }
    Importance::Low
}

/// Retention window in days; None means never expires.
pub fn retention_days(importance: Importance) -> Option<i64> {
    match importance {
        Importance::Low => Some(1),
        Importance::Medium => Some(7),
        Importance::High => Some(30),
        Importance::Critical => None,
    }
}

/// Expiry timestamp for an entry created at `created_at`. Critical
/// entries get None and are exempt from cleanup.
pub fn expiration(importance: Importance, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    retention_days(importance).map(|days| created_at + Duration::days(days))
}

/// Short-term accepts everything that passed `should_save`.
pub fn accepts_short_term(_importance: Importance) -> bool {
    true
}

/// Long-term accepts medium importance and above.
pub fn accepts_long_term(importance: Importance) -> bool {
    importance >= Importance::Medium
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_save_rejects_empty_and_short() {
        assert!(!should_save("", MemoryKind::Conversation, Role::User));
        assert!(!should_save("  ", MemoryKind::Conversation, Role::User));
        assert!(!should_save("ab", MemoryKind::Rule, Role::User));
    }

    #[test]
    fn test_should_save_rejects_acks() {
        assert!(!should_save("ok", MemoryKind::Conversation, Role::User));
        assert!(!should_save("да", MemoryKind::Conversation, Role::User));
        assert!(!should_save("нет", MemoryKind::Conversation, Role::Assistant));
    }

    #[test]
    fn test_should_save_rejects_system_role() {
        assert!(!should_save(
            "system prompt content that is long enough",
            MemoryKind::Conversation,
            Role::System
        ));
    }

    #[test]
    fn test_should_save_accepts_rules() {
        assert!(should_save(
            "Запомни это правило",
            MemoryKind::Rule,
            Role::User
        ));
    }

    #[test]
    fn test_should_save_conversation_length_gate() {
        assert!(!should_save("короткий", MemoryKind::Conversation, Role::User));
        let long = "Это длинная беседа ".repeat(5);
        assert!(should_save(&long, MemoryKind::Conversation, Role::User));
    }

    #[test]
    fn test_importance_tiers() {
        assert_eq!(
            importance("всегда спрашивай", MemoryKind::Rule),
            Importance::Critical
        );
        assert_eq!(
            importance("любой текст", MemoryKind::Preference),
            Importance::Critical
        );
        assert_eq!(
            importance("включил свет", MemoryKind::Action),
            Importance::High
        );
        assert_eq!(importance("факт", MemoryKind::Fact), Importance::High);
        assert_eq!(importance("сбой", MemoryKind::Error), Importance::Medium);
    }

    #[test]
    fn test_importance_emphatic_markers() {
        assert_eq!(
            importance("Это очень важно", MemoryKind::Conversation),
            Importance::High
        );
        assert_eq!(
            importance("this you must remember", MemoryKind::Conversation),
            Importance::High
        );
    }

    #[test]
    fn test_importance_long_conversation_is_medium() {
        let long = "обычная беседа без маркеров ".repeat(5);
        assert_eq!(importance(&long, MemoryKind::Conversation), Importance::Medium);
        assert_eq!(
            importance("просто текст", MemoryKind::Conversation),
            Importance::Low
        );
    }

    #[test]
    fn test_retention_table() {
        assert_eq!(retention_days(Importance::Low), Some(1));
        assert_eq!(retention_days(Importance::Medium), Some(7));
        assert_eq!(retention_days(Importance::High), Some(30));
        assert_eq!(retention_days(Importance::Critical), None);
    }

    #[test]
    fn test_critical_never_expires() {
        let now = Utc::now();
        assert!(expiration(Importance::Critical, now).is_none());
        assert_eq!(
            expiration(Importance::Low, now),
            Some(now + Duration::days(1))
        );
    }

    #[test]
    fn test_storage_tier_gates() {
        assert!(accepts_short_term(Importance::Low));
        assert!(accepts_short_term(Importance::Critical));
        assert!(!accepts_long_term(Importance::Low));
        assert!(accepts_long_term(Importance::Medium));
        assert!(accepts_long_term(Importance::Critical));
    }

    #[test]
    fn test_classify_rule() {
        assert_eq!(
            classify("Запомни это правило", Role::User, None),
            MemoryKind::Rule
        );
    }

    #[test]
    fn test_classify_preference() {
        assert_eq!(
            classify("Я предпочитаю тёплый свет", Role::User, None),
            MemoryKind::Preference
        );
    }

    #[test]
    fn test_classify_action_via_metadata() {
        let mut meta = HashMap::new();
        meta.insert("intent".to_string(), Value::String("ha_control".into()));
        assert_eq!(
            classify("свет в спальне включён", Role::Assistant, Some(&meta)),
            MemoryKind::Action
        );
    }

    #[test]
    fn test_classify_conversation_default() {
        assert_eq!(
            classify("Привет, у меня вопрос", Role::User, None),
            MemoryKind::Conversation
        );
    }
}
