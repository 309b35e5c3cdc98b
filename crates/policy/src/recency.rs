//! Enforced search recency policy.
//!
//! These are business rules, not suggestions: the planner and the model
//! can request a recency window, but mandatory and forbidden categories
//! are non-negotiable. Keyword tables are data so deployments can extend
//! the languages covered without touching the policy itself.

use domovoy_core::search::{PolicyDecision, RecencyRequirement, SearchCategory};

/// Policy row for one category.
#[derive(Debug, Clone, Copy)]
pub struct RecencyRule {
    pub requirement: RecencyRequirement,
    pub max_days: Option<u32>,
    pub preferred_days: Option<u32>,
    pub reason: &'static str,
}

/// The fixed policy table.
pub fn rule_for(category: SearchCategory) -> RecencyRule {
    use RecencyRequirement::*;
    match category {
        SearchCategory::News => RecencyRule {
            requirement: Mandatory,
            max_days: Some(7),
            preferred_days: Some(1),
            reason: "News must be recent to be relevant",
        },
        SearchCategory::TechNews => RecencyRule {
            requirement: Mandatory,
            max_days: Some(7),
            preferred_days: Some(3),
            reason: "Technology news ages quickly",
        },
        SearchCategory::Weather => RecencyRule {
            requirement: Mandatory,
            max_days: Some(1),
            preferred_days: Some(1),
            reason: "Weather data must be current",
        },
        SearchCategory::Transport => RecencyRule {
            requirement: Mandatory,
            max_days: Some(1),
            preferred_days: Some(1),
            reason: "Transport schedules change frequently",
        },
        SearchCategory::Stocks => RecencyRule {
            requirement: Mandatory,
            max_days: Some(1),
            preferred_days: Some(1),
            reason: "Financial data must be real-time",
        },
        SearchCategory::Sports => RecencyRule {
            requirement: Mandatory,
            max_days: Some(7),
            preferred_days: Some(1),
            reason: "Sports scores and news are time-sensitive",
        },
        SearchCategory::TechDocs => RecencyRule {
            requirement: Recommended,
            max_days: Some(180),
            preferred_days: Some(30),
            reason: "Documentation updates but not as frequently",
        },
        SearchCategory::Tutorials => RecencyRule {
            requirement: Recommended,
            max_days: Some(365),
            preferred_days: Some(90),
            reason: "Tutorials remain relevant but best practices evolve",
        },
        SearchCategory::Shopping => RecencyRule {
            requirement: Recommended,
            max_days: Some(30),
            preferred_days: Some(7),
            reason: "Product information and prices change",
        },
        SearchCategory::Historical => RecencyRule {
            requirement: RecencyRequirement::Forbidden,
            max_days: None,
            preferred_days: None,
            reason: "Historical facts do not change",
        },
        SearchCategory::General => RecencyRule {
            requirement: Recommended,
            max_days: Some(30),
            preferred_days: Some(7),
            reason: "General queries benefit from recent information",
        },
    }
}

/// Apply the policy to a requested recency window.
pub fn enforce(category: SearchCategory, requested_days: Option<u32>) -> PolicyDecision {
    let rule = rule_for(category);

    let mut decision = PolicyDecision {
        category,
        requirement: rule.requirement,
        recency_days: None,
        enforced: false,
        reason: rule.reason.to_string(),
        enforcement_reason: None,
        override_applied: false,
        override_reason: None,
    };

    match rule.requirement {
        RecencyRequirement::Mandatory => {
            let max = rule.max_days.unwrap_or(u32::MAX);
            match requested_days {
                Some(days) if days <= max => decision.recency_days = Some(days),
                _ => {
                    decision.recency_days = rule.preferred_days;
                    decision.enforced = true;
                    decision.enforcement_reason = Some(format!(
                        "Category '{}' requires recency. Using {} days.",
                        category,
                        rule.preferred_days.unwrap_or(1)
                    ));
                }
            }
        }
        RecencyRequirement::Recommended => {
            decision.recency_days = requested_days.or(rule.preferred_days);
        }
        RecencyRequirement::Forbidden => {
            decision.recency_days = None;
            if requested_days.is_some() {
                decision.enforced = true;
                decision.enforcement_reason = Some(format!(
                    "Category '{category}' forbids recency filters. Searching all time."
                ));
            }
        }
        RecencyRequirement::Optional => {
            decision.recency_days = requested_days;
        }
    }

    tracing::debug!(
        category = %category,
        requirement = rule.requirement.as_str(),
        final_days = ?decision.recency_days,
        enforced = decision.enforced,
        "recency policy applied"
    );

    decision
}

/// Whether a model-suggested override of the policy is acceptable.
/// Mandatory and forbidden rules are never overridable; recommended
/// rules require a substantive reason.
pub fn validate_override(
    category: SearchCategory,
    override_days: Option<u32>,
    reason: &str,
) -> bool {
    const MIN_REASON_LEN: usize = 20;
    let rule = rule_for(category);

    match rule.requirement {
        RecencyRequirement::Mandatory => {
            tracing::warn!(category = %category, "override rejected: mandatory policy");
            false
        }
        RecencyRequirement::Forbidden if override_days.is_some() => {
            tracing::warn!(category = %category, "override rejected: forbidden policy");
            false
        }
        RecencyRequirement::Recommended if reason.chars().count() < MIN_REASON_LEN => {
            tracing::warn!(category = %category, "override rejected: insufficient reason");
            false
        }
        _ => true,
    }
}

/// Policy explanation for one query, without running a search.
pub fn explain(category: SearchCategory) -> serde_json::Value {
    let rule = rule_for(category);
    let decision = enforce(category, None);
    serde_json::json!({
        "category": category,
        "requirement": rule.requirement.as_str(),
        "max_days": rule.max_days,
        "preferred_days": rule.preferred_days,
        "reason": rule.reason,
        "will_use_recency": decision.recency_days,
        "can_override": matches!(
            rule.requirement,
            RecencyRequirement::Recommended | RecencyRequirement::Optional
        ),
    })
}
