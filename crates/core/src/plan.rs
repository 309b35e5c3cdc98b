//! Action plans produced by the planner and consumed by the executor
//! and composer. Plans are transient; they are never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::search::Article;

/// What the planner decided to do with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    ActionPlan,
    TextResponse,
    SearchResponse,
    AutomationDraft,
    SetRule,
    MemoryResponse,
    ErrorResponse,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::ActionPlan => "action_plan",
            PlanKind::TextResponse => "text_response",
            PlanKind::SearchResponse => "search_response",
            PlanKind::AutomationDraft => "automation_draft",
            PlanKind::SetRule => "set_rule",
            PlanKind::MemoryResponse => "memory_response",
            PlanKind::ErrorResponse => "error_response",
        }
    }
}

/// One home-automation service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAction {
    pub domain: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
}

impl HomeAction {
    /// `domain.service` form used for allow-list matching.
    pub fn service_call(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

/// Planner output. `response_text` is always present so every branch can
/// be rendered by the composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(rename = "type")]
    pub kind: PlanKind,
    pub intent: String,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<HomeAction>,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<Article>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionPlan {
    pub fn text(intent: impl Into<String>, response_text: impl Into<String>) -> Self {
        Self::new(PlanKind::TextResponse, intent, response_text)
    }

    pub fn error(intent: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut plan = Self::new(PlanKind::ErrorResponse, intent, message.clone());
        plan.error = Some(message);
        plan
    }

    pub fn new(
        kind: PlanKind,
        intent: impl Into<String>,
        response_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            intent: intent.into(),
            response_text: response_text.into(),
            actions: Vec::new(),
            needs_confirmation: false,
            sources: Vec::new(),
            articles: Vec::new(),
            draft: None,
            rule_text: None,
            rule_type: None,
            error: None,
        }
    }
}

/// Outcome of one attempted action inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: HomeAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executor result for a plan. Per-action failures are collected here,
/// not raised; a plan can partially succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub executed: usize,
    pub failed: usize,
    #[serde(default)]
    pub outcomes: Vec<ActionOutcome>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub message: String,
    /// Set when the plan needs a confirmation round-trip before anything
    /// runs. Nothing was executed in that case.
    #[serde(default)]
    pub needs_confirmation: bool,
}

impl ExecutionReport {
    /// Report for plans that have nothing to execute.
    pub fn noop() -> Self {
        Self {
            success: true,
            executed: 0,
            failed: 0,
            outcomes: Vec::new(),
            errors: Vec::new(),
            message: "No execution required".to_string(),
            needs_confirmation: false,
        }
    }

    /// Report asking the user to confirm before execution.
    pub fn confirmation_required(message: impl Into<String>) -> Self {
        Self {
            success: false,
            executed: 0,
            failed: 0,
            outcomes: Vec::new(),
            errors: Vec::new(),
            message: message.into(),
            needs_confirmation: true,
        }
    }

    pub fn record_success(&mut self, action: HomeAction, result: Option<Value>) {
        self.executed += 1;
        self.outcomes.push(ActionOutcome {
            action,
            success: true,
            result,
            error: None,
        });
    }

    pub fn record_failure(&mut self, action: HomeAction, error: impl Into<String>) {
        let error = error.into();
        self.failed += 1;
        self.success = false;
        self.errors.push(error.clone());
        self.outcomes.push(ActionOutcome {
            action,
            success: false,
            result: None,
            error: Some(error),
        });
    }
}

impl Default for ExecutionReport {
    fn default() -> Self {
        Self {
            success: true,
            executed: 0,
            failed: 0,
            outcomes: Vec::new(),
            errors: Vec::new(),
            message: String::new(),
            needs_confirmation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_call_format() {
        let action = HomeAction {
            domain: "light".into(),
            service: "turn_on".into(),
            service_data: None,
            target: None,
        };
        assert_eq!(action.service_call(), "light.turn_on");
    }

    #[test]
    fn test_report_partial_failure() {
        let action = HomeAction {
            domain: "switch".into(),
            service: "turn_off".into(),
            service_data: None,
            target: None,
        };
        let mut report = ExecutionReport::default();
        report.record_success(action.clone(), None);
        report.record_failure(action, "unreachable");

        assert!(!report.success);
        assert_eq!(report.executed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_plan_serde_tag() {
        let plan = ActionPlan::text("general_chat", "привет");
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["type"], "text_response");
        assert_eq!(json["intent"], "general_chat");
    }

    #[test]
    fn test_confirmation_report_executes_nothing() {
        let report = ExecutionReport::confirmation_required("confirm first");
        assert!(report.needs_confirmation);
        assert!(!report.success);
        assert_eq!(report.executed, 0);
    }
}
