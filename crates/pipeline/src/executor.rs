//! Executor: runs action plans with permission and confirmation gates.
//!
//! Per-action failures are collected into the report, never raised.
//! Every attempt lands in the audit log, including refused ones.

use std::sync::Arc;

use domovoy_core::{ActionPlan, ExecutionReport, HomeAutomation, PlanKind};
use domovoy_memory::{AuditEntry, AuditLog, MemoryManager};

pub struct Executor {
    home: Arc<dyn HomeAutomation>,
    memory: Arc<MemoryManager>,
    audit: Arc<AuditLog>,
}

impl Executor {
    pub fn new(
        home: Arc<dyn HomeAutomation>,
        memory: Arc<MemoryManager>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            home,
            memory,
            audit,
        }
    }

    pub async fn execute(
        &self,
        user_id: &str,
        plan: &ActionPlan,
        confirmed: bool,
        dry_run: bool,
    ) -> ExecutionReport {
        tracing::info!(
            user_id,
            kind = plan.kind.as_str(),
            intent = %plan.intent,
            confirmed,
            dry_run,
            "executing plan"
        );

        let report = match plan.kind {
            PlanKind::ActionPlan => {
                if self.requires_confirmation(plan) && !confirmed {
                    ExecutionReport::confirmation_required("Это действие требует подтверждения")
                } else {
                    self.run_actions(plan, dry_run).await
                }
            }
            PlanKind::SetRule => self.save_rule(user_id, plan).await,
            _ => ExecutionReport::noop(),
        };

        self.log_attempt(user_id, plan, &report, confirmed).await;
        report
    }

    /// Confirmation is needed when the planner flagged it or any action
    /// hits the configured dangerous-service list.
    fn requires_confirmation(&self, plan: &ActionPlan) -> bool {
        plan.needs_confirmation
            || plan
                .actions
                .iter()
                .any(|action| self.home.needs_confirmation(&action.service_call()))
    }

    async fn run_actions(&self, plan: &ActionPlan, dry_run: bool) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        if plan.actions.is_empty() {
            report.message = "No actions to execute".to_string();
            return report;
        }

        for action in &plan.actions {
            if action.domain.is_empty() || action.service.is_empty() {
                report.record_failure(action.clone(), "Missing domain or service");
                continue;
            }

            if dry_run {
                report.record_success(action.clone(), Some(serde_json::json!({"dry_run": true})));
                continue;
            }

            match self.home.call_service(action).await {
                Ok(result) => report.record_success(action.clone(), Some(result)),
                Err(e) => {
                    tracing::error!(
                        service = %action.service_call(),
                        error = %e,
                        "action execution failed"
                    );
                    report.record_failure(action.clone(), e.to_string());
                }
            }
        }

        report.message = if report.success {
            format!("Выполнено действий: {}", report.executed)
        } else {
            format!(
                "Выполнено: {}, Ошибок: {}",
                report.executed, report.failed
            )
        };
        report
    }

    async fn save_rule(&self, user_id: &str, plan: &ActionPlan) -> ExecutionReport {
        let Some(rule_text) = plan.rule_text.as_deref().filter(|t| !t.is_empty()) else {
            let mut report = ExecutionReport::default();
            report.success = false;
            report.message = "Rule text is empty".to_string();
            return report;
        };

        let rule_type = plan.rule_type.as_deref().unwrap_or("preference");
        match self.memory.remember_rule(user_id, rule_text, rule_type).await {
            Ok(_) => {
                tracing::info!(user_id, rule_type, "user rule saved");
                let mut report = ExecutionReport::default();
                report.executed = 1;
                report.message = format!("Правило сохранено: {rule_text}");
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to save rule");
                let mut report = ExecutionReport::default();
                report.success = false;
                report.errors.push(e.to_string());
                report.message = "Не удалось сохранить правило".to_string();
                report
            }
        }
    }

    async fn log_attempt(
        &self,
        user_id: &str,
        plan: &ActionPlan,
        report: &ExecutionReport,
        confirmed: bool,
    ) {
        // A plan waiting for confirmation (or a pure response plan) was
        // not executed; only executed attempts carry an outcome.
        let executed = !report.needs_confirmation
            && matches!(plan.kind, PlanKind::ActionPlan | PlanKind::SetRule);

        let entry = AuditEntry {
            user_id,
            intent: &plan.intent,
            actions: &plan.actions,
            confirmed,
            executed,
            success: executed.then_some(report.success),
            error: (!report.errors.is_empty()).then(|| report.errors.join("; ")),
        };

        if let Err(e) = self.audit.record(entry).await {
            tracing::error!(error = %e, "failed to write audit record");
        }
    }
}
