//! Planner: turns an analyzed command into an executable plan.
//!
//! Some intents short-circuit to an adapter (search, memory), some need
//! the model. Model output that claims to be an action plan is parsed
//! defensively: anything that fails to parse is treated as plain text.

use serde::Deserialize;
use std::sync::Arc;

use domovoy_config::AssistantConfig;
use domovoy_core::{
    ActionPlan, ArticleQuery, ArticleSearch, ChatMessage, ChatModel, ChatRequest, HomeAction,
    PlanKind, SearchRequest, WebSearch,
};

use crate::context::PipelineContext;
use crate::intent::Intent;
use crate::prompts::{planner_system_prompt, planner_user_message};

/// Shape the model is asked to produce for control commands.
#[derive(Debug, Deserialize)]
struct ModelActionPlan {
    #[allow(dead_code)]
    intent: String,
    #[serde(default)]
    actions: Vec<HomeAction>,
    #[serde(default)]
    needs_confirmation: bool,
    #[serde(default)]
    response: String,
}

/// Prefixes stripped from a rule-setting command to isolate the rule
/// text.
const RULE_PREFIXES: &[&str] = &["запомни", "всегда", "помни", "правило", "remember", "rule"];

pub struct Planner {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn WebSearch>,
    articles: Arc<dyn ArticleSearch>,
    assistant: AssistantConfig,
}

impl Planner {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn WebSearch>,
        articles: Arc<dyn ArticleSearch>,
        assistant: AssistantConfig,
    ) -> Self {
        Self {
            model,
            search,
            articles,
            assistant,
        }
    }

    pub async fn plan(&self, context: &PipelineContext) -> ActionPlan {
        let intent = context.intent.intent;
        tracing::info!(user_id = %context.user_id, intent = intent.as_str(), "planning action");

        match intent {
            Intent::HaControl => self.plan_control(context).await,
            Intent::HaQuery => self.plan_model_text(context, "ha_query").await,
            Intent::WebSearch => self.plan_web_search(context).await,
            Intent::HabrSearch => self.plan_habr_search(context).await,
            Intent::HaAutomation => self.plan_automation(context).await,
            Intent::SetRule => Self::plan_set_rule(context),
            Intent::MemoryQuery => Self::plan_memory_query(context),
            Intent::GeneralChat | Intent::Unknown => {
                self.plan_model_text(context, "general_chat").await
            }
        }
    }

    async fn plan_control(&self, context: &PipelineContext) -> ActionPlan {
        let request = ChatRequest::new(vec![
            ChatMessage::system(planner_system_prompt(&self.assistant, context)),
            ChatMessage::user(planner_user_message(context)),
        ]);

        let content = match self.model.complete(request).await {
            Ok(outcome) => outcome.content,
            Err(e) => {
                tracing::error!(error = %e, "control planning failed");
                return ActionPlan::error(
                    "ha_control",
                    format!("Не удалось спланировать действие: {e}"),
                );
            }
        };

        match serde_json::from_str::<ModelActionPlan>(&content) {
            Ok(parsed) if !parsed.actions.is_empty() => {
                let mut plan = ActionPlan::new(
                    PlanKind::ActionPlan,
                    "ha_control",
                    if parsed.response.is_empty() {
                        "Выполняю".to_string()
                    } else {
                        parsed.response
                    },
                );
                plan.actions = parsed.actions;
                plan.needs_confirmation = parsed.needs_confirmation;
                plan
            }
            Ok(parsed) => ActionPlan::text(
                "ha_control",
                if parsed.response.is_empty() {
                    content
                } else {
                    parsed.response
                },
            ),
            // Free text from the model is a valid answer, not an error.
            Err(_) => ActionPlan::text("ha_control", content),
        }
    }

    async fn plan_model_text(&self, context: &PipelineContext, intent: &str) -> ActionPlan {
        let request = ChatRequest::new(vec![
            ChatMessage::system(planner_system_prompt(&self.assistant, context)),
            ChatMessage::user(planner_user_message(context)),
        ]);

        match self.model.complete(request).await {
            Ok(outcome) => ActionPlan::text(intent, outcome.content),
            Err(e) => {
                tracing::error!(error = %e, intent, "text planning failed");
                ActionPlan::error(intent, format!("Произошла ошибка: {e}"))
            }
        }
    }

    async fn plan_web_search(&self, context: &PipelineContext) -> ActionPlan {
        match self
            .search
            .search(SearchRequest::query(&context.command))
            .await
        {
            Ok(outcome) => {
                let mut plan = ActionPlan::new(
                    PlanKind::SearchResponse,
                    "web_search",
                    outcome.answer.clone(),
                );
                plan.sources = outcome.sources;
                plan
            }
            Err(e) => {
                tracing::error!(error = %e, "web search failed");
                ActionPlan::error("web_search", format!("Не удалось выполнить поиск: {e}"))
            }
        }
    }

    async fn plan_habr_search(&self, context: &PipelineContext) -> ActionPlan {
        let query_text = context
            .command
            .to_lowercase()
            .replace("habr", "")
            .replace("хабр", "")
            .trim()
            .to_string();

        let query = ArticleQuery {
            query: (!query_text.is_empty()).then_some(query_text),
            limit: 5,
            ..Default::default()
        };

        match self.articles.search(query).await {
            Ok(articles) => {
                let response_text = if articles.is_empty() {
                    "Статьи не найдены".to_string()
                } else {
                    let mut lines = vec!["Нашёл статьи на Хабре:".to_string()];
                    for (i, article) in articles.iter().take(3).enumerate() {
                        lines.push(format!("{}. {}", i + 1, article.title));
                    }
                    lines.join("\n")
                };

                let mut plan =
                    ActionPlan::new(PlanKind::SearchResponse, "habr_search", response_text);
                plan.articles = articles;
                plan
            }
            Err(e) => {
                tracing::error!(error = %e, "habr search failed");
                ActionPlan::error("habr_search", format!("Не удалось найти статьи: {e}"))
            }
        }
    }

    async fn plan_automation(&self, context: &PipelineContext) -> ActionPlan {
        let prompt = format!(
            "{}\n\nСоздай черновик автоматизации для Home Assistant в формате YAML.",
            context.command
        );
        let request = ChatRequest::new(vec![
            ChatMessage::system(planner_system_prompt(&self.assistant, context)),
            ChatMessage::user(prompt),
        ]);

        match self.model.complete(request).await {
            Ok(outcome) => {
                let mut plan = ActionPlan::new(
                    PlanKind::AutomationDraft,
                    "ha_automation",
                    "Создал черновик автоматизации. Проверьте перед применением.",
                );
                plan.draft = Some(outcome.content);
                plan
            }
            Err(e) => {
                tracing::error!(error = %e, "automation planning failed");
                ActionPlan::error(
                    "ha_automation",
                    format!("Не удалось создать автоматизацию: {e}"),
                )
            }
        }
    }

    fn plan_set_rule(context: &PipelineContext) -> ActionPlan {
        let mut rule_text = context.command.to_lowercase();
        for prefix in RULE_PREFIXES {
            rule_text = rule_text.replace(prefix, "");
        }
        let rule_text = rule_text
            .trim()
            .trim_start_matches([':', ',', '-'])
            .trim()
            .to_string();

        let mut plan = ActionPlan::new(
            PlanKind::SetRule,
            "set_rule",
            format!("Запомнил: {rule_text}"),
        );
        plan.rule_text = Some(rule_text);
        plan.rule_type = Some("preference".to_string());
        plan
    }

    fn plan_memory_query(context: &PipelineContext) -> ActionPlan {
        let memories = context
            .memory
            .as_ref()
            .map(|m| m.relevant_memories.as_slice())
            .unwrap_or_default();

        let response_text = if memories.is_empty() {
            "Не нашёл ничего в истории по этому запросу".to_string()
        } else {
            let mut lines = vec!["Из истории наших разговоров:".to_string()];
            for entry in memories.iter().take(3) {
                let preview: String = entry.content.chars().take(200).collect();
                lines.push(format!("- {preview}"));
            }
            lines.join("\n")
        };

        ActionPlan::new(PlanKind::MemoryResponse, "memory_query", response_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Intent, IntentAnalysis};
    use crate::testing::{FakeArticles, FakeChatModel, FakeSearch};
    use domovoy_core::MemoryContext;
    use serde_json::Value;

    fn context(intent: Intent, command: &str) -> PipelineContext {
        PipelineContext {
            user_id: "u".into(),
            command: command.into(),
            intent: IntentAnalysis {
                intent,
                confidence: 0.9,
                entities: Value::Null,
                requires: vec![],
            },
            home: None,
            memory: None,
        }
    }

    fn planner(model: FakeChatModel) -> Planner {
        Planner::new(
            Arc::new(model),
            Arc::new(FakeSearch::default()),
            Arc::new(FakeArticles::default()),
            AssistantConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_control_plan_parses_model_json() {
        let model = FakeChatModel::with_responses(vec![
            r#"{"intent": "ha_control", "actions": [{"domain": "light", "service": "turn_on", "target": {"area_id": "bedroom"}}], "needs_confirmation": false, "response": "Включаю свет в спальне"}"#.to_string(),
        ]);
        let plan = planner(model)
            .plan(&context(Intent::HaControl, "включи свет"))
            .await;

        assert_eq!(plan.kind, PlanKind::ActionPlan);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].service_call(), "light.turn_on");
        assert!(!plan.needs_confirmation);
        assert_eq!(plan.response_text, "Включаю свет в спальне");
    }

    #[tokio::test]
    async fn test_control_plan_free_text_degrades_to_text() {
        let model = FakeChatModel::with_responses(vec![
            "Свет в спальне уже включён".to_string(),
        ]);
        let plan = planner(model)
            .plan(&context(Intent::HaControl, "включи свет"))
            .await;
        assert_eq!(plan.kind, PlanKind::TextResponse);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.response_text, "Свет в спальне уже включён");
    }

    #[tokio::test]
    async fn test_control_plan_json_without_actions_is_text() {
        let model = FakeChatModel::with_responses(vec![
            r#"{"intent": "ha_control", "actions": [], "needs_confirmation": false, "response": "Нечего включать"}"#.to_string(),
        ]);
        let plan = planner(model)
            .plan(&context(Intent::HaControl, "включи"))
            .await;
        assert_eq!(plan.kind, PlanKind::TextResponse);
        assert_eq!(plan.response_text, "Нечего включать");
    }

    #[tokio::test]
    async fn test_web_search_plan_carries_sources() {
        let plan = planner(FakeChatModel::with_responses(vec![]))
            .plan(&context(Intent::WebSearch, "найди новости про AI"))
            .await;
        assert_eq!(plan.kind, PlanKind::SearchResponse);
        assert!(!plan.sources.is_empty());
        assert!(!plan.response_text.is_empty());
    }

    #[tokio::test]
    async fn test_habr_plan_formats_titles() {
        let plan = planner(FakeChatModel::with_responses(vec![]))
            .plan(&context(Intent::HabrSearch, "найди на хабре статьи про rust"))
            .await;
        assert_eq!(plan.kind, PlanKind::SearchResponse);
        assert!(!plan.articles.is_empty());
        assert!(plan.response_text.starts_with("Нашёл статьи на Хабре:"));
    }

    #[tokio::test]
    async fn test_set_rule_strips_prefixes() {
        let plan = planner(FakeChatModel::with_responses(vec![]))
            .plan(&context(Intent::SetRule, "Запомни: не включай музыку ночью"))
            .await;
        assert_eq!(plan.kind, PlanKind::SetRule);
        assert_eq!(plan.rule_text.as_deref(), Some("не включай музыку ночью"));
        assert!(plan.response_text.contains("Запомнил"));
    }

    #[tokio::test]
    async fn test_memory_query_uses_resolved_context() {
        let mut ctx = context(Intent::MemoryQuery, "помнишь про свет?");
        let mut memory = MemoryContext::default();
        memory.relevant_memories.push(domovoy_core::MemoryEntry {
            id: "1".into(),
            user_id: "u".into(),
            role: domovoy_core::Role::User,
            content: "вчера обсуждали тёплый свет".into(),
            kind: domovoy_core::MemoryKind::Conversation,
            importance: domovoy_core::Importance::Medium,
            created_at: chrono::Utc::now(),
            expires_at: None,
            similarity: Some(0.9),
            metadata: Default::default(),
        });
        ctx.memory = Some(memory);

        let plan = planner(FakeChatModel::with_responses(vec![]))
            .plan(&ctx)
            .await;
        assert_eq!(plan.kind, PlanKind::MemoryResponse);
        assert!(plan.response_text.contains("тёплый свет"));
    }

    #[tokio::test]
    async fn test_memory_query_without_hits() {
        let plan = planner(FakeChatModel::with_responses(vec![]))
            .plan(&context(Intent::MemoryQuery, "помнишь?"))
            .await;
        assert!(plan.response_text.contains("Не нашёл"));
    }

    #[tokio::test]
    async fn test_model_failure_produces_error_plan() {
        let plan = planner(FakeChatModel::failing())
            .plan(&context(Intent::GeneralChat, "привет"))
            .await;
        assert_eq!(plan.kind, PlanKind::ErrorResponse);
        assert!(plan.error.is_some());
    }
}
