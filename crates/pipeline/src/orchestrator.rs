//! Pipeline orchestrator: analyze → resolve → plan → execute → compose.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use domovoy_core::{
    ActionPlan, Channel, ChatModel, ComposedResponse, PipelineMeta, PlanKind, SpeechSynthesizer,
};
use domovoy_memory::MemoryManager;

use crate::composer::ResponseComposer;
use crate::context::ContextResolver;
use crate::executor::Executor;
use crate::intent::IntentAnalyzer;
use crate::planner::Planner;

/// One command for the pipeline.
#[derive(Debug, Clone)]
pub struct CommandInput {
    pub user_id: String,
    pub command: String,
    pub channel: Channel,
    pub confirmed: bool,
    pub dry_run: bool,
    pub include_audio: bool,
}

impl CommandInput {
    pub fn new(user_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            command: command.into(),
            channel: Channel::Voice,
            confirmed: false,
            dry_run: false,
            include_audio: true,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_audio(mut self, include_audio: bool) -> Self {
        self.include_audio = include_audio;
        self
    }
}

pub struct Pipeline {
    analyzer: IntentAnalyzer,
    resolver: ContextResolver,
    planner: Planner,
    executor: Executor,
    composer: ResponseComposer,
    memory: Arc<MemoryManager>,
    // Held for health reporting only.
    model: Arc<dyn ChatModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        analyzer: IntentAnalyzer,
        resolver: ContextResolver,
        planner: Planner,
        executor: Executor,
        composer: ResponseComposer,
        memory: Arc<MemoryManager>,
        model: Arc<dyn ChatModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            analyzer,
            resolver,
            planner,
            executor,
            composer,
            memory,
            model,
            synthesizer,
        }
    }

    /// Run one command through all five stages and persist the turn.
    pub async fn process(&self, input: CommandInput) -> ComposedResponse {
        let start = Instant::now();
        tracing::info!(
            user_id = %input.user_id,
            command = %truncate(&input.command, 50),
            channel = input.channel.as_str(),
            "pipeline processing started"
        );

        let intent = self.analyzer.analyze(&input.user_id, &input.command).await;
        let context = self
            .resolver
            .resolve(&input.user_id, &input.command, &intent)
            .await;
        let plan = self.planner.plan(&context).await;
        tracing::info!(
            user_id = %input.user_id,
            plan_kind = plan.kind.as_str(),
            "plan generated"
        );

        let execution = match plan.kind {
            PlanKind::ActionPlan | PlanKind::SetRule => Some(
                self.executor
                    .execute(&input.user_id, &plan, input.confirmed, input.dry_run)
                    .await,
            ),
            _ => None,
        };

        let mut response = self
            .composer
            .compose(
                &input.user_id,
                &plan,
                execution.as_ref(),
                input.channel,
                input.include_audio,
            )
            .await;

        self.save_turn(&input.user_id, &input.command, &response).await;

        response.pipeline = Some(PipelineMeta {
            duration_ms: start.elapsed().as_millis() as u64,
            intent: Some(intent.intent.as_str().to_string()),
            confidence: intent.confidence,
            steps_completed: 5,
            error: response.kind.eq(&PlanKind::ErrorResponse).then(|| {
                response
                    .text
                    .clone()
            }),
        });

        tracing::info!(
            user_id = %input.user_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "pipeline processing completed"
        );
        response
    }

    /// Second half of the confirmation round-trip: run a previously
    /// returned plan now that the user has decided.
    pub async fn process_confirmation(
        &self,
        user_id: &str,
        plan: ActionPlan,
        confirmed: bool,
        channel: Channel,
    ) -> ComposedResponse {
        tracing::info!(user_id, confirmed, "processing confirmation");

        if !confirmed {
            return ComposedResponse {
                kind: PlanKind::TextResponse,
                intent: plan.intent,
                text: "Действие отменено".to_string(),
                channel,
                execution: None,
                actions: Vec::new(),
                needs_confirmation: false,
                sources: Vec::new(),
                articles: Vec::new(),
                audio: None,
                audio_error: None,
                pipeline: None,
            };
        }

        let execution = self.executor.execute(user_id, &plan, true, false).await;
        self.composer
            .compose(user_id, &plan, Some(&execution), channel, false)
            .await
    }

    async fn save_turn(&self, user_id: &str, command: &str, response: &ComposedResponse) {
        let metadata = serde_json::json!({
            "intent": response.intent,
            "channel": response.channel.as_str(),
        });
        if let Err(e) = self
            .memory
            .remember_turn(user_id, command, &response.text, Some(metadata))
            .await
        {
            tracing::error!(user_id, error = %e, "failed to save turn to memory");
        }
    }

    /// Component-level health for the health endpoint.
    pub async fn health(&self) -> Value {
        let model_ok = self.model.is_available().await;
        let tts_ok = self.synthesizer.is_available().await;
        let memory_ok = self.memory.health().await;
        let healthy = model_ok && tts_ok && memory_ok;

        serde_json::json!({
            "pipeline": if healthy { "healthy" } else { "degraded" },
            "components": {
                "intent_analyzer": "healthy",
                "context_resolver": "healthy",
                "planner": if model_ok { "healthy" } else { "degraded" },
                "executor": "healthy",
                "response_composer": if tts_ok { "healthy" } else { "degraded" },
                "memory": if memory_ok { "healthy" } else { "degraded" },
            },
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pipeline_with, FakeChatModel, FakeHome, PipelineParts};
    use domovoy_core::Channel;

    const CONTROL_PLAN: &str = r#"{"intent": "ha_control", "actions": [{"domain": "light", "service": "turn_on", "target": {"area_id": "bedroom"}}], "needs_confirmation": false, "response": "Включаю свет в спальне"}"#;

    #[tokio::test]
    async fn test_fast_path_control_end_to_end() {
        let PipelineParts {
            pipeline,
            home,
            audit,
            ..
        } = pipeline_with(
            FakeChatModel::with_responses(vec![CONTROL_PLAN.to_string()]),
            FakeHome::default(),
        )
        .await;

        let response = pipeline
            .process(CommandInput::new("u", "Включи свет"))
            .await;

        // Keyword fast path, one adapter call, executed audit record,
        // voice response with audio.
        assert_eq!(response.kind, PlanKind::ActionPlan);
        assert!(!response.text.is_empty());
        assert!(response.audio.is_some());
        assert!(response.audio.as_ref().unwrap().size > 0);
        assert_eq!(home.calls(), vec!["light.turn_on"]);

        let records = audit.recent("u", 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].confirmed);
        assert!(records[0].executed);
        assert_eq!(records[0].success, Some(true));

        let meta = response.pipeline.unwrap();
        assert_eq!(meta.intent.as_deref(), Some("ha_control"));
        assert!(meta.confidence >= 0.80);
        assert_eq!(meta.steps_completed, 5);
    }

    #[tokio::test]
    async fn test_confirmation_round_trip() {
        let confirm_plan = CONTROL_PLAN.replace(
            "\"needs_confirmation\": false",
            "\"needs_confirmation\": true",
        );
        let PipelineParts {
            pipeline,
            home,
            audit,
            ..
        } = pipeline_with(
            FakeChatModel::with_responses(vec![confirm_plan]),
            FakeHome::default(),
        )
        .await;

        // First pass: held for confirmation, nothing executed.
        let response = pipeline
            .process(CommandInput::new("u", "Включи свет").with_audio(false))
            .await;
        assert!(response.needs_confirmation);
        assert!(home.calls().is_empty());
        let records = audit.recent("u", 10).await.unwrap();
        assert!(records.iter().all(|r| !r.executed));

        // Second pass via the confirmation entry point.
        let mut plan = ActionPlan::new(PlanKind::ActionPlan, "ha_control", "Включаю свет");
        plan.actions = response.actions.clone();
        plan.needs_confirmation = true;

        let confirmed = pipeline
            .process_confirmation("u", plan, true, Channel::Text)
            .await;
        assert!(confirmed.execution.as_ref().unwrap().success);
        assert_eq!(home.calls(), vec!["light.turn_on"]);

        let records = audit.recent("u", 10).await.unwrap();
        assert!(records.iter().any(|r| r.executed && r.confirmed));
    }

    #[tokio::test]
    async fn test_declined_confirmation_cancels() {
        let PipelineParts { pipeline, home, .. } = pipeline_with(
            FakeChatModel::with_responses(vec![]),
            FakeHome::default(),
        )
        .await;

        let mut plan = ActionPlan::new(PlanKind::ActionPlan, "ha_control", "Открываю замок");
        plan.needs_confirmation = true;

        let response = pipeline
            .process_confirmation("u", plan, false, Channel::Voice)
            .await;
        assert_eq!(response.text, "Действие отменено");
        assert!(home.calls().is_empty());
    }

    #[tokio::test]
    async fn test_turns_are_persisted() {
        let PipelineParts {
            pipeline, memory, ..
        } = pipeline_with(
            FakeChatModel::with_responses(vec![
                r#"{"type": "general_chat", "confidence": 0.9, "entities": {}, "requires": ["none"]}"#
                    .to_string(),
                "Это довольно длинный ответ ассистента про погоду в доме".to_string(),
            ]),
            FakeHome::default(),
        )
        .await;

        pipeline
            .process(
                CommandInput::new("u", "расскажи что-нибудь интересное про дом")
                    .with_channel(Channel::Text),
            )
            .await;

        let recent = memory
            .recall(
                "u",
                "",
                None,
                domovoy_memory::RecallStrategy::Recent,
                10,
            )
            .await
            .unwrap();
        // Both sides of the turn were long enough to pass the policy.
        assert!(recent.len() >= 2);
    }

    #[tokio::test]
    async fn test_error_plan_reports_in_meta() {
        let PipelineParts { pipeline, .. } = pipeline_with(
            FakeChatModel::failing(),
            FakeHome::default(),
        )
        .await;

        // Forced through the model path and the model fails: the intent
        // falls back to general_chat, then planning fails too.
        let response = pipeline
            .process(CommandInput::new("u", "странная фраза").with_audio(false))
            .await;
        assert_eq!(response.kind, PlanKind::ErrorResponse);
        let meta = response.pipeline.unwrap();
        assert!(meta.error.is_some());
        assert!(meta.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn test_health_shape() {
        let PipelineParts { pipeline, .. } = pipeline_with(
            FakeChatModel::with_responses(vec![]),
            FakeHome::default(),
        )
        .await;
        let health = pipeline.health().await;
        assert_eq!(health["pipeline"], "healthy");
        assert_eq!(health["components"]["executor"], "healthy");
    }
}
