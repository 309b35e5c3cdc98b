//! Tool bridge: model-requested functions executed over the pipeline.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use domovoy_core::{Channel, Role, SearchRequest, WebSearch};
use domovoy_memory::{AuditEntry, AuditLog, MemoryManager};
use domovoy_pipeline::{CommandInput, Pipeline};
use domovoy_realtime::ToolHandler;

/// Function definitions advertised to the model when the client does
/// not supply its own.
pub fn default_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "name": "run_command",
            "description": "Выполнить команду умного дома или ответить на вопрос о доме",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Команда на естественном языке" }
                },
                "required": ["command"]
            }
        }),
        json!({
            "type": "function",
            "name": "web_search",
            "description": "Поиск актуальной информации в интернете",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "type": "function",
            "name": "remember",
            "description": "Сохранить важный факт или предпочтение пользователя",
            "parameters": {
                "type": "object",
                "properties": {
                    "content": { "type": "string" }
                },
                "required": ["content"]
            }
        }),
    ]
}

pub struct PipelineToolHandler {
    pipeline: Arc<Pipeline>,
    search: Arc<dyn WebSearch>,
    memory: Arc<MemoryManager>,
    audit: Arc<AuditLog>,
}

impl PipelineToolHandler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        search: Arc<dyn WebSearch>,
        memory: Arc<MemoryManager>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            pipeline,
            search,
            memory,
            audit,
        }
    }
}

#[async_trait]
impl ToolHandler for PipelineToolHandler {
    async fn execute(&self, user_id: &str, name: &str, arguments: Value) -> Value {
        match name {
            "run_command" => {
                let Some(command) = arguments.get("command").and_then(Value::as_str) else {
                    return json!({ "error": "missing command argument" });
                };
                let input = CommandInput::new(user_id, command)
                    .with_channel(Channel::Text)
                    .with_audio(false);
                let response = self.pipeline.process(input).await;
                json!({
                    "response": response.text,
                    "intent": response.intent,
                    "needs_confirmation": response.needs_confirmation,
                })
            }
            "web_search" => {
                let Some(query) = arguments.get("query").and_then(Value::as_str) else {
                    return json!({ "error": "missing query argument" });
                };
                match self.search.search(SearchRequest::query(query)).await {
                    Ok(outcome) => json!({
                        "answer": outcome.answer,
                        "sources": outcome.sources,
                        "category": outcome.category,
                    }),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
            "remember" => {
                let Some(content) = arguments.get("content").and_then(Value::as_str) else {
                    return json!({ "error": "missing content argument" });
                };
                match self
                    .memory
                    .remember(user_id, content, Role::User, None, None)
                    .await
                {
                    Ok(receipt) => serde_json::to_value(receipt)
                        .unwrap_or_else(|_| json!({ "saved": false })),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
            other => {
                tracing::warn!(tool = other, "unknown tool requested");
                json!({ "error": format!("unknown tool: {other}") })
            }
        }
    }

    async fn record_abandoned(&self, user_id: &str, call_id: &str, name: &str) {
        let entry = AuditEntry {
            user_id,
            intent: name,
            actions: &[],
            confirmed: false,
            executed: false,
            success: None,
            error: Some(format!("tool call {call_id} abandoned at session teardown")),
        };
        if let Err(e) = self.audit.record(entry).await {
            tracing::error!(error = %e, "failed to audit abandoned tool call");
        }
    }
}
