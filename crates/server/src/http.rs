//! REST surface. Paths and field names are wire contract.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use domovoy_core::{
    ActionPlan, ActionOutcome, ArticleQuery, AudioPayload, Channel, PipelineMeta, SearchCategory,
    SearchRequest,
};
use domovoy_pipeline::CommandInput;

use crate::metrics;
use crate::state::AppState;
use crate::ws::realtime_ws;
use crate::ServerError;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/v1/command", post(execute_command))
        .route("/v1/confirm", post(confirm_action))
        .route("/v1/context", get(get_context))
        .route("/v1/search", post(search_web))
        .route("/v1/habr/search", get(search_habr))
        .route("/v1/telegram/send", post(send_telegram))
        .route("/v1/realtime/ws", get(realtime_ws))
        .route("/healthz", get(healthcheck))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    user_id: String,
    command: String,
    #[serde(default = "default_true")]
    #[allow(dead_code)]
    include_context: bool,
    #[serde(default)]
    include_audio: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    #[serde(rename = "type")]
    kind: String,
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actions: Option<Vec<domovoy_core::HomeAction>>,
    needs_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<AudioPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<PipelineMeta>,
}

async fn execute_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Json<CommandResponse> {
    let start = Instant::now();
    let channel = if request.include_audio {
        Channel::Voice
    } else {
        Channel::Text
    };

    let input = CommandInput::new(&request.user_id, &request.command)
        .with_channel(channel)
        .with_audio(request.include_audio);
    let response = state.pipeline.process(input).await;

    let status = if response.kind == domovoy_core::PlanKind::ErrorResponse {
        "error"
    } else {
        "success"
    };
    metrics::record_command(&response.intent, status, start.elapsed().as_secs_f64());

    Json(CommandResponse {
        kind: response.kind.as_str().to_string(),
        response: response.text,
        intent: Some(response.intent),
        actions: (!response.actions.is_empty()).then_some(response.actions),
        needs_confirmation: response.needs_confirmation,
        audio_url: None,
        audio: response.audio,
        metadata: response.pipeline,
    })
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    user_id: String,
    plan: ActionPlan,
    confirmed: bool,
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<ActionOutcome>>,
}

async fn confirm_action(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Json<ConfirmResponse> {
    let start = Instant::now();
    let intent = request.plan.intent.clone();

    let response = state
        .pipeline
        .process_confirmation(&request.user_id, request.plan, request.confirmed, Channel::Text)
        .await;

    let (success, results) = match &response.execution {
        Some(report) => (report.success, Some(report.outcomes.clone())),
        None => (true, None),
    };
    metrics::record_command(
        &format!("{intent}_confirm"),
        if success { "success" } else { "error" },
        start.elapsed().as_secs_f64(),
    );

    Json(ConfirmResponse {
        success,
        message: response.text,
        results,
    })
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    config: Value,
    total_entities: usize,
    areas: Vec<Value>,
    entities_by_domain: std::collections::HashMap<String, Vec<Value>>,
}

async fn get_context(State(state): State<AppState>) -> Result<Json<ContextResponse>, ServerError> {
    let snapshot = state.home.get_context().await.map_err(ServerError::from)?;
    Ok(Json(ContextResponse {
        config: snapshot.config,
        total_entities: snapshot.total_entities,
        areas: snapshot.areas,
        entities_by_domain: snapshot.entities_by_domain,
    }))
}

#[derive(Debug, Deserialize)]
struct SearchHttpRequest {
    query: String,
    #[serde(default)]
    recency_days: Option<u32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct SearchHttpResponse {
    answer: String,
    sources: Vec<String>,
    category: SearchCategory,
    recency: Option<u32>,
    metadata: Value,
}

async fn search_web(
    State(state): State<AppState>,
    Json(request): Json<SearchHttpRequest>,
) -> Result<Json<SearchHttpResponse>, ServerError> {
    let start = Instant::now();

    let category = match request.category.as_deref() {
        Some(raw) => Some(
            raw.parse::<SearchCategory>()
                .map_err(ServerError::InvalidRequest)?,
        ),
        None => None,
    };

    let outcome = state
        .search
        .search(SearchRequest {
            query: request.query,
            category,
            recency_days: request.recency_days,
            override_reason: None,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            max_results: request.max_results,
        })
        .await
        .map_err(|e| {
            metrics::record_search("unknown", "error", start.elapsed().as_secs_f64());
            ServerError::from(e)
        })?;

    metrics::record_search(
        outcome.category.as_str(),
        "success",
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(SearchHttpResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        category: outcome.category,
        recency: outcome.recency_days,
        metadata: serde_json::to_value(&outcome.policy).unwrap_or(Value::Null),
    }))
}

#[derive(Debug, Deserialize)]
struct HabrSearchParams {
    #[serde(default)]
    query: Option<String>,
    /// Comma-separated.
    #[serde(default)]
    tags: Option<String>,
    /// Comma-separated.
    #[serde(default)]
    hubs: Option<String>,
    #[serde(default)]
    days: Option<u32>,
    #[serde(default = "default_habr_limit")]
    limit: usize,
}

fn default_habr_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct HabrSearchResponse {
    articles: Vec<domovoy_core::Article>,
    count: usize,
}

async fn search_habr(
    State(state): State<AppState>,
    Query(params): Query<HabrSearchParams>,
) -> Result<Json<HabrSearchResponse>, ServerError> {
    let start = Instant::now();
    let split = |raw: Option<String>| -> Vec<String> {
        raw.map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
    };

    let query = ArticleQuery {
        query: params.query,
        tags: split(params.tags),
        hubs: split(params.hubs),
        days: params.days,
        limit: params.limit,
    };

    let articles = state.articles.search(query).await.map_err(|e| {
        metrics::record_habr_search("error", start.elapsed().as_secs_f64());
        ServerError::from(e)
    })?;

    metrics::record_habr_search("success", start.elapsed().as_secs_f64());
    Ok(Json(HabrSearchResponse {
        count: articles.len(),
        articles,
    }))
}

#[derive(Debug, Deserialize)]
struct TelegramSendRequest {
    text: String,
    #[serde(default = "default_parse_mode")]
    parse_mode: String,
}

fn default_parse_mode() -> String {
    "Markdown".to_string()
}

async fn send_telegram(
    State(state): State<AppState>,
    Json(request): Json<TelegramSendRequest>,
) -> Result<Json<Value>, ServerError> {
    let success = state
        .messenger
        .send_message(&request.text, &request.parse_mode, false)
        .await
        .map_err(ServerError::from)?;

    metrics::record_telegram_message(if success { "success" } else { "error" });
    Ok(Json(serde_json::json!({ "success": success })))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    checks: std::collections::HashMap<&'static str, bool>,
}

async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = std::collections::HashMap::new();

    let memory_ok = state.memory.health().await;
    checks.insert("memory", memory_ok);
    checks.insert("database", memory_ok);

    let pipeline_health = state.pipeline.health().await;
    checks.insert("pipeline", pipeline_health["pipeline"] == "healthy");

    checks.insert("homeassistant", state.home_reachable().await);

    let healthy = checks.values().all(|ok| *ok);
    metrics::set_system_health(healthy);
    metrics::set_database_health(memory_ok);

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        checks,
    })
}

async fn readiness() -> Json<Value> {
    Json(serde_json::json!({ "status": "ready" }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "name": state.settings.assistant.name,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "features": [
            "voice_first",
            "realtime_api",
            "enforced_recency",
            "policy_based_memory",
            "pipeline_architecture",
        ],
        "endpoints": {
            "command": "POST /v1/command",
            "confirm": "POST /v1/confirm",
            "search": "POST /v1/search",
            "habr": "GET /v1/habr/search",
            "context": "GET /v1/context",
            "telegram": "POST /v1/telegram/send",
            "realtime": "WS /v1/realtime/ws",
            "health": "GET /healthz",
            "metrics": "GET /metrics",
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use domovoy_config::Settings;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.database.url = "sqlite::memory:".into();
        settings.openai.api_key = "sk-test".into();
        settings.home_assistant.url = "http://ha.local:8123".into();
        settings.home_assistant.token = "token".into();
        settings.search.api_key = "pplx-test".into();
        settings
    }

    #[tokio::test]
    async fn test_full_wiring() {
        // Building the state exercises the entire collaborator graph
        // without touching the network.
        let state = AppState::build(test_settings(), init_metrics())
            .await
            .unwrap();
        let _router = create_router(state);
    }
}
