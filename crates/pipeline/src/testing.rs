//! Shared fakes for pipeline tests. Everything here stands behind the
//! core trait seams, so the stages under test run unmodified.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domovoy_config::AssistantConfig;
use domovoy_core::{
    Article, ArticleQuery, ArticleSearch, ChatModel, ChatOutcome, ChatRequest, Embedder,
    HomeAction, HomeAutomation, HomeSnapshot, ProxyError, Result, SearchOutcome, SearchRequest,
    SpeechSynthesizer, SynthesisRequest, SynthesizedAudio, WebSearch,
};
use domovoy_memory::{AuditLog, InMemorySemanticStore, MemoryManager, SqliteRecencyStore};
use domovoy_policy::{classify_query, enforce};

use crate::composer::ResponseComposer;
use crate::context::ContextResolver;
use crate::executor::Executor;
use crate::intent::IntentAnalyzer;
use crate::orchestrator::Pipeline;
use crate::planner::Planner;

/// Scripted chat model: pops canned responses in order; optionally
/// fails every call.
pub struct FakeChatModel {
    responses: Mutex<VecDeque<String>>,
    failing: bool,
}

impl FakeChatModel {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            failing: true,
        }
    }
}

#[async_trait]
impl ChatModel for FakeChatModel {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatOutcome> {
        if self.failing {
            return Err(ProxyError::upstream("openai", "model unavailable"));
        }
        let content = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| "Хорошо".to_string());
        Ok(ChatOutcome {
            content,
            total_tokens: Some(10),
            latency_ms: 1,
        })
    }

    fn model_name(&self) -> &str {
        "fake-chat"
    }
}

/// Recording home-automation fake.
#[derive(Default)]
pub struct FakeHome {
    calls: Mutex<Vec<String>>,
    context_fetches: AtomicUsize,
    confirmation_patterns: Vec<String>,
    reject_all: bool,
    failing_service: Option<String>,
}

impl FakeHome {
    pub fn with_confirmation_list(patterns: Vec<String>) -> Self {
        Self {
            confirmation_patterns: patterns,
            ..Default::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Default::default()
        }
    }

    pub fn failing_service(service_call: &str) -> Self {
        Self {
            failing_service: Some(service_call.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn context_fetches(&self) -> usize {
        self.context_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HomeAutomation for FakeHome {
    async fn get_context(&self) -> Result<HomeSnapshot> {
        self.context_fetches.fetch_add(1, Ordering::SeqCst);
        let states = vec![
            json!({"entity_id": "light.bedroom", "state": "off", "attributes": {"area_id": "bedroom"}}),
            json!({"entity_id": "light.kitchen", "state": "on", "attributes": {"area_id": "kitchen"}}),
            json!({"entity_id": "climate.home", "state": "heat", "attributes": {}}),
        ];
        let areas = vec![json!({"area_id": "bedroom", "name": "Спальня"})];
        Ok(HomeSnapshot::from_states(states, json!({}), areas))
    }

    async fn call_service(&self, action: &HomeAction) -> Result<Value> {
        let call = action.service_call();
        if self.reject_all {
            return Err(ProxyError::PolicyRejected(format!(
                "service {call} is not allowed"
            )));
        }
        if self.failing_service.as_deref() == Some(call.as_str()) {
            return Err(ProxyError::upstream("homeassistant", "unreachable"));
        }
        self.calls.lock().push(call);
        Ok(json!([{"entity_id": "light.bedroom", "state": "on"}]))
    }

    async fn create_automation(&self, config: Value) -> Result<Value> {
        Ok(json!({"success": true, "automation": config}))
    }

    fn is_service_allowed(&self, _service: &str) -> bool {
        !self.reject_all
    }

    fn needs_confirmation(&self, service: &str) -> bool {
        self.confirmation_patterns.iter().any(|pattern| {
            pattern
                .strip_suffix(".*")
                .map(|prefix| service.starts_with(&format!("{prefix}.")))
                .unwrap_or(pattern == service)
        })
    }
}

/// Home adapter whose snapshot fetch always fails.
pub struct FailingHome;

#[async_trait]
impl HomeAutomation for FailingHome {
    async fn get_context(&self) -> Result<HomeSnapshot> {
        Err(ProxyError::upstream("homeassistant", "connection refused"))
    }

    async fn call_service(&self, _action: &HomeAction) -> Result<Value> {
        Err(ProxyError::upstream("homeassistant", "connection refused"))
    }

    async fn create_automation(&self, _config: Value) -> Result<Value> {
        Err(ProxyError::upstream("homeassistant", "connection refused"))
    }

    fn is_service_allowed(&self, _service: &str) -> bool {
        true
    }

    fn needs_confirmation(&self, _service: &str) -> bool {
        false
    }
}

/// Search fake that still runs the real policy pipeline.
#[derive(Default)]
pub struct FakeSearch;

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, request: SearchRequest) -> Result<SearchOutcome> {
        let category = request
            .category
            .unwrap_or_else(|| classify_query(&request.query));
        let policy = enforce(category, request.recency_days);
        Ok(SearchOutcome {
            answer: format!("Ответ на запрос: {}", request.query),
            sources: vec!["https://example.com/source".to_string()],
            category,
            recency_days: policy.recency_days,
            policy,
            from_cache: false,
        })
    }
}

#[derive(Default)]
pub struct FakeArticles;

#[async_trait]
impl ArticleSearch for FakeArticles {
    async fn search(&self, _query: ArticleQuery) -> Result<Vec<Article>> {
        Ok(vec![
            Article {
                title: "Асинхронный Rust на практике".into(),
                link: "https://habr.com/ru/articles/1/".into(),
                published: Some(chrono::Utc::now()),
                summary: "обзор".into(),
                tags: vec!["rust".into()],
                author: "author".into(),
            },
            Article {
                title: "Умный дом без облака".into(),
                link: "https://habr.com/ru/articles/2/".into(),
                published: None,
                summary: String::new(),
                tags: vec!["smart home".into()],
                author: "author".into(),
            },
        ])
    }
}

/// Synthesizer returning a small fixed payload.
pub struct FakeSynth;

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            bytes: vec![1, 2, 3, 4],
            format: request.format,
            duration_ms: self.estimate_duration_ms(&request.text),
            metadata: json!({"voice": request.voice}),
        })
    }
}

pub struct FailingSynth;

#[async_trait]
impl SpeechSynthesizer for FailingSynth {
    async fn synthesize(&self, _request: SynthesisRequest) -> Result<SynthesizedAudio> {
        Err(ProxyError::upstream("tts", "synthesis failed"))
    }
}

/// Deterministic embedder so the semantic tier works offline.
pub struct SimpleEmbedder;

#[async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 16];
        for (i, ch) in text.to_lowercase().chars().enumerate() {
            v[(ch as usize + i) % 16] += 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        16
    }
}

pub async fn manager_with_memories() -> Arc<MemoryManager> {
    let recent = Arc::new(SqliteRecencyStore::in_memory(20).await.unwrap());
    let semantic = Arc::new(InMemorySemanticStore::new(Arc::new(SimpleEmbedder)));
    Arc::new(MemoryManager::new(recent, semantic, true, 0.7))
}

/// Fully wired pipeline over fakes, with handles kept for assertions.
pub struct PipelineParts {
    pub pipeline: Pipeline,
    pub home: Arc<FakeHome>,
    pub memory: Arc<MemoryManager>,
    pub audit: Arc<AuditLog>,
}

pub async fn pipeline_with(model: FakeChatModel, home: FakeHome) -> PipelineParts {
    let model: Arc<dyn ChatModel> = Arc::new(model);
    let home = Arc::new(home);
    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(FakeSynth);

    let store = SqliteRecencyStore::in_memory(20).await.unwrap();
    let audit = Arc::new(AuditLog::new(store.pool()));
    let memory = Arc::new(MemoryManager::new(
        Arc::new(store),
        Arc::new(InMemorySemanticStore::new(Arc::new(SimpleEmbedder))),
        true,
        0.7,
    ));

    let analyzer = IntentAnalyzer::new(model.clone());
    let resolver = ContextResolver::new(home.clone(), memory.clone(), Duration::from_secs(5));
    let planner = Planner::new(
        model.clone(),
        Arc::new(FakeSearch),
        Arc::new(FakeArticles),
        AssistantConfig::default(),
    );
    let executor = Executor::new(home.clone(), memory.clone(), audit.clone());
    let composer = ResponseComposer::new(synthesizer.clone(), "alloy");

    let pipeline = Pipeline::new(
        analyzer,
        resolver,
        planner,
        executor,
        composer,
        memory.clone(),
        model,
        synthesizer,
    );

    PipelineParts {
        pipeline,
        home,
        memory,
        audit,
    }
}
