//! Application state: every collaborator constructed once at startup
//! and injected into handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use domovoy_config::Settings;
use domovoy_core::{
    ArticleSearch, ChatModel, Embedder, HomeAutomation, Messenger, RateLimiter, RealtimeConnector,
    Result, SpeechSynthesizer, WebSearch,
};
use domovoy_integrations::{
    HabrClient, HomeAssistantClient, OpenAiChatModel, OpenAiEmbedder, OpenAiRealtimeConnector,
    OpenAiSpeech, PerplexityClient, TelegramClient,
};
use domovoy_memory::{
    AuditLog, CachingEmbedder, InMemorySemanticStore, MemoryManager, QdrantSemanticStore,
    SemanticStore, SqliteRecencyStore,
};
use domovoy_pipeline::{
    ContextResolver, Executor, IntentAnalyzer, Pipeline, Planner, ResponseComposer,
};
use domovoy_realtime::{SessionRegistry, ToolHandler};

use crate::tools::PipelineToolHandler;

const MAX_SESSIONS: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pipeline: Arc<Pipeline>,
    pub memory: Arc<MemoryManager>,
    pub home: Arc<dyn HomeAutomation>,
    pub search: Arc<dyn WebSearch>,
    pub articles: Arc<dyn ArticleSearch>,
    pub messenger: Arc<dyn Messenger>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub sessions: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tools: Arc<dyn ToolHandler>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Wire the full collaborator graph from settings. Fails fast on
    /// anything unreachable that is required (database, vector store).
    pub async fn build(settings: Settings, metrics: PrometheusHandle) -> Result<Self> {
        let settings = Arc::new(settings);
        let rate_limiter = Arc::new(RateLimiter::new());

        // Stores.
        let recency = Arc::new(
            SqliteRecencyStore::connect(
                &settings.database.url,
                settings.memory.short_term_memory_size,
            )
            .await?,
        );
        let audit = Arc::new(AuditLog::new(recency.pool()));

        let embedder: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(Arc::new(
            OpenAiEmbedder::new(&settings)?,
        )));

        let semantic: Arc<dyn SemanticStore> = if settings.database.qdrant_url.is_empty() {
            tracing::info!("no qdrant endpoint configured, using in-process semantic store");
            Arc::new(InMemorySemanticStore::new(embedder.clone()))
        } else {
            tracing::info!(url = %settings.database.qdrant_url, "connecting qdrant semantic store");
            Arc::new(
                QdrantSemanticStore::connect(
                    &settings.database.qdrant_url,
                    settings.database.qdrant_api_key.as_deref(),
                    embedder.clone(),
                )
                .await?,
            )
        };

        let memory = Arc::new(MemoryManager::new(
            recency,
            semantic,
            settings.memory.long_term_memory_enabled,
            settings.memory.min_similarity,
        ));

        // Adapters.
        let home: Arc<dyn HomeAutomation> = Arc::new(HomeAssistantClient::new(&settings)?);
        let search: Arc<dyn WebSearch> =
            Arc::new(PerplexityClient::new(&settings, rate_limiter.clone())?);
        let articles: Arc<dyn ArticleSearch> =
            Arc::new(HabrClient::new(&settings, rate_limiter.clone())?);
        let messenger: Arc<dyn Messenger> = Arc::new(TelegramClient::new(&settings)?);
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(OpenAiSpeech::new(&settings)?);
        let planner_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(
            &settings,
            settings.openai.chat_model.clone(),
        )?);
        let intent_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(
            &settings,
            settings.openai.intent_model.clone(),
        )?);

        // Pipeline.
        let analyzer = IntentAnalyzer::new(intent_model);
        let resolver = ContextResolver::new(
            home.clone(),
            memory.clone(),
            Duration::from_secs(settings.cache.context_ttl_secs),
        );
        let planner = Planner::new(
            planner_model.clone(),
            search.clone(),
            articles.clone(),
            settings.assistant.clone(),
        );
        let executor = Executor::new(home.clone(), memory.clone(), audit.clone());
        let composer = ResponseComposer::new(synthesizer.clone(), settings.openai.tts_voice.clone());
        let pipeline = Arc::new(Pipeline::new(
            analyzer,
            resolver,
            planner,
            executor,
            composer,
            memory.clone(),
            planner_model,
            synthesizer,
        ));

        // Streaming.
        let connector: Arc<dyn RealtimeConnector> = Arc::new(OpenAiRealtimeConnector::new(&settings));
        let sessions = Arc::new(SessionRegistry::new(MAX_SESSIONS));
        let tools: Arc<dyn ToolHandler> = Arc::new(PipelineToolHandler::new(
            pipeline.clone(),
            search.clone(),
            memory.clone(),
            audit,
        ));

        Ok(Self {
            settings,
            pipeline,
            memory,
            home,
            search,
            articles,
            messenger,
            connector,
            sessions,
            rate_limiter,
            tools,
            metrics,
        })
    }

    /// Whether the home-automation backend answers.
    pub async fn home_reachable(&self) -> bool {
        self.home.get_context().await.is_ok()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions.count())
            .finish()
    }
}
