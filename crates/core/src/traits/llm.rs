//! Chat-model and embedding seams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::Role;
use crate::error::Result;

/// One message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Completion result.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub total_tokens: Option<u32>,
    pub latency_ms: u64,
}

/// A chat-completion model. The planner and the intent analyzer only see
/// this trait; the vendor client lives in the integrations crate.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome>;

    /// Cheap availability probe for health checks.
    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str;
}

/// Text-embedding provider. Implementations are wrapped in a caching
/// layer by the memory crate.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;
}
