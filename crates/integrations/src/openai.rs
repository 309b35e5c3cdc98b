//! OpenAI HTTP clients: chat completions, speech synthesis, embeddings.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use domovoy_config::Settings;
use domovoy_core::{
    ChatMessage, ChatModel, ChatOutcome, ChatRequest, Embedder, ProxyError, Result,
    SpeechSynthesizer, SynthesisRequest, SynthesizedAudio,
};

const API_BASE: &str = "https://api.openai.com/v1";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedding width of `text-embedding-3-small`.
const EMBEDDING_DIMENSIONS: usize = 1536;

fn build_client(api_key: &str) -> Result<Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        format!("Bearer {api_key}")
            .parse()
            .map_err(|_| ProxyError::Internal("invalid api key header".into()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(CALL_TIMEOUT)
        .build()
        .map_err(|e| ProxyError::Internal(format!("http client: {e}")))
}

// Chat completions.

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

pub struct OpenAiChatModel {
    client: Client,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(settings: &Settings, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings.openai.api_key)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let start = Instant::now();
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("openai", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ProxyError::upstream(
                "openai",
                format!("chat completion returned {status}: {detail}"),
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("openai", e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ChatOutcome {
            content,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{API_BASE}/models"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// Speech synthesis.

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
    speed: f32,
}

pub struct OpenAiSpeech {
    client: Client,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings.openai.api_key)?,
            model: settings.openai.tts_model.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesizedAudio> {
        let start = Instant::now();
        tracing::info!(
            text_length = request.text.chars().count(),
            voice = %request.voice,
            "synthesizing speech"
        );

        let body = SpeechRequest {
            model: &self.model,
            voice: &request.voice,
            input: &request.text,
            response_format: &request.format,
            speed: request.speed,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/audio/speech"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("tts", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProxyError::upstream(
                "tts",
                format!("speech synthesis returned {status}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::upstream("tts", e.to_string()))?
            .to_vec();

        let duration_ms = self.estimate_duration_ms(&request.text);
        let synthesis_ms = start.elapsed().as_millis() as u64;
        tracing::info!(audio_size = bytes.len(), synthesis_ms, "speech synthesized");

        Ok(SynthesizedAudio {
            bytes,
            format: request.format,
            duration_ms,
            metadata: serde_json::json!({
                "model": self.model,
                "voice": request.voice,
                "speed": request.speed,
                "synthesis_time_ms": synthesis_ms,
            }),
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{API_BASE}/models"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// Embeddings.

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings.openai.api_key)?,
            model: settings.openai.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/embeddings"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("openai", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProxyError::upstream(
                "openai",
                format!("embeddings returned {status}"),
            ));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("openai", e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProxyError::upstream("openai", "empty embedding response"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

/// Base64 helper shared by audio plumbing.
pub fn encode_audio(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_audio(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| ProxyError::Serialization(format!("bad base64 audio: {e}")))
}
