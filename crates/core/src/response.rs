//! Composed responses: what the pipeline hands back to whichever
//! channel asked.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{ExecutionReport, HomeAction, PlanKind};
use crate::search::Article;

/// Output channel a response is rendered for. Each channel gets its own
/// formatting in the composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Voice,
    Text,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Voice => "voice",
            Channel::Text => "text",
            Channel::Telegram => "telegram",
        }
    }
}

/// Synthesized speech attached to a voice response. Audio bytes travel
/// base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    pub data: String,
    pub format: String,
    pub size: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: Value,
}

/// Timing and provenance attached to every pipeline response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub steps_completed: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal pipeline response, shaped for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedResponse {
    #[serde(rename = "type")]
    pub kind: PlanKind,
    pub intent: String,
    pub text: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<HomeAction>,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<Article>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioPayload>,
    /// Present when TTS failed; the text response still stands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineMeta>,
}

impl ComposedResponse {
    pub fn error(intent: impl Into<String>, text: impl Into<String>, channel: Channel) -> Self {
        Self {
            kind: PlanKind::ErrorResponse,
            intent: intent.into(),
            text: text.into(),
            channel,
            execution: None,
            actions: Vec::new(),
            needs_confirmation: false,
            sources: Vec::new(),
            articles: Vec::new(),
            audio: None,
            audio_error: None,
            pipeline: None,
        }
    }
}

/// Chunks yielded by the streaming composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamedResponse {
    StreamChunk {
        channel: Channel,
        text: String,
        accumulated: String,
    },
    StreamComplete {
        channel: Channel,
        text: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(
            serde_json::to_string(&Channel::Telegram).unwrap(),
            "\"telegram\""
        );
        assert_eq!(serde_json::to_string(&Channel::Voice).unwrap(), "\"voice\"");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ComposedResponse::error("unknown", "что-то пошло не так", Channel::Text);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "error_response");
        assert_eq!(json["channel"], "text");
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn test_stream_chunk_tag() {
        let chunk = StreamedResponse::StreamChunk {
            channel: Channel::Voice,
            text: "при".into(),
            accumulated: "при".into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "stream_chunk");
    }
}
