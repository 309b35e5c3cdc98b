//! Wire types for the streaming surfaces.
//!
//! Two protocols meet in the session orchestrator: the client⇄proxy
//! JSON envelope (`ClientMessage`/`ProxyFrame`) and the proxy⇄model
//! realtime event stream (`ModelEvent`). Model events keep their full
//! JSON payload so the forwarder can pass them to the client verbatim;
//! only the `type` field is interpreted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};

/// Bound of the per-session event queue between listener and forwarder.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Upstream realtime event names. `Other` carries anything the schema
/// does not know so it can still be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEventKind {
    SessionUpdate,
    SessionUpdated,
    ConversationItemCreate,
    ConversationItemCreated,
    ConversationItemTruncate,
    InputAudioBufferAppend,
    InputAudioBufferCommit,
    InputAudioBufferClear,
    InputAudioBufferCommitted,
    InputAudioBufferSpeechStarted,
    InputAudioBufferSpeechStopped,
    ResponseCreate,
    ResponseCreated,
    ResponseDone,
    ResponseCancel,
    ResponseCancelled,
    ResponseOutputItemAdded,
    ResponseOutputItemDone,
    ResponseContentPartAdded,
    ResponseContentPartDone,
    ResponseAudioDelta,
    ResponseAudioDone,
    ResponseAudioTranscriptDelta,
    ResponseAudioTranscriptDone,
    ResponseTextDelta,
    ResponseTextDone,
    ResponseFunctionCallArgumentsDelta,
    ResponseFunctionCallArgumentsDone,
    Error,
    RateLimitsUpdated,
    Other(String),
}

impl ModelEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionUpdate => "session.update",
            Self::SessionUpdated => "session.updated",
            Self::ConversationItemCreate => "conversation.item.create",
            Self::ConversationItemCreated => "conversation.item.created",
            Self::ConversationItemTruncate => "conversation.item.truncate",
            Self::InputAudioBufferAppend => "input_audio_buffer.append",
            Self::InputAudioBufferCommit => "input_audio_buffer.commit",
            Self::InputAudioBufferClear => "input_audio_buffer.clear",
            Self::InputAudioBufferCommitted => "input_audio_buffer.committed",
            Self::InputAudioBufferSpeechStarted => "input_audio_buffer.speech_started",
            Self::InputAudioBufferSpeechStopped => "input_audio_buffer.speech_stopped",
            Self::ResponseCreate => "response.create",
            Self::ResponseCreated => "response.created",
            Self::ResponseDone => "response.done",
            Self::ResponseCancel => "response.cancel",
            Self::ResponseCancelled => "response.cancelled",
            Self::ResponseOutputItemAdded => "response.output_item.added",
            Self::ResponseOutputItemDone => "response.output_item.done",
            Self::ResponseContentPartAdded => "response.content_part.added",
            Self::ResponseContentPartDone => "response.content_part.done",
            Self::ResponseAudioDelta => "response.audio.delta",
            Self::ResponseAudioDone => "response.audio.done",
            Self::ResponseAudioTranscriptDelta => "response.audio_transcript.delta",
            Self::ResponseAudioTranscriptDone => "response.audio_transcript.done",
            Self::ResponseTextDelta => "response.text.delta",
            Self::ResponseTextDone => "response.text.done",
            Self::ResponseFunctionCallArgumentsDelta => "response.function_call_arguments.delta",
            Self::ResponseFunctionCallArgumentsDone => "response.function_call_arguments.done",
            Self::Error => "error",
            Self::RateLimitsUpdated => "rate_limits.updated",
            Self::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "session.update" => Self::SessionUpdate,
            "session.updated" => Self::SessionUpdated,
            "conversation.item.create" => Self::ConversationItemCreate,
            "conversation.item.created" => Self::ConversationItemCreated,
            "conversation.item.truncate" => Self::ConversationItemTruncate,
            "input_audio_buffer.append" => Self::InputAudioBufferAppend,
            "input_audio_buffer.commit" => Self::InputAudioBufferCommit,
            "input_audio_buffer.clear" => Self::InputAudioBufferClear,
            "input_audio_buffer.committed" => Self::InputAudioBufferCommitted,
            "input_audio_buffer.speech_started" => Self::InputAudioBufferSpeechStarted,
            "input_audio_buffer.speech_stopped" => Self::InputAudioBufferSpeechStopped,
            "response.create" => Self::ResponseCreate,
            "response.created" => Self::ResponseCreated,
            "response.done" => Self::ResponseDone,
            "response.cancel" => Self::ResponseCancel,
            "response.cancelled" => Self::ResponseCancelled,
            "response.output_item.added" => Self::ResponseOutputItemAdded,
            "response.output_item.done" => Self::ResponseOutputItemDone,
            "response.content_part.added" => Self::ResponseContentPartAdded,
            "response.content_part.done" => Self::ResponseContentPartDone,
            "response.audio.delta" => Self::ResponseAudioDelta,
            "response.audio.done" => Self::ResponseAudioDone,
            "response.audio_transcript.delta" => Self::ResponseAudioTranscriptDelta,
            "response.audio_transcript.done" => Self::ResponseAudioTranscriptDone,
            "response.text.delta" => Self::ResponseTextDelta,
            "response.text.done" => Self::ResponseTextDone,
            "response.function_call_arguments.delta" => Self::ResponseFunctionCallArgumentsDelta,
            "response.function_call_arguments.done" => Self::ResponseFunctionCallArgumentsDone,
            "error" => Self::Error,
            "rate_limits.updated" => Self::RateLimitsUpdated,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One realtime event with its complete JSON payload. Serializing an
/// event yields exactly the payload it was parsed from.
#[derive(Debug, Clone)]
pub struct ModelEvent {
    pub kind: ModelEventKind,
    pub payload: Value,
}

impl ModelEvent {
    /// Build an event of `kind` from extra payload fields.
    pub fn new(kind: ModelEventKind, mut payload: Value) -> Self {
        if let Value::Object(ref mut map) = payload {
            map.insert("type".into(), Value::String(kind.as_str().to_string()));
        }
        Self { kind, payload }
    }

    /// Parse an inbound event, keeping every payload field.
    pub fn from_value(payload: Value) -> Result<Self> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .map(ModelEventKind::from_name)
            .ok_or_else(|| ProxyError::Serialization("event without type field".into()))?;
        Ok(Self { kind, payload })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(raw)?;
        Self::from_value(payload)
    }

    pub fn to_json(&self) -> String {
        self.payload.to_string()
    }

    // Client-to-model constructors.

    pub fn session_update(settings: &SessionSettings) -> Self {
        Self::new(
            ModelEventKind::SessionUpdate,
            json!({ "session": settings.to_session_object() }),
        )
    }

    pub fn input_audio_append(audio_base64: &str) -> Self {
        Self::new(
            ModelEventKind::InputAudioBufferAppend,
            json!({ "audio": audio_base64 }),
        )
    }

    pub fn input_audio_commit() -> Self {
        Self::new(ModelEventKind::InputAudioBufferCommit, json!({}))
    }

    pub fn user_text_item(text: &str) -> Self {
        Self::new(
            ModelEventKind::ConversationItemCreate,
            json!({
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }],
                }
            }),
        )
    }

    pub fn function_call_output(call_id: &str, output: &Value) -> Self {
        Self::new(
            ModelEventKind::ConversationItemCreate,
            json!({
                "item": {
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output.to_string(),
                }
            }),
        )
    }

    pub fn response_create() -> Self {
        Self::new(
            ModelEventKind::ResponseCreate,
            json!({ "response": { "modalities": ["text", "audio"] } }),
        )
    }

    pub fn response_cancel() -> Self {
        Self::new(ModelEventKind::ResponseCancel, json!({}))
    }

    // Payload accessors.

    pub fn delta(&self) -> Option<&str> {
        self.payload.get("delta").and_then(Value::as_str)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.payload.get("call_id").and_then(Value::as_str)
    }

    pub fn function_name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    pub fn arguments(&self) -> Value {
        self.payload
            .get("arguments")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }

    pub fn error_message(&self) -> Option<String> {
        self.payload.get("error").map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
    }
}

/// Configuration sent upstream when a session is established.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub instructions: String,
    pub voice: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub tools: Vec<Value>,
    pub transcription: bool,
}

impl SessionSettings {
    /// The `session` object of a `session.update` event: text+audio
    /// modalities, pcm16 both ways, server VAD turn detection.
    pub fn to_session_object(&self) -> Value {
        let mut session = json!({
            "modalities": ["text", "audio"],
            "instructions": self.instructions,
            "voice": self.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
            },
            "temperature": self.temperature,
            "max_response_output_tokens": self.max_output_tokens,
        });
        if self.transcription {
            session["input_audio_transcription"] = json!({ "model": "whisper-1" });
        }
        if !self.tools.is_empty() {
            session["tools"] = Value::Array(self.tools.clone());
            session["tool_choice"] = json!("auto");
        }
        session
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            voice: "alloy".to_string(),
            temperature: 0.8,
            max_output_tokens: 1000,
            tools: Vec::new(),
            transcription: true,
        }
    }
}

/// Duplex channel to the model, as handed out by a `RealtimeConnector`.
///
/// The connector bridges its transport into the two queues and keeps the
/// bridge tasks registered here so teardown can abort them. A session
/// owns its channel exclusively.
pub struct ModelChannel {
    outbound: mpsc::Sender<ModelEvent>,
    inbound: mpsc::Receiver<ModelEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ModelChannel {
    pub fn new(
        outbound: mpsc::Sender<ModelEvent>,
        inbound: mpsc::Receiver<ModelEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(
        outbound: mpsc::Sender<ModelEvent>,
        inbound: mpsc::Receiver<ModelEvent>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    /// Send one event upstream. A closed transport is fatal for the
    /// session.
    pub async fn send(&self, event: ModelEvent) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ProxyError::SessionFatal("model channel closed".into()))
    }

    /// Clone of the upstream sender, for tool-result posting from a
    /// spawned task.
    pub fn sender(&self) -> mpsc::Sender<ModelEvent> {
        self.outbound.clone()
    }

    /// Receive the next event from the model. `None` means the listener
    /// side has shut down.
    pub async fn recv(&mut self) -> Option<ModelEvent> {
        self.inbound.recv().await
    }
}

impl Drop for ModelChannel {
    /// Dropping the channel aborts the bridge tasks, so every teardown
    /// path releases the transport.
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.inbound.close();
    }
}

/// Messages a client sends over the proxy's streaming surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Configure {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        instructions: Option<String>,
        #[serde(default)]
        tools: Vec<Value>,
    },
    /// Base64-encoded PCM16. Never rate-limited.
    AudioInput { audio: String },
    AudioCommit,
    TextInput { text: String },
    /// Barge-in. Idempotent.
    Cancel,
    FunctionResult { call_id: String, output: Value },
    /// Never rate-limited.
    Ping,
}

impl ClientMessage {
    /// Message types exempt from the per-user rate limit, to protect
    /// liveness.
    pub fn rate_limit_exempt(&self) -> bool {
        matches!(self, ClientMessage::Ping | ClientMessage::AudioInput { .. })
    }
}

/// Frames the proxy originates toward the client (forwarded model events
/// are sent verbatim, outside this enum).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyFrame {
    Configured { session_id: String },
    Pong,
    /// Keepalive when the model has been quiet for a while.
    Ping,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        for name in [
            "session.update",
            "response.audio.delta",
            "response.function_call_arguments.done",
            "input_audio_buffer.speech_started",
            "rate_limits.updated",
        ] {
            assert_eq!(ModelEventKind::from_name(name).as_str(), name);
        }
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let kind = ModelEventKind::from_name("response.future_thing");
        assert_eq!(kind.as_str(), "response.future_thing");
    }

    #[test]
    fn test_parse_keeps_payload_verbatim() {
        let raw = r#"{"type":"response.audio.delta","response_id":"r1","delta":"AAAA"}"#;
        let event = ModelEvent::from_json(raw).unwrap();
        assert_eq!(event.kind, ModelEventKind::ResponseAudioDelta);
        assert_eq!(event.delta(), Some("AAAA"));
        assert_eq!(event.payload["response_id"], "r1");
    }

    #[test]
    fn test_session_update_shape() {
        let settings = SessionSettings {
            instructions: "будь краток".into(),
            tools: vec![json!({"type": "function", "name": "run_command"})],
            ..Default::default()
        };
        let event = ModelEvent::session_update(&settings);
        assert_eq!(event.payload["type"], "session.update");
        let session = &event.payload["session"];
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["threshold"], 0.5);
        assert_eq!(session["tool_choice"], "auto");
    }

    #[test]
    fn test_function_call_output_event() {
        let event = ModelEvent::function_call_output("c1", &json!({"ok": true}));
        assert_eq!(event.payload["item"]["type"], "function_call_output");
        assert_eq!(event.payload["item"]["call_id"], "c1");
    }

    #[test]
    fn test_arguments_parsing_is_defensive() {
        let event = ModelEvent::from_value(json!({
            "type": "response.function_call_arguments.done",
            "call_id": "c1",
            "name": "run_command",
            "arguments": "not json",
        }))
        .unwrap();
        assert_eq!(event.arguments(), json!({}));
    }

    #[test]
    fn test_client_message_envelope() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"text_input","text":"включи свет"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::TextInput { .. }));

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(ping.rate_limit_exempt());

        let audio: ClientMessage =
            serde_json::from_str(r#"{"type":"audio_input","audio":"AAAA"}"#).unwrap();
        assert!(audio.rate_limit_exempt());
    }

    #[tokio::test]
    async fn test_model_channel_send_after_close_is_fatal() {
        let (out_tx, out_rx) = mpsc::channel(4);
        let (_in_tx, in_rx) = mpsc::channel(4);
        let channel = ModelChannel::new(out_tx, in_rx);
        drop(out_rx);
        let err = channel.send(ModelEvent::response_cancel()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
