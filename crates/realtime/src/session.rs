//! Streaming session orchestrator.
//!
//! One session owns one model channel and one forwarder task. The
//! connector's listener feeds the bounded inbound queue; the forwarder
//! drains it in order and writes to the client in order, so event
//! ordering within a response is preserved end to end.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use domovoy_core::{
    ClientMessage, ModelChannel, ModelEvent, ModelEventKind, ProxyError, ProxyFrame, Result,
};

use crate::tools::ToolHandler;

/// Heartbeat interval: a quiet model stream produces a client keepalive
/// ping, never an abort.
pub const HEARTBEAT: Duration = Duration::from_secs(30);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Configured,
    Active,
    Responding,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Clone)]
struct PendingTool {
    call_id: String,
    name: String,
}

struct Shared {
    id: String,
    user_id: String,
    state: RwLock<SessionState>,
    /// Barge-in guard: at most one response.cancel per in-flight
    /// response.
    cancel_sent: AtomicBool,
    pending_tool: Mutex<Option<PendingTool>>,
    model_tx: mpsc::Sender<ModelEvent>,
    client_tx: mpsc::Sender<String>,
    tools: Arc<dyn ToolHandler>,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != SessionState::Closed && *state != SessionState::Error {
            *state = next;
        }
    }

    async fn send_frame(&self, frame: &ProxyFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.client_tx.send(json).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn send_model(&self, event: ModelEvent) -> Result<()> {
        self.model_tx
            .send(event)
            .await
            .map_err(|_| ProxyError::SessionFatal("model channel closed".into()))
    }
}

pub struct Session {
    shared: Arc<Shared>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    pub created_at: Instant,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("user_id", &self.shared.user_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind an established model channel to a client sink and start the
    /// forwarder.
    pub fn start(
        id: impl Into<String>,
        user_id: impl Into<String>,
        channel: ModelChannel,
        client_tx: mpsc::Sender<String>,
        tools: Arc<dyn ToolHandler>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            id: id.into(),
            user_id: user_id.into(),
            state: RwLock::new(SessionState::Configured),
            cancel_sent: AtomicBool::new(false),
            pending_tool: Mutex::new(None),
            model_tx: channel.sender(),
            client_tx,
            tools,
        });

        let forwarder = tokio::spawn(forward_loop(shared.clone(), channel));

        Arc::new(Self {
            shared,
            forwarder: Mutex::new(Some(forwarder)),
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Handle one client message. Replies that the proxy originates
    /// (pong, errors) go straight to the client sink.
    pub async fn handle_message(&self, message: ClientMessage) -> Result<()> {
        let state = self.state();
        if matches!(
            state,
            SessionState::Closing | SessionState::Closed | SessionState::Error
        ) {
            return Err(ProxyError::SessionFatal("session is closed".into()));
        }

        match message {
            ClientMessage::Ping => {
                self.shared.send_frame(&ProxyFrame::Pong).await;
                Ok(())
            }
            ClientMessage::Configure { .. } => {
                self.shared
                    .send_frame(&ProxyFrame::Error {
                        message: "session already configured".into(),
                    })
                    .await;
                Ok(())
            }
            ClientMessage::AudioInput { audio } => {
                self.shared
                    .send_model(ModelEvent::input_audio_append(&audio))
                    .await
            }
            ClientMessage::AudioCommit => {
                self.shared
                    .send_model(ModelEvent::input_audio_commit())
                    .await
            }
            ClientMessage::TextInput { text } => {
                self.shared
                    .send_model(ModelEvent::user_text_item(&text))
                    .await?;
                self.shared.send_model(ModelEvent::response_create()).await
            }
            ClientMessage::Cancel => self.cancel_response().await,
            ClientMessage::FunctionResult { call_id, output } => {
                self.post_function_result(&call_id, &output).await
            }
        }
    }

    /// Barge-in. Idempotent: a second cancel for the same response is a
    /// no-op, and stragglers already queued keep forwarding.
    async fn cancel_response(&self) -> Result<()> {
        if self.state() != SessionState::Responding {
            return Ok(());
        }
        if self.shared.cancel_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(session_id = %self.shared.id, "response cancelled (barge-in)");
        self.shared
            .send_model(ModelEvent::response_cancel())
            .await?;
        self.shared.set_state(SessionState::Active);
        Ok(())
    }

    async fn post_function_result(&self, call_id: &str, output: &Value) -> Result<()> {
        {
            let mut pending = self.shared.pending_tool.lock();
            if pending.as_ref().map(|p| p.call_id.as_str()) == Some(call_id) {
                *pending = None;
            }
        }
        self.shared
            .send_model(ModelEvent::function_call_output(call_id, output))
            .await?;
        self.shared.send_model(ModelEvent::response_create()).await
    }

    /// Release everything: forwarder, model channel, queued events. A
    /// tool call still awaiting its result gets a final audit entry.
    pub async fn teardown(&self) {
        self.shared.set_state(SessionState::Closing);

        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }

        let pending = self.shared.pending_tool.lock().take();
        if let Some(tool) = pending {
            self.shared
                .tools
                .record_abandoned(&self.shared.user_id, &tool.call_id, &tool.name)
                .await;
        }

        self.shared.set_state(SessionState::Closed);
        tracing::info!(session_id = %self.shared.id, "session torn down");
    }
}

/// Dequeue model events in order and write them to the client in order.
async fn forward_loop(shared: Arc<Shared>, mut channel: ModelChannel) {
    loop {
        let event = match timeout(HEARTBEAT, channel.recv()).await {
            // Quiet stream: keepalive, not an abort.
            Err(_) => {
                if !shared.send_frame(&ProxyFrame::Ping).await {
                    break;
                }
                continue;
            }
            Ok(None) => {
                tracing::info!(session_id = %shared.id, "model stream ended");
                break;
            }
            Ok(Some(event)) => event,
        };

        match &event.kind {
            ModelEventKind::SessionUpdated => {
                if *shared.state.read() == SessionState::Configured {
                    shared.set_state(SessionState::Active);
                }
            }
            ModelEventKind::ResponseCreated => {
                shared.set_state(SessionState::Responding);
                shared.cancel_sent.store(false, Ordering::SeqCst);
            }
            ModelEventKind::ResponseDone | ModelEventKind::ResponseCancelled => {
                shared.set_state(SessionState::Active);
            }
            ModelEventKind::ResponseFunctionCallArgumentsDone => {
                spawn_tool_call(&shared, &event);
            }
            ModelEventKind::Error => {
                tracing::error!(
                    session_id = %shared.id,
                    message = event.error_message().as_deref().unwrap_or("unknown"),
                    "model reported error"
                );
            }
            _ => {}
        }

        // Forward verbatim, in dequeue order.
        if shared.client_tx.send(event.to_json()).await.is_err() {
            tracing::info!(session_id = %shared.id, "client sink closed");
            break;
        }
    }

    shared.set_state(SessionState::Closed);
}

/// Execute a model-requested tool without blocking the forwarder:
/// deltas keep flowing while the tool runs, and the function result is
/// posted upstream when it completes.
fn spawn_tool_call(shared: &Arc<Shared>, event: &ModelEvent) {
    let Some(call_id) = event.call_id().map(str::to_string) else {
        tracing::warn!(session_id = %shared.id, "function call without call_id");
        return;
    };
    let name = event.function_name().unwrap_or("unknown").to_string();
    let arguments = event.arguments();

    *shared.pending_tool.lock() = Some(PendingTool {
        call_id: call_id.clone(),
        name: name.clone(),
    });

    let shared = shared.clone();
    tokio::spawn(async move {
        tracing::info!(session_id = %shared.id, tool = %name, %call_id, "executing tool");
        let output = shared
            .tools
            .execute(&shared.user_id, &name, arguments)
            .await;

        {
            let mut pending = shared.pending_tool.lock();
            if pending.as_ref().map(|p| p.call_id.as_str()) == Some(call_id.as_str()) {
                *pending = None;
            }
        }

        if shared
            .send_model(ModelEvent::function_call_output(&call_id, &output))
            .await
            .is_err()
        {
            tracing::warn!(session_id = %shared.id, "model channel closed before tool result");
            return;
        }
        let _ = shared.send_model(ModelEvent::response_create()).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::NoTools;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        session: Arc<Session>,
        /// Events the "model" receives from the proxy.
        upstream: mpsc::Receiver<ModelEvent>,
        /// Injects model events into the session.
        inject: mpsc::Sender<ModelEvent>,
        /// Frames the client receives.
        client: mpsc::Receiver<String>,
    }

    fn harness_with_tools(tools: Arc<dyn ToolHandler>) -> Harness {
        let (out_tx, upstream) = mpsc::channel(64);
        let (inject, in_rx) = mpsc::channel(64);
        let channel = ModelChannel::new(out_tx, in_rx);
        let (client_tx, client) = mpsc::channel(64);
        let session = Session::start("s1", "u", channel, client_tx, tools);
        Harness {
            session,
            upstream,
            inject,
            client,
        }
    }

    fn harness() -> Harness {
        harness_with_tools(Arc::new(NoTools))
    }

    fn event(json: Value) -> ModelEvent {
        ModelEvent::from_value(json).unwrap()
    }

    async fn recv_client(harness: &mut Harness) -> Value {
        let raw = harness.client.recv().await.expect("client frame");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_forwarding_preserves_order() {
        let mut h = harness();

        h.inject.send(event(json!({"type": "response.created", "response": {"id": "r1"}}))).await.unwrap();
        for i in 0..3 {
            h.inject
                .send(event(json!({
                    "type": "response.audio.delta",
                    "response_id": "r1",
                    "delta": format!("chunk{i}"),
                })))
                .await
                .unwrap();
        }
        h.inject.send(event(json!({"type": "response.done", "response": {"id": "r1"}}))).await.unwrap();

        assert_eq!(recv_client(&mut h).await["type"], "response.created");
        for i in 0..3 {
            let frame = recv_client(&mut h).await;
            assert_eq!(frame["type"], "response.audio.delta");
            assert_eq!(frame["delta"], format!("chunk{i}"));
        }
        assert_eq!(recv_client(&mut h).await["type"], "response.done");
        // response.done lands after every delta, and the session is
        // accepting input again.
        tokio::task::yield_now().await;
        assert_eq!(h.session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mut h = harness();
        assert_eq!(h.session.state(), SessionState::Configured);

        h.inject.send(event(json!({"type": "session.updated"}))).await.unwrap();
        recv_client(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Active);

        h.inject.send(event(json!({"type": "response.created"}))).await.unwrap();
        recv_client(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Responding);

        h.inject.send(event(json!({"type": "response.done"}))).await.unwrap();
        recv_client(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_barge_in_is_idempotent() {
        let mut h = harness();
        h.inject.send(event(json!({"type": "response.created"}))).await.unwrap();
        recv_client(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Responding);

        h.session.handle_message(ClientMessage::Cancel).await.unwrap();
        h.session.handle_message(ClientMessage::Cancel).await.unwrap();

        // Exactly one response.cancel went upstream.
        let first = h.upstream.recv().await.unwrap();
        assert_eq!(first.kind, ModelEventKind::ResponseCancel);
        assert!(h.upstream.try_recv().is_err());
        assert_eq!(h.session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_stragglers_forward_after_cancel() {
        let mut h = harness();
        h.inject.send(event(json!({"type": "response.created"}))).await.unwrap();
        recv_client(&mut h).await;

        h.session.handle_message(ClientMessage::Cancel).await.unwrap();
        let _ = h.upstream.recv().await.unwrap();

        // A delta that was already queued still reaches the client.
        h.inject
            .send(event(json!({"type": "response.audio.delta", "delta": "tail"})))
            .await
            .unwrap();
        h.inject.send(event(json!({"type": "response.cancelled"}))).await.unwrap();

        assert_eq!(recv_client(&mut h).await["type"], "response.audio.delta");
        assert_eq!(recv_client(&mut h).await["type"], "response.cancelled");
    }

    #[tokio::test]
    async fn test_new_turn_after_barge_in() {
        let mut h = harness();
        h.inject.send(event(json!({"type": "response.created"}))).await.unwrap();
        recv_client(&mut h).await;
        h.session.handle_message(ClientMessage::Cancel).await.unwrap();
        let _ = h.upstream.recv().await.unwrap();

        h.session
            .handle_message(ClientMessage::TextInput {
                text: "включи свет".into(),
            })
            .await
            .unwrap();

        let item = h.upstream.recv().await.unwrap();
        assert_eq!(item.kind, ModelEventKind::ConversationItemCreate);
        assert_eq!(
            item.payload["item"]["content"][0]["text"],
            "включи свет"
        );
        let trigger = h.upstream.recv().await.unwrap();
        assert_eq!(trigger.kind, ModelEventKind::ResponseCreate);
    }

    #[tokio::test]
    async fn test_audio_input_and_commit_forward() {
        let mut h = harness();
        h.session
            .handle_message(ClientMessage::AudioInput {
                audio: "AAAA".into(),
            })
            .await
            .unwrap();
        h.session.handle_message(ClientMessage::AudioCommit).await.unwrap();

        let append = h.upstream.recv().await.unwrap();
        assert_eq!(append.kind, ModelEventKind::InputAudioBufferAppend);
        assert_eq!(append.payload["audio"], "AAAA");
        let commit = h.upstream.recv().await.unwrap();
        assert_eq!(commit.kind, ModelEventKind::InputAudioBufferCommit);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let mut h = harness();
        h.session.handle_message(ClientMessage::Ping).await.unwrap();
        assert_eq!(recv_client(&mut h).await["type"], "pong");
    }

    struct RecordingTool {
        executed: Mutex<Vec<(String, Value)>>,
        abandoned: Mutex<Vec<String>>,
    }

    impl RecordingTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executed: Mutex::new(Vec::new()),
                abandoned: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolHandler for RecordingTool {
        async fn execute(&self, _user_id: &str, name: &str, arguments: Value) -> Value {
            self.executed.lock().push((name.to_string(), arguments));
            json!({"ok": true})
        }

        async fn record_abandoned(&self, _user_id: &str, call_id: &str, _name: &str) {
            self.abandoned.lock().push(call_id.to_string());
        }
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let tool = RecordingTool::new();
        let mut h = harness_with_tools(tool.clone());

        h.inject.send(event(json!({"type": "response.created"}))).await.unwrap();
        h.inject
            .send(event(json!({
                "type": "response.function_call_arguments.done",
                "call_id": "c1",
                "name": "run_command",
                "arguments": "{\"command\": \"включи свет\"}",
            })))
            .await
            .unwrap();

        // The tool event itself is forwarded to the client too.
        recv_client(&mut h).await;
        assert_eq!(
            recv_client(&mut h).await["type"],
            "response.function_call_arguments.done"
        );

        // Proxy posts the result and resumes the response.
        let output = h.upstream.recv().await.unwrap();
        assert_eq!(output.kind, ModelEventKind::ConversationItemCreate);
        assert_eq!(output.payload["item"]["type"], "function_call_output");
        assert_eq!(output.payload["item"]["call_id"], "c1");
        let resume = h.upstream.recv().await.unwrap();
        assert_eq!(resume.kind, ModelEventKind::ResponseCreate);

        assert_eq!(tool.executed.lock().len(), 1);
        assert_eq!(tool.executed.lock()[0].0, "run_command");

        // Model resumes with deltas, then done; client sees them in
        // order.
        h.inject
            .send(event(json!({"type": "response.text.delta", "delta": "гот"})))
            .await
            .unwrap();
        h.inject.send(event(json!({"type": "response.done"}))).await.unwrap();
        assert_eq!(recv_client(&mut h).await["type"], "response.text.delta");
        assert_eq!(recv_client(&mut h).await["type"], "response.done");
    }

    #[tokio::test]
    async fn test_pending_tool_audited_at_teardown() {
        struct SlowTool {
            abandoned: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ToolHandler for SlowTool {
            async fn execute(&self, _u: &str, _n: &str, _a: Value) -> Value {
                // Never completes within the test.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                json!({})
            }

            async fn record_abandoned(&self, _u: &str, call_id: &str, _n: &str) {
                self.abandoned.lock().push(call_id.to_string());
            }
        }

        let tool = Arc::new(SlowTool {
            abandoned: Mutex::new(Vec::new()),
        });
        let mut h = harness_with_tools(tool.clone());

        h.inject
            .send(event(json!({
                "type": "response.function_call_arguments.done",
                "call_id": "c9",
                "name": "run_command",
                "arguments": "{}",
            })))
            .await
            .unwrap();
        recv_client(&mut h).await;

        h.session.teardown().await;
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(tool.abandoned.lock().as_slice(), ["c9".to_string()]);
    }

    #[tokio::test]
    async fn test_teardown_closes_channel() {
        let h = harness();
        h.session.teardown().await;
        assert_eq!(h.session.state(), SessionState::Closed);

        // After teardown the session refuses input.
        let err = h
            .session
            .handle_message(ClientMessage::TextInput { text: "x".into() })
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_model_stream_end_closes_session() {
        let mut h = harness();
        // Dropping the injector ends the inbound stream.
        let inject = std::mem::replace(&mut h.inject, mpsc::channel(1).0);
        drop(inject);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_stream_sends_keepalive() {
        let mut h = harness();
        // Virtual time jumps past the heartbeat while the stream stays
        // quiet.
        let frame = recv_client(&mut h).await;
        assert_eq!(frame["type"], "ping");
        // The session is still alive.
        assert_ne!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_in_active_state_is_noop() {
        let mut h = harness();
        h.inject.send(event(json!({"type": "session.updated"}))).await.unwrap();
        recv_client(&mut h).await;

        h.session.handle_message(ClientMessage::Cancel).await.unwrap();
        assert!(h.upstream.try_recv().is_err());
    }
}
