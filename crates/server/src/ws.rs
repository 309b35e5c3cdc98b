//! Streaming surface: the client⇄proxy WebSocket.
//!
//! The handler owns the socket; a writer task drains the session's
//! client queue into it so forwarded model events and proxy frames
//! interleave in queue order. Teardown runs on every exit path.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use domovoy_core::{ClientMessage, ProxyFrame, SessionSettings, EVENT_QUEUE_CAPACITY};
use domovoy_pipeline::prompts::session_instructions;
use domovoy_realtime::Session;

use crate::metrics;
use crate::state::AppState;
use crate::tools::default_tool_definitions;

pub async fn realtime_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    metrics::set_ws_connections(state.sessions.count() + 1);
    tracing::info!("websocket connection established");

    let (mut sink, mut stream) = socket.split();

    // Everything outbound goes through one queue, preserving order.
    let (client_tx, mut client_rx) = mpsc::channel::<String>(EVENT_QUEUE_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut session: Option<Arc<Session>> = None;
    let mut user_id = "anonymous".to_string();

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed");
                break;
            }
        };

        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                send_frame(
                    &client_tx,
                    &ProxyFrame::Error {
                        message: format!("unknown message: {e}"),
                    },
                )
                .await;
                continue;
            }
        };
        metrics::record_ws_message("inbound", message_type(&parsed));

        if let ClientMessage::Configure {
            user_id: configured_user,
            instructions,
            tools,
        } = parsed
        {
            if session.is_some() {
                send_frame(
                    &client_tx,
                    &ProxyFrame::Error {
                        message: "session already configured".into(),
                    },
                )
                .await;
                continue;
            }

            user_id = configured_user.unwrap_or_else(|| "anonymous".into());

            let instructions = match instructions {
                Some(text) if !text.is_empty() => text,
                _ => {
                    let rules = state
                        .memory
                        .rules(&user_id)
                        .await
                        .map(|rules| rules.into_iter().map(|r| r.content).collect::<Vec<String>>())
                        .unwrap_or_default();
                    session_instructions(&state.settings.assistant, &rules)
                }
            };

            let settings = SessionSettings {
                instructions,
                voice: state.settings.openai.tts_voice.clone(),
                tools: if tools.is_empty() {
                    default_tool_definitions()
                } else {
                    tools
                },
                ..Default::default()
            };

            match state
                .sessions
                .create(
                    &user_id,
                    &settings,
                    state.connector.as_ref(),
                    client_tx.clone(),
                    state.tools.clone(),
                )
                .await
            {
                Ok(created) => {
                    send_frame(
                        &client_tx,
                        &ProxyFrame::Configured {
                            session_id: created.id().to_string(),
                        },
                    )
                    .await;
                    tracing::info!(session_id = %created.id(), user_id = %user_id, "session configured");
                    session = Some(created);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to establish session");
                    send_frame(
                        &client_tx,
                        &ProxyFrame::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
            continue;
        }

        let Some(active) = session.clone() else {
            if matches!(parsed, ClientMessage::Ping) {
                send_frame(&client_tx, &ProxyFrame::Pong).await;
            } else {
                send_frame(
                    &client_tx,
                    &ProxyFrame::Error {
                        message: "Not configured".into(),
                    },
                )
                .await;
            }
            continue;
        };

        // Per-user message budget; ping and audio frames stay exempt to
        // protect liveness.
        if !parsed.rate_limit_exempt() {
            let decision = state.rate_limiter.check(
                "ws_user",
                state.settings.rate_limits.user_messages_per_minute,
                &user_id,
            );
            if !decision.allowed {
                send_frame(
                    &client_tx,
                    &ProxyFrame::Error {
                        message: format!(
                            "Rate limit exceeded. Wait {:.1} seconds.",
                            decision.wait_secs
                        ),
                    },
                )
                .await;
                continue;
            }
        }

        if let Err(e) = active.handle_message(parsed).await {
            tracing::error!(error = %e, session_id = %active.id(), "session error");
            send_frame(
                &client_tx,
                &ProxyFrame::Error {
                    message: e.to_string(),
                },
            )
            .await;
            if e.is_fatal() {
                break;
            }
        }
    }

    // Teardown on every exit path: listener aborted, model channel
    // dropped, queue drained, session removed.
    if let Some(active) = session {
        state.sessions.remove(active.id()).await;
    }
    writer.abort();
    metrics::set_ws_connections(state.sessions.count());
    tracing::info!("websocket cleanup completed");
}

async fn send_frame(client_tx: &mpsc::Sender<String>, frame: &ProxyFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = client_tx.send(json).await;
    }
}

fn message_type(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Configure { .. } => "configure",
        ClientMessage::AudioInput { .. } => "audio_input",
        ClientMessage::AudioCommit => "audio_commit",
        ClientMessage::TextInput { .. } => "text_input",
        ClientMessage::Cancel => "cancel",
        ClientMessage::FunctionResult { .. } => "function_result",
        ClientMessage::Ping => "ping",
    }
}
