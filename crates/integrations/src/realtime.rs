//! WebSocket connector for the realtime model API.
//!
//! Bridges one upstream socket into a `ModelChannel`: a write task
//! drains the outbound queue into the socket and a listener task feeds
//! inbound events into the bounded inbound queue, in arrival order.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;

use domovoy_config::Settings;
use domovoy_core::{
    ModelChannel, ModelEvent, ProxyError, RealtimeConnector, Result, SessionSettings,
    EVENT_QUEUE_CAPACITY,
};

pub struct OpenAiRealtimeConnector {
    api_key: String,
    model: String,
}

impl OpenAiRealtimeConnector {
    pub fn new(settings: &Settings) -> Self {
        Self {
            api_key: settings.openai.api_key.clone(),
            model: settings.openai.realtime_model.clone(),
        }
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiRealtimeConnector {
    async fn connect(&self, settings: &SessionSettings) -> Result<ModelChannel> {
        let url = format!("wss://api.openai.com/v1/realtime?model={}", self.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| ProxyError::upstream("realtime", e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| ProxyError::Internal("invalid api key header".into()))?,
        );
        headers.insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| ProxyError::Internal("invalid beta header".into()))?,
        );

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| ProxyError::upstream("realtime", e.to_string()))?;
        tracing::info!(model = %self.model, "realtime socket connected");

        let (mut sink, mut stream) = socket.split();

        // Configure the session before anything else goes over the wire.
        let configure = ModelEvent::session_update(settings);
        sink.send(Message::Text(configure.to_json()))
            .await
            .map_err(|e| ProxyError::upstream("realtime", e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::channel::<ModelEvent>(EVENT_QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<ModelEvent>(EVENT_QUEUE_CAPACITY);

        let write_task = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(event.to_json())).await {
                    tracing::warn!(error = %e, "realtime write failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let read_task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match ModelEvent::from_json(&text) {
                        Ok(event) => {
                            // The inbound queue is the ordering boundary:
                            // events enter it in socket arrival order.
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable realtime event dropped");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "realtime socket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "realtime read failed");
                        break;
                    }
                }
            }
            // Dropping in_tx closes the inbound queue; the session's
            // forwarder observes this as end-of-stream.
        });

        Ok(ModelChannel::with_tasks(
            out_tx,
            in_rx,
            vec![write_task, read_task],
        ))
    }
}
