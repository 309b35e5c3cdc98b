//! Telegram Bot API sender.
//!
//! Outbound only. When no token or chat id is configured the client is
//! disabled and sends report `false` instead of failing the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use domovoy_config::Settings;
use domovoy_core::{Messenger, ProxyError, Result};

const API_BASE: &str = "https://api.telegram.org";
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    credentials: Option<(String, String)>,
}

impl TelegramClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Internal(format!("http client: {e}")))?;

        let credentials = match (&settings.telegram.bot_token, &settings.telegram.chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                tracing::info!(chat_id = %chat_id, "telegram bot enabled");
                Some((token.clone(), chat_id.clone()))
            }
            _ => {
                tracing::info!("telegram bot disabled (missing token or chat_id)");
                None
            }
        };

        Ok(Self {
            client,
            credentials,
        })
    }

    /// Formatted notification with a priority marker.
    pub async fn send_notification(&self, title: &str, message: &str, priority: &str) -> Result<bool> {
        let marker = match priority {
            "low" => "ℹ️",
            "high" => "⚠️",
            "urgent" => "🚨",
            _ => "📢",
        };
        self.send_message(&format!("{marker} *{title}*\n\n{message}"), "Markdown", false)
            .await
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        text: &str,
        parse_mode: &str,
        disable_preview: bool,
    ) -> Result<bool> {
        let Some((token, chat_id)) = &self.credentials else {
            tracing::warn!("telegram not enabled, message not sent");
            return Ok(false);
        };

        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: (!parse_mode.is_empty()).then_some(parse_mode),
            disable_web_page_preview: disable_preview,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/bot{token}/sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("telegram", e.to_string()))?;

        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("telegram", e.to_string()))?;

        if parsed.ok {
            tracing::info!(text_length = text.chars().count(), "telegram message sent");
        } else {
            tracing::error!(
                description = parsed.description.as_deref().unwrap_or("unknown"),
                "telegram send failed"
            );
        }
        Ok(parsed.ok)
    }

    fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_client_reports_false() {
        let client = TelegramClient::new(&Settings::default()).unwrap();
        assert!(!client.is_enabled());
        let sent = client.send_message("текст", "Markdown", false).await.unwrap();
        assert!(!sent);
    }

    #[test]
    fn test_enabled_with_credentials() {
        let mut settings = Settings::default();
        settings.telegram.bot_token = Some("123:abc".into());
        settings.telegram.chat_id = Some("42".into());
        let client = TelegramClient::new(&settings).unwrap();
        assert!(client.is_enabled());
    }

    #[test]
    fn test_request_omits_empty_parse_mode() {
        let request = SendMessageRequest {
            chat_id: "42",
            text: "привет",
            parse_mode: None,
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("parse_mode").is_none());
        assert_eq!(json["disable_web_page_preview"], true);
    }
}
