//! Home Assistant REST client.
//!
//! The allow-list is enforced here, at the adapter boundary: a service
//! call that is not explicitly permitted never leaves the process.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use domovoy_config::Settings;
use domovoy_core::{HomeAction, HomeAutomation, HomeSnapshot, ProxyError, Result};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HomeAssistantClient {
    client: Client,
    base_url: String,
    allowed: Vec<Regex>,
    confirmation: Vec<Regex>,
}

impl HomeAssistantClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", settings.home_assistant.token);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            auth.parse()
                .map_err(|_| ProxyError::Internal("invalid home assistant token".into()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.home_assistant.url.trim_end_matches('/').to_string(),
            allowed: compile_patterns(&settings.security.allowed_services()),
            confirmation: compile_patterns(&settings.security.confirmation_services()),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.api_url(endpoint))
            .send()
            .await
            .map_err(|e| ProxyError::upstream("homeassistant", e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProxyError::upstream(
                "homeassistant",
                format!("GET {endpoint} returned {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("homeassistant", e.to_string()))
    }

    pub async fn get_states(&self) -> Result<Vec<Value>> {
        match self.get_json("states").await? {
            Value::Array(states) => Ok(states),
            other => Err(ProxyError::upstream(
                "homeassistant",
                format!("unexpected states payload: {other}"),
            )),
        }
    }

    pub async fn get_config(&self) -> Result<Value> {
        self.get_json("config").await
    }

    /// The areas endpoint is not available on every backend version;
    /// a failure degrades to an empty list.
    pub async fn get_areas(&self) -> Vec<Value> {
        match self.get_json("areas").await {
            Ok(Value::Array(areas)) => areas,
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch areas");
                Vec::new()
            }
        }
    }

    fn matches_any(patterns: &[Regex], service: &str) -> bool {
        patterns.iter().any(|p| p.is_match(service))
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            let escaped = pattern.replace('.', r"\.").replace('*', ".*");
            match Regex::new(&format!("^{escaped}$")) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid service pattern skipped");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl HomeAutomation for HomeAssistantClient {
    async fn get_context(&self) -> Result<HomeSnapshot> {
        let states = self.get_states().await?;
        let config = self.get_config().await.unwrap_or(Value::Null);
        let areas = self.get_areas().await;

        let snapshot = HomeSnapshot::from_states(states, config, areas);
        tracing::info!(
            total_entities = snapshot.total_entities,
            domains = snapshot.entities_by_domain.len(),
            "home context retrieved"
        );
        Ok(snapshot)
    }

    async fn call_service(&self, action: &HomeAction) -> Result<Value> {
        let service_call = action.service_call();
        if !self.is_service_allowed(&service_call) {
            return Err(ProxyError::PolicyRejected(format!(
                "service {service_call} is not allowed"
            )));
        }

        let mut body = serde_json::Map::new();
        if let Some(Value::Object(data)) = &action.service_data {
            body.extend(data.clone());
        }
        if let Some(Value::Object(target)) = &action.target {
            body.extend(target.clone());
        }

        tracing::info!(service = %service_call, "calling home assistant service");

        let response = self
            .client
            .post(self.api_url(&format!("services/{}/{}", action.domain, action.service)))
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| ProxyError::upstream("homeassistant", e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProxyError::upstream(
                "homeassistant",
                format!("{service_call} returned {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("homeassistant", e.to_string()))
    }

    async fn create_automation(&self, config: Value) -> Result<Value> {
        // Automations go through a reviewed-draft flow rather than being
        // written to the backend directly.
        tracing::info!("automation draft generated");
        Ok(serde_json::json!({
            "success": true,
            "automation": config,
            "message": "Automation configuration generated. Manual review recommended.",
        }))
    }

    fn is_service_allowed(&self, service: &str) -> bool {
        Self::matches_any(&self.allowed, service)
    }

    fn needs_confirmation(&self, service: &str) -> bool {
        Self::matches_any(&self.confirmation, service)
    }
}
