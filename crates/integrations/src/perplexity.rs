//! Web-search client with enforced recency policy.
//!
//! The policy is applied before the request is built: the model and the
//! caller can suggest a recency window, but mandatory and forbidden
//! categories are decided here and the decision travels back with the
//! answer.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use domovoy_config::Settings;
use domovoy_core::{
    ProxyError, RateLimiter, Result, SearchOutcome, SearchRequest, WebSearch,
};
use domovoy_policy::{classify_query, enforce, validate_override};

const API_BASE: &str = "https://api.perplexity.ai";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SearchApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    return_citations: bool,
    return_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_domain_filter: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: String,
}

struct CachedOutcome {
    outcome: SearchOutcome,
    stored_at: Instant,
}

pub struct PerplexityClient {
    client: Client,
    model: String,
    rate_limiter: Arc<RateLimiter>,
    rate_per_minute: usize,
    cache: DashMap<String, CachedOutcome>,
    cache_ttl: Duration,
}

impl PerplexityClient {
    pub fn new(settings: &Settings, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", settings.search.api_key)
                .parse()
                .map_err(|_| ProxyError::Internal("invalid search api key".into()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            model: settings.search.model.clone(),
            rate_limiter,
            rate_per_minute: settings.rate_limits.search_per_minute,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(settings.cache.search_ttl_minutes * 60),
        })
    }

    /// Map a day window to the provider's coarse recency filter.
    fn days_to_filter(days: Option<u32>) -> Option<&'static str> {
        match days? {
            0..=1 => Some("day"),
            2..=7 => Some("week"),
            8..=30 => Some("month"),
            31..=365 => Some("year"),
            _ => None,
        }
    }

    fn cache_key(query: &str, category: &str, filter: Option<&str>) -> String {
        format!("{query}:{category}:{}", filter.unwrap_or("none"))
    }
}

#[async_trait]
impl WebSearch for PerplexityClient {
    async fn search(&self, request: SearchRequest) -> Result<SearchOutcome> {
        let decision = self.rate_limiter.check("perplexity", self.rate_per_minute, "default");
        if !decision.allowed {
            return Err(ProxyError::RateLimited {
                name: "perplexity".into(),
                wait_secs: decision.wait_secs,
            });
        }

        let category = request
            .category
            .unwrap_or_else(|| classify_query(&request.query));

        let mut policy = enforce(category, request.recency_days);

        if let (Some(reason), Some(days)) = (&request.override_reason, request.recency_days) {
            if validate_override(category, Some(days), reason) {
                policy.recency_days = Some(days);
                policy.override_applied = true;
                policy.override_reason = Some(reason.clone());
            }
        }

        let filter = Self::days_to_filter(policy.recency_days);
        let key = Self::cache_key(&request.query, category.as_str(), filter);

        if let Some(cached) = self.cache.get(&key) {
            if cached.stored_at.elapsed() < self.cache_ttl {
                tracing::info!(query = %truncate(&request.query, 50), "search cache hit");
                let mut outcome = cached.outcome.clone();
                outcome.from_cache = true;
                return Ok(outcome);
            }
        }

        tracing::info!(
            query = %truncate(&request.query, 100),
            category = %category,
            recency_days = ?policy.recency_days,
            enforced = policy.enforced,
            "search initiated"
        );

        let domain_filter = if request.include_domains.is_empty() && request.exclude_domains.is_empty()
        {
            None
        } else {
            let mut domains = request.include_domains.clone();
            domains.extend(request.exclude_domains.iter().map(|d| format!("-{d}")));
            Some(domains)
        };

        let body = SearchApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: "Ты — помощник по поиску информации. Отвечай кратко, по делу, на русском языке. Всегда указывай источники.",
                },
                ApiMessage {
                    role: "user",
                    content: &request.query,
                },
            ],
            max_tokens: 1000,
            temperature: 0.2,
            top_p: 0.9,
            return_citations: true,
            return_images: false,
            search_recency_filter: filter,
            search_domain_filter: domain_filter,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("perplexity", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProxyError::upstream(
                "perplexity",
                format!("search returned {status}"),
            ));
        }

        let parsed: SearchApiResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::upstream("perplexity", e.to_string()))?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "Информация не найдена.".to_string());

        let max_results = if request.max_results == 0 { 5 } else { request.max_results };
        let sources: Vec<String> = parsed.citations.into_iter().take(max_results).collect();

        let outcome = SearchOutcome {
            answer,
            sources,
            category,
            recency_days: policy.recency_days,
            policy,
            from_cache: false,
        };

        self.cache.insert(
            key,
            CachedOutcome {
                outcome: outcome.clone(),
                stored_at: Instant::now(),
            },
        );

        tracing::info!(
            sources = outcome.sources.len(),
            category = %category,
            "search completed"
        );
        Ok(outcome)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_to_filter_boundaries() {
        assert_eq!(PerplexityClient::days_to_filter(None), None);
        assert_eq!(PerplexityClient::days_to_filter(Some(1)), Some("day"));
        assert_eq!(PerplexityClient::days_to_filter(Some(7)), Some("week"));
        assert_eq!(PerplexityClient::days_to_filter(Some(8)), Some("month"));
        assert_eq!(PerplexityClient::days_to_filter(Some(30)), Some("month"));
        assert_eq!(PerplexityClient::days_to_filter(Some(365)), Some("year"));
        assert_eq!(PerplexityClient::days_to_filter(Some(1000)), None);
    }

    #[test]
    fn test_recency_filter_omitted_when_absent() {
        let request = SearchApiRequest {
            model: "sonar",
            messages: vec![],
            max_tokens: 100,
            temperature: 0.2,
            top_p: 0.9,
            return_citations: true,
            return_images: false,
            search_recency_filter: None,
            search_domain_filter: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("search_recency_filter").is_none());
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let parsed: SearchApiResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
        assert!(parsed.citations.is_empty());
    }

    #[test]
    fn test_cache_key_distinguishes_filters() {
        let a = PerplexityClient::cache_key("q", "news", Some("day"));
        let b = PerplexityClient::cache_key("q", "news", None);
        assert_ne!(a, b);
    }
}
