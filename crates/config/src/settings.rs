//! Main settings module.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of the human formatter.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_realtime_model")]
    pub realtime_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_intent_model")]
    pub intent_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            realtime_model: default_realtime_model(),
            chat_model: default_chat_model(),
            intent_model: default_intent_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HomeAssistantConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_search_model")]
    pub model: String,
    #[serde(default = "default_search_recency_days")]
    pub default_recency_days: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_search_model(),
            default_recency_days: default_search_recency_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Endpoint of the vector store; empty selects the in-process store.
    #[serde(default)]
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            qdrant_url: String::new(),
            qdrant_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Recent-store window per user.
    #[serde(default = "default_short_term_size")]
    pub short_term_memory_size: usize,
    #[serde(default = "default_true")]
    pub long_term_memory_enabled: bool,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_memory_size: default_short_term_size(),
            long_term_memory_enabled: true,
            min_similarity: default_min_similarity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Comma-separated `domain.service` patterns; `*` wildcards allowed.
    #[serde(default = "default_allowed_services")]
    pub allowed_ha_services: String,
    #[serde(default = "default_confirmation_services")]
    pub require_confirmation_services: String,
}

impl SecurityConfig {
    pub fn allowed_services(&self) -> Vec<String> {
        split_csv(&self.allowed_ha_services)
    }

    pub fn confirmation_services(&self) -> Vec<String> {
        split_csv(&self.require_confirmation_services)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_ha_services: default_allowed_services(),
            require_confirmation_services: default_confirmation_services(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_openai")]
    pub openai_per_minute: usize,
    #[serde(default = "default_rate_search")]
    pub search_per_minute: usize,
    #[serde(default = "default_rate_habr")]
    pub habr_per_minute: usize,
    #[serde(default = "default_rate_user")]
    pub user_messages_per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            openai_per_minute: default_rate_openai(),
            search_per_minute: default_rate_search(),
            habr_per_minute: default_rate_habr(),
            user_messages_per_minute: default_rate_user(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,
    #[serde(default = "default_habr_ttl")]
    pub habr_ttl_minutes: u64,
    #[serde(default = "default_search_ttl")]
    pub search_ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl(),
            habr_ttl_minutes: default_habr_ttl(),
            search_ttl_minutes: default_search_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_name")]
    pub name: String,
    #[serde(default = "default_assistant_language")]
    pub language: String,
    /// Comma-separated style descriptors woven into system prompts.
    #[serde(default = "default_assistant_style")]
    pub style: String,
}

impl AssistantConfig {
    pub fn style_list(&self) -> Vec<String> {
        split_csv(&self.style)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            language: default_assistant_language(),
            style: default_assistant_style(),
        }
    }
}

impl Settings {
    /// Validate required options. Called once at startup; failures are
    /// fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai.api_key.is_empty() {
            return Err(ConfigError::MissingRequired("openai.api_key"));
        }
        if self.home_assistant.url.is_empty() {
            return Err(ConfigError::MissingRequired("home_assistant.url"));
        }
        if self.home_assistant.token.is_empty() {
            return Err(ConfigError::MissingRequired("home_assistant.token"));
        }
        if self.search.api_key.is_empty() {
            return Err(ConfigError::MissingRequired("search.api_key"));
        }
        if self.memory.short_term_memory_size == 0 {
            return Err(ConfigError::Invalid {
                option: "memory.short_term_memory_size",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.memory.min_similarity) {
            return Err(ConfigError::Invalid {
                option: "memory.min_similarity",
                reason: format!("{} is outside [0, 1]", self.memory.min_similarity),
            });
        }
        Ok(())
    }
}

/// Load settings from `config/default.toml` (if present), an optional
/// `config/{env}.toml`, and `DOMOVOY_`-prefixed environment variables,
/// in increasing priority.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("DOMOVOY").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    Ok(settings)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tts_model() -> String {
    "tts-1-hd".to_string()
}
fn default_tts_voice() -> String {
    "alloy".to_string()
}
fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_intent_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_search_model() -> String {
    "llama-3.1-sonar-large-128k-online".to_string()
}
fn default_search_recency_days() -> u32 {
    7
}
fn default_database_url() -> String {
    "sqlite://data/domovoy.db".to_string()
}
fn default_short_term_size() -> usize {
    20
}
fn default_min_similarity() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}
fn default_allowed_services() -> String {
    "light.turn_on,light.turn_off,switch.turn_on,switch.turn_off,cover.open_cover,cover.close_cover,climate.set_temperature,scene.turn_on".to_string()
}
fn default_confirmation_services() -> String {
    "alarm_control_panel.*,lock.*,cover.*".to_string()
}
fn default_rate_openai() -> usize {
    60
}
fn default_rate_search() -> usize {
    20
}
fn default_rate_habr() -> usize {
    10
}
fn default_rate_user() -> usize {
    120
}
fn default_context_ttl() -> u64 {
    5
}
fn default_habr_ttl() -> u64 {
    60
}
fn default_search_ttl() -> u64 {
    30
}
fn default_assistant_name() -> String {
    "Домовой".to_string()
}
fn default_assistant_language() -> String {
    "ru".to_string()
}
fn default_assistant_style() -> String {
    "friendly,concise,helpful".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        let mut settings = Settings::default();
        settings.openai.api_key = "sk-test".into();
        settings.home_assistant.url = "http://ha.local:8123".into();
        settings.home_assistant.token = "token".into();
        settings.search.api_key = "pplx-test".into();
        settings
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.memory.short_term_memory_size, 20);
        assert_eq!(settings.cache.context_ttl_secs, 5);
        assert_eq!(settings.assistant.name, "Домовой");
    }

    #[test]
    fn test_validate_requires_api_key() {
        let settings = Settings::default();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingRequired("openai.api_key"))
        ));
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_service_list_parsing() {
        let security = SecurityConfig::default();
        let allowed = security.allowed_services();
        assert!(allowed.contains(&"light.turn_on".to_string()));
        let confirm = security.confirmation_services();
        assert!(confirm.contains(&"lock.*".to_string()));
    }

    #[test]
    fn test_style_list() {
        let assistant = AssistantConfig::default();
        assert_eq!(assistant.style_list(), vec!["friendly", "concise", "helpful"]);
    }

    #[test]
    fn test_invalid_similarity_rejected() {
        let mut settings = configured();
        settings.memory.min_similarity = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { option: "memory.min_similarity", .. })
        ));
    }
}
