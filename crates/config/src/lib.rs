//! Application configuration.
//!
//! Settings are loaded from an optional TOML file plus `DOMOVOY_`-prefixed
//! environment variables (`DOMOVOY_OPENAI__API_KEY` maps to
//! `openai.api_key`). Missing required options are fatal at startup.

mod settings;

pub use settings::{
    load_settings, AssistantConfig, CacheConfig, DatabaseConfig, HomeAssistantConfig,
    MemoryConfig, OpenAiConfig, RateLimitConfig, SearchConfig, SecurityConfig, ServerConfig,
    Settings, TelegramConfig,
};

use thiserror::Error;

/// Configuration errors. All fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required option: {0}")]
    MissingRequired(&'static str),

    #[error("invalid option {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}
