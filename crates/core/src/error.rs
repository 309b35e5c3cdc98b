//! Error taxonomy shared across the proxy.

use thiserror::Error;

/// Errors the proxy core can surface.
///
/// Recoverable variants (`RateLimited`, `PolicyRejected`, `Upstream`) are
/// turned into 4xx-style responses or `error` streaming frames and never
/// tear a session down on their own. `SessionFatal` always triggers
/// teardown of the owning session.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("rate limited on '{name}', retry in {wait_secs:.1}s")]
    RateLimited { name: String, wait_secs: f64 },

    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    #[error("{service} error: {detail}")]
    Upstream { service: &'static str, detail: String },

    #[error("session fatal: {0}")]
    SessionFatal(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Helper for tagging external-service failures.
    pub fn upstream(service: &'static str, detail: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            detail: detail.into(),
        }
    }

    /// Whether the session owning this error must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionFatal(_))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ProxyError::SessionFatal("model channel closed".into()).is_fatal());
        assert!(!ProxyError::RateLimited {
            name: "openai".into(),
            wait_secs: 2.0
        }
        .is_fatal());
        assert!(!ProxyError::upstream("perplexity", "timeout").is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ProxyError::RateLimited {
            name: "habr".into(),
            wait_secs: 12.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("habr"));
        assert!(msg.contains("12.5"));
    }
}
