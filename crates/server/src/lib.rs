//! HTTP and WebSocket surface for the voice assistant proxy.

pub mod http;
pub mod metrics;
pub mod state;
pub mod tools;
pub mod ws;

pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;
pub use tools::PipelineToolHandler;

use thiserror::Error;

/// Server-level errors mapped onto HTTP statuses.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limit exceeded, retry in {0:.1}s")]
    RateLimit(f64),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<domovoy_core::ProxyError> for ServerError {
    fn from(err: domovoy_core::ProxyError) -> Self {
        use domovoy_core::ProxyError;
        match err {
            ProxyError::RateLimited { wait_secs, .. } => Self::RateLimit(wait_secs),
            ProxyError::PolicyRejected(reason) => Self::InvalidRequest(reason),
            ProxyError::Upstream { service, detail } => {
                Self::Upstream(format!("{service}: {detail}"))
            }
            ProxyError::SessionFatal(detail) => Self::Session(detail),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        use axum::http::StatusCode;
        match err {
            ServerError::Session(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let message = self.to_string();
        let status: axum::http::StatusCode = self.into();
        (status, axum::Json(serde_json::json!({ "detail": message }))).into_response()
    }
}
