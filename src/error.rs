use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Domain-specific error types for Torii
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Forbidden host")]
    Forbidden,

    #[error("Unknown or expired handle")]
    HandleNotFound,

    #[error("Origin returned status {0}")]
    Upstream(u16),

    #[error("Origin returned an empty body")]
    EmptyUpstream,

    #[error("Failed to reach origin: {0}")]
    Origin(String),

    #[error("Failed to resolve sources: {0}")]
    Scrape(String),

    #[error("Origin fetch timed out")]
    Timeout,

    #[error("Scraper unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status this error maps to. `Upstream` mirrors the origin status
    /// when it is a valid code, falling back to 502 otherwise.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::HandleNotFound => StatusCode::NOT_FOUND,
            ProxyError::Upstream(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::EmptyUpstream => StatusCode::BAD_GATEWAY,
            ProxyError::Origin(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Scrape(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Every error renders the `{"error": "..."}` envelope with its mapped status.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ProxyError::BadRequest(msg) => tracing::warn!("Bad request: {}", msg),
            ProxyError::Forbidden => tracing::warn!("SSRF guard rejected origin"),
            ProxyError::HandleNotFound => tracing::warn!("Handle lookup failed"),
            ProxyError::Upstream(code) => tracing::warn!("Upstream returned status {}", code),
            ProxyError::EmptyUpstream => tracing::warn!("Upstream body was empty"),
            ProxyError::Origin(msg) => tracing::error!("Origin fetch error: {}", msg),
            ProxyError::Scrape(msg) => tracing::error!("Scrape error: {}", msg),
            ProxyError::Timeout => tracing::warn!("Origin fetch deadline exceeded"),
            ProxyError::Unavailable(msg) => tracing::warn!("Scraper unavailable: {}", msg),
            ProxyError::Internal(msg) => tracing::error!("Internal error: {}", msg),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, ProxyError>;
