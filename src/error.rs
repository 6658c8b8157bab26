//! The gateway's error taxonomy.
//!
//! Every fallible operation in the dispatch pipeline resolves to one of
//! these variants. `status_code` and `is_retryable` are the two questions
//! the dispatcher and the HTTP layer actually need answered; everything
//! else is carried only for logging and the decision chain.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed")]
    AuthFailed,

    #[error("key disabled or expired")]
    KeyDisabled,

    #[error("request blocked by policy: {word} ({match_type})")]
    BlockedByPolicy {
        word: String,
        match_type: &'static str,
        snippet: String,
    },

    #[error("no candidate provider: {filter} emptied the candidate set")]
    NoCandidateProvider { filter: &'static str },

    #[error("upstream returned a retryable error: {status}")]
    UpstreamRetryable { status: u16, body: String },

    #[error("upstream returned a fatal error: {status}")]
    UpstreamFatal { status: u16, body: String },

    #[error("accounting error: {0}")]
    AccountingError(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("malformed request body: {0}")]
    BadRequest(String),

    #[error("local rate limit exceeded")]
    LocallyRateLimited,

    #[error("transport error talking to upstream: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("kv store unavailable: {0}")]
    KvUnavailable(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the dispatcher should retry this attempt against a
    /// different provider rather than surface it to the client.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamRetryable { .. } | GatewayError::Transport(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthFailed => StatusCode::UNAUTHORIZED,
            GatewayError::KeyDisabled => StatusCode::FORBIDDEN,
            GatewayError::BlockedByPolicy { .. } => StatusCode::BAD_REQUEST,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::LocallyRateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NoCandidateProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamRetryable { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::UpstreamFatal { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            // accounting degrades the response, not the client's view of success
            GatewayError::AccountingError(_) => StatusCode::OK,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::KvUnavailable(_) => StatusCode::OK,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatewayError::BlockedByPolicy {
                word,
                match_type,
                snippet,
            } => json!({
                "error": {
                    "type": "blocked_by_policy",
                    "message": "request blocked by content policy",
                    "blocked_by": { "sensitive_word": word, "match_type": match_type, "snippet": snippet },
                }
            }),
            GatewayError::NoCandidateProvider { filter } => json!({
                "error": { "type": "no_candidate_provider", "message": self.to_string(), "filter": filter }
            }),
            other => json!({ "error": { "type": "gateway_error", "message": other.to_string() } }),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
