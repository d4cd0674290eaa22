use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocentError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding provider unavailable (circuit open): {0}")]
    BreakerOpen(String),

    #[error("{operation} timed out after {budget:?}")]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    #[error("API rate limit exceeded, retry after {retry_after:?} seconds")]
    RateLimit { retry_after: Option<u64> },

    #[error("API authentication error: {0}")]
    AuthExpired(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DocentError>;

/// Closed set of error categories used by callers to pick a fallback tier.
///
/// Provider SDKs report failures as loosely structured payloads; the substring
/// heuristics that classify them live in [`classify_provider_message`] so the
/// rest of the crate only ever matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient quota/rate-limit pressure; retry with backoff.
    RateLimit,
    /// Credentials expired or revoked; the tenant must re-authenticate.
    AuthExpired,
    /// An operation exceeded its time budget.
    Timeout,
    /// Circuit breaker is open; do not attempt the provider at all.
    BreakerOpen,
    /// Expected local condition (missing file, deleted folder).
    NotFound,
    /// Generic retryable failure (network blip, 5xx).
    Transient,
    /// Non-retryable failure.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Transient)
    }
}

impl DocentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocentError::RateLimit { .. } => ErrorKind::RateLimit,
            DocentError::AuthExpired(_) => ErrorKind::AuthExpired,
            DocentError::Timeout { .. } => ErrorKind::Timeout,
            DocentError::BreakerOpen(_) => ErrorKind::BreakerOpen,
            DocentError::NotFound(_) => ErrorKind::NotFound,
            DocentError::Http(_) | DocentError::Embedding(_) | DocentError::Store(_) => {
                ErrorKind::Transient
            }
            DocentError::Llm(message) | DocentError::Source(message) => {
                classify_provider_message(message)
            }
            _ => ErrorKind::Fatal,
        }
    }
}

/// Classify a raw provider error message into an [`ErrorKind`].
///
/// Providers encode failure causes inconsistently (HTTP status, `code` field,
/// free-form message), so classification falls back to substring matching.
pub fn classify_provider_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("rate_limit")
    {
        return ErrorKind::RateLimit;
    }

    if lower.contains("invalid_grant")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("invalid api key")
        || lower.contains("invalid_api_key")
        || lower.contains("authentication")
        || lower.contains("token has been expired or revoked")
    {
        return ErrorKind::AuthExpired;
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return ErrorKind::Timeout;
    }

    if lower.contains("not found") || lower.contains("404") {
        return ErrorKind::NotFound;
    }

    if lower.contains("econnreset")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("server error")
        || lower.contains("bad gateway")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("500")
    {
        return ErrorKind::Transient;
    }

    ErrorKind::Fatal
}
