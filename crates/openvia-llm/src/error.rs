//! Adapter error types.
//!
//! All adapter operations return [`Result<T>`] with [`AdapterError`] as the
//! error type. Errors raised before the stream starts (bad config, non-2xx
//! status) surface here; failures mid-stream become a terminal
//! [`LlmEvent::Error`](openvia_types::LlmEvent::Error) instead.

use thiserror::Error;

/// Errors raised when talking to an LLM provider.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The HTTP request to the provider failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The requested model does not exist on the provider.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The adapter has not been configured (e.g. missing API key).
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
