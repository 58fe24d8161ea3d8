//! Error taxonomy for the openvia gateway.
//!
//! [`GatewayError`] is the top-level error type; [`ChannelError`] covers
//! channel-specific failures. Variants are grouped by whether the agent
//! loop can recover: recoverable kinds round-trip to the LLM as tool-result
//! errors, while transport failures and iteration exhaustion terminate the
//! turn. Both enums are non-exhaustive to allow extension without breaking
//! downstream.

use thiserror::Error;

/// Top-level error type for the gateway.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    // ── Terminal for the turn ────────────────────────────────────────

    /// Network failure, non-2xx provider response, timeout, or a
    /// truncated stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The turn hit the iteration cap without the model stopping.
    #[error("max iterations ({0}) reached")]
    IterationExhausted(u32),

    /// Programmer error: missing handler, lost context.
    #[error("internal error: {0}")]
    Internal(String),

    // ── Recoverable (fed back to the LLM as tool-result errors) ──────

    /// Malformed frame or malformed tool arguments.
    #[error("parse error: {0}")]
    Parse(String),

    /// Tool arguments failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The policy engine denied a tool call.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// The user rejected an approval request.
    #[error("user denied permission")]
    UserDenied,

    /// A tool executor failed.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    // ── Infrastructure ───────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// A channel-layer error bubbled up.
    #[error("channel error: {0}")]
    Channel(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ChannelError> for GatewayError {
    fn from(err: ChannelError) -> Self {
        GatewayError::Channel(err.to_string())
    }
}

/// Channel-specific error type, used by the Telegram and Feishu adapters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Failed to establish a connection to the channel backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication / authorization was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receiving a message failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The channel does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Catch-all for errors that do not fit other variants.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;
