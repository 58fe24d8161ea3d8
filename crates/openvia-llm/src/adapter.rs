//! The [`ChatAdapter`] trait and adapter construction.
//!
//! An adapter owns the protocol details for one provider family:
//! authentication, request body construction, and parsing the streamed
//! response into the unified [`LlmEvent`](openvia_types::LlmEvent) model.
//! The returned stream is finite and not restartable; its last element is
//! always `Done` or `Error`.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;

use openvia_types::config::{LlmConfig, LlmFormat};
use openvia_types::{LlmEvent, Message, ToolResultRecord, ToolSchema};

use crate::chat_completions::ChatCompletionsAdapter;
use crate::error::{AdapterError, Result};
use crate::gemini::GeminiAdapter;
use crate::responses::ResponsesAdapter;

/// A lazily-produced, finite sequence of unified LLM events.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// Everything an adapter needs for one LLM round.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    /// Conversation history including the current user message.
    pub messages: Vec<Message>,
    /// Tool schemas exposed to the model.
    pub tools: Vec<ToolSchema>,
    /// Results from the previous round's tool calls, spliced into this
    /// request in the provider's native representation.
    pub tool_results: Vec<ToolResultRecord>,
    /// System prompt, attached in the provider's designated slot.
    pub system_prompt: Option<String>,
    /// Response id from the previous round, for stateful providers.
    pub previous_response_id: Option<String>,
}

/// A pluggable LLM protocol adapter.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Adapter name for logging (e.g. "chat-completions", "gemini").
    fn name(&self) -> &str;

    /// Static context-window estimate for the configured model.
    fn max_context_tokens(&self) -> u32;

    /// Execute one streaming LLM round.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] for failures before streaming starts
    /// (missing configuration, non-2xx status). Failures after that point
    /// surface as a terminal [`LlmEvent::Error`] inside the stream.
    async fn chat(&self, turn: ChatTurn) -> Result<LlmEventStream>;
}

/// Resolve the full chat endpoint URL from a configured base URL.
///
/// Base URLs already ending in `/chat/completions` or `/responses` are used
/// as-is; anything else gets `/chat/completions` appended. The Gemini
/// adapter uses its own path template and never goes through here.
pub fn resolve_chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") || base.ends_with("/responses") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

/// Build the adapter selected by the LLM configuration.
///
/// `gemini` format picks the Gemini adapter; `openai` / `claude` pick the
/// Responses adapter when the resolved URL ends in `/responses`, otherwise
/// the chat-completions adapter.
pub fn build_adapter(config: &LlmConfig) -> Result<Arc<dyn ChatAdapter>> {
    if config.api_key.is_empty() {
        return Err(AdapterError::NotConfigured("api key is empty".into()));
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    match config.format {
        LlmFormat::Gemini => Ok(Arc::new(GeminiAdapter::new(config.clone(), http))),
        LlmFormat::Openai | LlmFormat::Claude => {
            let url = resolve_chat_url(&config.base_url);
            if url.ends_with("/responses") {
                Ok(Arc::new(ResponsesAdapter::new(config.clone(), http)))
            } else {
                Ok(Arc::new(ChatCompletionsAdapter::new(config.clone(), http)))
            }
        }
    }
}

/// Map a non-success HTTP status into the matching [`AdapterError`].
pub(crate) async fn status_error(response: reqwest::Response, model: &str) -> AdapterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 | 403 => AdapterError::AuthFailed(body),
        404 => AdapterError::ModelNotFound(format!("model '{model}': {body}")),
        429 => {
            let retry_ms = parse_retry_after_ms(&body).unwrap_or(1000);
            AdapterError::RateLimited {
                retry_after_ms: retry_ms,
            }
        }
        _ => AdapterError::RequestFailed(format!("HTTP {status}: {body}")),
    }
}

/// Try to extract a retry-after hint from a JSON error body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(format: LlmFormat, base_url: &str) -> LlmConfig {
        LlmConfig {
            format,
            api_key: "test-key".into(),
            base_url: base_url.into(),
            model: "test-model".into(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn resolve_appends_chat_completions() {
        assert_eq!(
            resolve_chat_url("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_chat_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn resolve_keeps_explicit_suffixes() {
        assert_eq!(
            resolve_chat_url("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_chat_url("https://api.example.com/v1/responses"),
            "https://api.example.com/v1/responses"
        );
    }

    #[test]
    fn build_rejects_empty_key() {
        let mut cfg = config(LlmFormat::Openai, "https://api.example.com/v1");
        cfg.api_key.clear();
        let err = match build_adapter(&cfg) {
            Ok(_) => panic!("expected build_adapter to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, AdapterError::NotConfigured(_)));
    }

    #[test]
    fn build_selects_chat_completions() {
        let cfg = config(LlmFormat::Openai, "https://api.example.com/v1");
        let adapter = build_adapter(&cfg).unwrap();
        assert_eq!(adapter.name(), "chat-completions");
    }

    #[test]
    fn build_selects_responses_by_url_suffix() {
        let cfg = config(LlmFormat::Openai, "https://api.example.com/v1/responses");
        let adapter = build_adapter(&cfg).unwrap();
        assert_eq!(adapter.name(), "responses");
    }

    #[test]
    fn build_selects_gemini_by_format() {
        let cfg = config(
            LlmFormat::Gemini,
            "https://generativelanguage.googleapis.com",
        );
        let adapter = build_adapter(&cfg).unwrap();
        assert_eq!(adapter.name(), "gemini");
    }

    #[test]
    fn claude_format_uses_chat_completions() {
        let cfg = config(LlmFormat::Claude, "https://api.anthropic.com/v1");
        let adapter = build_adapter(&cfg).unwrap();
        assert_eq!(adapter.name(), "chat-completions");
    }

    #[test]
    fn parse_retry_after_variants() {
        assert_eq!(parse_retry_after_ms(r#"{"retry_after_ms": 2500}"#), Some(2500));
        assert_eq!(parse_retry_after_ms(r#"{"retry_after": 1.5}"#), Some(1500));
        assert_eq!(parse_retry_after_ms(r#"{"error": "slow down"}"#), None);
        assert_eq!(parse_retry_after_ms("not json"), None);
    }
}
