//! LLM protocol adapters.
//!
//! Three wire protocols, one contract: every adapter implements
//! [`ChatAdapter`] and turns provider bytes into a finite stream of
//! [`LlmEvent`](openvia_types::LlmEvent)s.
//!
//! - [`chat_completions`] -- OpenAI-style `POST /chat/completions` SSE
//!   streaming (also covers Qwen, DeepSeek, Moonshot, Ollama, and
//!   Anthropic's OpenAI-compat endpoint).
//! - [`responses`] -- the OpenAI Responses API (`POST /responses`), chosen
//!   when the base URL ends in `/responses`.
//! - [`gemini`] -- Google Gemini `streamGenerateContent` with
//!   functionCall/functionResponse pairing.
//!
//! [`sse`] holds the shared SSE framing, [`stream`] the shared
//! bytes-to-events driver, and [`context`] the static model context-window
//! table.

pub mod adapter;
pub mod chat_completions;
pub mod context;
pub mod error;
pub mod gemini;
pub mod responses;
pub mod sse;
mod stream;

pub use adapter::{build_adapter, resolve_chat_url, ChatAdapter, ChatTurn, LlmEventStream};
pub use chat_completions::ChatCompletionsAdapter;
pub use error::{AdapterError, Result};
pub use gemini::GeminiAdapter;
pub use responses::ResponsesAdapter;
