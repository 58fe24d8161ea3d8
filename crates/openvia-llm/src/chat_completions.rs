//! OpenAI-style chat-completions streaming adapter.
//!
//! Works with any endpoint that follows the OpenAI chat completion format
//! (OpenAI, Qwen, DeepSeek, Moonshot, Ollama, and Anthropic's
//! OpenAI-compat endpoint). Tool calls arrive as indexed fragments spread
//! over many SSE chunks; the adapter accumulates per-index
//! `{id, name, args-string}` state and emits one complete
//! [`LlmEvent::ToolCall`] per index once the provider reports a finish
//! reason of `tool_calls` or `stop`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use openvia_types::config::LlmConfig;
use openvia_types::{ContentBlock, LlmEvent, Message, MessageContent, Role, ToolCall, Usage};

use crate::adapter::{resolve_chat_url, status_error, ChatAdapter, ChatTurn, LlmEventStream};
use crate::context;
use crate::error::Result;
use crate::sse::DONE_SENTINEL;
use crate::stream::{drive, SsePayloadParser};

/// Streaming adapter for `POST {base_url}/chat/completions`.
pub struct ChatCompletionsAdapter {
    config: LlmConfig,
    http: reqwest::Client,
}

impl ChatCompletionsAdapter {
    /// Create an adapter over the given HTTP client.
    pub fn new(config: LlmConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Build the JSON request body for one round.
    fn build_body(&self, turn: &ChatTurn) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": build_messages(turn),
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !turn.tools.is_empty() {
            let tools: Vec<serde_json::Value> = turn
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

#[async_trait]
impl ChatAdapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn max_context_tokens(&self) -> u32 {
        context::max_context_tokens(&self.config.model)
    }

    async fn chat(&self, turn: ChatTurn) -> Result<LlmEventStream> {
        let url = resolve_chat_url(&self.config.base_url);
        let body = self.build_body(&turn);

        debug!(
            model = %self.config.model,
            messages = turn.messages.len(),
            tools = turn.tools.len(),
            tool_results = turn.tool_results.len(),
            "sending chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, &self.config.model).await);
        }

        Ok(drive(response, ChatCompletionsParser::default()))
    }
}

/// Serialize the turn into the OpenAI `messages` array.
///
/// History messages render per their role; the previous round's tool
/// results append as a synthetic assistant message carrying `tool_calls`
/// followed by one `role:"tool"` message per result.
fn build_messages(turn: &ChatTurn) -> Vec<serde_json::Value> {
    let mut out = Vec::new();

    if let Some(ref system) = turn.system_prompt {
        out.push(serde_json::json!({"role": "system", "content": system}));
    }

    for message in &turn.messages {
        out.push(render_message(message));
    }

    if !turn.tool_results.is_empty() {
        let calls: Vec<serde_json::Value> = turn
            .tool_results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.tool_call_id,
                    "type": "function",
                    "function": {
                        "name": r.tool_name,
                        "arguments": r.tool_args.to_string(),
                    }
                })
            })
            .collect();
        out.push(serde_json::json!({
            "role": "assistant",
            "content": serde_json::Value::Null,
            "tool_calls": calls,
        }));
        for record in &turn.tool_results {
            out.push(serde_json::json!({
                "role": "tool",
                "tool_call_id": record.tool_call_id,
                "content": record.content,
            }));
        }
    }

    out
}

fn render_message(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    let content = match &message.content {
        MessageContent::Text(text) => serde_json::json!(text),
        MessageContent::Blocks(blocks) => {
            let parts: Vec<serde_json::Value> = blocks.iter().map(render_block).collect();
            serde_json::Value::Array(parts)
        }
    };
    serde_json::json!({"role": role, "content": content})
}

/// Content blocks become OpenAI content parts; images use base64 data URLs.
fn render_block(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::Image { mime_type, data } => serde_json::json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{mime_type};base64,{data}")},
        }),
    }
}

// ── Streaming wire format ────────────────────────────────────────────────

/// One `chat.completion.chunk` payload.
#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<DeltaChoice>,
    #[serde(default)]
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: DeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// Per-index accumulation state for a streamed tool call.
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    args: String,
}

/// Parser state for one chat-completions stream.
#[derive(Default)]
struct ChatCompletionsParser {
    partial: BTreeMap<usize, PartialCall>,
    flushed: bool,
    finish_seen: bool,
    response_id: Option<String>,
    usage: Option<Usage>,
}

impl ChatCompletionsParser {
    /// Turn the accumulated fragments into complete tool-call events.
    fn flush_calls(&mut self) -> Vec<LlmEvent> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;

        let partial = std::mem::take(&mut self.partial);
        partial
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                let args = if p.args.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&p.args).unwrap_or_else(|e| {
                        warn!(tool = %p.name, error = %e, "unparseable tool arguments");
                        serde_json::Value::Null
                    })
                };
                LlmEvent::ToolCall(ToolCall {
                    id: p.id,
                    name: p.name,
                    args,
                    meta: None,
                })
            })
            .collect()
    }

    fn done_event(&self) -> LlmEvent {
        LlmEvent::Done {
            usage: self.usage,
            response_id: self.response_id.clone(),
        }
    }
}

impl SsePayloadParser for ChatCompletionsParser {
    fn on_payload(&mut self, payload: &str) -> Vec<LlmEvent> {
        if payload == DONE_SENTINEL {
            let mut events = self.flush_calls();
            events.push(self.done_event());
            return events;
        }

        let delta: StreamDelta = match serde_json::from_str(payload) {
            Ok(d) => d,
            Err(e) => {
                // Malformed frames are skipped, not fatal.
                warn!(error = %e, "skipping malformed SSE frame");
                return Vec::new();
            }
        };

        if self.response_id.is_none() {
            self.response_id = delta.id;
        }
        if let Some(u) = delta.usage {
            self.usage = Some(Usage {
                input_tokens: u.prompt_tokens.unwrap_or(0),
                output_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            });
        }

        let mut events = Vec::new();
        if let Some(choice) = delta.choices.first() {
            if let Some(ref text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(LlmEvent::TextDelta {
                        content: text.clone(),
                    });
                }
            }

            if let Some(ref tool_calls) = choice.delta.tool_calls {
                for tc in tool_calls {
                    let entry = self.partial.entry(tc.index).or_default();
                    if let Some(ref id) = tc.id {
                        entry.id = id.clone();
                    }
                    if let Some(ref function) = tc.function {
                        if let Some(ref name) = function.name {
                            entry.name.push_str(name);
                        }
                        if let Some(ref args) = function.arguments {
                            entry.args.push_str(args);
                        }
                        events.push(LlmEvent::ToolCallDelta {
                            id: tc.id.clone(),
                            name: function.name.clone(),
                            args_fragment: function.arguments.clone().unwrap_or_default(),
                        });
                    }
                }
            }

            if let Some(ref reason) = choice.finish_reason {
                self.finish_seen = true;
                if reason == "tool_calls" || reason == "stop" {
                    events.extend(self.flush_calls());
                }
            }
        }

        events
    }

    fn on_end(&mut self) -> Vec<LlmEvent> {
        // Providers that omit the [DONE] sentinel still get a clean finish
        // as long as a finish_reason was seen.
        if self.finish_seen {
            let mut events = self.flush_calls();
            events.push(self.done_event());
            events
        } else {
            vec![LlmEvent::Error {
                message: "stream ended unexpectedly".into(),
            }]
        }
    }
}
