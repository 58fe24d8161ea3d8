//! OpenAI Responses API streaming adapter.
//!
//! Selected when the configured base URL ends in `/responses`. The
//! Responses API scopes its function-call events by `item_id` and only
//! reveals the `call_id`/name pairing in the `response.output_item.added`
//! event, so the adapter keeps an intra-stream cache `item_id ->
//! (call_id, name)` and reconciles when the argument payload completes.
//! Emissions are deduplicated by `call_id` because the same call surfaces
//! through both `function_call_arguments.done` and `output_item.done`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, warn};

use openvia_types::config::LlmConfig;
use openvia_types::{ContentBlock, LlmEvent, Message, MessageContent, Role, ToolCall, Usage};

use crate::adapter::{resolve_chat_url, status_error, ChatAdapter, ChatTurn, LlmEventStream};
use crate::context;
use crate::error::Result;
use crate::sse::DONE_SENTINEL;
use crate::stream::{drive, SsePayloadParser};

/// Streaming adapter for `POST {base_url}/responses`.
pub struct ResponsesAdapter {
    config: LlmConfig,
    http: reqwest::Client,
}

impl ResponsesAdapter {
    /// Create an adapter over the given HTTP client.
    pub fn new(config: LlmConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Build the JSON request body for one round.
    ///
    /// With a `previous_response_id` the provider already holds the
    /// conversation state, so only the new items (tool outputs) are sent.
    fn build_body(&self, turn: &ChatTurn) -> serde_json::Value {
        let input = if turn.previous_response_id.is_some() && !turn.tool_results.is_empty() {
            turn.tool_results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "type": "function_call_output",
                        "call_id": r.tool_call_id,
                        "output": r.content,
                    })
                })
                .collect()
        } else {
            build_input_items(turn)
        };

        let mut body = serde_json::json!({
            "model": self.config.model,
            "input": input,
            "stream": true,
        });

        if let Some(ref prev) = turn.previous_response_id {
            body["previous_response_id"] = serde_json::json!(prev);
        }
        if let Some(ref system) = turn.system_prompt {
            body["instructions"] = serde_json::json!(system);
        }
        if !turn.tools.is_empty() {
            // The Responses API flattens the function wrapper.
            let tools: Vec<serde_json::Value> = turn
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_output_tokens"] = max_tokens.into();
        }
        body
    }
}

#[async_trait]
impl ChatAdapter for ResponsesAdapter {
    fn name(&self) -> &str {
        "responses"
    }

    fn max_context_tokens(&self) -> u32 {
        context::max_context_tokens(&self.config.model)
    }

    async fn chat(&self, turn: ChatTurn) -> Result<LlmEventStream> {
        let url = resolve_chat_url(&self.config.base_url);
        let body = self.build_body(&turn);

        debug!(
            model = %self.config.model,
            stateful = turn.previous_response_id.is_some(),
            "sending responses request"
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

        Ok(drive(response, ResponsesParser::default()))
    }
}

/// Serialize history messages as Responses API input items.
fn build_input_items(turn: &ChatTurn) -> Vec<serde_json::Value> {
    turn.messages
        .iter()
        .map(|message| {
            let (role, text_type) = match message.role {
                Role::User => ("user", "input_text"),
                Role::Assistant => ("assistant", "output_text"),
                Role::System => ("system", "input_text"),
            };
            let parts: Vec<serde_json::Value> = match &message.content {
                MessageContent::Text(text) => {
                    vec![serde_json::json!({"type": text_type, "text": text})]
                }
                MessageContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => {
                            serde_json::json!({"type": text_type, "text": text})
                        }
                        ContentBlock::Image { mime_type, data } => serde_json::json!({
                            "type": "input_image",
                            "image_url": format!("data:{mime_type};base64,{data}"),
                        }),
                    })
                    .collect(),
            };
            serde_json::json!({"role": role, "content": parts})
        })
        .collect()
}

/// Parser state for one Responses API stream.
#[derive(Default)]
struct ResponsesParser {
    /// `item_id -> (call_id, name)` learned from `output_item.added`.
    items: HashMap<String, (String, String)>,
    /// `call_id`s already emitted, for deduplication.
    emitted: HashSet<String>,
    usage: Option<Usage>,
    finished: bool,
}

impl ResponsesParser {
    fn emit_call(
        &mut self,
        call_id: String,
        name: String,
        arguments: &str,
        meta: Option<String>,
    ) -> Option<LlmEvent> {
        if name.is_empty() || !self.emitted.insert(call_id.clone()) {
            return None;
        }
        let args = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).unwrap_or_else(|e| {
                warn!(tool = %name, error = %e, "unparseable tool arguments");
                serde_json::Value::Null
            })
        };
        Some(LlmEvent::ToolCall(ToolCall {
            id: call_id,
            name,
            args,
            meta,
        }))
    }
}

impl SsePayloadParser for ResponsesParser {
    fn on_payload(&mut self, payload: &str) -> Vec<LlmEvent> {
        if payload == DONE_SENTINEL {
            return Vec::new();
        }

        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping malformed SSE frame");
                return Vec::new();
            }
        };

        let event_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match event_type {
            "response.output_text.delta" => {
                let delta = value.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![LlmEvent::TextDelta {
                        content: delta.to_string(),
                    }]
                }
            }
            "response.output_item.added" => {
                let item = &value["item"];
                if item["type"] == "function_call" {
                    let item_id = item["id"].as_str().unwrap_or_default().to_string();
                    let call_id = item["call_id"].as_str().unwrap_or_default().to_string();
                    let name = item["name"].as_str().unwrap_or_default().to_string();
                    self.items.insert(item_id, (call_id, name));
                }
                Vec::new()
            }
            "response.function_call_arguments.delta" => {
                let item_id = value["item_id"].as_str().unwrap_or_default();
                let (call_id, name) = self
                    .items
                    .get(item_id)
                    .cloned()
                    .unwrap_or_default();
                vec![LlmEvent::ToolCallDelta {
                    id: (!call_id.is_empty()).then_some(call_id),
                    name: (!name.is_empty()).then_some(name),
                    args_fragment: value["delta"].as_str().unwrap_or_default().to_string(),
                }]
            }
            "response.function_call_arguments.done" => {
                let item_id = value["item_id"].as_str().unwrap_or_default();
                let arguments = value["arguments"].as_str().unwrap_or_default().to_string();
                match self.items.get(item_id).cloned() {
                    Some((call_id, name)) => self
                        .emit_call(call_id, name, &arguments, None)
                        .into_iter()
                        .collect(),
                    None => {
                        warn!(item_id, "arguments.done for unknown item");
                        Vec::new()
                    }
                }
            }
            "response.output_item.done" => {
                // Fallback: emit any function call that never went through
                // arguments.done (dedup makes the common path a no-op).
                let item = &value["item"];
                if item["type"] == "function_call" {
                    let call_id = item["call_id"].as_str().unwrap_or_default().to_string();
                    let name = item["name"].as_str().unwrap_or_default().to_string();
                    let arguments = item["arguments"].as_str().unwrap_or_default().to_string();
                    self.emit_call(call_id, name, &arguments, None)
                        .into_iter()
                        .collect()
                } else {
                    Vec::new()
                }
            }
            "response.completed" => {
                self.finished = true;
                let response = &value["response"];
                if let Some(u) = response.get("usage") {
                    self.usage = Some(Usage {
                        input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                        output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
                    });
                }
                vec![LlmEvent::Done {
                    usage: self.usage,
                    response_id: response["id"].as_str().map(String::from),
                }]
            }
            "response.failed" | "error" => {
                let message = value["error"]["message"]
                    .as_str()
                    .or_else(|| value["message"].as_str())
                    .unwrap_or("provider reported failure")
                    .to_string();
                vec![LlmEvent::Error { message }]
            }
            _ => Vec::new(),
        }
    }

    fn on_end(&mut self) -> Vec<LlmEvent> {
        if self.finished {
            Vec::new()
        } else {
            vec![LlmEvent::Error {
                message: "stream ended before response.completed".into(),
            }]
        }
    }
}
