//! Google Gemini streaming adapter.
//!
//! Speaks the `streamGenerateContent` API with `alt=sse`. Gemini only has
//! `user` and `model` roles; a tool round is a *pair*: a `model` content
//! carrying `functionCall` parts followed by a `user` content carrying
//! matching `functionResponse` parts. Some models gate tool responses on a
//! `thoughtSignature` returned with the call; the adapter carries it
//! through [`ToolCall::meta`] and echoes it back, falling back to a plain
//! text rendition of the call/response pair when the signature is absent
//! (e.g. stripped by a proxy).

use async_trait::async_trait;
use tracing::{debug, warn};

use openvia_types::config::LlmConfig;
use openvia_types::{ContentBlock, LlmEvent, Message, MessageContent, Role, ToolCall, Usage};

use crate::adapter::{status_error, ChatAdapter, ChatTurn, LlmEventStream};
use crate::context;
use crate::error::Result;
use crate::sse::DONE_SENTINEL;
use crate::stream::{drive, SsePayloadParser};

/// Streaming adapter for the Gemini `generateContent` family.
pub struct GeminiAdapter {
    config: LlmConfig,
    http: reqwest::Client,
}

impl GeminiAdapter {
    /// Create an adapter over the given HTTP client.
    pub fn new(config: LlmConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// The streaming endpoint URL (API key travels as a query parameter).
    fn stream_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!(
            "{base}/v1beta/models/{model}:streamGenerateContent?key={key}&alt=sse",
            model = self.config.model,
            key = self.config.api_key,
        )
    }

    /// Build the JSON request body for one round.
    fn build_body(&self, turn: &ChatTurn) -> serde_json::Value {
        let mut contents = build_contents(turn);
        append_tool_round(&mut contents, turn);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config(&self.config),
        });

        if let Some(ref system) = turn.system_prompt {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system}],
            });
        }
        if !turn.tools.is_empty() {
            let declarations: Vec<serde_json::Value> = turn
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }
        body
    }
}

#[async_trait]
impl ChatAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn max_context_tokens(&self) -> u32 {
        context::max_context_tokens(&self.config.model)
    }

    async fn chat(&self, turn: ChatTurn) -> Result<LlmEventStream> {
        let url = self.stream_url();
        let body = self.build_body(&turn);

        debug!(model = %self.config.model, "sending gemini request");

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, &self.config.model).await);
        }

        Ok(drive(response, GeminiParser::default()))
    }
}

fn generation_config(config: &LlmConfig) -> serde_json::Value {
    let mut gen = serde_json::Map::new();
    if let Some(max_tokens) = config.max_tokens {
        gen.insert("maxOutputTokens".into(), max_tokens.into());
    }
    if let Some(temperature) = config.temperature {
        gen.insert("temperature".into(), serde_json::json!(temperature));
    }
    serde_json::Value::Object(gen)
}

/// History messages as Gemini `contents`. System messages are excluded
/// here (they travel in `systemInstruction`); assistant turns map to the
/// `model` role.
fn build_contents(turn: &ChatTurn) -> Vec<serde_json::Value> {
    turn.messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|message| {
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            let parts: Vec<serde_json::Value> = match &message.content {
                MessageContent::Text(text) => vec![serde_json::json!({"text": text})],
                MessageContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => serde_json::json!({"text": text}),
                        ContentBlock::Image { mime_type, data } => serde_json::json!({
                            "inlineData": {"mimeType": mime_type, "data": data},
                        }),
                    })
                    .collect(),
            };
            serde_json::json!({"role": role, "parts": parts})
        })
        .collect()
}

/// Append the previous round's tool calls and results as a paired
/// model/user turn.
///
/// Each record decides its own rendering: a record carrying a thought
/// signature produces a structured `functionCall`/`functionResponse`
/// pair with the signature echoed on the call part, while a record
/// without one (e.g. stripped by a proxy) falls back to a text rendition
/// of its call and result. Signed calls in the same round keep their
/// signatures either way.
fn append_tool_round(contents: &mut Vec<serde_json::Value>, turn: &ChatTurn) {
    if turn.tool_results.is_empty() {
        return;
    }

    let mut call_parts = Vec::with_capacity(turn.tool_results.len());
    let mut response_parts = Vec::with_capacity(turn.tool_results.len());

    for record in &turn.tool_results {
        match record.tool_call_meta {
            Some(ref signature) => {
                call_parts.push(serde_json::json!({
                    "functionCall": {"name": record.tool_name, "args": record.tool_args},
                    "thoughtSignature": signature,
                }));
                response_parts.push(serde_json::json!({
                    "functionResponse": {
                        "name": record.tool_name,
                        "response": {"output": record.content},
                    }
                }));
            }
            None => {
                call_parts.push(serde_json::json!({
                    "text": format!("[Tool call] {}({})", record.tool_name, record.tool_args),
                }));
                response_parts.push(serde_json::json!({
                    "text": format!("[Tool result] {}: {}", record.tool_name, record.content),
                }));
            }
        }
    }

    contents.push(serde_json::json!({"role": "model", "parts": call_parts}));
    contents.push(serde_json::json!({"role": "user", "parts": response_parts}));
}

/// Parser state for one Gemini stream.
#[derive(Default)]
struct GeminiParser {
    call_counter: u32,
    finish_seen: bool,
    usage: Option<Usage>,
}

impl SsePayloadParser for GeminiParser {
    fn on_payload(&mut self, payload: &str) -> Vec<LlmEvent> {
        if payload == DONE_SENTINEL {
            return if self.finish_seen {
                vec![LlmEvent::Done {
                    usage: self.usage,
                    response_id: None,
                }]
            } else {
                Vec::new()
            };
        }

        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping malformed SSE frame");
                return Vec::new();
            }
        };

        if let Some(u) = value.get("usageMetadata") {
            self.usage = Some(Usage {
                input_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
                total_tokens: u["totalTokenCount"].as_u64().unwrap_or(0) as u32,
            });
        }

        let mut events = Vec::new();
        let candidate = &value["candidates"][0];

        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        events.push(LlmEvent::TextDelta {
                            content: text.to_string(),
                        });
                    }
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call["name"].as_str().unwrap_or_default().to_string();
                    if name.is_empty() {
                        continue;
                    }
                    self.call_counter += 1;
                    events.push(LlmEvent::ToolCall(ToolCall {
                        id: format!("gemini-call-{}", self.call_counter),
                        name,
                        args: call.get("args").cloned().unwrap_or(serde_json::json!({})),
                        meta: part["thoughtSignature"].as_str().map(String::from),
                    }));
                }
            }
        }

        if candidate.get("finishReason").and_then(|f| f.as_str()).is_some() {
            self.finish_seen = true;
        }

        events
    }

    fn on_end(&mut self) -> Vec<LlmEvent> {
        if self.finish_seen {
            vec![LlmEvent::Done {
                usage: self.usage,
                response_id: None,
            }]
        } else {
            vec![LlmEvent::Error {
                message: "stream ended without finish reason".into(),
            }]
        }
    }
}
