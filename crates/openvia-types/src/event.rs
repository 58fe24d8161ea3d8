//! Unified event model for the LLM protocol layer and the agent loop.
//!
//! [`LlmEvent`] is what the three protocol adapters produce from their
//! heterogeneous wire formats; [`AgentEvent`] is what the orchestrator
//! streams out to channels. Tool calls live only inside a single turn --
//! they are never persisted into session history.

use serde::{Deserialize, Serialize};

/// A structured tool invocation request emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id, or synthesized when the provider has none.
    pub id: String,
    /// The tool name to invoke.
    pub name: String,
    /// Parsed JSON arguments. `Null` when the argument payload could not
    /// be parsed; the policy layer then classifies the call conservatively.
    pub args: serde_json::Value,
    /// Opaque provider hint (e.g. a Gemini thought signature) that must be
    /// echoed back with the tool response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool ran to completion.
    pub success: bool,
    /// Tool output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A completed tool round, spliced into the next LLM request.
///
/// The adapter converts these into the provider's native tool-response
/// representation (`role:"tool"` messages, `function_call_output` items, or
/// paired Gemini `functionCall`/`functionResponse` parts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// Id of the tool call this result answers.
    pub tool_call_id: String,
    /// Name of the tool that ran.
    pub tool_name: String,
    /// The arguments the call carried.
    pub tool_args: serde_json::Value,
    /// Provider hint carried over from the call (Gemini thought signature).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_meta: Option<String>,
    /// JSON-serialized [`ToolResult`].
    pub content: String,
    /// True when the result is an error.
    pub is_error: bool,
}

/// The JSON-Schema projection of a tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: serde_json::Value,
}

/// Token usage reported by a provider at end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub input_tokens: u32,
    /// Tokens generated.
    pub output_tokens: u32,
    /// Total tokens.
    pub total_tokens: u32,
}

/// A unified event produced by an LLM protocol adapter.
///
/// Every adapter translates its provider's wire format into this sequence.
/// The sequence is finite; [`LlmEvent::Done`] or [`LlmEvent::Error`] is
/// always the last element.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// A partial text token.
    TextDelta {
        /// The text fragment.
        content: String,
    },
    /// A complete tool invocation request.
    ToolCall(ToolCall),
    /// A partial tool invocation (progress only; the terminal
    /// [`LlmEvent::ToolCall`] carries the full arguments).
    ToolCallDelta {
        /// Id of the call being assembled, when known.
        id: Option<String>,
        /// Tool name, when known.
        name: Option<String>,
        /// Raw argument fragment.
        args_fragment: String,
    },
    /// The stream completed normally.
    Done {
        /// Token usage, when the provider reports it.
        usage: Option<Usage>,
        /// Provider response id for stateful providers.
        response_id: Option<String>,
    },
    /// Terminal failure; no further events follow.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// An event emitted by the agent orchestrator during one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A partial text token from the model.
    TextDelta {
        /// The text fragment.
        content: String,
    },
    /// A tool call is about to be evaluated and (possibly) executed.
    ToolStart {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool arguments.
        args: serde_json::Value,
    },
    /// A tool call is awaiting human approval.
    ToolPending {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool arguments.
        args: serde_json::Value,
        /// The approval prompt shown to the user.
        prompt: String,
    },
    /// A tool call finished (executed, denied, or failed).
    ToolResult {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// The outcome.
        result: ToolResult,
    },
    /// The turn completed; `full_response` is the accumulated text.
    Done {
        /// The complete assistant response for the turn.
        full_response: String,
    },
    /// The turn failed; no further events follow.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl AgentEvent {
    /// True for the two terminal variants.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Error { .. })
    }
}
