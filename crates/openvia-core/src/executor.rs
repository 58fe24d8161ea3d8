//! Tool executor: lookup, validate, invoke, normalize.
//!
//! The executor is a pure execution unit -- it never consults policy. The
//! orchestrator classifies the call first and only hands approved calls
//! here. Every failure mode (unknown tool, bad arguments, runtime error)
//! is normalized into a [`ToolResult`] so the LLM always receives a
//! well-formed result it can react to.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use openvia_types::ToolResult;

use crate::registry::ToolRegistry;

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// The user whose turn triggered the call.
    pub user_id: String,
    /// The chat the turn came from.
    pub chat_id: String,
    /// Working directory for filesystem and shell tools.
    pub work_dir: PathBuf,
}

/// One execution request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Name of the tool to run.
    pub tool_name: String,
    /// Parsed arguments.
    pub args: Value,
    /// Session context.
    pub ctx: ExecContext,
}

/// Dispatches tool calls through the registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    /// Create an executor over a shared registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Execute one tool call, normalizing every failure into a
    /// [`ToolResult`].
    pub async fn execute(&self, req: ExecRequest) -> ToolResult {
        let Some(tool) = self.registry.get(&req.tool_name) else {
            return ToolResult::fail("tool not found");
        };

        if let Err(e) = tool.input_schema().validate(&req.args) {
            return ToolResult::fail(e.to_string());
        }

        debug!(tool = %req.tool_name, user = %req.ctx.user_id, "executing tool");

        match tool.execute(req.args, &req.ctx).await {
            Ok(data) => ToolResult::ok(data),
            Err(e) => {
                error!(tool = %req.tool_name, error = %e, "tool execution failed");
                ToolResult::fail(e.to_string())
            }
        }
    }
}
