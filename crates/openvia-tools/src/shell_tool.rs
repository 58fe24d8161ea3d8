//! Shell execution tool.
//!
//! Runs commands through `sh -c` in the session working directory with a
//! configurable timeout and a bounded output buffer. Whether a command may
//! run at all is the policy engine's call -- by the time a call reaches
//! this tool it has already been allowed or approved.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use openvia_core::{ExecContext, FieldType, Tool, ToolError, ToolInputSchema};

/// Default timeout when none is specified.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hard ceiling on the timeout argument.
const MAX_TIMEOUT_SECS: u64 = 300;

/// Maximum bytes of combined output returned to the model.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Execute shell commands with timeout and output bounds.
pub struct ShellTool {
    max_timeout: u64,
}

impl ShellTool {
    /// Create a shell tool with the default timeout ceiling.
    pub fn new() -> Self {
        Self {
            max_timeout: MAX_TIMEOUT_SECS,
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the session working directory and return its output."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new()
            .required("command", FieldType::String, "The shell command to execute")
            .optional(
                "timeout",
                FieldType::Number,
                "Timeout in seconds (default 30, max 300)",
            )
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["shell".into(), "exec".into()]
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<Value, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: command".into()))?;

        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(self.max_timeout);

        tokio::fs::create_dir_all(&ctx.work_dir)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("workspace unavailable: {e}")))?;

        debug!(command, timeout_secs, "executing shell command");
        let start = Instant::now();

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn process: {e}")))?;

        // Drain pipes concurrently so a chatty child never blocks on a
        // full pipe while we wait for it to exit.
        let stdout_task = tokio::spawn(read_capped(child.stdout.take()));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

        let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait())
            .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!("process error: {e}")));
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(ToolError::Timeout(timeout_secs));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(json!({
            "exit_code": status.code().unwrap_or(-1),
            "stdout": stdout,
            "stderr": stderr,
            "duration_ms": duration_ms,
        }))
    }
}

/// Read a pipe to completion, capping the buffer at [`MAX_OUTPUT_BYTES`].
/// Bytes past the cap are drained and discarded so the child can finish.
async fn read_capped<R>(handle: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncReadExt;

    let Some(mut handle) = handle else {
        return String::new();
    };
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match handle.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < MAX_OUTPUT_BYTES {
                    let take = n.min(MAX_OUTPUT_BYTES - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    let mut out = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        out.push_str("\n[output truncated]");
    }
    out
}
