//! `via chat` -- run a single agent turn from the terminal.
//!
//! Streams text deltas to stdout as they arrive and answers permission
//! prompts interactively on stdin.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use openvia_core::{PermissionCallback, TurnRequest};
use openvia_types::config::Config;
use openvia_types::AgentEvent;

use crate::gateway::build_runtime;

/// Interactive yes/no prompt on the controlling terminal.
struct TerminalPermission;

#[async_trait]
impl PermissionCallback for TerminalPermission {
    async fn request(&self, prompt: &str) -> bool {
        println!("\n{prompt}");
        print!("Approve? [y/N] ");
        let _ = std::io::stdout().flush();

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match line {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

/// Run one turn and stream the output.
pub async fn run(config: Config, message: String) -> anyhow::Result<()> {
    let orchestrator = build_runtime(&config)?;

    let mut events = orchestrator.run_turn(TurnRequest {
        content: message.into(),
        user_id: "cli".into(),
        chat_id: "local".into(),
        channel_id: "cli".into(),
        on_permission: Some(Arc::new(TerminalPermission)),
    });

    let mut failed = false;
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::TextDelta { content } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ToolStart { name, args, .. } => {
                eprintln!("[tool] {name} {args}");
            }
            AgentEvent::ToolPending { .. } => {
                // The prompt is printed by the permission callback.
            }
            AgentEvent::ToolResult { name, result, .. } => {
                debug!(tool = %name, success = result.success, "tool finished");
                if !result.success {
                    eprintln!(
                        "[tool] {name} failed: {}",
                        result.error.unwrap_or_default()
                    );
                }
            }
            AgentEvent::Done { .. } => {
                println!();
            }
            AgentEvent::Error { message } => {
                eprintln!("\nError: {message}");
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("turn failed");
    }
    Ok(())
}
