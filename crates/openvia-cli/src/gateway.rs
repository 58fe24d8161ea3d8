//! Gateway wiring: channels in front, agent runtime behind.
//!
//! Builds the adapter, registry, policy engine, permission bridge,
//! session manager, and orchestrator from the resolved configuration,
//! then starts the configured channel and serves turns until ctrl-c.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use openvia_channels::{
    ApprovalSink, Channel, FeishuChannel, MessageHandler, ReplyFn, TelegramChannel,
};
use openvia_core::{
    Orchestrator, OrchestratorConfig, PermissionBridge, PermissionCallback, PermissionHandler,
    PolicyEngine, SessionManager, ToolRegistry, TurnRequest,
};
use openvia_types::config::Config;
use openvia_types::{
    AgentEvent, GatewayError, MessageContent, PermissionContext, PermissionDecision,
    PermissionRequest,
};

/// Adapts the permission bridge to the channels' [`ApprovalSink`].
pub struct BridgeSink(pub Arc<PermissionBridge>);

#[async_trait]
impl ApprovalSink for BridgeSink {
    async fn resolve(&self, id: &str, decision: PermissionDecision) -> bool {
        self.0.resolve(id, decision).await
    }

    async fn find_by_user(&self, user_id: &str) -> Option<(String, String)> {
        self.0.find_request_by_user(user_id).await
    }
}

/// Routes prompts from the bridge to the channel that originated the
/// requesting turn.
struct ChannelPermissionHandler {
    channels: HashMap<String, Arc<dyn Channel>>,
}

#[async_trait]
impl PermissionHandler for ChannelPermissionHandler {
    async fn deliver(&self, request: PermissionRequest) -> Result<(), GatewayError> {
        let Some(channel) = self.channels.get(&request.context.channel_id) else {
            return Err(GatewayError::Internal(format!(
                "no channel registered for '{}'",
                request.context.channel_id
            )));
        };
        channel
            .handle_permission_request(&request)
            .await
            .map_err(GatewayError::from)
    }
}

/// Permission callback for one turn, routed through the bridge.
struct BridgePermission {
    bridge: Arc<PermissionBridge>,
    context: PermissionContext,
}

#[async_trait]
impl PermissionCallback for BridgePermission {
    async fn request(&self, prompt: &str) -> bool {
        self.bridge
            .request(prompt, self.context.clone())
            .await
            .is_allowed()
    }
}

/// The per-channel message handler: one inbound message becomes one
/// orchestrator turn; the final response (or error) goes back through the
/// channel's reply function.
pub struct GatewayHandler {
    orchestrator: Arc<Orchestrator>,
    bridge: Arc<PermissionBridge>,
    channel_id: String,
}

impl GatewayHandler {
    /// Create a handler bound to one channel.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        bridge: Arc<PermissionBridge>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            bridge,
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for GatewayHandler {
    async fn handle(
        &self,
        content: MessageContent,
        user_id: &str,
        chat_id: &str,
        reply: ReplyFn,
    ) {
        let callback = Arc::new(BridgePermission {
            bridge: self.bridge.clone(),
            context: PermissionContext {
                user_id: user_id.to_string(),
                chat_id: chat_id.to_string(),
                channel_id: self.channel_id.clone(),
            },
        });

        let mut events = self.orchestrator.run_turn(TurnRequest {
            content,
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            channel_id: self.channel_id.clone(),
            on_permission: Some(callback),
        });

        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::TextDelta { .. } => {
                    // Chat channels deliver the full response at the end.
                }
                AgentEvent::ToolStart { name, .. } => {
                    debug!(tool = %name, user = %user_id, "tool started");
                }
                AgentEvent::ToolPending { name, .. } => {
                    // The prompt itself travels through the bridge.
                    debug!(tool = %name, user = %user_id, "awaiting approval");
                }
                AgentEvent::ToolResult { name, result, .. } => {
                    debug!(tool = %name, success = result.success, "tool finished");
                }
                AgentEvent::Done { full_response } => {
                    if full_response.is_empty() {
                        continue;
                    }
                    if let Err(e) = reply(full_response).await {
                        error!(error = %e, user = %user_id, "failed to send reply");
                    }
                }
                AgentEvent::Error { message } => {
                    warn!(user = %user_id, error = %message, "turn failed");
                    let notice = format!("Error: {message}");
                    if let Err(e) = reply(notice).await {
                        error!(error = %e, user = %user_id, "failed to send error notice");
                    }
                }
            }
        }
    }
}

/// Build the agent runtime shared by `gateway` and `chat`.
pub fn build_runtime(config: &Config) -> anyhow::Result<Arc<Orchestrator>> {
    let adapter = openvia_llm::build_adapter(&config.llm)?;
    info!(
        adapter = adapter.name(),
        model = %config.llm.model,
        context_tokens = adapter.max_context_tokens(),
        "LLM adapter ready"
    );

    let mut registry = ToolRegistry::new();
    registry.register_all(openvia_tools::builtin_tools(Config::skills_dir()));
    info!(tools = registry.len(), "tool registry ready");

    let policy = PolicyEngine::new(Vec::new(), config.llm.shell_confirm_list.clone());

    Ok(Arc::new(Orchestrator::new(
        adapter,
        Arc::new(registry),
        Arc::new(policy),
        Arc::new(SessionManager::new()),
        OrchestratorConfig {
            max_iterations: config.llm.max_iterations,
            system_prompt: config.llm.system_prompt.clone(),
            workspace_root: Config::sessions_dir(),
        },
    )))
}

/// Build the configured channel.
fn build_channel(config: &Config, sink: Arc<dyn ApprovalSink>) -> anyhow::Result<Arc<dyn Channel>> {
    match config.adapters.default.as_str() {
        "telegram" => {
            let telegram = config
                .adapters
                .telegram
                .as_ref()
                .filter(|c| !c.bot_token.is_empty())
                .ok_or_else(|| anyhow::anyhow!("telegram adapter selected but no bot token configured"))?;
            Ok(Arc::new(TelegramChannel::new(
                &telegram.bot_token,
                telegram.allowed_user_ids.clone(),
                sink,
            )))
        }
        "feishu" => {
            let feishu = config
                .adapters
                .feishu
                .as_ref()
                .filter(|c| !c.app_id.is_empty())
                .ok_or_else(|| anyhow::anyhow!("feishu adapter selected but no app credentials configured"))?;
            Ok(Arc::new(FeishuChannel::new(
                &feishu.app_id,
                &feishu.app_secret,
                feishu.ws_endpoint.clone(),
                feishu.allowed_user_ids.clone(),
                sink,
            )))
        }
        other => anyhow::bail!("unknown adapter: {other} (expected telegram or feishu)"),
    }
}

/// Run the gateway until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_runtime(&config)?;
    let bridge = Arc::new(PermissionBridge::new());

    let channel = build_channel(&config, Arc::new(BridgeSink(bridge.clone())))?;
    let channel_id = channel.id().to_string();

    bridge
        .register_handler(Arc::new(ChannelPermissionHandler {
            channels: HashMap::from([(channel_id.clone(), channel.clone())]),
        }))
        .await;

    let cancel = CancellationToken::new();
    let sweeper = orchestrator.sessions().clone().spawn_sweeper(cancel.clone());

    let handler: Arc<dyn MessageHandler> = Arc::new(GatewayHandler::new(
        orchestrator,
        bridge,
        channel_id.clone(),
    ));

    info!(channel = %channel_id, "gateway starting");

    let channel_task = {
        let channel = channel.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { channel.start(handler, cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();

    match channel_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "channel exited with error"),
        Err(e) => error!(error = %e, "channel task panicked"),
    }
    channel.stop().await;
    let _ = sweeper.await;

    info!("gateway stopped");
    Ok(())
}
