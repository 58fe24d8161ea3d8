//! [`Channel`] implementation for Feishu.
//!
//! Events arrive over a websocket subscription; replies go out through
//! the REST `im/v1/messages` API authenticated with a tenant access token
//! that is refreshed before expiry. The websocket reconnects with a fixed
//! backoff until cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use openvia_types::{ChannelError, MessageContent, PermissionRequest};

use crate::traits::{parse_text_decision, ApprovalSink, Channel, MessageHandler, ReplyFn};

use super::types::{EventEnvelope, TenantTokenResponse};

/// Feishu open platform REST base.
const REST_BASE: &str = "https://open.feishu.cn/open-apis";

/// Delay before reconnecting a dropped websocket.
const RECONNECT_DELAY_SECS: u64 = 5;

/// Refresh the tenant token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// REST sender shared between the channel and its reply closures.
struct FeishuSender {
    app_id: String,
    app_secret: String,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl FeishuSender {
    /// A valid tenant access token, refreshing when near expiry.
    async fn tenant_token(&self) -> Result<String, ChannelError> {
        {
            let cached = self.token.read().await;
            if let Some(ref token) = *cached {
                if token.expires_at > Instant::now() {
                    return Ok(token.token.clone());
                }
            }
        }

        debug!("refreshing feishu tenant access token");
        let resp = self
            .http
            .post(format!("{REST_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&serde_json::json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        let body: TenantTokenResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        if body.code != 0 {
            return Err(ChannelError::AuthFailed(format!(
                "tenant token error {}: {}",
                body.code, body.msg
            )));
        }

        let lifetime = body.expire.saturating_sub(TOKEN_REFRESH_MARGIN_SECS).max(60);
        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            token: body.tenant_access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(body.tenant_access_token)
    }

    /// Send a text message to a chat.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self.tenant_token().await?;
        let content = serde_json::json!({ "text": text }).to_string();

        let resp = self
            .http
            .post(format!(
                "{REST_BASE}/im/v1/messages?receive_id_type=chat_id"
            ))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "receive_id": chat_id,
                "msg_type": "text",
                "content": content,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(body));
        }
        Ok(())
    }
}

/// Feishu app channel.
pub struct FeishuChannel {
    sender: Arc<FeishuSender>,
    ws_endpoint: String,
    allowed_users: Vec<String>,
    approvals: Arc<dyn ApprovalSink>,
}

impl FeishuChannel {
    /// Create a channel for the given app credentials. `ws_endpoint`
    /// overrides the default event subscription endpoint; an empty
    /// allow-list admits everyone.
    pub fn new(
        app_id: &str,
        app_secret: &str,
        ws_endpoint: Option<String>,
        allowed_users: Vec<String>,
        approvals: Arc<dyn ApprovalSink>,
    ) -> Self {
        Self {
            sender: Arc::new(FeishuSender {
                app_id: app_id.to_string(),
                app_secret: app_secret.to_string(),
                http: reqwest::Client::new(),
                token: RwLock::new(None),
            }),
            ws_endpoint: ws_endpoint.unwrap_or_else(|| "wss://open.feishu.cn/ws".to_string()),
            allowed_users,
            approvals,
        }
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|id| id == sender_id)
    }

    fn reply_fn(&self, chat_id: String) -> ReplyFn {
        let sender = self.sender.clone();
        Arc::new(move |text: String| {
            let sender = sender.clone();
            let chat_id = chat_id.clone();
            Box::pin(async move { sender.send_text(&chat_id, &text).await })
        })
    }

    async fn process_frame(&self, payload: &str, handler: &Arc<dyn MessageHandler>) {
        let envelope: EventEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "skipping non-event frame");
                return;
            }
        };

        let event_type = envelope
            .header
            .as_ref()
            .map(|h| h.event_type.as_str())
            .unwrap_or("");
        if event_type != "im.message.receive_v1" {
            debug!(event_type, "ignoring event");
            return;
        }

        let Some(event) = envelope.event else {
            return;
        };
        let sender_id = event
            .sender
            .and_then(|s| s.sender_id)
            .map(|id| id.open_id)
            .unwrap_or_default();
        let Some(message) = event.message else {
            return;
        };
        let Some(text) = message.text() else {
            debug!("skipping non-text message");
            return;
        };

        if !self.is_allowed(&sender_id) {
            warn!(sender_id = %sender_id, "message from disallowed user, ignoring");
            return;
        }

        if let Some(decision) = parse_text_decision(&text) {
            if let Some((request_id, _)) = self.approvals.find_by_user(&sender_id).await {
                debug!(request_id = %request_id, ?decision, "free-text approval");
                self.approvals.resolve(&request_id, decision).await;
                return;
            }
        }

        let reply = self.reply_fn(message.chat_id.clone());
        let handler = handler.clone();
        let chat_id = message.chat_id;
        tokio::spawn(async move {
            handler
                .handle(MessageContent::Text(text), &sender_id, &chat_id, reply)
                .await;
        });
    }

    /// One websocket session: connect, then pump frames until the socket
    /// drops or cancellation fires.
    async fn run_socket(
        &self,
        handler: &Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        let (mut socket, _) = connect_async(&self.ws_endpoint)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        info!(endpoint = %self.ws_endpoint, "feishu websocket connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = socket.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(payload))) => {
                            self.process_frame(payload.as_str(), handler).await;
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(ChannelError::ReceiveFailed("websocket closed".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(ChannelError::ReceiveFailed(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn id(&self) -> &str {
        "feishu"
    }

    async fn start(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        // Fail fast on bad credentials before entering the reconnect loop.
        self.sender.tenant_token().await?;

        loop {
            if cancel.is_cancelled() {
                info!("feishu channel cancelled");
                return Ok(());
            }
            match self.run_socket(&handler, &cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "feishu websocket error, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(
                            Duration::from_secs(RECONNECT_DELAY_SECS)
                        ) => {}
                    }
                }
            }
        }
    }

    async fn handle_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<(), ChannelError> {
        let prompt = format!(
            "{}\n\nReply \"yes\" to approve or \"no\" to deny.",
            request.prompt
        );
        self.sender.send_text(&request.context.chat_id, &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openvia_types::PermissionDecision;

    struct NoopSink;

    #[async_trait]
    impl ApprovalSink for NoopSink {
        async fn resolve(&self, _id: &str, _decision: PermissionDecision) -> bool {
            false
        }
        async fn find_by_user(&self, _user_id: &str) -> Option<(String, String)> {
            None
        }
    }

    fn channel(allowed: Vec<String>) -> FeishuChannel {
        FeishuChannel::new("cli_app", "secret", None, allowed, Arc::new(NoopSink))
    }

    #[test]
    fn default_ws_endpoint() {
        let ch = channel(vec![]);
        assert_eq!(ch.ws_endpoint, "wss://open.feishu.cn/ws");
        assert_eq!(ch.id(), "feishu");
    }

    #[test]
    fn ws_endpoint_override() {
        let ch = FeishuChannel::new(
            "a",
            "s",
            Some("wss://example.com/ws".into()),
            vec![],
            Arc::new(NoopSink),
        );
        assert_eq!(ch.ws_endpoint, "wss://example.com/ws");
    }

    #[test]
    fn allow_list_semantics() {
        let open = channel(vec![]);
        assert!(open.is_allowed("anyone"));

        let restricted = channel(vec!["ou_1".into()]);
        assert!(restricted.is_allowed("ou_1"));
        assert!(!restricted.is_allowed("ou_2"));
    }
}
