//! Channel contract.
//!
//! Each channel adapter implements [`Channel`]. The host wires a
//! [`MessageHandler`] (the agent entry point) and an [`ApprovalSink`]
//! (the permission bridge) and calls [`Channel::start`], which runs until
//! the cancellation token fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use openvia_types::{ChannelError, MessageContent, PermissionDecision, PermissionRequest};

/// Future returned by a reply function.
pub type ReplyFuture = Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>>;

/// Sends one reply back to the originating chat. May be called multiple
/// times per turn; the channel may split overly long replies.
pub type ReplyFn = Arc<dyn Fn(String) -> ReplyFuture + Send + Sync>;

/// The agent entry point a channel delivers inbound messages to.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound user message. `reply` sends text back to the
    /// chat the message came from.
    async fn handle(
        &self,
        content: MessageContent,
        user_id: &str,
        chat_id: &str,
        reply: ReplyFn,
    );
}

/// Where a channel routes user approval decisions. Implemented by the
/// gateway over the permission bridge.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    /// Resolve a pending request by id. Returns whether one was pending.
    async fn resolve(&self, id: &str, decision: PermissionDecision) -> bool;

    /// A pending request for a user, as `(id, prompt)`. Lets channels
    /// accept free-text approvals in lieu of button clicks.
    async fn find_by_user(&self, user_id: &str) -> Option<(String, String)>;
}

/// A bidirectional connection to one chat platform.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel identifier (e.g. "telegram", "feishu").
    fn id(&self) -> &str;

    /// Receive messages until `cancel` triggers. Inbound messages go to
    /// `handler`; each message is handled in its own task so one slow
    /// turn never blocks the intake loop.
    async fn start(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Release channel resources. The default implementation is a no-op;
    /// most adapters tear down through the cancellation token instead.
    async fn stop(&self) {}

    /// Deliver a permission prompt to the user behind `request`.
    ///
    /// Channels that cannot prompt return
    /// [`ChannelError::Unsupported`]; the bridge then resolves the
    /// request as deny.
    async fn handle_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported(format!(
            "channel '{}' cannot deliver permission prompts (request {})",
            self.id(),
            request.id,
        )))
    }
}

/// Parse a free-text approval reply. Returns `None` for anything that is
/// not a clear yes/no.
pub(crate) fn parse_text_decision(text: &str) -> Option<PermissionDecision> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "approve" | "allow" | "ok" => Some(PermissionDecision::Allow),
        "no" | "n" | "deny" | "reject" => Some(PermissionDecision::Deny),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_decisions() {
        assert_eq!(parse_text_decision("yes"), Some(PermissionDecision::Allow));
        assert_eq!(parse_text_decision(" Y "), Some(PermissionDecision::Allow));
        assert_eq!(parse_text_decision("Allow"), Some(PermissionDecision::Allow));
        assert_eq!(parse_text_decision("no"), Some(PermissionDecision::Deny));
        assert_eq!(parse_text_decision("DENY"), Some(PermissionDecision::Deny));
        assert_eq!(parse_text_decision("maybe"), None);
        assert_eq!(parse_text_decision("yes please"), None);
    }
}
