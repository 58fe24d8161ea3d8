//! Permission bridge: correlation of out-of-band approvals.
//!
//! The bridge hands approval prompts to the channel subsystem through a
//! single registered [`PermissionHandler`] and parks the requesting turn on
//! a one-shot resolver until the user's decision arrives (button click or
//! free-text reply). Requests from different sessions are concurrent and
//! independent; resolving an unknown or already-resolved id is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use openvia_types::{
    GatewayError, PermissionContext, PermissionDecision, PermissionRequest,
};

/// Delivers a prompt to the channel that originated the request.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    /// Deliver the prompt. A returned error resolves the request as deny.
    async fn deliver(&self, request: PermissionRequest) -> Result<(), GatewayError>;
}

struct PendingPermission {
    prompt: String,
    user_id: String,
    resolver: oneshot::Sender<PermissionDecision>,
}

/// Process-wide bridge between awaiting turns and channel responses.
#[derive(Default)]
pub struct PermissionBridge {
    pending: Mutex<HashMap<String, PendingPermission>>,
    handler: RwLock<Option<Arc<dyn PermissionHandler>>>,
}

impl PermissionBridge {
    /// Create an empty bridge with no handler registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the dispatcher that routes prompts to channels. Replaces
    /// any previously registered handler.
    pub async fn register_handler(&self, handler: Arc<dyn PermissionHandler>) {
        *self.handler.write().await = Some(handler);
    }

    /// Issue an approval request and await the decision.
    ///
    /// With no handler registered the request resolves immediately as
    /// deny; a handler delivery failure also resolves as deny. A dropped
    /// resolver (bridge cleared) counts as deny.
    pub async fn request(
        &self,
        prompt: impl Into<String>,
        context: PermissionContext,
    ) -> PermissionDecision {
        let prompt = prompt.into();

        let Some(handler) = self.handler.read().await.clone() else {
            warn!("permission requested with no handler registered, denying");
            return PermissionDecision::Deny;
        };

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id.clone(),
                PendingPermission {
                    prompt: prompt.clone(),
                    user_id: context.user_id.clone(),
                    resolver: tx,
                },
            );
        }

        let request = PermissionRequest {
            id: id.clone(),
            prompt,
            context,
        };

        if let Err(e) = handler.deliver(request).await {
            warn!(id = %id, error = %e, "permission prompt delivery failed, denying");
            self.pending.lock().await.remove(&id);
            return PermissionDecision::Deny;
        }

        rx.await.unwrap_or(PermissionDecision::Deny)
    }

    /// Complete a pending request. Idempotent: unknown ids (including
    /// already-resolved ones) are logged and ignored. Returns whether a
    /// pending request was actually resolved.
    pub async fn resolve(&self, id: &str, decision: PermissionDecision) -> bool {
        let entry = self.pending.lock().await.remove(id);
        match entry {
            Some(pending) => {
                debug!(id, ?decision, "resolving permission request");
                // The requester may have gone away; that is fine.
                let _ = pending.resolver.send(decision);
                true
            }
            None => {
                debug!(id, "resolve for unknown permission request, ignoring");
                false
            }
        }
    }

    /// Find a pending request for a user, for channels that take
    /// free-text approvals in lieu of button clicks. Returns `(id, prompt)`.
    pub async fn find_request_by_user(&self, user_id: &str) -> Option<(String, String)> {
        let pending = self.pending.lock().await;
        pending
            .iter()
            .find(|(_, p)| p.user_id == user_id)
            .map(|(id, p)| (id.clone(), p.prompt.clone()))
    }

    /// Number of outstanding requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn context(user: &str) -> PermissionContext {
        PermissionContext {
            user_id: user.into(),
            chat_id: format!("chat-{user}"),
            channel_id: "test".into(),
        }
    }

    /// Handler that records delivered requests for inspection.
    #[derive(Default)]
    struct RecordingHandler {
        delivered: StdMutex<Vec<PermissionRequest>>,
    }

    #[async_trait]
    impl PermissionHandler for RecordingHandler {
        async fn deliver(&self, request: PermissionRequest) -> Result<(), GatewayError> {
            self.delivered.lock().unwrap().push(request);
            Ok(())
        }
    }

    /// Handler that always fails delivery.
    struct FailingHandler;

    #[async_trait]
    impl PermissionHandler for FailingHandler {
        async fn deliver(&self, _request: PermissionRequest) -> Result<(), GatewayError> {
            Err(GatewayError::Channel("socket closed".into()))
        }
    }

    #[tokio::test]
    async fn no_handler_denies_immediately() {
        let bridge = PermissionBridge::new();
        let decision = bridge.request("may I?", context("u1")).await;
        assert_eq!(decision, PermissionDecision::Deny);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn delivery_failure_denies_and_cleans_up() {
        let bridge = PermissionBridge::new();
        bridge.register_handler(Arc::new(FailingHandler)).await;
        let decision = bridge.request("may I?", context("u1")).await;
        assert_eq!(decision, PermissionDecision::Deny);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn request_resolves_with_user_decision() {
        let bridge = Arc::new(PermissionBridge::new());
        let handler = Arc::new(RecordingHandler::default());
        bridge.register_handler(handler.clone()).await;

        let bridge2 = bridge.clone();
        let task = tokio::spawn(async move { bridge2.request("run rm?", context("u1")).await });

        // Wait for delivery, then resolve as the user would.
        let id = loop {
            let delivered = handler.delivered.lock().unwrap().clone();
            if let Some(req) = delivered.first() {
                break req.id.clone();
            }
            drop(delivered);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };

        assert!(bridge.resolve(&id, PermissionDecision::Allow).await);
        assert_eq!(task.await.unwrap(), PermissionDecision::Allow);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let bridge = Arc::new(PermissionBridge::new());
        let handler = Arc::new(RecordingHandler::default());
        bridge.register_handler(handler.clone()).await;

        let bridge2 = bridge.clone();
        let task = tokio::spawn(async move { bridge2.request("?", context("u1")).await });

        let id = loop {
            if let Some(req) = handler.delivered.lock().unwrap().first().cloned() {
                break req.id;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };

        assert!(bridge.resolve(&id, PermissionDecision::Deny).await);
        // A second resolve -- even with the opposite decision -- is a no-op.
        assert!(!bridge.resolve(&id, PermissionDecision::Allow).await);
        assert_eq!(task.await.unwrap(), PermissionDecision::Deny);
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_noop() {
        let bridge = PermissionBridge::new();
        assert!(!bridge.resolve("no-such-id", PermissionDecision::Allow).await);
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_cross_talk() {
        let bridge = Arc::new(PermissionBridge::new());
        let handler = Arc::new(RecordingHandler::default());
        bridge.register_handler(handler.clone()).await;

        let b1 = bridge.clone();
        let t1 = tokio::spawn(async move { b1.request("for u1", context("u1")).await });
        let b2 = bridge.clone();
        let t2 = tokio::spawn(async move { b2.request("for u2", context("u2")).await });

        // Wait for both prompts to be delivered with distinct ids.
        let (id1, id2) = loop {
            let delivered = handler.delivered.lock().unwrap().clone();
            if delivered.len() == 2 {
                let a = delivered.iter().find(|r| r.context.user_id == "u1").unwrap();
                let b = delivered.iter().find(|r| r.context.user_id == "u2").unwrap();
                break (a.id.clone(), b.id.clone());
            }
            drop(delivered);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        assert_ne!(id1, id2);

        // Resolve u2 first as allow, then u1 as deny.
        bridge.resolve(&id2, PermissionDecision::Allow).await;
        bridge.resolve(&id1, PermissionDecision::Deny).await;

        assert_eq!(t1.await.unwrap(), PermissionDecision::Deny);
        assert_eq!(t2.await.unwrap(), PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn find_request_by_user() {
        let bridge = Arc::new(PermissionBridge::new());
        let handler = Arc::new(RecordingHandler::default());
        bridge.register_handler(handler.clone()).await;

        let b = bridge.clone();
        let task = tokio::spawn(async move { b.request("free-text me", context("u9")).await });

        loop {
            if bridge.pending_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (id, prompt) = bridge.find_request_by_user("u9").await.unwrap();
        assert_eq!(prompt, "free-text me");
        assert!(bridge.find_request_by_user("stranger").await.is_none());

        bridge.resolve(&id, PermissionDecision::Allow).await;
        assert_eq!(task.await.unwrap(), PermissionDecision::Allow);
    }
}
