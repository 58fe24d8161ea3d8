//! Human-in-the-loop permission types.
//!
//! A [`PermissionRequest`] is created when the policy engine requires
//! approval for a tool call. The request travels out through the channel
//! that originated the turn; the user's decision comes back asynchronously
//! and is correlated by the request id.

use serde::{Deserialize, Serialize};

/// Where a permission request came from, used to route the prompt back to
/// the originating channel and chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionContext {
    /// The user whose turn triggered the request.
    pub user_id: String,
    /// The chat the turn came from.
    pub chat_id: String,
    /// The channel the turn came from (e.g. "telegram").
    pub channel_id: String,
}

/// An outstanding approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Unique request id (correlates the asynchronous response).
    pub id: String,
    /// The prompt to show the user.
    pub prompt: String,
    /// Routing context for the originating channel.
    pub context: PermissionContext,
}

/// A user's decision on a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// The user approved the tool call.
    Allow,
    /// The user rejected the tool call.
    Deny,
}

impl PermissionDecision {
    /// True for [`PermissionDecision::Allow`].
    pub fn is_allowed(self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }
}
