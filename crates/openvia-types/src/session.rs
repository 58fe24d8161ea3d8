//! Per-user conversation session state.
//!
//! A [`Session`] holds the rolling history for one `(user_id, chat_id)`
//! pair. History is bounded at [`MAX_HISTORY`] messages: when exceeded,
//! the oldest messages are dropped first, keeping user/assistant pairing
//! intact so the model never sees a dangling assistant turn at the front.
//! Sessions are in-memory only; they do not survive a restart.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::message::{Message, Role};

/// Maximum messages retained in a session's history.
pub const MAX_HISTORY: usize = 20;

/// Rolling conversation state for one user in one chat.
#[derive(Debug, Clone)]
pub struct Session {
    /// The user this session belongs to.
    pub user_id: String,
    /// The chat this session belongs to.
    pub chat_id: String,
    /// Bounded conversation history.
    pub history: Vec<Message>,
    /// Last time this session was touched (drives eviction).
    pub last_activity: DateTime<Utc>,
    /// Provider response id for stateful providers (Responses API).
    pub provider_response_id: Option<String>,
    /// When set, only these tools may run for this session.
    pub allowed_tools: Option<HashSet<String>>,
    /// Tools always denied for this session.
    pub denied_tools: HashSet<String>,
}

impl Session {
    /// Create a fresh session.
    pub fn new(user_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            history: Vec::new(),
            last_activity: Utc::now(),
            provider_response_id: None,
            allowed_tools: None,
            denied_tools: HashSet::new(),
        }
    }

    /// Stable key for this session: `"{user_id}:{chat_id}"`.
    pub fn key(&self) -> String {
        session_key(&self.user_id, &self.chat_id)
    }

    /// Append a message, enforcing the history bound.
    ///
    /// When the bound is exceeded, messages are removed from the front; if
    /// removal leaves an assistant message first, it is removed too so the
    /// history always starts at a user turn.
    pub fn add_message(&mut self, message: Message) {
        self.history.push(message);
        while self.history.len() > MAX_HISTORY {
            self.history.remove(0);
            if self
                .history
                .first()
                .is_some_and(|m| m.role == Role::Assistant)
            {
                self.history.remove(0);
            }
        }
        self.last_activity = Utc::now();
    }

    /// Mark the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Build the canonical session key for a `(user_id, chat_id)` pair.
pub fn session_key(user_id: &str, chat_id: &str) -> String {
    format!("{user_id}:{chat_id}")
}
