//! Bounded in-memory audit log of policy decisions.
//!
//! Every policy evaluation produces one [`AuditEntry`]. Entries live in a
//! FIFO ring of capacity [`MAX_AUDIT`]; the oldest entry is evicted when
//! the ring is full. The log is in-memory only and does not survive a
//! restart.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;

/// Ring capacity.
pub const MAX_AUDIT: usize = 1000;

/// One recorded policy decision.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// The user whose turn triggered the evaluation.
    pub user_id: String,
    /// The chat the turn came from.
    pub chat_id: String,
    /// The tool being classified.
    pub tool: String,
    /// Truncated snapshot of the arguments.
    pub args_snapshot: String,
    /// The decision label ("allow", "deny", "require_approval").
    pub decision: String,
}

/// Mutex-guarded FIFO audit ring.
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    /// Create a log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_AUDIT)
    }

    /// Create a log with an explicit capacity (for tests).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_AUDIT))),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full, and emit a
    /// structured log line.
    pub fn record(&self, entry: AuditEntry) {
        info!(
            user = %entry.user_id,
            chat = %entry.chat_id,
            tool = %entry.tool,
            decision = %entry.decision,
            args = %entry.args_snapshot,
            "policy decision"
        );

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
