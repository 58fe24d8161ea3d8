//! Session manager: per-user session lifecycle with activity-based
//! eviction.
//!
//! Sessions are keyed by `(user_id, chat_id)` and handed out as
//! `Arc<Mutex<Session>>`. The per-session mutex serves double duty: it
//! guards history mutation *and* serializes turns from the same user,
//! while turns from different users run fully in parallel. A periodic
//! sweep drops sessions idle longer than [`SESSION_TIMEOUT`]; an in-flight
//! turn keeps its own strong reference, so eviction never interrupts it --
//! the next request simply starts a fresh session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use openvia_types::session::{session_key, Session};

/// Idle time after which a session is evicted.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Interval between eviction sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    /// Tracked separately from the session so the sweeper never has to
    /// wait on a session mutex held by an in-flight turn.
    last_activity: DateTime<Utc>,
}

/// Owns the session map and its eviction policy.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    timeout: chrono::Duration,
}

impl SessionManager {
    /// Create a manager with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(SESSION_TIMEOUT)
    }

    /// Create a manager with an explicit timeout (for tests).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout: chrono::Duration::from_std(timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
        }
    }

    /// Get the session for `(user_id, chat_id)`, creating it if absent.
    /// Bumps the activity clock on every call.
    pub async fn get_or_create(&self, user_id: &str, chat_id: &str) -> Arc<Mutex<Session>> {
        let key = session_key(user_id, chat_id);
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "creating session");
            SessionEntry {
                session: Arc::new(Mutex::new(Session::new(user_id, chat_id))),
                last_activity: Utc::now(),
            }
        });
        entry.last_activity = Utc::now();
        entry.session.clone()
    }

    /// Drop the session for `(user_id, chat_id)`. Returns whether one
    /// existed.
    pub async fn clear(&self, user_id: &str, chat_id: &str) -> bool {
        let key = session_key(user_id, chat_id);
        self.sessions.lock().await.remove(&key).is_some()
    }

    /// Evict every session idle longer than the timeout. Returns the
    /// number evicted.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|key, entry| {
            let keep = now - entry.last_activity <= self.timeout;
            if !keep {
                debug!(key = %key, "evicting idle session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "session sweep");
        }
        evicted
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// True when no sessions are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawn the periodic sweep task; it runs until `cancel` triggers.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("session sweeper cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openvia_types::Message;

    #[tokio::test]
    async fn get_or_create_returns_same_session() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("u1", "c1").await;
        {
            let mut session = a.lock().await;
            session.add_message(Message::user("remember me"));
        }
        let b = manager.get_or_create("u1", "c1").await;
        assert_eq!(b.lock().await.history.len(), 1);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let manager = SessionManager::new();
        manager.get_or_create("u1", "c1").await;
        manager.get_or_create("u1", "c2").await;
        manager.get_or_create("u2", "c1").await;
        assert_eq!(manager.len().await, 3);
    }

    #[tokio::test]
    async fn clear_removes_session() {
        let manager = SessionManager::new();
        manager.get_or_create("u1", "c1").await;
        assert!(manager.clear("u1", "c1").await);
        assert!(!manager.clear("u1", "c1").await);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_sessions() {
        let manager = SessionManager::with_timeout(Duration::from_millis(50));
        manager.get_or_create("idle", "c").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.get_or_create("fresh", "c").await;

        let evicted = manager.sweep().await;
        assert_eq!(evicted, 1);
        assert_eq!(manager.len().await, 1);

        // After a sweep, every remaining session is within the timeout.
        let fresh = manager.get_or_create("fresh", "c").await;
        assert_eq!(fresh.lock().await.user_id, "fresh");
    }

    #[tokio::test]
    async fn activity_bump_prevents_eviction() {
        let manager = SessionManager::with_timeout(Duration::from_millis(60));
        manager.get_or_create("u", "c").await;
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            manager.get_or_create("u", "c").await;
        }
        assert_eq!(manager.sweep().await, 0);
    }

    #[tokio::test]
    async fn in_flight_turn_survives_eviction() {
        let manager = SessionManager::with_timeout(Duration::from_millis(10));
        let held = manager.get_or_create("u", "c").await;
        let guard = held.lock().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        // The sweeper drops the map entry without blocking on the turn.
        assert_eq!(manager.sweep().await, 1);
        // The held session is still usable by its owner.
        assert_eq!(guard.user_id, "u");
        drop(guard);

        // The next request gets a fresh session.
        let fresh = manager.get_or_create("u", "c").await;
        assert!(fresh.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn sweeper_task_stops_on_cancel() {
        let manager = Arc::new(SessionManager::new());
        let cancel = CancellationToken::new();
        let handle = manager.spawn_sweeper(cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
