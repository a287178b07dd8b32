//! Live session registry
//!
//! The registry is the one structure shared between session tasks, the
//! notifier, and STAT callers. Each entry is an [`SessionShared`] record:
//! immutable identity plus a mutex-guarded view that the owning session
//! task keeps current. Locks are held only for field copies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::notify::NotifyBinding;
use crate::session::SessionState;

/// Cross-task snapshot of one session, for STAT and notification pacing.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub state: SessionState,
    pub peer_addr: String,
    pub remote_addr: Option<String>,
    pub recv_from_remote: u64,
    pub sent_to_remote: u64,
    pub last_remote: Instant,
    pub notify_pace: Duration,
    pub binding: Option<NotifyBinding>,
}

/// Registry entry: owned by the registry, updated by the session task.
#[derive(Debug)]
pub struct SessionShared {
    pub id: String,
    pub created: Instant,
    /// Cancelled to force-close the session (daemon STOP)
    pub cancel: CancellationToken,
    view: Mutex<SessionView>,
}

impl SessionShared {
    pub fn new(id: String, peer_addr: String, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id,
            created: Instant::now(),
            cancel,
            view: Mutex::new(SessionView {
                state: SessionState::Setup,
                peer_addr,
                remote_addr: None,
                recv_from_remote: 0,
                sent_to_remote: 0,
                last_remote: Instant::now(),
                notify_pace: Duration::ZERO,
                binding: None,
            }),
        })
    }

    pub fn view(&self) -> SessionView {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut SessionView)) {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut view);
    }
}

/// Shared map of live sessions keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<SessionShared>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shared: Arc<SessionShared>) {
        self.lock().insert(shared.id.clone(), shared);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionShared>> {
        self.lock().remove(id)
    }

    /// All live sessions, ordered by id for stable STAT output.
    pub fn snapshot(&self) -> Vec<Arc<SessionShared>> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Current pace for a live session; `None` once the session is gone.
    pub fn notify_pace(&self, id: &str) -> Option<Duration> {
        self.lock().get(id).map(|shared| shared.view().notify_pace)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionShared>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(id: &str) -> Arc<SessionShared> {
        SessionShared::new(
            id.to_string(),
            "127.0.0.1:9999".to_string(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        registry.insert(shared("a1"));
        registry.insert(shared("a2"));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("a1").is_some());
        assert!(registry.remove("a1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let registry = SessionRegistry::new();
        registry.insert(shared("b"));
        registry.insert(shared("a"));
        registry.insert(shared("c"));

        let ids: Vec<_> = registry.snapshot().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_notify_pace_tracks_updates() {
        let registry = SessionRegistry::new();
        let entry = shared("a");
        registry.insert(entry.clone());

        assert_eq!(registry.notify_pace("a"), Some(Duration::ZERO));

        entry.update(|view| view.notify_pace = Duration::from_secs(2));
        assert_eq!(registry.notify_pace("a"), Some(Duration::from_secs(2)));

        registry.remove("a");
        assert_eq!(registry.notify_pace("a"), None);
    }

    #[test]
    fn test_view_updates_visible_across_clones() {
        let registry = SessionRegistry::new();
        let entry = shared("a");
        registry.insert(entry.clone());

        entry.update(|view| {
            view.state = SessionState::Echo;
            view.recv_from_remote = 42;
        });

        let seen = registry.snapshot()[0].view();
        assert_eq!(seen.state, SessionState::Echo);
        assert_eq!(seen.recv_from_remote, 42);
    }
}
