use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use trellis_core::SessionId;

use crate::session::Session;

/// Registry of all live sessions, keyed by session id.
///
/// Insert on connection accept, remove (with teardown) on disconnect; the
/// keepalive sweeper reaps sessions whose ping deadline has passed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().clone(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Remove the session and run its teardown cascade.
    pub fn remove(&self, id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.teardown();
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Tear down every session whose keepalive deadline has passed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let dead: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_alive(now))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            tracing::info!(session_id = %id, "Keepalive expired, tearing session down");
            self.remove(&id);
        }
        removed
    }
}

/// Background task that periodically sweeps keepalive-expired sessions.
pub fn start_keepalive_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired(Instant::now());
            if removed > 0 {
                tracing::info!(removed, "Keepalive sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session() -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Session::new(tx))
    }

    #[test]
    fn insert_get_remove() {
        let registry = SessionRegistry::new();
        let s = session();
        let id = s.id().clone();

        registry.insert(Arc::clone(&s));
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_some());

        registry.remove(&id);
        assert_eq!(registry.count(), 0);
        assert!(s.is_torn_down());
    }

    #[test]
    fn remove_unknown_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.remove(&SessionId::new());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn sweep_reaps_only_expired_sessions() {
        let registry = SessionRegistry::new();
        let fresh = session();
        let stale = session();
        fresh.refresh_keepalive(60);
        stale.refresh_keepalive(1);
        registry.insert(Arc::clone(&fresh));
        registry.insert(Arc::clone(&stale));

        // Two minutes out: the 1-minute session is past its slack window.
        let removed = registry.sweep_expired(Instant::now() + Duration::from_secs(120));
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 1);
        assert!(stale.is_torn_down());
        assert!(!fresh.is_torn_down());
    }
}
