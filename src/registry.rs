use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::session::ClientSession;

/// Sessions currently being served, keyed by identity. Lookups hand out
/// clones of the `Arc`s so no shard lock is held while a caller does I/O.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: DashMap<String, Arc<ClientSession>>,
    changed: Notify,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<ClientSession>) {
        let identity = session.identity().to_string();

        if self.sessions.insert(identity.clone(), session).is_some() {
            tracing::warn!(%identity, "replaced a stale session with the same identity");
        }

        tracing::info!(%identity, total = self.sessions.len(), "client added");
    }

    /// Returns whether anything was removed; removing an unknown identity is fine.
    pub fn remove(&self, identity: &str) -> bool {
        if self.sessions.remove(identity).is_none() {
            return false;
        }

        tracing::info!(%identity, total = self.sessions.len(), "client removed");
        self.changed.notify_waiters();

        true
    }

    /// Removes the entry only if it is still this very session, so a task
    /// that outlived a replacement cannot deregister the newer connection.
    pub fn remove_session(&self, session: &Arc<ClientSession>) -> bool {
        let identity = session.identity();

        if self
            .sessions
            .remove_if(identity, |_, current| Arc::ptr_eq(current, session))
            .is_none()
        {
            return false;
        }

        tracing::info!(%identity, total = self.sessions.len(), "client removed");
        self.changed.notify_waiters();

        true
    }

    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn find(&self, identity: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(identity).map(|guard| guard.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn wait_empty(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.sessions.is_empty() {
                return;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(identity: &str) -> Arc<ClientSession> {
        Arc::new(ClientSession::new(identity, tokio::io::sink()))
    }

    #[test]
    fn add_find_remove() {
        let registry = ClientRegistry::new();
        registry.add(session("127.0.0.1:1"));
        registry.add(session("127.0.0.1:2"));

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find("127.0.0.1:2").unwrap().identity(), "127.0.0.1:2");

        assert!(registry.remove("127.0.0.1:1"));
        assert!(registry.find("127.0.0.1:1").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ClientRegistry::new();
        registry.add(session("a"));

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.remove("never-there"));
        assert!(registry.is_empty());
    }

    #[test]
    fn same_identity_keeps_one_entry() {
        let registry = ClientRegistry::new();
        let second = session("a");

        registry.add(session("a"));
        registry.add(second.clone());

        assert_eq!(registry.count(), 1);
        assert!(Arc::ptr_eq(&registry.find("a").unwrap(), &second));
    }

    #[test]
    fn remove_session_leaves_a_replacement_alone() {
        let registry = ClientRegistry::new();
        let old = session("a");
        let new = session("a");

        registry.add(old.clone());
        registry.add(new.clone());

        assert!(!registry.remove_session(&old));
        assert!(Arc::ptr_eq(&registry.find("a").unwrap(), &new));

        assert!(registry.remove_session(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_later_changes() {
        let registry = ClientRegistry::new();
        registry.add(session("a"));
        registry.add(session("b"));

        let snap = registry.snapshot();
        registry.remove("a");
        registry.add(session("c"));

        let mut ids: Vec<_> = snap.iter().map(|s| s.identity().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn concurrent_adds_are_all_counted() {
        let registry = Arc::new(ClientRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(session(&format!("10.0.0.1:{}", 4000 + i))))
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.count(), 16);
    }

    #[tokio::test]
    async fn wait_empty_resolves_on_last_removal() {
        let registry = Arc::new(ClientRegistry::new());
        registry.add(session("a"));
        registry.add(session("b"));

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_empty().await })
        };

        registry.remove("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        registry.remove("b");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
