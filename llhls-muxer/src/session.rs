//! Parked readers waiting for a playlist position or a part.
//!
//! A session is registered under a generated id and owns the sending half of
//! a oneshot channel. Waking removes the session and sends without blocking;
//! if the reader already gave up, the send fails and is ignored.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SessionId(uuid::Uuid);

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playlist position a blocking reload asked for (`_HLS_msn`, `_HLS_part`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTarget {
    pub msn: i64,
    pub part: i64,
}

/// Part a blocking fragment request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentTarget {
    pub segment: u64,
    pub fragment: usize,
}

struct Waiter<K, P> {
    target: K,
    sender: oneshot::Sender<P>,
}

/// Sessions keyed by id, each waiting for a payload of type `P`.
pub struct WaitRegistry<K, P> {
    waiters: HashMap<SessionId, Waiter<K, P>>,
}

impl<K, P> Default for WaitRegistry<K, P> {
    fn default() -> Self {
        Self {
            waiters: HashMap::new(),
        }
    }
}

impl<K: Copy, P: Clone> WaitRegistry<K, P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: K) -> (SessionId, oneshot::Receiver<P>) {
        let (sender, receiver) = oneshot::channel();
        let id = SessionId::new();
        self.waiters.insert(id, Waiter { target, sender });
        (id, receiver)
    }

    /// Drop a session without waking it. Returns whether it was still parked.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        self.waiters.remove(id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.waiters.contains_key(id)
    }

    #[must_use]
    pub fn target(&self, id: &SessionId) -> Option<K> {
        self.waiters.get(id).map(|waiter| waiter.target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Wake and remove every session. Returns the number of sessions removed.
    pub fn wake_all(&mut self, payload: &P) -> usize {
        let woken = self.waiters.len();
        for (id, waiter) in self.waiters.drain() {
            if waiter.sender.send(payload.clone()).is_err() {
                tracing::trace!(session = %id, "Dropped wake for abandoned session");
            }
        }
        woken
    }

    /// Wake and remove the sessions whose target matches `ready`.
    pub fn wake_where<F>(&mut self, payload: &P, mut ready: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let ids: Vec<SessionId> = self
            .waiters
            .iter()
            .filter(|(_, waiter)| ready(&waiter.target))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(waiter) = self.waiters.remove(id) {
                if waiter.sender.send(payload.clone()).is_err() {
                    tracing::trace!(session = %id, "Dropped wake for abandoned session");
                }
            }
        }
        ids.len()
    }

    /// Drop every session; parked receivers observe a closed channel.
    pub fn clear(&mut self) {
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id = SessionId::new();
        let s = id.to_string();
        let serialized = serde_json::to_string(&id).unwrap();
        assert!(!s.is_empty());
        assert!(serialized.contains(&s));

        let id2 = SessionId::new();
        assert_ne!(id, id2);
    }

    #[tokio::test]
    async fn test_wake_all_delivers_and_removes() {
        let mut registry: WaitRegistry<FragmentTarget, ()> = WaitRegistry::new();
        let target = FragmentTarget {
            segment: 0,
            fragment: 3,
        };
        let (a, rx_a) = registry.register(target);
        let (b, rx_b) = registry.register(target);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.target(&a), Some(target));

        assert_eq!(registry.wake_all(&()), 2);
        assert!(registry.is_empty());
        assert!(!registry.contains(&a));
        assert!(!registry.contains(&b));
        assert!(rx_a.await.is_ok());
        assert!(rx_b.await.is_ok());
    }

    #[tokio::test]
    async fn test_wake_where_only_ready() {
        let mut registry: WaitRegistry<IndexTarget, String> = WaitRegistry::new();
        let (_, rx_early) = registry.register(IndexTarget { msn: 1, part: 0 });
        let (late, mut rx_late) = registry.register(IndexTarget { msn: 5, part: 0 });

        let woken = registry.wake_where(&"playlist".to_string(), |target| target.msn < 3);

        assert_eq!(woken, 1);
        assert_eq!(rx_early.await.unwrap(), "playlist");
        assert!(registry.contains(&late));
        assert!(rx_late.try_recv().is_err());
    }

    #[test]
    fn test_wake_abandoned_session_is_ignored() {
        let mut registry: WaitRegistry<IndexTarget, String> = WaitRegistry::new();
        let (_, rx) = registry.register(IndexTarget { msn: 0, part: 0 });
        drop(rx);

        assert_eq!(registry.wake_all(&"playlist".to_string()), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let mut registry: WaitRegistry<IndexTarget, String> = WaitRegistry::new();
        let (id, _rx) = registry.register(IndexTarget { msn: 0, part: 0 });
        let (_, rx_other) = registry.register(IndexTarget { msn: 0, part: 1 });

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));

        registry.clear();
        assert!(registry.is_empty());
        assert!(rx_other.await.is_err());
    }
}
