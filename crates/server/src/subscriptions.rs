//! Subscription registry: which connections observe which keys.
//!
//! Entries are relation plus lookup only; a connection's lifetime is never
//! tied to its registry membership. Connections remove themselves before
//! tearing down, so a late fan-out for a closed connection simply finds an
//! unsendable handle and is dropped.

use crate::protocol::Outbound;
use corkboard_core::Key;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;

/// Connection identifier, unique for the process lifetime.
pub type ConnId = u64;

/// A subscriber's outbound queue.
///
/// Sends are fire-and-forget: a closed queue means the connection is gone
/// and the event is silently dropped.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub conn_id: ConnId,
    sender: UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(conn_id: ConnId, sender: UnboundedSender<Outbound>) -> Self {
        Self { conn_id, sender }
    }

    pub fn send(&self, message: Outbound) {
        let _ = self.sender.send(message);
    }
}

/// Map from key to the set of connections currently observing it.
#[derive(Default)]
pub struct Subscriptions {
    inner: RwLock<HashMap<Key, HashMap<ConnId, PeerHandle>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a key.
    pub fn add(&self, key: &Key, peer: PeerHandle) {
        let mut inner = self.inner.write().expect("subscription registry poisoned");
        inner
            .entry(key.clone())
            .or_default()
            .insert(peer.conn_id, peer);
    }

    /// Unsubscribe a connection from a key, dropping the key's entry when
    /// it becomes empty.
    pub fn remove(&self, key: &Key, conn_id: ConnId) {
        let mut inner = self.inner.write().expect("subscription registry poisoned");
        if let Some(peers) = inner.get_mut(key) {
            peers.remove(&conn_id);
            if peers.is_empty() {
                inner.remove(key);
            }
        }
    }

    /// Snapshot the subscribers of a key other than `excluding`.
    pub fn peers(&self, key: &Key, excluding: ConnId) -> Vec<PeerHandle> {
        let inner = self.inner.read().expect("subscription registry poisoned");
        inner
            .get(key)
            .map(|peers| {
                peers
                    .values()
                    .filter(|peer| peer.conn_id != excluding)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of subscribers of a key.
    pub fn subscriber_count(&self, key: &Key) -> usize {
        let inner = self.inner.read().expect("subscription registry poisoned");
        inner.get(key).map(HashMap::len).unwrap_or(0)
    }

    /// Number of keys with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.inner
            .read()
            .expect("subscription registry poisoned")
            .len()
    }
}
