//! Peer Registry
//!
//! The membership table of a node: one struct owning both the
//! consistent-hash ring and the per-peer liveness timestamps, guarded by a
//! single lock. Keeping both views in one owner makes the invariant
//! "registry ids == ring ids" hold at every reachable state; the ring is
//! never mutated from anywhere else.

use super::ring::HashRing;
use super::types::{PeerId, PeerInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TableInner {
    ring: HashRing,
    last_seen: HashMap<PeerId, Instant>,
}

/// Membership table: hash ring plus liveness map under one lock.
///
/// The local peer is inserted at construction and is exempt from expiry;
/// it leaves the ring only when the node shuts down.
pub struct PeerRegistry {
    local: PeerInfo,
    inner: Mutex<TableInner>,
}

impl PeerRegistry {
    pub fn new(local: PeerInfo) -> Self {
        let mut ring = HashRing::new();
        ring.add(local.clone());

        let mut last_seen = HashMap::new();
        last_seen.insert(local.id.clone(), Instant::now());

        Self {
            local,
            inner: Mutex::new(TableInner { ring, last_seen }),
        }
    }

    /// The local peer's descriptor.
    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    /// Records a heartbeat from `peer`.
    ///
    /// A first sighting adds the peer to the ring; every sighting refreshes
    /// its liveness timestamp. Returns `true` when the peer was new. A peer
    /// whose id hash collides with a different, already-present id is
    /// dropped entirely so the liveness map never references a peer the
    /// ring rejected.
    pub fn observe(&self, peer: PeerInfo) -> bool {
        let mut inner = self.inner.lock();

        let is_new = !inner.last_seen.contains_key(&peer.id);
        if is_new && !inner.ring.add(peer.clone()) {
            tracing::warn!(
                "peer {} hashes onto an occupied ring slot, ignoring",
                peer.id
            );
            return false;
        }

        if !is_new {
            tracing::debug!("heartbeat refresh from {}", peer.id);
        }

        inner.last_seen.insert(peer.id, Instant::now());
        is_new
    }

    /// Expires every non-local peer not seen within `ttl` of `now`,
    /// removing it from both the liveness map and the ring. Returns the
    /// expired ids.
    pub fn sweep(&self, now: Instant, ttl: Duration) -> Vec<PeerId> {
        let mut inner = self.inner.lock();

        let local_id = self.local.id.clone();
        let mut expired = Vec::new();
        inner.last_seen.retain(|id, seen| {
            if *id == local_id || now.saturating_duration_since(*seen) <= ttl {
                return true;
            }
            expired.push(id.clone());
            false
        });

        for id in &expired {
            inner.ring.remove(id);
        }

        expired
    }

    /// The peer owning `key`, or `None` on an empty ring. The ring always
    /// holds at least the local peer while the node runs.
    pub fn primary(&self, key: &str) -> Option<PeerInfo> {
        self.inner.lock().ring.primary(key).cloned()
    }

    /// Ordered replica list for `key`; the primary sits at index 0.
    pub fn replicas(&self, key: &str, redundancy: usize) -> Vec<PeerInfo> {
        self.inner.lock().ring.replicas(key, redundancy)
    }

    /// All known peers in clockwise ring order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.lock().ring.peers()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.lock().ring.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that the liveness map and the ring agree on the peer set.
    #[cfg(test)]
    pub(crate) fn views_consistent(&self) -> bool {
        use std::collections::HashSet;

        let inner = self.inner.lock();
        let ring_ids: HashSet<PeerId> = inner.ring.peer_ids().into_iter().collect();
        let seen_ids: HashSet<PeerId> = inner.last_seen.keys().cloned().collect();
        ring_ids == seen_ids
    }
}
