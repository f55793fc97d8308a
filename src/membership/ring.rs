//! Consistent-Hash Ring
//!
//! Maps key hashes to owning peers. The ring keeps two views of the same
//! membership: a sorted vector of CRC-32 hashes for ordered lookups and a
//! hash-to-peer map for direct access. Both are mutated together and stay
//! consistent by construction.
//!
//! The ring itself carries no synchronization; it is owned by
//! [`PeerRegistry`](super::registry::PeerRegistry) and only touched under
//! the registry lock.

use super::types::{PeerId, PeerInfo};
use std::collections::HashMap;

/// CRC-32 (IEEE) hash used for both peer placement and key lookup.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

pub(crate) struct HashRing {
    /// Peer hashes in strictly ascending order.
    sorted_hashes: Vec<u32>,
    /// Hash to peer descriptor.
    peers: HashMap<u32, PeerInfo>,
}

impl HashRing {
    pub(crate) fn new() -> Self {
        Self {
            sorted_hashes: Vec::new(),
            peers: HashMap::new(),
        }
    }

    /// Inserts a peer at the position of its id hash.
    ///
    /// Returns `false` when the hash is already taken, either by the same
    /// peer (a repeated add is a liveness concern of the registry, not the
    /// ring) or by a colliding id. Two distinct ids with equal CRC-32
    /// hashes cannot both join; the later arrival loses.
    pub(crate) fn add(&mut self, peer: PeerInfo) -> bool {
        let hash = hash_bytes(peer.id.0.as_bytes());

        if self.peers.contains_key(&hash) {
            return false;
        }

        tracing::debug!("ring adding peer {} at hash {:#010x}", peer.id, hash);

        let idx = self.sorted_hashes.partition_point(|&h| h < hash);
        self.sorted_hashes.insert(idx, hash);
        self.peers.insert(hash, peer);
        true
    }

    /// Drops a peer from both views. No-op when the peer is absent or when
    /// the hash slot is held by a different (colliding) id.
    pub(crate) fn remove(&mut self, id: &PeerId) -> bool {
        let hash = hash_bytes(id.0.as_bytes());

        match self.peers.get(&hash) {
            Some(peer) if peer.id == *id => {}
            _ => {
                tracing::debug!("ring has no entry for {}", id);
                return false;
            }
        }

        tracing::debug!("ring removing peer {}", id);
        self.peers.remove(&hash);
        if let Ok(idx) = self.sorted_hashes.binary_search(&hash) {
            self.sorted_hashes.remove(idx);
        }
        true
    }

    /// Index of the first peer at or after `hash`, wrapping past the end.
    fn clockwise_index(&self, hash: u32) -> usize {
        let idx = self.sorted_hashes.partition_point(|&h| h < hash);
        if idx == self.sorted_hashes.len() { 0 } else { idx }
    }

    /// The peer owning `key`, or `None` on an empty ring.
    pub(crate) fn primary(&self, key: &str) -> Option<&PeerInfo> {
        if self.sorted_hashes.is_empty() {
            return None;
        }

        let idx = self.clockwise_index(hash_bytes(key.as_bytes()));
        self.peers.get(&self.sorted_hashes[idx])
    }

    /// Ordered replica list for `key`: the primary at index 0, then up to
    /// `redundancy` distinct peers walking clockwise. The walk stops early
    /// once it would revisit the primary, so the result always has length
    /// `min(ring_size, redundancy + 1)`.
    pub(crate) fn replicas(&self, key: &str, redundancy: usize) -> Vec<PeerInfo> {
        if self.sorted_hashes.is_empty() {
            return Vec::new();
        }

        let primary_idx = self.clockwise_index(hash_bytes(key.as_bytes()));

        let mut result = Vec::with_capacity(redundancy + 1);
        result.push(self.peers[&self.sorted_hashes[primary_idx]].clone());

        let mut idx = primary_idx;
        let mut remaining = redundancy;
        while remaining > 0 {
            idx = (idx + 1) % self.sorted_hashes.len();
            if idx == primary_idx {
                break;
            }
            result.push(self.peers[&self.sorted_hashes[idx]].clone());
            remaining -= 1;
        }

        result
    }

    pub(crate) fn len(&self) -> usize {
        self.sorted_hashes.len()
    }

    pub(crate) fn contains(&self, id: &PeerId) -> bool {
        self.peers
            .get(&hash_bytes(id.0.as_bytes()))
            .map(|peer| peer.id == *id)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.values().map(|peer| peer.id.clone()).collect()
    }

    pub(crate) fn peers(&self) -> Vec<PeerInfo> {
        // Clockwise order, same as the sorted hashes.
        self.sorted_hashes
            .iter()
            .map(|hash| self.peers[hash].clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn sorted_hashes(&self) -> &[u32] {
        &self.sorted_hashes
    }
}
