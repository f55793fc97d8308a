//! Local value shard: the keys this peer currently holds.

use crate::membership::ring::hash_bytes;
use dashmap::DashMap;

/// One cached value and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Opaque payload.
    pub bytes: Vec<u8>,
    /// Position of this copy in the key's replica order; 0 is the primary.
    pub replica_rank: i32,
    /// CRC-32 over `bytes`, computed at write time.
    pub checksum: u32,
}

impl StoredValue {
    pub fn new(bytes: Vec<u8>, replica_rank: i32) -> Self {
        let checksum = hash_bytes(&bytes);
        Self {
            bytes,
            replica_rank,
            checksum,
        }
    }

    /// Whether the payload still matches its write-time checksum.
    pub fn is_intact(&self) -> bool {
        hash_bytes(&self.bytes) == self.checksum
    }
}

/// In-memory key-to-value store for one peer.
pub struct CacheStore {
    entries: DashMap<String, StoredValue>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.entries.get(key).map(|entry| entry.bytes.clone());
        tracing::debug!("store get key {}: found={}", key, value.is_some());
        value
    }

    /// Full entry including rank and checksum.
    pub fn entry(&self, key: &str) -> Option<StoredValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: &str, replica_rank: i32, bytes: Vec<u8>) {
        tracing::debug!("store set key {} with rank {}", key, replica_rank);
        self.entries
            .insert(key.to_string(), StoredValue::new(bytes, replica_rank));
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &str) -> bool {
        tracing::debug!("store remove key {}", key);
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
