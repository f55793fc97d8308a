//! Client-Side Dispatcher
//!
//! Entry point for cache operations issued on this node. The dispatcher
//! resolves a key to its ordered replica list through the membership
//! registry and walks that list sequentially, treating every endpoint
//! error the same way: log it and try the next replica.
//!
//! Writes are first-success by default, so replicas may diverge; a read
//! that lands on a non-holding replica falls through to one that holds
//! the value. This trades consistency for availability.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::membership::registry::PeerRegistry;
use crate::membership::types::PeerInfo;

use super::protocol::{KeyQuery, SetBody, SetQuery};

/// Per-attempt request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// Transport-level tries per replica before failing over to the next one.
const REQUEST_ATTEMPTS: usize = 2;

/// How SET treats the replica list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Stop at the first replica that accepts the write.
    #[default]
    FirstSuccess,
    /// Attempt every replica; succeed when at least one accepted.
    WriteAll,
}

/// Routes GET/SET/REMOVE calls to the replica peers owning each key.
pub struct Dispatcher {
    registry: Arc<PeerRegistry>,
    client: reqwest::Client,
    redundancy: usize,
    write_mode: WriteMode,
}

impl Dispatcher {
    pub fn new(registry: Arc<PeerRegistry>, redundancy: usize, write_mode: WriteMode) -> Self {
        Self {
            registry,
            // Pooled across all calls; per-request timeouts bound each attempt.
            client: reqwest::Client::new(),
            redundancy,
            write_mode,
        }
    }

    /// Retrieves `key` from the first replica that answers with a value.
    /// Returns `None` once every replica either misses the key or fails.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let replicas = self.registry.replicas(key, self.redundancy);

        for (attempt, peer) in replicas.iter().enumerate() {
            tracing::debug!("sending get for key {} to {} (try {})", key, peer.id, attempt);

            match self.get_from_peer(peer, key).await {
                Ok(Some(bytes)) => return Some(bytes),
                Ok(None) => {
                    tracing::debug!("key {} not held by {}", key, peer.id);
                }
                Err(e) => {
                    tracing::error!("failed to get key {} from {}: {}", key, peer.id, e);
                }
            }
        }

        None
    }

    /// Stores `key` on its replica set. Every attempted replica receives
    /// its rank in the replica order (primary = 0). First-success mode
    /// returns after one accepted write; write-all keeps going and
    /// succeeds when at least one replica accepted. All-fail returns the
    /// last error.
    pub async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let replicas = self.registry.replicas(key, self.redundancy);
        if replicas.is_empty() {
            bail!("no peers available to store key {}", key);
        }

        let mut stored = 0usize;
        let mut last_err = None;

        for (rank, peer) in replicas.iter().enumerate() {
            tracing::debug!(
                "sending set for key {} to {} with copy rank {}",
                key,
                peer.id,
                rank
            );

            match self.set_on_peer(peer, key, rank as i32, value).await {
                Ok(()) => {
                    stored += 1;
                    if self.write_mode == WriteMode::FirstSuccess {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!("failed to set key {} on {}: {}", key, peer.id, e);
                    last_err = Some(e);
                }
            }
        }

        if stored > 0 {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| anyhow!("no replica accepted key {}", key)))
        }
    }

    /// Deletes `key` from its whole replica set, not just the primary.
    /// Succeeds when at least one replica acknowledged the delete.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let replicas = self.registry.replicas(key, self.redundancy);
        if replicas.is_empty() {
            bail!("no peers available to remove key {}", key);
        }

        let mut removed = 0usize;
        let mut last_err = None;

        for peer in &replicas {
            tracing::debug!("sending remove for key {} to {}", key, peer.id);

            match self.remove_on_peer(peer, key).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::error!("failed to remove key {} from {}: {}", key, peer.id, e);
                    last_err = Some(e);
                }
            }
        }

        if removed > 0 {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| anyhow!("no replica acknowledged removing {}", key)))
        }
    }

    async fn get_from_peer(&self, peer: &PeerInfo, key: &str) -> Result<Option<Vec<u8>>> {
        let query = KeyQuery {
            id: peer.id.0.clone(),
            key: key.to_string(),
        };

        let response = self
            .send_with_retry(|| {
                self.client
                    .get(peer.base_url())
                    .query(&query)
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("get from {} returned {}", peer.id, response.status());
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn set_on_peer(&self, peer: &PeerInfo, key: &str, rank: i32, value: &[u8]) -> Result<()> {
        let query = SetQuery {
            id: peer.id.0.clone(),
            copy: rank,
        };
        let body: SetBody = HashMap::from([(key.to_string(), value.to_vec())]);

        let response = self
            .send_with_retry(|| {
                self.client
                    .post(peer.base_url())
                    .query(&query)
                    .json(&body)
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;

        if !response.status().is_success() {
            bail!("set on {} returned {}", peer.id, response.status());
        }

        Ok(())
    }

    async fn remove_on_peer(&self, peer: &PeerInfo, key: &str) -> Result<()> {
        let query = KeyQuery {
            id: peer.id.0.clone(),
            key: key.to_string(),
        };

        let response = self
            .send_with_retry(|| {
                self.client
                    .delete(peer.base_url())
                    .query(&query)
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;

        if !response.status().is_success() {
            bail!("remove on {} returned {}", peer.id, response.status());
        }

        Ok(())
    }

    /// Sends a request, retrying transport failures with jittered backoff.
    /// Non-success status codes are not retried here; the caller decides
    /// whether to fail over to another replica.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 150u64;

        for attempt in 0..REQUEST_ATTEMPTS {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt + 1 == REQUEST_ATTEMPTS {
                        return Err(anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow!("retry attempts exhausted"))
    }
}
