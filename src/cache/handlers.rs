//! Cache Endpoint Handlers
//!
//! HTTP handlers exposing one peer's `CacheStore` to the cluster. They
//! translate requests into store calls and map outcomes onto status codes;
//! routing decisions happen on the client side, never here.

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use sysinfo::System;

use crate::membership::registry::PeerRegistry;

use super::protocol::{KeyQuery, PeersResponse, SetBody, SetQuery, StatsResponse};
use super::store::CacheStore;

/// GET `/?id&key`: the raw bytes of a locally held value, or `404`.
pub async fn handle_get(
    Extension(store): Extension<Arc<CacheStore>>,
    Query(query): Query<KeyQuery>,
) -> (StatusCode, Vec<u8>) {
    tracing::debug!("peer {} received get for key {}", query.id, query.key);

    match store.get(&query.key) {
        Some(bytes) => (StatusCode::OK, bytes),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// POST `/?id&copy`: store every key of the body under the given replica
/// rank. Malformed query strings and bodies are rejected by the extractors
/// before this runs.
pub async fn handle_set(
    Extension(store): Extension<Arc<CacheStore>>,
    Query(query): Query<SetQuery>,
    Json(body): Json<SetBody>,
) -> StatusCode {
    if body.is_empty() {
        tracing::warn!("peer {} received set without any key", query.id);
        return StatusCode::BAD_REQUEST;
    }

    for (key, bytes) in body {
        tracing::debug!(
            "peer {} received set for key {} with rank {}",
            query.id,
            key,
            query.copy
        );
        store.set(&key, query.copy, bytes);
    }

    StatusCode::OK
}

/// DELETE `/?id&key`: drop a locally held value. Deleting an absent key
/// is not an error.
pub async fn handle_remove(
    Extension(store): Extension<Arc<CacheStore>>,
    Query(query): Query<KeyQuery>,
) -> StatusCode {
    tracing::debug!("peer {} received remove for key {}", query.id, query.key);
    store.remove(&query.key);
    StatusCode::OK
}

/// GET `/health/peers`: this node's current view of its ring.
pub async fn handle_peers(
    Extension(registry): Extension<Arc<PeerRegistry>>,
) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: registry.peers(),
    })
}

/// GET `/health/stats`: identity, shard size and process resource usage.
pub async fn handle_stats(
    Extension(registry): Extension<Arc<PeerRegistry>>,
    Extension(store): Extension<Arc<CacheStore>>,
) -> Json<StatsResponse> {
    let local = registry.local();

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(StatsResponse {
        node_id: local.id.0.clone(),
        group: local.group.clone(),
        peer_count: registry.len(),
        entry_count: store.len(),
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
