//! Cache Endpoint Protocol
//!
//! Query parameters and body shapes of the per-peer HTTP endpoint, shared
//! by the server handlers and the client dispatcher.
//!
//! The data surface lives on `/`:
//!
//! | Verb   | Query        | Body                    | Response              |
//! |--------|--------------|-------------------------|-----------------------|
//! | GET    | `id`, `key`  | -                       | `200` + bytes / `404` |
//! | POST   | `id`, `copy` | `{key: [bytes…]}`       | `200` / `400`         |
//! | DELETE | `id`, `key`  | -                       | `200`                 |
//!
//! `id` names the peer the request is aimed at; `copy` is the replica rank
//! the value is stored under (0 = primary). A health surface accompanies
//! the data surface for operators.

use crate::membership::types::PeerInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- API Endpoints ---

/// Peers known to this node, in ring order.
pub const ENDPOINT_HEALTH_PEERS: &str = "/health/peers";
/// Node identity, shard size and process resource usage.
pub const ENDPOINT_HEALTH_STATS: &str = "/health/stats";

// --- Data Transfer Objects ---

/// Query string of GET and DELETE requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyQuery {
    /// Id of the addressed peer.
    pub id: String,
    /// The cache key.
    pub key: String,
}

/// Query string of SET requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetQuery {
    /// Id of the addressed peer.
    pub id: String,
    /// Replica rank to store the value under.
    pub copy: i32,
}

/// SET body: a single key mapped to its raw bytes.
pub type SetBody = HashMap<String, Vec<u8>>;

/// Response of the peers health endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

/// Response of the stats health endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub node_id: String,
    pub group: String,
    pub peer_count: usize,
    pub entry_count: usize,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}
