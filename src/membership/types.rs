use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a peer within its group.
///
/// Wrapper around the caller-supplied id string; ring placement is derived
/// from the CRC-32 of its raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable descriptor of a peer, and the heartbeat wire payload.
///
/// One serialized `PeerInfo` is exactly one heartbeat datagram. The wire
/// form is self-describing JSON with four string fields; the field names
/// are part of the protocol and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// Unique ID of the peer.
    #[serde(rename = "node_id")]
    pub id: PeerId,
    /// Host the peer's cache endpoint is reachable on.
    #[serde(rename = "node_ip")]
    pub host: String,
    /// Port of the cache endpoint. Kept as a string to match the wire form.
    #[serde(rename = "node_port")]
    pub port: String,
    /// Group tag. Peers only ever form rings with their own group.
    #[serde(rename = "group_id")]
    pub group: String,
}

impl PeerInfo {
    /// Base URL of this peer's cache endpoint.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
