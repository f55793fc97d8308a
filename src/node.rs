//! Node Root Handle
//!
//! A `Node` is one full peer: it owns the membership registry, the local
//! value shard, the cache endpoint server and the discovery loop, and
//! exposes the client-facing `get`/`set`/`remove` surface. Everything is
//! wired from construction-time parameters; there is no environment or
//! file configuration.

use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::dispatcher::{Dispatcher, WriteMode};
use crate::cache::server::CacheServer;
use crate::cache::store::CacheStore;
use crate::membership::discovery::DiscoveryService;
use crate::membership::registry::PeerRegistry;
use crate::membership::types::{PeerId, PeerInfo};

/// Construction-time parameters of one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique id within the group.
    pub id: String,
    /// Host the cache endpoint binds and advertises.
    pub host: String,
    /// Port of the cache endpoint.
    pub port: u16,
    /// Group tag; only same-group peers form a ring.
    pub group: String,
    /// Redundant copies per key; `redundancy + 1` replicas are attempted.
    pub redundancy: usize,
    /// SET replica strategy.
    pub write_mode: WriteMode,
}

impl NodeConfig {
    fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: PeerId(self.id.clone()),
            host: self.host.clone(),
            port: self.port.to_string(),
            group: self.group.clone(),
        }
    }
}

/// Everything that only exists while the node runs.
struct NodeRuntime {
    server: CacheServer,
    discovery: DiscoveryService,
}

/// One peer of the cache ring.
///
/// Lifecycle: `new` → `start` → operations → `stop`. A stopped node stays
/// stopped; build a new instance to rejoin the ring.
pub struct Node {
    local: PeerInfo,
    registry: Arc<PeerRegistry>,
    store: Arc<CacheStore>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    runtime: Option<NodeRuntime>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let local = config.peer_info();
        let registry = Arc::new(PeerRegistry::new(local.clone()));
        let store = Arc::new(CacheStore::new());
        let dispatcher = Dispatcher::new(registry.clone(), config.redundancy, config.write_mode);

        Self {
            local,
            registry,
            store,
            dispatcher,
            cancel: CancellationToken::new(),
            runtime: None,
        }
    }

    /// Binds the cache endpoint and starts the discovery loop. A bind
    /// failure aborts startup.
    pub async fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            bail!("node {} is already running", self.local.id);
        }
        if self.cancel.is_cancelled() {
            bail!("node {} was stopped; build a new instance", self.local.id);
        }

        tracing::info!(
            "starting node {} in group {} on {}:{}",
            self.local.id,
            self.local.group,
            self.local.host,
            self.local.port
        );

        let server = CacheServer::start(
            &self.local.host,
            &self.local.port,
            self.store.clone(),
            self.registry.clone(),
            self.cancel.clone(),
        )
        .await?;

        let discovery = DiscoveryService::start(
            self.local.clone(),
            self.registry.clone(),
            self.cancel.clone(),
        )
        .await?;

        self.runtime = Some(NodeRuntime { server, discovery });
        Ok(())
    }

    /// Stops discovery and the endpoint, joining every background task.
    /// When several shutdown steps fail, the first error wins.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        tracing::info!("stopping node {}", self.local.id);
        self.cancel.cancel();

        let discovery_result = runtime.discovery.stop().await;
        let server_result = runtime.server.stop().await;

        discovery_result.and(server_result)
    }

    /// Retrieves the value of `key` from the ring, or `None` when no
    /// reachable replica holds it.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.dispatcher.get(key).await
    }

    /// Stores `key` in the ring.
    pub async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.dispatcher.set(key, value).await
    }

    /// Removes `key` from every replica holding it.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.dispatcher.remove(key).await
    }

    /// This node's current view of the ring, local peer included.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.registry.peers()
    }

    /// The local peer's descriptor.
    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    /// Bound address of the cache endpoint while running.
    pub fn endpoint_addr(&self) -> Option<SocketAddr> {
        self.runtime.as_ref().map(|rt| rt.server.local_addr())
    }
}
