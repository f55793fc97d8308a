//! Cache Endpoint Server
//!
//! Binds and serves one peer's HTTP endpoint. A bind failure is fatal to
//! node startup; once running, the server shuts down gracefully when the
//! node's cancellation token fires.

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::membership::registry::PeerRegistry;

use super::handlers::{handle_get, handle_peers, handle_remove, handle_set, handle_stats};
use super::protocol::{ENDPOINT_HEALTH_PEERS, ENDPOINT_HEALTH_STATS};
use super::store::CacheStore;

/// Largest accepted SET body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Running endpoint server for one peer.
pub struct CacheServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl CacheServer {
    /// Binds `host:port` and starts serving. Port `0` picks an ephemeral
    /// port; the bound address is available via [`local_addr`](Self::local_addr).
    pub async fn start(
        host: &str,
        port: &str,
        store: Arc<CacheStore>,
        registry: Arc<PeerRegistry>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind cache endpoint on {}", bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound endpoint address")?;

        let app = router(store, registry);

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("cache endpoint terminated: {}", e);
            }
        });

        tracing::info!("cache endpoint listening on {}", local_addr);

        Ok(Self { local_addr, task })
    }

    /// The address the endpoint actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server task after the shared token was cancelled.
    pub async fn stop(self) -> Result<()> {
        self.task
            .await
            .context("cache endpoint task failed to join")
    }
}

fn router(store: Arc<CacheStore>, registry: Arc<PeerRegistry>) -> Router {
    Router::new()
        .route(
            "/",
            get(handle_get).post(handle_set).delete(handle_remove),
        )
        .route(ENDPOINT_HEALTH_PEERS, get(handle_peers))
        .route(ENDPOINT_HEALTH_STATS, get(handle_stats))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(store))
        .layer(Extension(registry))
}
