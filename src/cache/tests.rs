//! Cache Module Tests
//!
//! Exercises the local store and the full client path: dispatcher →
//! HTTP endpoint → store, on real sockets bound to ephemeral localhost
//! ports. Discovery is not involved; test registries are populated by
//! hand so the tests stay hermetic.

#[cfg(test)]
mod tests {
    use crate::cache::dispatcher::{Dispatcher, WriteMode};
    use crate::cache::server::CacheServer;
    use crate::cache::store::{CacheStore, StoredValue};
    use crate::membership::registry::PeerRegistry;
    use crate::membership::types::{PeerId, PeerInfo};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// One served peer endpoint on an ephemeral port.
    struct TestPeer {
        info: PeerInfo,
        store: Arc<CacheStore>,
        server: CacheServer,
        cancel: CancellationToken,
    }

    impl TestPeer {
        async fn shutdown(self) {
            self.cancel.cancel();
            self.server.stop().await.expect("server failed to stop");
        }
    }

    async fn spawn_peer(id: &str, group: &str) -> TestPeer {
        let store = Arc::new(CacheStore::new());
        let cancel = CancellationToken::new();

        let placeholder = PeerInfo {
            id: PeerId(id.to_string()),
            host: "127.0.0.1".to_string(),
            port: "0".to_string(),
            group: group.to_string(),
        };
        let registry = Arc::new(PeerRegistry::new(placeholder.clone()));

        let server = CacheServer::start(
            "127.0.0.1",
            "0",
            store.clone(),
            registry,
            cancel.clone(),
        )
        .await
        .expect("failed to start endpoint");

        let info = PeerInfo {
            port: server.local_addr().port().to_string(),
            ..placeholder
        };

        TestPeer {
            info,
            store,
            server,
            cancel,
        }
    }

    /// An address nothing listens on, for dead-peer scenarios.
    fn unreachable_peer(id: &str, group: &str) -> PeerInfo {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to probe a port");
        let port = probe.local_addr().expect("no local addr").port();
        drop(probe);

        PeerInfo {
            id: PeerId(id.to_string()),
            host: "127.0.0.1".to_string(),
            port: port.to_string(),
            group: group.to_string(),
        }
    }

    // ============================================================
    // LOCAL STORE TESTS
    // ============================================================

    #[test]
    fn test_store_set_get_remove() {
        let store = CacheStore::new();

        store.set("key1", 0, vec![1, 2, 3]);
        assert_eq!(store.get("key1"), Some(vec![1, 2, 3]));
        assert_eq!(store.len(), 1);

        assert!(store.remove("key1"));
        assert!(!store.remove("key1"));
        assert_eq!(store.get("key1"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_entry_carries_rank_and_checksum() {
        let store = CacheStore::new();
        store.set("key1", 2, vec![5, 6, 7]);

        let entry = store.entry("key1").unwrap();
        assert_eq!(entry.replica_rank, 2);
        assert_eq!(entry.bytes, vec![5, 6, 7]);
        assert!(entry.is_intact());
    }

    #[test]
    fn test_store_overwrite_refreshes_checksum() {
        let store = CacheStore::new();
        store.set("key1", 0, vec![1]);
        let first = store.entry("key1").unwrap().checksum;

        store.set("key1", 1, vec![2, 3]);
        let entry = store.entry("key1").unwrap();
        assert_ne!(entry.checksum, first);
        assert_eq!(entry.replica_rank, 1);
        assert!(entry.is_intact());
    }

    #[test]
    fn test_corrupted_value_fails_integrity_check() {
        let mut value = StoredValue::new(vec![1, 2, 3], 0);
        assert!(value.is_intact());

        value.bytes[1] ^= 0xff;
        assert!(!value.is_intact());
    }

    // ============================================================
    // SINGLE-NODE END-TO-END (dispatcher → HTTP → store)
    // ============================================================

    #[tokio::test]
    async fn test_single_node_set_get_remove_roundtrip() {
        let peer = spawn_peer("n1", "X").await;
        let registry = Arc::new(PeerRegistry::new(peer.info.clone()));
        let dispatcher = Dispatcher::new(registry, 0, WriteMode::FirstSuccess);

        dispatcher.set("key1", &[0, 1, 2, 3, 4]).await.unwrap();
        assert_eq!(dispatcher.get("key1").await, Some(vec![0, 1, 2, 3, 4]));
        assert_eq!(dispatcher.get("missing").await, None);

        // The primary copy is stored under rank 0.
        assert_eq!(peer.store.entry("key1").unwrap().replica_rank, 0);

        dispatcher.remove("key1").await.unwrap();
        assert_eq!(dispatcher.get("key1").await, None);

        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_surface_errors_when_no_peer_reachable() {
        // A dispatcher over a registry whose only peer is unreachable
        // surfaces the last error instead of succeeding silently.
        let dead = unreachable_peer("dead", "X");
        let registry = Arc::new(PeerRegistry::new(dead));
        let dispatcher = Dispatcher::new(registry, 0, WriteMode::FirstSuccess);

        assert!(dispatcher.set("key1", &[1]).await.is_err());
        assert_eq!(dispatcher.get("key1").await, None);
        assert!(dispatcher.remove("key1").await.is_err());
    }

    // ============================================================
    // FAILOVER AND REPLICATION
    // ============================================================

    #[tokio::test]
    async fn test_operations_fail_over_past_dead_replica() {
        let live = spawn_peer("live", "X").await;
        let dead = unreachable_peer("dead", "X");

        let registry = Arc::new(PeerRegistry::new(live.info.clone()));
        registry.observe(dead);
        let dispatcher = Dispatcher::new(registry, 1, WriteMode::FirstSuccess);

        // Whichever replica order the hashes produce, the write and the
        // read must land on the surviving peer.
        dispatcher.set("key1", &[9, 9, 9]).await.unwrap();
        assert_eq!(dispatcher.get("key1").await, Some(vec![9, 9, 9]));
        assert_eq!(live.store.get("key1"), Some(vec![9, 9, 9]));

        dispatcher.remove("key1").await.unwrap();
        assert_eq!(live.store.get("key1"), None);

        live.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_all_stores_ranked_copies_on_every_replica() {
        let a = spawn_peer("peer-a", "X").await;
        let b = spawn_peer("peer-b", "X").await;

        let registry = Arc::new(PeerRegistry::new(a.info.clone()));
        registry.observe(b.info.clone());
        let dispatcher = Dispatcher::new(registry.clone(), 1, WriteMode::WriteAll);

        dispatcher.set("shared", &[4, 2]).await.unwrap();

        // Each replica holds the value under its position in the list.
        let replicas = registry.replicas("shared", 1);
        assert_eq!(replicas.len(), 2);
        for (rank, replica) in replicas.iter().enumerate() {
            let store = if replica.id == a.info.id {
                &a.store
            } else {
                &b.store
            };
            let entry = store.entry("shared").unwrap();
            assert_eq!(entry.bytes, vec![4, 2]);
            assert_eq!(entry.replica_rank, rank as i32);
        }

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_fans_out_to_all_replicas() {
        let a = spawn_peer("peer-a", "X").await;
        let b = spawn_peer("peer-b", "X").await;

        let registry = Arc::new(PeerRegistry::new(a.info.clone()));
        registry.observe(b.info.clone());

        // Seed both replicas, then remove once.
        let writer = Dispatcher::new(registry.clone(), 1, WriteMode::WriteAll);
        writer.set("doomed", &[7]).await.unwrap();
        assert!(a.store.get("doomed").is_some());
        assert!(b.store.get("doomed").is_some());

        writer.remove("doomed").await.unwrap();
        assert_eq!(a.store.get("doomed"), None);
        assert_eq!(b.store.get("doomed"), None);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_success_write_diverges_and_get_falls_through() {
        let a = spawn_peer("peer-a", "X").await;
        let b = spawn_peer("peer-b", "X").await;

        let registry = Arc::new(PeerRegistry::new(a.info.clone()));
        registry.observe(b.info.clone());
        let dispatcher = Dispatcher::new(registry.clone(), 1, WriteMode::FirstSuccess);

        dispatcher.set("lonely", &[1, 1]).await.unwrap();

        // Exactly one replica holds the value after a first-success write.
        let holders = [&a, &b]
            .iter()
            .filter(|peer| peer.store.get("lonely").is_some())
            .count();
        assert_eq!(holders, 1);

        // The read still succeeds, falling through to the holding replica.
        assert_eq!(dispatcher.get("lonely").await, Some(vec![1, 1]));

        a.shutdown().await;
        b.shutdown().await;
    }

    // ============================================================
    // ENDPOINT PROTOCOL EDGES
    // ============================================================

    #[tokio::test]
    async fn test_endpoint_rejects_malformed_set() {
        let peer = spawn_peer("n1", "X").await;
        let client = reqwest::Client::new();
        let url = peer.info.base_url();

        // Body that is not JSON.
        let response = client
            .post(&url)
            .query(&[("id", "n1"), ("copy", "0")])
            .header("content-type", "application/json")
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        // Query string without a parseable copy rank.
        let response = client
            .post(&url)
            .query(&[("id", "n1"), ("copy", "nan")])
            .json(&std::collections::HashMap::from([("k", vec![1u8])]))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        assert!(peer.store.is_empty());
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_endpoint_get_serves_raw_bytes_and_404() {
        let peer = spawn_peer("n1", "X").await;
        peer.store.set("key1", 0, vec![0xde, 0xad]);

        let client = reqwest::Client::new();
        let response = client
            .get(peer.info.base_url())
            .query(&[("id", "n1"), ("key", "key1")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().to_vec(), vec![0xde, 0xad]);

        let response = client
            .get(peer.info.base_url())
            .query(&[("id", "n1"), ("key", "absent")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        peer.shutdown().await;
    }
}
