//! Multicast Peer Discovery
//!
//! Every node announces itself by multicasting its serialized `PeerInfo`
//! on a fixed LAN group address. The same datagram stream serves discovery
//! of new peers and liveness refresh of known ones.
//!
//! ## Tasks
//! Three cooperative tokio tasks run while the service is up:
//! - **sender**: one heartbeat datagram every [`HEARTBEAT_INTERVAL`].
//! - **receiver**: parses incoming datagrams, filters them (malformed,
//!   self-loop, foreign group) and feeds admitted peers to the registry.
//! - **monitor**: sweeps the registry every [`MONITOR_INTERVAL`]; a peer
//!   silent for longer than that interval is evicted from the ring.
//!
//! All three share one cancellation token. `stop` cancels it, joins the
//! tasks and drops the sockets; a stopped service cannot be restarted.

use super::registry::PeerRegistry;
use super::types::PeerInfo;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fixed multicast group shared by every node ("all hosts" block).
/// Group separation happens on the payload's group tag, not the address.
pub const MULTICAST_ADDR: &str = "224.0.0.1:8454";

/// Heartbeat transmission period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Sweep period; doubles as the liveness TTL.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on one heartbeat datagram.
const MAX_DATAGRAM: usize = 1024;

/// Running discovery loop. Owns the heartbeat sockets and the three
/// background tasks; dropping without `stop` aborts nothing, so callers
/// hold it for the node's lifetime and stop it on shutdown.
pub struct DiscoveryService {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Binds the multicast sockets and spawns the three discovery tasks.
    ///
    /// `cancel` is shared with the caller so the whole node can be brought
    /// down with one signal.
    pub async fn start(
        local: PeerInfo,
        registry: Arc<PeerRegistry>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        tracing::debug!("starting peer discovery for {}", local.id);

        let group: SocketAddrV4 = MULTICAST_ADDR
            .parse()
            .context("invalid multicast group address")?;
        let send_sock = Arc::new(bind_send_socket(group).await?);
        let recv_sock = Arc::new(bind_recv_socket(group)?);

        let mut tasks = Vec::with_capacity(3);

        {
            let local = local.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                sender_loop(send_sock, local, cancel).await;
            }));
        }

        {
            let local = local.clone();
            let registry = registry.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                receiver_loop(recv_sock, local, registry, cancel).await;
            }));
        }

        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                monitor_loop(registry, cancel).await;
            }));
        }

        Ok(Self { cancel, tasks })
    }

    /// Signals cancellation and joins all three tasks. Terminal: a new
    /// service must be constructed to resume discovery.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();

        let mut first_err = None;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("discovery task failed to join: {}", e);
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!(e));
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Send side: ephemeral local port, connected to the group address.
async fn bind_send_socket(group: SocketAddrV4) -> Result<UdpSocket> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("failed to bind heartbeat send socket")?;
    sock.connect(group)
        .await
        .context("failed to connect heartbeat send socket")?;
    Ok(sock)
}

/// Receive side: bound to the multicast port with address reuse so several
/// nodes can share one host, joined to the group with loopback enabled.
/// Loopback means a node hears its own heartbeats; the receiver discards
/// them by id.
fn bind_recv_socket(group: SocketAddrV4) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create heartbeat receive socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
    socket
        .bind(&bind_addr.into())
        .context("failed to bind heartbeat receive socket")?;

    let recv = UdpSocket::from_std(socket.into())
        .context("failed to register heartbeat receive socket")?;
    recv.join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)
        .context("failed to join multicast group")?;
    recv.set_multicast_loop_v4(true)
        .context("failed to enable multicast loopback")?;

    Ok(recv)
}

/// Whether a received heartbeat enters the registry: not our own echo, and
/// from a peer of the same group.
pub fn should_admit(local: &PeerInfo, heartbeat: &PeerInfo) -> bool {
    heartbeat.id != local.id && heartbeat.group == local.group
}

async fn sender_loop(sock: Arc<UdpSocket>, local: PeerInfo, cancel: CancellationToken) {
    tracing::debug!("starting heartbeat transmission");

    let payload = match serde_json::to_vec(&local) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("failed to serialize heartbeat payload: {}", e);
            return;
        }
    };
    if payload.len() > MAX_DATAGRAM {
        tracing::error!(
            "heartbeat payload for {} exceeds {} bytes",
            local.id,
            MAX_DATAGRAM
        );
        return;
    }

    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                // Transient send failures are dropped; the next tick retries.
                if let Err(e) = sock.send(&payload).await {
                    tracing::error!("failed to send heartbeat from {}: {}", local.id, e);
                }
            }
        }
    }
}

async fn receiver_loop(
    sock: Arc<UdpSocket>,
    local: PeerInfo,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, src) = tokio::select! {
            _ = cancel.cancelled() => return,
            received = sock.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("error reading heartbeat datagram: {}", e);
                    continue;
                }
            },
        };

        let peer: PeerInfo = match serde_json::from_slice(&buf[..len]) {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!("dropping malformed heartbeat from {}: {}", src, e);
                continue;
            }
        };

        if !should_admit(&local, &peer) {
            continue;
        }

        tracing::debug!("received heartbeat from {} at {}", peer.id, src);
        if registry.observe(peer.clone()) {
            tracing::info!("discovered peer {} ({}) in group {}", peer.id, src, peer.group);
        }
    }
}

async fn monitor_loop(registry: Arc<PeerRegistry>, cancel: CancellationToken) {
    tracing::debug!("starting heartbeat monitor");

    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                for id in registry.sweep(Instant::now(), MONITOR_INTERVAL) {
                    tracing::warn!("no heartbeat from {}, removed from ring", id);
                }
            }
        }
    }
}
