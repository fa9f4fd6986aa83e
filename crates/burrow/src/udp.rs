//! UDP forwarder: bridges local UDP datagrams to overlay datagram channels.
//!
//! Server half: every inbound overlay session gets its own locally-connected
//! UDP socket; one local datagram maps to one overlay datagram. Client half:
//! one persistent session serves a single local UDP flow. The first local
//! sender is latched for the lifetime of the session, which approximates a
//! one-to-one NAT for a single peer.

use crate::bridge::{drain, log_outcome};
use crate::error::{BridgeError, TunnelError};
use crate::probe::{probe, ProbeOptions};
use burrow_common::base58;
use burrow_common::keys::SubKeyPair;
use burrow_common::Pubkey;
use burrow_overlay::{DatagramReceiver, DatagramSender, Node, Session, MAX_DATAGRAM};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

/// Overlay connect timeout for the client's persistent session.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-attempt startup probe timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Exposes the UDP service at `host:port` under the given service keypair.
///
/// # Errors
///
/// Returns an error if the overlay listener cannot be registered.
pub async fn serve(
    node: Arc<Node>,
    keypair: SubKeyPair,
    host: String,
    port: u16,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<JoinHandle<()>, TunnelError> {
    let mut listener = node.listen(&keypair).await?;
    info!(
        key = %base58::encode(&keypair.public()),
        dest = %format!("{host}:{port}"),
        "udp forward serving"
    );

    let mut shutdown = shutdown;
    Ok(tokio::spawn(async move {
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                session = listener.accept() => match session {
                    Some(session) => {
                        conns.spawn(serve_session(session, host.clone(), port, shutdown.clone()));
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
                Some(finished) = conns.join_next() => {
                    if let Err(e) = finished {
                        warn!("udp bridge task failed: {e}");
                    }
                }
            }
        }
        drain(conns, grace).await;
    }))
}

async fn serve_session(session: Session, host: String, port: u16, mut shutdown: watch::Receiver<bool>) {
    // Resolve first so the socket binds in the target's address family.
    let target = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                warn!(dest = %format!("{host}:{port}"), "no addresses for target");
                return;
            }
        },
        Err(e) => {
            warn!(dest = %format!("{host}:{port}"), "failed to resolve target: {e}");
            return;
        }
    };
    let bind_addr = if target.is_ipv6() {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("failed to bind udp socket: {e}");
            return;
        }
    };
    if let Err(e) = socket.connect(target).await {
        warn!(dest = %target, "failed to connect udp socket: {e}");
        return;
    }

    debug!(dest = %target, "bridging inbound udp session");
    let (dgram_tx, dgram_rx) = session.into_datagrams();
    tokio::select! {
        result = pump_connected(socket, dgram_tx, dgram_rx) => log_outcome(result),
        _ = shutdown.changed() => debug!("udp bridge closed by shutdown"),
    }
}

async fn pump_connected(
    socket: UdpSocket,
    dgram_tx: DatagramSender,
    mut dgram_rx: DatagramReceiver,
) -> Result<(), BridgeError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv(&mut buf) => match received {
                Ok(n) => {
                    if dgram_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break Err(BridgeError::SessionClosed);
                    }
                }
                Err(e) => break Err(BridgeError::Local(e)),
            },
            payload = dgram_rx.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = socket.send(&payload).await {
                        break Err(BridgeError::Local(e));
                    }
                }
                None => break Ok(()),
            },
        }
    }
}

/// Probes the peer, then opens one persistent session and serves a single
/// local UDP flow on `127.0.0.1:local_port`.
///
/// # Errors
///
/// Returns [`TunnelError::Probe`] if the peer is unreachable, or
/// [`TunnelError::Bind`] if the local socket cannot be bound.
pub async fn forward(
    node: Arc<Node>,
    remote: Pubkey,
    local_port: u16,
    probe_opts: ProbeOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, TunnelError> {
    probe(&node, remote, probe_opts).await?;
    let session = match tokio::time::timeout(CONNECT_TIMEOUT, node.connect(remote)).await {
        Ok(session) => session?,
        Err(_) => {
            return Err(TunnelError::Probe {
                attempts: 1,
                reason: format!("connect timed out after {CONNECT_TIMEOUT:?}"),
            })
        }
    };

    let addr = format!("127.0.0.1:{local_port}");
    let socket = UdpSocket::bind(&addr)
        .await
        .map_err(|source| TunnelError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(peer = %base58::encode(&remote), local = %addr, "udp forward listening");

    let (dgram_tx, dgram_rx) = session.into_datagrams();
    let mut shutdown = shutdown;
    Ok(tokio::spawn(async move {
        tokio::select! {
            result = pump_local(socket, dgram_tx, dgram_rx) => log_outcome(result),
            _ = shutdown.changed() => debug!("udp forward closed by shutdown"),
        }
    }))
}

async fn pump_local(
    socket: UdpSocket,
    dgram_tx: DatagramSender,
    mut dgram_rx: DatagramReceiver,
) -> Result<(), BridgeError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    // First local sender is latched for the session lifetime; reverse traffic
    // before any local datagram has no destination and is dropped.
    let mut peer_addr: Option<SocketAddr> = None;
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, addr)) => {
                    if peer_addr.is_none() {
                        debug!(%addr, "latched local udp peer");
                        peer_addr = Some(addr);
                    }
                    if dgram_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break Err(BridgeError::SessionClosed);
                    }
                }
                Err(e) => break Err(BridgeError::Local(e)),
            },
            payload = dgram_rx.recv() => match payload {
                Some(payload) => match peer_addr {
                    Some(addr) => {
                        if let Err(e) = socket.send_to(&payload, addr).await {
                            break Err(BridgeError::Local(e));
                        }
                    }
                    None => trace!("dropping reverse datagram: no local peer yet"),
                },
                None => break Ok(()),
            },
        }
    }
}
