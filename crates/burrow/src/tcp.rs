//! TCP forwarder: bridges local TCP sockets to overlay byte streams.
//!
//! Server half: every inbound overlay session gets a fresh TCP connection to
//! the exposed service, one session to one socket. Client half: probe once,
//! then open a fresh overlay session per accepted local connection.

use crate::bridge::{bridge_streams, drain, log_outcome, BridgeOptions};
use crate::error::TunnelError;
use crate::probe::{probe, ProbeOptions};
use burrow_common::base58;
use burrow_common::keys::SubKeyPair;
use burrow_common::Pubkey;
use burrow_overlay::{Node, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Local connect timeout on the server side and overlay connect timeout on
/// the client side.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-socket idle timeout.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-attempt startup probe timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const BRIDGE_OPTIONS: BridgeOptions = BridgeOptions {
    idle_timeout: IDLE_TIMEOUT,
    allow_half_open: true,
};

/// Exposes `host:port` under the given service keypair. Returns once the
/// overlay listener is registered; forwarding runs until `shutdown` fires.
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
        "tcp forward serving"
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
                        warn!("tcp bridge task failed: {e}");
                    }
                }
            }
        }
        drain(conns, grace).await;
    }))
}

async fn serve_session(session: Session, host: String, port: u16, mut shutdown: watch::Receiver<bool>) {
    let local = match tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((host.as_str(), port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(dest = %format!("{host}:{port}"), "local connect failed: {e}");
            return;
        }
        Err(_) => {
            warn!(dest = %format!("{host}:{port}"), "local connect timed out");
            return;
        }
    };

    debug!(dest = %format!("{host}:{port}"), "bridging inbound session");
    tokio::select! {
        result = bridge_streams(local, session.into_stream(), BRIDGE_OPTIONS) => log_outcome(result),
        _ = shutdown.changed() => debug!("bridge closed by shutdown"),
    }
}

/// Probes the peer, binds `127.0.0.1:local_port`, and forwards each accepted
/// TCP connection over its own overlay session.
///
/// # Errors
///
/// Returns [`TunnelError::Probe`] if the peer is unreachable, or
/// [`TunnelError::Bind`] if the local listener cannot be bound.
pub async fn forward(
    node: Arc<Node>,
    remote: Pubkey,
    local_port: u16,
    probe_opts: ProbeOptions,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<JoinHandle<()>, TunnelError> {
    probe(&node, remote, probe_opts).await?;

    let addr = format!("127.0.0.1:{local_port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| TunnelError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(peer = %base58::encode(&remote), local = %addr, "tcp forward listening");

    let mut shutdown = shutdown;
    Ok(tokio::spawn(async move {
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "local connection accepted");
                        conns.spawn(forward_connection(
                            node.clone(),
                            remote,
                            stream,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("tcp accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
                Some(finished) = conns.join_next() => {
                    if let Err(e) = finished {
                        warn!("tcp bridge task failed: {e}");
                    }
                }
            }
        }
        drain(conns, grace).await;
    }))
}

async fn forward_connection(
    node: Arc<Node>,
    remote: Pubkey,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let session = match tokio::time::timeout(CONNECT_TIMEOUT, node.connect(remote)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            warn!(peer = %base58::encode(&remote), "overlay connect failed: {e}");
            return;
        }
        Err(_) => {
            warn!(peer = %base58::encode(&remote), "overlay connect timed out");
            return;
        }
    };

    tokio::select! {
        result = bridge_streams(stream, session.into_stream(), BRIDGE_OPTIONS) => log_outcome(result),
        _ = shutdown.changed() => debug!("bridge closed by shutdown"),
    }
}
