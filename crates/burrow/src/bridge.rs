//! Bidirectional pumps between a local socket and an overlay endpoint.
//!
//! Every forwarded connection is driven by exactly one task that owns the
//! bridge state and both endpoint halves. A clean EOF on one side half-closes
//! only that direction; errors and idle expiry tear the whole bridge down.
//! Teardown is reached exactly once, shuts both write halves, and after it no
//! further bytes move in either direction.

use crate::error::BridgeError;
use burrow_overlay::{DatagramReceiver, DatagramSender, MAX_DATAGRAM};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Copy buffer size for stream pumps.
const COPY_BUF: usize = 16 * 1024;

/// Lifecycle of one bridge, owned by the task driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    /// Both directions flowing.
    Open,
    /// The local side sent EOF; only remote-to-local still flows.
    HalfClosedLocal,
    /// The remote side sent EOF; only local-to-remote still flows.
    HalfClosedRemote,
    /// Torn down. Entered exactly once.
    Destroyed,
}

/// Tuning for a stream bridge.
#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    /// Tear the bridge down after this long without payload in either
    /// direction.
    pub idle_timeout: Duration,
    /// Keep the opposite direction open after a clean EOF on one side.
    pub allow_half_open: bool,
}

/// Pumps bytes both ways between a local stream and an overlay byte stream
/// until both directions have ended or the bridge fails.
///
/// # Errors
///
/// Returns the failure that tore the bridge down; a clean close on both
/// sides is `Ok`.
pub async fn bridge_streams<L, R>(
    local: L,
    remote: R,
    opts: BridgeOptions,
) -> Result<(), BridgeError>
where
    L: AsyncRead + AsyncWrite,
    R: AsyncRead + AsyncWrite,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    let mut state = BridgeState::Open;
    let mut local_buf = vec![0u8; COPY_BUF];
    let mut remote_buf = vec![0u8; COPY_BUF];
    let mut last_activity = Instant::now();

    let result = loop {
        let local_open = matches!(state, BridgeState::Open | BridgeState::HalfClosedRemote);
        let remote_open = matches!(state, BridgeState::Open | BridgeState::HalfClosedLocal);
        tokio::select! {
            read = local_rd.read(&mut local_buf), if local_open => match read {
                Ok(0) => {
                    // Natural end: close only our direction of the remote.
                    let _ = remote_wr.shutdown().await;
                    if state == BridgeState::Open && opts.allow_half_open {
                        state = BridgeState::HalfClosedLocal;
                    } else {
                        break Ok(());
                    }
                }
                Ok(n) => {
                    if let Err(e) = remote_wr.write_all(&local_buf[..n]).await {
                        break Err(BridgeError::Remote(e));
                    }
                    last_activity = Instant::now();
                }
                Err(e) => break Err(BridgeError::Local(e)),
            },
            read = remote_rd.read(&mut remote_buf), if remote_open => match read {
                Ok(0) => {
                    let _ = local_wr.shutdown().await;
                    if state == BridgeState::Open && opts.allow_half_open {
                        state = BridgeState::HalfClosedRemote;
                    } else {
                        break Ok(());
                    }
                }
                Ok(n) => {
                    if let Err(e) = local_wr.write_all(&remote_buf[..n]).await {
                        break Err(BridgeError::Local(e));
                    }
                    last_activity = Instant::now();
                }
                Err(e) => break Err(BridgeError::Remote(e)),
            },
            () = tokio::time::sleep_until(last_activity + opts.idle_timeout) => {
                break Err(BridgeError::IdleTimeout);
            }
        }
    };

    state = BridgeState::Destroyed;
    let _ = local_wr.shutdown().await;
    let _ = remote_wr.shutdown().await;
    trace!(?state, "bridge torn down");
    result
}

/// Pumps between a local reliable stream and a session's datagram channel:
/// each read burst from the stream becomes one datagram, each datagram is
/// written through verbatim.
///
/// Datagram channels have no half-close, so an EOF or a gone peer on either
/// side ends both directions.
///
/// # Errors
///
/// Returns the failure that tore the bridge down.
pub async fn bridge_stream_datagrams<S>(
    stream: S,
    dgram_tx: DatagramSender,
    mut dgram_rx: DatagramReceiver,
    idle_timeout: Duration,
) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_activity = Instant::now();

    let result = loop {
        tokio::select! {
            read = rd.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if dgram_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break Err(BridgeError::SessionClosed);
                    }
                    last_activity = Instant::now();
                }
                Err(e) => break Err(BridgeError::Local(e)),
            },
            payload = dgram_rx.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = wr.write_all(&payload).await {
                        break Err(BridgeError::Local(e));
                    }
                    last_activity = Instant::now();
                }
                None => break Ok(()),
            },
            () = tokio::time::sleep_until(last_activity + idle_timeout) => {
                break Err(BridgeError::IdleTimeout);
            }
        }
    };

    let _ = wr.shutdown().await;
    result
}

pub(crate) fn log_outcome(result: Result<(), BridgeError>) {
    match result {
        Ok(()) => debug!("bridge closed"),
        Err(e) => debug!("bridge torn down: {e}"),
    }
}

/// Gives in-flight bridge tasks `grace` to finish, then aborts the rest.
pub(crate) async fn drain(mut conns: JoinSet<()>, grace: Duration) {
    if conns.is_empty() {
        return;
    }
    let deadline = Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, conns.join_next()).await {
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(_) => break,
        }
    }
    debug!(remaining = conns.len(), "aborting bridges after grace period");
    conns.shutdown().await;
}
