//! Startup reachability probe for client forwards.
//!
//! Peer discovery dominates first-connection latency, so a client opens one
//! throwaway session up front: later user-initiated connections find a warm
//! path, and an unreachable peer becomes an explicit startup failure instead
//! of a silent hang.

use crate::error::TunnelError;
use burrow_common::base58;
use burrow_common::Pubkey;
use burrow_overlay::Node;
use std::time::Duration;
use tracing::debug;

/// Retry policy for the startup probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Connect attempts before giving up.
    pub attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Per-attempt connect timeout.
    pub timeout: Duration,
}

/// Opens and immediately closes one session to `remote`.
///
/// # Errors
///
/// Returns [`TunnelError::Probe`] once every attempt has failed.
pub async fn probe(node: &Node, remote: Pubkey, opts: ProbeOptions) -> Result<(), TunnelError> {
    let mut reason = String::from("no attempts made");
    for attempt in 1..=opts.attempts {
        match tokio::time::timeout(opts.timeout, node.connect(remote)).await {
            Ok(Ok(session)) => {
                debug!(peer = %base58::encode(&remote), attempt, "probe succeeded");
                drop(session);
                return Ok(());
            }
            Ok(Err(e)) => reason = e.to_string(),
            Err(_) => reason = format!("connect timed out after {:?}", opts.timeout),
        }
        debug!(peer = %base58::encode(&remote), attempt, %reason, "probe attempt failed");
        if attempt < opts.attempts {
            tokio::time::sleep(opts.retry_delay).await;
        }
    }
    Err(TunnelError::Probe {
        attempts: opts.attempts,
        reason,
    })
}
