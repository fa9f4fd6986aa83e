use burrow_common::base58;
use burrow_common::Pubkey;
use thiserror::Error;

/// Errors surfaced by the overlay adapter.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// No peer is currently reachable under the given key. Transient: the
    /// peer may simply not have announced yet, so callers may retry.
    #[error("peer {} not found on the overlay", base58::encode(.0))]
    PeerNotFound(Pubkey),
    /// The listen registration's possession proof did not verify.
    #[error("listen registration rejected for {}", base58::encode(.0))]
    RegistrationRejected(Pubkey),
    /// The session's peer is gone.
    #[error("overlay session closed")]
    SessionClosed,
}
