//! Error types for forward startup and per-connection bridging.

use burrow_overlay::OverlayError;
use thiserror::Error;

/// Errors surfaced while configuring and starting forwards.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed forward spec. Fatal at startup; nothing is started.
    #[error("invalid forward spec: {0}")]
    Config(String),
    /// A local listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// The underlying bind error.
        source: std::io::Error,
    },
    /// The startup probe exhausted its attempts. Fatal for the affected
    /// client forward only.
    #[error("peer unreachable after {attempts} probe attempts: {reason}")]
    Probe {
        /// How many connect attempts were made.
        attempts: u32,
        /// The last attempt's failure.
        reason: String,
    },
    /// Overlay listen or connect failure during startup.
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    /// Other I/O failure during startup.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection bridge failures. These never escape the task owning the
/// bridge; they are logged and the affected bridge is torn down.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The local socket failed mid-stream.
    #[error("local socket error: {0}")]
    Local(#[source] std::io::Error),
    /// The overlay stream failed mid-stream.
    #[error("overlay stream error: {0}")]
    Remote(#[source] std::io::Error),
    /// No payload moved in either direction within the idle window.
    #[error("idle timeout expired")]
    IdleTimeout,
    /// The overlay session's peer is gone.
    #[error("overlay session closed")]
    SessionClosed,
}
