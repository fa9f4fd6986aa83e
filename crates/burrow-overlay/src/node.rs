//! The node, listener, and session handles the tunnel engines work with.

use crate::error::OverlayError;
use burrow_common::base58;
use burrow_common::keys::SubKeyPair;
use burrow_common::Pubkey;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Largest datagram payload a session carries.
pub const MAX_DATAGRAM: usize = 65_535;

/// Bounded per-session datagram queue. Overflow drops, matching the
/// unreliable-delivery contract of the channel.
pub const DATAGRAM_QUEUE: usize = 256;

/// Buffered bytes per direction of a session's byte stream.
pub(crate) const STREAM_BUFFER: usize = 64 * 1024;

/// The rendezvous backend behind a [`Node`].
///
/// The in-process [`crate::MemoryTransport`] implements this for tests and
/// single-process wiring; a DHT-backed library implements the same contract
/// for real deployments, pumping its wire connection into the [`Session`]
/// channel pair.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Registers a listener under the keypair's public key. Registration
    /// proves possession of the private half.
    async fn listen(&self, keypair: &SubKeyPair) -> Result<Listener, OverlayError>;

    /// Opens a session to the peer listening under `remote`. Resolution of
    /// the returned future is the session's open event.
    async fn connect(&self, remote: Pubkey) -> Result<Session, OverlayError>;
}

/// A process-wide overlay node. Cheap to clone the `Arc`; every forward in
/// the process shares one node.
pub struct Node {
    transport: Arc<dyn Transport>,
}

impl Node {
    /// Brings up the shared node over the given transport.
    pub fn start(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self { transport })
    }

    /// Listens for sessions addressed to the keypair's public key.
    pub async fn listen(&self, keypair: &SubKeyPair) -> Result<Listener, OverlayError> {
        let listener = self.transport.listen(keypair).await?;
        debug!(key = %base58::encode(&listener.public()), "listening on overlay");
        Ok(listener)
    }

    /// Opens a session to a peer by public key.
    pub async fn connect(&self, remote: Pubkey) -> Result<Session, OverlayError> {
        let session = self.transport.connect(remote).await?;
        debug!(peer = %base58::encode(&remote), "overlay session open");
        Ok(session)
    }
}

/// Accepts inbound sessions for one advertised service key.
pub struct Listener {
    pub(crate) public: Pubkey,
    pub(crate) incoming: mpsc::Receiver<Session>,
}

impl Listener {
    /// The service key this listener is registered under.
    #[must_use]
    pub fn public(&self) -> Pubkey {
        self.public
    }

    /// Waits for the next inbound session. `None` means the transport
    /// deregistered this listener.
    pub async fn accept(&mut self) -> Option<Session> {
        self.incoming.recv().await
    }
}

/// One end-to-end overlay session.
///
/// A session carries a reliable duplex byte stream and an unreliable
/// datagram channel over the same association. An engine uses exactly one of
/// the two views; the conversions consume the session so the other view can
/// never be touched.
pub struct Session {
    pub(crate) service: Pubkey,
    pub(crate) stream: DuplexStream,
    pub(crate) dgram_tx: mpsc::Sender<Bytes>,
    pub(crate) dgram_rx: mpsc::Receiver<Bytes>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// The advertised service key this session is addressed under.
    #[must_use]
    pub fn service(&self) -> Pubkey {
        self.service
    }

    /// Takes the reliable byte-stream view, discarding the datagram channel.
    #[must_use]
    pub fn into_stream(self) -> DuplexStream {
        self.stream
    }

    /// Takes the datagram view, discarding the byte stream.
    #[must_use]
    pub fn into_datagrams(self) -> (DatagramSender, DatagramReceiver) {
        (
            DatagramSender {
                tx: self.dgram_tx,
                service: self.service,
            },
            DatagramReceiver { rx: self.dgram_rx },
        )
    }
}

/// Sends best-effort datagrams on a session.
#[derive(Clone)]
pub struct DatagramSender {
    tx: mpsc::Sender<Bytes>,
    service: Pubkey,
}

impl DatagramSender {
    /// Queues one datagram. A full queue drops the payload silently (the
    /// channel is unreliable by contract); a gone peer is an error so pumps
    /// can tear down.
    pub fn send(&self, payload: Bytes) -> Result<(), OverlayError> {
        debug_assert!(payload.len() <= MAX_DATAGRAM);
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(service = %base58::encode(&self.service), "datagram dropped: queue full");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(OverlayError::SessionClosed),
        }
    }
}

/// Receives datagrams on a session.
pub struct DatagramReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl DatagramReceiver {
    /// Waits for the next datagram. `None` means the peer side is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
