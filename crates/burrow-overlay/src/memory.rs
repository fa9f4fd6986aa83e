//! In-process rendezvous transport.
//!
//! Pairs connectors with listeners through a concurrent key-to-handle table
//! and builds each session from an in-memory duplex stream plus a pair of
//! crosswired bounded datagram queues. This is the transport the test
//! harness and single-process demo wiring run on; a DHT backend replaces it
//! behind the same [`Transport`] contract without touching the engines.

use crate::error::OverlayError;
use crate::node::{Listener, Session, Transport, DATAGRAM_QUEUE, STREAM_BUFFER};
use burrow_common::base58;
use burrow_common::keys::{self, SubKeyPair};
use burrow_common::Pubkey;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

/// Pending inbound sessions buffered per listener.
const SESSION_QUEUE: usize = 64;

const ANNOUNCE_CONTEXT: &[u8] = b"burrow/overlay/announce/v1";

/// Handle held in the rendezvous table for one registered listener.
struct Route {
    tx: mpsc::Sender<Session>,
    registered_at: Instant,
}

/// In-process overlay transport. One instance plays the role of the DHT:
/// every node sharing it can reach every listener registered on it.
#[derive(Default)]
pub struct MemoryTransport {
    routes: DashMap<Pubkey, Route>,
}

impl MemoryTransport {
    /// Creates an empty rendezvous table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.routes.len()
    }
}

fn announce_message(public: &Pubkey, challenge: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(ANNOUNCE_CONTEXT.len() + 64);
    message.extend_from_slice(ANNOUNCE_CONTEXT);
    message.extend_from_slice(public);
    message.extend_from_slice(challenge);
    message
}

/// Builds a crosswired session pair for one association: what one side
/// sends, over either channel, the other side receives.
fn session_pair(service: Pubkey) -> (Session, Session) {
    let (stream_a, stream_b) = tokio::io::duplex(STREAM_BUFFER);
    let (a_tx, b_rx) = mpsc::channel(DATAGRAM_QUEUE);
    let (b_tx, a_rx) = mpsc::channel(DATAGRAM_QUEUE);
    (
        Session {
            service,
            stream: stream_a,
            dgram_tx: a_tx,
            dgram_rx: a_rx,
        },
        Session {
            service,
            stream: stream_b,
            dgram_tx: b_tx,
            dgram_rx: b_rx,
        },
    )
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, keypair: &SubKeyPair) -> Result<Listener, OverlayError> {
        let public = keypair.public();

        // Possession proof, the same shape a DHT backend signs into its
        // announce record.
        let mut challenge = [0u8; 32];
        rand::thread_rng().fill(&mut challenge);
        let signature = keypair.sign(&announce_message(&public, &challenge));
        if !keys::verify(&public, &announce_message(&public, &challenge), &signature) {
            return Err(OverlayError::RegistrationRejected(public));
        }

        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let route = Route {
            tx,
            registered_at: Instant::now(),
        };
        if self.routes.insert(public, route).is_some() {
            warn!(
                key = %base58::encode(&public),
                "replacing existing listener registration"
            );
        }
        Ok(Listener {
            public,
            incoming: rx,
        })
    }

    async fn connect(&self, remote: Pubkey) -> Result<Session, OverlayError> {
        let (tx, registered_at) = self
            .routes
            .get(&remote)
            .map(|entry| (entry.tx.clone(), entry.registered_at))
            .ok_or(OverlayError::PeerNotFound(remote))?;

        let (near, far) = session_pair(remote);
        if tx.send(far).await.is_err() {
            // The listener is gone; evict the stale route, but only if it was
            // not re-registered in the meantime.
            self.routes
                .remove_if(&remote, |_, route| route.registered_at == registered_at);
            return Err(OverlayError::PeerNotFound(remote));
        }
        Ok(near)
    }
}
