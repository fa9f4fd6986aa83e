//! Spawns, supervises, and shuts down a set of forwards.

use crate::config::Settings;
use crate::error::TunnelError;
use crate::{tcp, tcp_datagram, udp};
use burrow_common::base58;
use burrow_common::keys::{derive_sub_public, RootKeyPair};
use burrow_common::types::{ForwardSpec, Proto};
use burrow_common::Pubkey;
use burrow_overlay::Node;
use futures_util::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A served identity to display, with every (protocol, port) it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Root public key a peer dials.
    pub public_key: Pubkey,
    /// Exposed (protocol, port) pairs, in input order.
    pub forwards: Vec<(Proto, u16)>,
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = base58::encode(&self.public_key);
        writeln!(f, "tunnel identity: {key}")?;
        write!(f, "  connect with: burrow connect --peer {key}")?;
        for (proto, port) in &self.forwards {
            write!(f, " --forward {}:{port}", proto.tag())?;
        }
        Ok(())
    }
}

/// Groups server specs into announcements. When every server spec shares one
/// secret they collapse into a single consolidated announcement; otherwise
/// each server spec announces on its own line.
fn announcements(specs: &[ForwardSpec]) -> Vec<Announcement> {
    let servers: Vec<(Proto, u16, &str)> = specs
        .iter()
        .filter_map(|spec| match spec {
            ForwardSpec::Server {
                proto,
                remote_port,
                secret,
                ..
            } => Some((*proto, *remote_port, secret.as_str())),
            ForwardSpec::Client { .. } => None,
        })
        .collect();

    let Some((_, _, first_secret)) = servers.first() else {
        return Vec::new();
    };

    if servers.iter().all(|(_, _, secret)| secret == first_secret) {
        vec![Announcement {
            public_key: RootKeyPair::from_secret(first_secret.as_bytes()).public(),
            forwards: servers
                .iter()
                .map(|(proto, port, _)| (*proto, *port))
                .collect(),
        }]
    } else {
        servers
            .into_iter()
            .map(|(proto, port, secret)| Announcement {
                public_key: RootKeyPair::from_secret(secret.as_bytes()).public(),
                forwards: vec![(proto, port)],
            })
            .collect()
    }
}

async fn start_one(
    node: Arc<Node>,
    spec: ForwardSpec,
    settings: Settings,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<JoinHandle<()>, TunnelError> {
    match spec {
        ForwardSpec::Server {
            proto,
            remote_port,
            host,
            secret,
        } => {
            let keypair =
                RootKeyPair::from_secret(secret.as_bytes()).derive(&proto.label(remote_port));
            match proto {
                Proto::Tcp => tcp::serve(node, keypair, host, remote_port, shutdown, grace).await,
                Proto::Udp => udp::serve(node, keypair, host, remote_port, shutdown, grace).await,
                Proto::TcpUdp => {
                    tcp_datagram::serve(node, keypair, host, remote_port, shutdown, grace).await
                }
            }
        }
        ForwardSpec::Client {
            proto,
            remote_port,
            local_port,
            peer_public_key,
        } => {
            let remote = derive_sub_public(&peer_public_key, &proto.label(remote_port))
                .map_err(|e| TunnelError::Config(format!("invalid peer public key: {e}")))?;
            match proto {
                Proto::Tcp => {
                    let probe = settings.probe_options(tcp::PROBE_TIMEOUT);
                    tcp::forward(node, remote, local_port, probe, shutdown, grace).await
                }
                Proto::Udp => {
                    let probe = settings.probe_options(udp::PROBE_TIMEOUT);
                    udp::forward(node, remote, local_port, probe, shutdown).await
                }
                Proto::TcpUdp => {
                    let probe = settings.probe_options(tcp_datagram::PROBE_TIMEOUT);
                    tcp_datagram::forward(node, remote, local_port, probe, shutdown, grace).await
                }
            }
        }
    }
}

/// A running set of forwards sharing one overlay node.
#[derive(Debug)]
pub struct ForwardManager {
    announcements: Vec<Announcement>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    grace: Duration,
}

impl ForwardManager {
    /// Validates and starts every forward concurrently.
    ///
    /// Config errors abort before anything starts. Per-spec startup failures
    /// are logged and tolerated as long as at least one forward survives;
    /// when none does, the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Config`] for malformed specs, or the first
    /// startup error when every forward failed to start.
    pub async fn start(
        node: Arc<Node>,
        specs: Vec<ForwardSpec>,
        settings: &Settings,
    ) -> Result<Self, TunnelError> {
        if specs.is_empty() {
            return Err(TunnelError::Config("no forwards specified".to_string()));
        }
        for spec in &specs {
            spec.validate()
                .map_err(|e| TunnelError::Config(format!("{spec}: {e}")))?;
        }

        let announcements = announcements(&specs);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = settings.shutdown_grace();

        let startups = specs.into_iter().map(|spec| {
            let node = node.clone();
            let settings = settings.clone();
            let shutdown = shutdown_rx.clone();
            async move {
                let what = spec.to_string();
                let result = start_one(node, spec, settings, shutdown, grace).await;
                (what, result)
            }
        });

        let mut tasks = Vec::new();
        let mut first_error = None;
        for (what, result) in join_all(startups).await {
            match result {
                Ok(handle) => {
                    info!("{what} started");
                    tasks.push(handle);
                }
                Err(e) => {
                    error!("{what} failed to start: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if tasks.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(Self {
            announcements,
            tasks,
            shutdown_tx,
            grace,
        })
    }

    /// Server identities to display, consolidated where specs share a secret.
    #[must_use]
    pub fn announcements(&self) -> &[Announcement] {
        &self.announcements
    }

    /// Number of forwards that started and are still supervised.
    #[must_use]
    pub fn forward_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signals every forward to end, waits out the grace period, and aborts
    /// whatever remains.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + self.grace + Duration::from_millis(500);
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::types::DEFAULT_HOST;
    use burrow_overlay::MemoryTransport;

    fn server(proto: Proto, port: u16, secret: &str) -> ForwardSpec {
        ForwardSpec::Server {
            proto,
            remote_port: port,
            host: DEFAULT_HOST.to_string(),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn shared_secret_consolidates_to_one_announcement() {
        let specs = vec![
            server(Proto::Tcp, 7000, "abc"),
            server(Proto::Udp, 7001, "abc"),
            server(Proto::TcpUdp, 7002, "abc"),
        ];
        let announced = announcements(&specs);
        assert_eq!(announced.len(), 1);
        assert_eq!(
            announced[0].public_key,
            RootKeyPair::from_secret(b"abc").public()
        );
        assert_eq!(
            announced[0].forwards,
            vec![
                (Proto::Tcp, 7000),
                (Proto::Udp, 7001),
                (Proto::TcpUdp, 7002)
            ]
        );

        let rendered = announced[0].to_string();
        assert_eq!(rendered.matches("tunnel identity").count(), 1);
        assert_eq!(rendered.matches("connect with").count(), 1);
        let tcp_at = rendered.find("--forward tcp:7000").unwrap();
        let udp_at = rendered.find("--forward udp:7001").unwrap();
        let tcpudp_at = rendered.find("--forward tcpudp:7002").unwrap();
        assert!(tcp_at < udp_at && udp_at < tcpudp_at);
    }

    #[test]
    fn distinct_secrets_announce_separately() {
        let specs = vec![
            server(Proto::Tcp, 7000, "abc"),
            server(Proto::Udp, 7001, "xyz"),
        ];
        let announced = announcements(&specs);
        assert_eq!(announced.len(), 2);
        assert_ne!(announced[0].public_key, announced[1].public_key);
    }

    #[test]
    fn client_specs_do_not_announce() {
        let specs = vec![ForwardSpec::Client {
            proto: Proto::Tcp,
            remote_port: 7000,
            local_port: 17000,
            peer_public_key: [1u8; 32],
        }];
        assert!(announcements(&specs).is_empty());
    }

    #[tokio::test]
    async fn empty_spec_list_is_a_config_error() {
        let node = Node::start(MemoryTransport::new());
        let err = ForwardManager::start(node, Vec::new(), &Settings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
    }

    #[tokio::test]
    async fn invalid_spec_aborts_before_any_forward_starts() {
        let transport = MemoryTransport::new();
        let node = Node::start(transport.clone());
        let specs = vec![
            server(Proto::Tcp, 7000, "abc"),
            server(Proto::Tcp, 0, "abc"),
        ];
        let err = ForwardManager::start(node, specs, &Settings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
        assert_eq!(transport.listener_count(), 0);
    }
}
