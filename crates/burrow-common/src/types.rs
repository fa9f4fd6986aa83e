//! Forward-spec data model and protocol constants.

use crate::base58;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte Ed25519 public key used as a tunnel identity.
pub type Pubkey = [u8; 32];

/// Host a server forward connects to when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Transport carried by a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// TCP bridged over the overlay byte stream.
    Tcp,
    /// UDP bridged over the overlay datagram channel.
    Udp,
    /// TCP bridged over the overlay datagram channel, for NATs where only
    /// UDP-style hole punching succeeds.
    #[serde(rename = "tcpudp")]
    TcpUdp,
}

impl Proto {
    /// Wire tag used in service-key labels and CLI arguments.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
            Proto::TcpUdp => "tcpudp",
        }
    }

    /// Service-key derivation label for this transport and port.
    ///
    /// Both sides of a tunnel derive the same label, so the label fully
    /// determines which child key a service is addressed by.
    #[must_use]
    pub fn label(self, remote_port: u16) -> String {
        format!("{}{}", self.tag(), remote_port)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Proto::Tcp),
            "udp" => Ok(Proto::Udp),
            "tcpudp" => Ok(Proto::TcpUdp),
            other => Err(format!("unknown protocol {other:?} (expected tcp, udp, or tcpudp)")),
        }
    }
}

/// One forward to run, as configured by the CLI or a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ForwardSpec {
    /// Expose a local service to peers that can derive this identity.
    #[serde(rename_all = "camelCase")]
    Server {
        /// Transport to bridge.
        proto: Proto,
        /// Port of the local service being exposed; also the port label
        /// clients derive the service key from.
        remote_port: u16,
        /// Host the service lives on.
        #[serde(default = "default_host")]
        host: String,
        /// Shared secret the identity keys are derived from.
        secret: String,
    },
    /// Bind a local listener and forward it to a peer's exposed service.
    #[serde(rename_all = "camelCase")]
    Client {
        /// Transport to bridge.
        proto: Proto,
        /// Port label of the peer's exposed service; must match the port the
        /// server advertises.
        remote_port: u16,
        /// Local port the client-side listener binds on 127.0.0.1.
        local_port: u16,
        /// The peer's root identity public key.
        #[serde(with = "crate::base58::pubkey_serde")]
        peer_public_key: Pubkey,
    },
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl ForwardSpec {
    /// Transport of this forward.
    #[must_use]
    pub fn proto(&self) -> Proto {
        match self {
            ForwardSpec::Server { proto, .. } | ForwardSpec::Client { proto, .. } => *proto,
        }
    }

    /// Service-key derivation label of this forward.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            ForwardSpec::Server { proto, remote_port, .. }
            | ForwardSpec::Client { proto, remote_port, .. } => proto.label(*remote_port),
        }
    }

    /// Validates the spec values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ForwardSpec::Server {
                remote_port,
                host,
                secret,
                ..
            } => {
                if *remote_port == 0 {
                    return Err("remotePort must be greater than 0".to_string());
                }
                if host.is_empty() {
                    return Err("host must not be empty".to_string());
                }
                if secret.is_empty() {
                    return Err("secret must not be empty".to_string());
                }
            }
            ForwardSpec::Client {
                remote_port,
                local_port,
                ..
            } => {
                if *remote_port == 0 {
                    return Err("remotePort must be greater than 0".to_string());
                }
                if *local_port == 0 {
                    return Err("localPort must be greater than 0".to_string());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardSpec::Server {
                proto,
                remote_port,
                host,
                ..
            } => write!(f, "server {}:{remote_port} ({host})", proto.tag()),
            ForwardSpec::Client {
                proto,
                remote_port,
                local_port,
                peer_public_key,
            } => write!(
                f,
                "client {}:{remote_port} on 127.0.0.1:{local_port} via {}",
                proto.tag(),
                base58::encode(peer_public_key)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_concatenates_tag_and_port() {
        assert_eq!(Proto::Tcp.label(7000), "tcp7000");
        assert_eq!(Proto::Udp.label(1), "udp1");
        assert_eq!(Proto::TcpUdp.label(65535), "tcpudp65535");
    }

    #[test]
    fn proto_parses_from_tag() {
        assert_eq!("tcp".parse::<Proto>().unwrap(), Proto::Tcp);
        assert_eq!("udp".parse::<Proto>().unwrap(), Proto::Udp);
        assert_eq!("tcpudp".parse::<Proto>().unwrap(), Proto::TcpUdp);
        assert!("tls".parse::<Proto>().is_err());
    }

    #[test]
    fn server_spec_serde_surface() {
        let json = r#"{
            "role": "Server",
            "proto": "tcp",
            "remotePort": 7000,
            "secret": "abc"
        }"#;
        let spec: ForwardSpec = serde_json::from_str(json).unwrap();
        match &spec {
            ForwardSpec::Server {
                proto,
                remote_port,
                host,
                secret,
            } => {
                assert_eq!(*proto, Proto::Tcp);
                assert_eq!(*remote_port, 7000);
                assert_eq!(host, DEFAULT_HOST);
                assert_eq!(secret, "abc");
            }
            other => panic!("expected server spec, got {other:?}"),
        }
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn client_spec_serde_surface() {
        let key = [7u8; 32];
        let json = format!(
            r#"{{
                "role": "Client",
                "proto": "udp",
                "remotePort": 7001,
                "localPort": 17001,
                "peerPublicKey": "{}"
            }}"#,
            crate::base58::encode(&key)
        );
        let spec: ForwardSpec = serde_json::from_str(&json).unwrap();
        match &spec {
            ForwardSpec::Client {
                proto,
                remote_port,
                local_port,
                peer_public_key,
            } => {
                assert_eq!(*proto, Proto::Udp);
                assert_eq!(*remote_port, 7001);
                assert_eq!(*local_port, 17001);
                assert_eq!(*peer_public_key, key);
            }
            other => panic!("expected client spec, got {other:?}"),
        }

        // Round-trips through the same field names.
        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["role"], "Client");
        assert_eq!(back["remotePort"], 7001);
        assert_eq!(back["localPort"], 17001);
        assert_eq!(back["peerPublicKey"], crate::base58::encode(&key));
    }

    #[test]
    fn validate_rejects_zero_ports_and_empty_secret() {
        let spec = ForwardSpec::Server {
            proto: Proto::Tcp,
            remote_port: 0,
            host: DEFAULT_HOST.to_string(),
            secret: "abc".to_string(),
        };
        assert!(spec.validate().unwrap_err().contains("remotePort"));

        let spec = ForwardSpec::Server {
            proto: Proto::Tcp,
            remote_port: 7000,
            host: DEFAULT_HOST.to_string(),
            secret: String::new(),
        };
        assert!(spec.validate().unwrap_err().contains("secret"));

        let spec = ForwardSpec::Client {
            proto: Proto::Tcp,
            remote_port: 7000,
            local_port: 0,
            peer_public_key: [1u8; 32],
        };
        assert!(spec.validate().unwrap_err().contains("localPort"));
    }
}
