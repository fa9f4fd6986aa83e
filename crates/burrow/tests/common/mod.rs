#![allow(dead_code)]

use burrow::config::Settings;
use burrow_common::keys::RootKeyPair;
use burrow_common::types::{ForwardSpec, Proto, DEFAULT_HOST};
use burrow_overlay::{MemoryTransport, Node};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// Settings with short retry/grace windows so tests stay fast. Probe retry
/// also absorbs the startup race between concurrently started specs.
pub fn fast_settings() -> Settings {
    Settings {
        probe_attempts: 5,
        probe_retry_delay_ms: 50,
        shutdown_grace_ms: 200,
    }
}

/// One shared in-process overlay node; server and client forwards in a test
/// all run over it.
pub fn node() -> Arc<Node> {
    Node::start(MemoryTransport::new())
}

pub fn server_spec(proto: Proto, remote_port: u16, secret: &str) -> ForwardSpec {
    ForwardSpec::Server {
        proto,
        remote_port,
        host: DEFAULT_HOST.to_string(),
        secret: secret.to_string(),
    }
}

pub fn client_spec(proto: Proto, remote_port: u16, local_port: u16, secret: &str) -> ForwardSpec {
    ForwardSpec::Client {
        proto,
        remote_port,
        local_port,
        peer_public_key: RootKeyPair::from_secret(secret.as_bytes()).public(),
    }
}

/// Grabs a free TCP port by binding and immediately releasing it.
pub fn free_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Grabs a free UDP port by binding and immediately releasing it.
pub fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

/// TCP service echoing every byte back until the peer closes.
pub async fn start_tcp_echo() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    (addr, handle)
}

/// UDP service echoing every datagram back to its sender.
pub async fn start_udp_echo() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            if socket.send_to(&buf[..n], from).await.is_err() {
                break;
            }
        }
    });
    (addr, handle)
}

/// TCP service that reads until EOF, then replies `bye\n` and closes.
pub async fn start_eof_then_bye() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut sink = Vec::new();
                if stream.read_to_end(&mut sink).await.is_err() {
                    return;
                }
                let _ = stream.write_all(b"bye\n").await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, handle)
}
