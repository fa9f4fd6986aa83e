//! Failure-path behavior: probe failures, refused local connects, and
//! isolation between tunnels sharing one process.

mod common;

use burrow::error::TunnelError;
use burrow::manager::ForwardManager;
use burrow_common::types::Proto;
use common::*;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

#[tokio::test]
async fn probe_failure_binds_no_listener() {
    let local_port = free_tcp_port();
    let started = Instant::now();

    let err = ForwardManager::start(
        node(),
        vec![client_spec(Proto::Tcp, 7000, local_port, "nobody-serves-this")],
        &fast_settings(),
    )
    .await
    .unwrap_err();

    match err {
        TunnelError::Probe { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected probe error, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(15));

    // The local listener was never bound.
    assert!(TcpStream::connect(("127.0.0.1", local_port)).await.is_err());
}

#[tokio::test]
async fn refused_local_connect_closes_the_tunnel_connection_without_data() {
    // The server spec points at a port nothing listens on.
    let dead_port = free_tcp_port();
    let secret = "refused";
    let local_port = free_tcp_port();

    let node = node();
    let manager = ForwardManager::start(
        node.clone(),
        vec![server_spec(Proto::Tcp, dead_port, secret)],
        &fast_settings(),
    )
    .await
    .unwrap();
    let client = ForwardManager::start(
        node,
        vec![client_spec(Proto::Tcp, dead_port, local_port, secret)],
        &fast_settings(),
    )
    .await
    .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    stream.write_all(b"anyone there?").await.unwrap();

    // No bytes ever come back; the connection just ends.
    let mut sink = Vec::new();
    let read = timeout(Duration::from_secs(15), stream.read_to_end(&mut sink))
        .await
        .expect("bridge should be destroyed well within the connect window");
    assert!(read.is_ok());
    assert!(sink.is_empty());

    client.shutdown().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn killing_one_service_leaves_the_other_tunnel_unaffected() {
    let (tcp_addr, tcp_echo) = start_tcp_echo().await;
    let (udp_addr, _udp_echo) = start_udp_echo().await;
    let secret = "isolated";
    let tcp_local = free_tcp_port();
    let udp_local = free_udp_port();

    let manager = ForwardManager::start(
        node(),
        vec![
            server_spec(Proto::Tcp, tcp_addr.port(), secret),
            server_spec(Proto::Udp, udp_addr.port(), secret),
            client_spec(Proto::Tcp, tcp_addr.port(), tcp_local, secret),
            client_spec(Proto::Udp, udp_addr.port(), udp_local, secret),
        ],
        &fast_settings(),
    )
    .await
    .unwrap();
    assert_eq!(manager.forward_count(), 4);

    // Both tunnels work.
    let mut stream = TcpStream::connect(("127.0.0.1", tcp_local)).await.unwrap();
    stream.write_all(b"tcp ok").await.unwrap();
    let mut reply = [0u8; 6];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("tcp echo timed out")
        .unwrap();
    assert_eq!(&reply, b"tcp ok");
    drop(stream);

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    udp.send_to(b"udp ok", ("127.0.0.1", udp_local)).await.unwrap();
    let mut buf = [0u8; 16];
    let (n, _) = timeout(Duration::from_secs(5), udp.recv_from(&mut buf))
        .await
        .expect("udp echo timed out")
        .unwrap();
    assert_eq!(&buf[..n], b"udp ok");

    // Kill the TCP-side service; its tunnel now fails per-connection.
    tcp_echo.abort();
    let _ = tcp_echo.await;

    let mut stream = TcpStream::connect(("127.0.0.1", tcp_local)).await.unwrap();
    stream.write_all(b"anyone?").await.unwrap();
    let mut sink = Vec::new();
    let read = timeout(Duration::from_secs(15), stream.read_to_end(&mut sink))
        .await
        .expect("broken tcp tunnel should close promptly");
    assert!(read.is_ok());
    assert!(sink.is_empty());

    // The UDP tunnel is untouched.
    udp.send_to(b"still ok", ("127.0.0.1", udp_local)).await.unwrap();
    let (n, _) = timeout(Duration::from_secs(5), udp.recv_from(&mut buf))
        .await
        .expect("udp tunnel should survive the tcp failure")
        .unwrap();
    assert_eq!(&buf[..n], b"still ok");

    manager.shutdown().await;
}

#[tokio::test]
async fn startup_survives_a_partially_failing_spec_set() {
    let (echo_addr, _echo) = start_tcp_echo().await;
    let secret = "partial";
    let good_local = free_tcp_port();
    let bad_local = free_tcp_port();

    // One client spec dials a peer that does not exist; the other pair works.
    let manager = ForwardManager::start(
        node(),
        vec![
            server_spec(Proto::Tcp, echo_addr.port(), secret),
            client_spec(Proto::Tcp, echo_addr.port(), good_local, secret),
            client_spec(Proto::Tcp, 9999, bad_local, "unknown-peer"),
        ],
        &fast_settings(),
    )
    .await
    .unwrap();
    assert_eq!(manager.forward_count(), 2);

    let mut stream = TcpStream::connect(("127.0.0.1", good_local)).await.unwrap();
    stream.write_all(b"works").await.unwrap();
    let mut reply = [0u8; 5];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("surviving tunnel timed out")
        .unwrap();
    assert_eq!(&reply, b"works");

    assert!(TcpStream::connect(("127.0.0.1", bad_local)).await.is_err());

    manager.shutdown().await;
}
