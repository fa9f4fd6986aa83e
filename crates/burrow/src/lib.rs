//! Peer-to-peer port forwarding: the bridging discipline, the three
//! forwarder engines, and the manager that supervises a set of forwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod manager;
pub mod probe;
pub mod tcp;
pub mod tcp_datagram;
pub mod udp;

pub use error::{BridgeError, TunnelError};
