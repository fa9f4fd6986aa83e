//! Overlay node adapter: the contract the tunnel engines consume from the
//! peer-to-peer overlay, and an in-process transport implementing it.
//!
//! The overlay locates peers by public key and hands back sessions carrying
//! two logically independent channels: a reliable duplex byte stream and an
//! unreliable bounded datagram channel. Everything else the underlying
//! library may offer is hidden behind [`Transport`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod memory;
pub mod node;

pub use error::OverlayError;
pub use memory::MemoryTransport;
pub use node::{
    DatagramReceiver, DatagramSender, Listener, Node, Session, Transport, MAX_DATAGRAM,
};
