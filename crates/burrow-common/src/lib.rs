//! Shared types for the burrow tunnel stack.
//!
//! This crate provides:
//! - Root and per-service identity key derivation ([`keys`])
//! - Base58 encoding/decoding for displayed identities ([`base58`])
//! - The forward-spec data model consumed by the forward manager ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base58;
pub mod keys;
pub mod types;

pub use types::{Proto, Pubkey};
