//! Base58 encoding and decoding for tunnel identity keys.
//!
//! Wraps the `bs58` crate with convenience functions for the public keys a
//! server advertises and a client dials.

use crate::types::Pubkey;
use thiserror::Error;

pub use bs58::decode::Error as DecodeError;

/// Errors that can occur when decoding a Base58-encoded public key.
#[derive(Debug, Error)]
pub enum PubkeyDecodeError {
    /// The input is not valid Base58.
    #[error("invalid base58: {0}")]
    Base58(#[from] DecodeError),
    /// The decoded bytes are not exactly 32 bytes.
    #[error("public key must be exactly 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Encodes raw bytes to a Base58 string.
///
/// # Examples
///
/// ```
/// let encoded = burrow_common::base58::encode(&[1, 2, 3]);
/// assert!(!encoded.is_empty());
/// ```
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decodes a Base58 string to raw bytes.
///
/// # Errors
///
/// Returns `DecodeError` if the input is not valid Base58.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    bs58::decode(s).into_vec()
}

/// Decodes a Base58 string to a 32-byte identity key.
///
/// # Errors
///
/// Returns [`PubkeyDecodeError`] if the input is not valid Base58 or does not
/// decode to exactly 32 bytes.
///
/// # Examples
///
/// ```
/// let pubkey = [0x42u8; 32];
/// let encoded = burrow_common::base58::encode(&pubkey);
/// let decoded = burrow_common::base58::decode_pubkey(&encoded).unwrap();
/// assert_eq!(decoded, pubkey);
/// ```
pub fn decode_pubkey(s: &str) -> Result<Pubkey, PubkeyDecodeError> {
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_: Vec<u8>| PubkeyDecodeError::WrongLength(len))
}

/// Serde adapter serializing [`Pubkey`] fields as Base58 strings.
pub mod pubkey_serde {
    use super::{decode_pubkey, encode};
    use crate::types::Pubkey;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a public key as its Base58 string form.
    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(key))
    }

    /// Deserializes a public key from its Base58 string form.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_pubkey(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let data = [0xABu8; 32];
        let encoded = encode(&data);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_pubkey_round_trip() {
        let pubkey = [0x42u8; 32];
        let encoded = encode(&pubkey);
        let decoded = decode_pubkey(&encoded).unwrap();
        assert_eq!(decoded, pubkey);
    }

    #[test]
    fn decode_pubkey_wrong_length() {
        let short = encode(&[1u8; 16]);
        let err = decode_pubkey(&short).unwrap_err();
        assert!(matches!(err, PubkeyDecodeError::WrongLength(16)));
    }

    #[test]
    fn decode_pubkey_rejects_invalid_base58() {
        let err = decode_pubkey("not base58 0OIl").unwrap_err();
        assert!(matches!(err, PubkeyDecodeError::Base58(_)));
    }
}
