//! Identity key derivation for tunnel services.
//!
//! One shared secret yields a root Ed25519 keypair; each forwarded service
//! gets its own child keypair under a `proto ++ port` label. Children are
//! derived additively on the Edwards curve, so the *public* half of any child
//! is computable from the root public key alone. A server that knows the
//! secret and a client that only knows the displayed root key therefore agree
//! on every service key without a handshake, and third parties cannot relate
//! sibling service keys without the label.

use crate::types::Pubkey;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::hazmat::{raw_sign, ExpandedSecretKey};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Domain separator for the child-key tweak.
const TWEAK_CONTEXT: &[u8] = b"burrow/subkey/tweak/v1";
/// Domain separator for the child signing nonce prefix.
const PREFIX_CONTEXT: &[u8] = b"burrow/subkey/nonce/v1";

/// Errors from key derivation.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The root public key bytes do not encode a valid curve point.
    #[error("invalid public key point")]
    InvalidPublicKey,
}

/// Root identity keypair, derived deterministically from a shared secret.
#[derive(Clone)]
pub struct RootKeyPair {
    signing: SigningKey,
}

impl RootKeyPair {
    /// Derives the root keypair from a secret: the Ed25519 seed is
    /// `SHA-256(secret)`, so identical secrets always yield the identical
    /// displayed identity.
    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        let seed: [u8; 32] = Sha256::digest(secret).into();
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// The root public key, as advertised to clients.
    #[must_use]
    pub fn public(&self) -> Pubkey {
        self.signing.verifying_key().to_bytes()
    }

    /// Derives the full child keypair for a service label.
    ///
    /// The child scalar is `root_scalar + tweak(root_pub, label)`; its public
    /// key matches what [`derive_sub_public`] computes from the root public
    /// key alone.
    #[must_use]
    pub fn derive(&self, label: &str) -> SubKeyPair {
        let root_public = self.public();
        let tweak = tweak_scalar(&root_public, label);
        let root_scalar = Scalar::from_bytes_mod_order(self.signing.to_scalar_bytes());
        let scalar = root_scalar + tweak;
        let public = EdwardsPoint::mul_base(&scalar).compress().to_bytes();
        let verifying = VerifyingKey::from_bytes(&public)
            .expect("freshly compressed point is a valid verifying key");

        // The signing nonce prefix is derived from private material only, as
        // required for deterministic Ed25519 nonces.
        let mut hasher = Sha512::new();
        hasher.update(PREFIX_CONTEXT);
        hasher.update(self.signing.to_scalar_bytes());
        hasher.update(label.as_bytes());
        let wide: [u8; 64] = hasher.finalize().into();
        let mut prefix = [0u8; 32];
        prefix.copy_from_slice(&wide[32..]);

        SubKeyPair {
            verifying,
            scalar,
            prefix,
        }
    }
}

/// Derives a child *public* key from the root public key alone.
///
/// # Errors
///
/// Returns [`KeyError::InvalidPublicKey`] if `root` does not decode to a
/// curve point.
pub fn derive_sub_public(root: &Pubkey, label: &str) -> Result<Pubkey, KeyError> {
    let point = CompressedEdwardsY(*root)
        .decompress()
        .ok_or(KeyError::InvalidPublicKey)?;
    let tweak = tweak_scalar(root, label);
    let child = point + EdwardsPoint::mul_base(&tweak);
    Ok(child.compress().to_bytes())
}

fn tweak_scalar(root_public: &Pubkey, label: &str) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(TWEAK_CONTEXT);
    hasher.update(root_public);
    hasher.update(label.as_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Child keypair for one forwarded service.
///
/// Children sign with the raw expanded scalar; the resulting signatures
/// verify under the standard Ed25519 verifier for the child public key.
#[derive(Clone)]
pub struct SubKeyPair {
    verifying: VerifyingKey,
    scalar: Scalar,
    prefix: [u8; 32],
}

impl SubKeyPair {
    /// The child public key this service is addressed by.
    #[must_use]
    pub fn public(&self) -> Pubkey {
        self.verifying.to_bytes()
    }

    /// Signs a message with the child key, e.g. an overlay announce.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let expanded = ExpandedSecretKey {
            scalar: self.scalar,
            hash_prefix: self.prefix,
        };
        raw_sign::<Sha512>(&expanded, message, &self.verifying).to_bytes()
    }
}

/// Verifies an Ed25519 signature against a 32-byte public key.
#[must_use]
pub fn verify(public: &Pubkey, message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying.verify_strict(message, &signature).is_ok()
}
