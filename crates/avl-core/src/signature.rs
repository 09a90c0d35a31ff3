//! Signature verification capability.
//!
//! The ledger does not implement a signature algorithm. It delegates to a
//! pluggable [`SignatureVerifier`]: producers sign whatever they like with
//! whatever they like, and the verifier answers yes or no per record. An
//! Ed25519 keyring implementation is provided for the common case, along
//! with a [`Keypair`] signer used by checkpoint signing and tests.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use std::fmt;

use crate::error::CoreError;

/// Algorithm tag carried by Ed25519 record signatures.
pub const ED25519_ALGORITHM: &str = "ed25519";

/// Validates detached signatures for the chain verifier.
///
/// `key_ref` is an opaque reference the implementation resolves to key
/// material; unknown references simply fail verification.
pub trait SignatureVerifier: Send + Sync {
    /// Check `signature` over `message` for the key behind `key_ref`.
    fn verify(&self, message: &[u8], signature: &[u8], key_ref: &str) -> bool;
}

/// A verifier that accepts nothing. Useful when a deployment carries only
/// unsigned producers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllVerifier;

impl SignatureVerifier for RejectAllVerifier {
    fn verify(&self, _message: &[u8], _signature: &[u8], _key_ref: &str) -> bool {
        false
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| CoreError::InvalidSignature)?;
        let sig = Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

/// A keyring-backed Ed25519 verifier.
///
/// Key references are arbitrary strings registered by the operator
/// (typically producer names or key fingerprints).
#[derive(Debug, Default, Clone)]
pub struct Ed25519KeyringVerifier {
    keys: HashMap<String, Ed25519PublicKey>,
}

impl Ed25519KeyringVerifier {
    /// An empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a public key under a reference.
    pub fn register(&mut self, key_ref: impl Into<String>, key: Ed25519PublicKey) {
        self.keys.insert(key_ref.into(), key);
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl SignatureVerifier for Ed25519KeyringVerifier {
    fn verify(&self, message: &[u8], signature: &[u8], key_ref: &str) -> bool {
        match self.keys.get(key_ref) {
            Some(key) => key.verify(message, signature).is_ok(),
            None => false,
        }
    }
}

/// An Ed25519 keypair for signing records and checkpoints.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyring_verify() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let mut keyring = Ed25519KeyringVerifier::new();
        keyring.register("producer-a", keypair.public_key());

        let message = b"hello world";
        let sig = keypair.sign(message);

        assert!(keyring.verify(message, &sig, "producer-a"));
        assert!(!keyring.verify(b"tampered", &sig, "producer-a"));
        assert!(!keyring.verify(message, &sig, "unknown"));
    }

    #[test]
    fn test_reject_all() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"m");
        assert!(!RejectAllVerifier.verify(b"m", &sig, "any"));
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let kp1 = Keypair::from_seed(&[7; 32]);
        let kp2 = Keypair::from_seed(&[7; 32]);
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let keypair = Keypair::generate();
        let mut keyring = Ed25519KeyringVerifier::new();
        keyring.register("k", keypair.public_key());
        // Wrong length, not just wrong bytes.
        assert!(!keyring.verify(b"m", &[0u8; 10], "k"));
    }
}
