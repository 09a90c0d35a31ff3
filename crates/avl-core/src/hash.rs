//! Pluggable hashing capability.
//!
//! The ledger never names a hash function directly; everything digests
//! through the [`Hasher`] trait so the algorithm can be swapped without
//! touching the chain store, verifier, or checkpoint builder.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha3::Digest;

use crate::error::CoreError;
use crate::types::RecordHash;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    /// Blake3, 256-bit output. The default.
    Blake3,
    /// SHA3-256.
    Sha3_256,
}

impl HashAlgorithm {
    /// Stable textual name, used in configuration and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha3_256 => "sha3-256",
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Blake3
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha3-256" => Ok(HashAlgorithm::Sha3_256),
            other => Err(CoreError::UnknownHashAlgorithm(other.to_string())),
        }
    }
}

/// A fixed-width cryptographic digest over canonical bytes.
///
/// Implementations must be pure and deterministic: the same input always
/// produces the same output, and any single-bit input change changes it.
pub trait Hasher: Send + Sync {
    /// The algorithm this hasher implements.
    fn algorithm(&self) -> HashAlgorithm;

    /// Digest the given bytes.
    fn digest(&self, bytes: &[u8]) -> RecordHash;
}

/// Blake3-backed hasher (default).
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn digest(&self, bytes: &[u8]) -> RecordHash {
        RecordHash(*blake3::hash(bytes).as_bytes())
    }
}

/// SHA3-256-backed hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha3Hasher;

impl Hasher for Sha3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha3_256
    }

    fn digest(&self, bytes: &[u8]) -> RecordHash {
        let digest = sha3::Sha3_256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        RecordHash(out)
    }
}

/// Construct the hasher for a configured algorithm.
pub fn hasher_for(algorithm: HashAlgorithm) -> Arc<dyn Hasher> {
    match algorithm {
        HashAlgorithm::Blake3 => Arc::new(Blake3Hasher),
        HashAlgorithm::Sha3_256 => Arc::new(Sha3Hasher),
    }
}
