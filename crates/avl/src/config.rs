//! Ledger configuration.
//!
//! Deserializable from JSON with serde defaults on every field, so a
//! deployment only states what it overrides. `validate` runs once at
//! ledger construction; nothing here is re-checked on the hot path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use avl_core::{HashAlgorithm, TrustWeights, DEFAULT_MAX_PAYLOAD_BYTES};

use crate::error::{LedgerError, Result};

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Durable SQLite database. The default.
    Sqlite,
    /// Volatile in-memory storage.
    Memory,
}

/// When the checkpoint builder seals a new batch.
///
/// A checkpoint is built when either bound is hit, whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPolicy {
    /// Seal once this many records are pending.
    pub max_records: u64,
    /// Seal pending records after this long, even if under `max_records`.
    pub max_interval_ms: u64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            max_records: 64,
            max_interval_ms: 60_000,
        }
    }
}

/// Top-level ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Storage backend.
    pub backend: BackendKind,
    /// Database file for the SQLite backend.
    pub database_path: PathBuf,
    /// Read connections kept open by the SQLite backend. Writes always go
    /// through a single dedicated connection.
    pub pool_size: u32,
    /// Wrap the durable backend with the volatile-standby fallback.
    pub fallback_enabled: bool,
    /// Bound on a single durable operation before degradation, in ms.
    pub op_timeout_ms: u64,
    /// Digest algorithm for record hashes and Merkle trees.
    pub hash_algorithm: HashAlgorithm,
    /// Cap on the canonically encoded payload size, in bytes.
    pub max_payload_bytes: usize,
    /// Compare-and-append retries before reporting a chain conflict.
    pub max_append_retries: u32,
    /// Weights for the trust score sub-metrics.
    pub trust_weights: TrustWeights,
    /// Checkpoint sealing bounds.
    pub checkpoint: CheckpointPolicy,
    /// Custom record kinds accepted beyond the core set.
    pub custom_kinds: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            database_path: PathBuf::from("ledger.db"),
            pool_size: 4,
            fallback_enabled: true,
            op_timeout_ms: 2_000,
            hash_algorithm: HashAlgorithm::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_append_retries: 3,
            trust_weights: TrustWeights::default(),
            checkpoint: CheckpointPolicy::default(),
            custom_kinds: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// A volatile configuration for tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            fallback_enabled: false,
            ..Self::default()
        }
    }

    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check bounds and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        self.trust_weights
            .validate()
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        if self.pool_size == 0 {
            return Err(LedgerError::InvalidConfig(
                "pool_size must be positive".to_string(),
            ));
        }
        if self.op_timeout_ms == 0 {
            return Err(LedgerError::InvalidConfig(
                "op_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(LedgerError::InvalidConfig(
                "max_payload_bytes must be positive".to_string(),
            ));
        }
        if self.max_append_retries == 0 {
            return Err(LedgerError::InvalidConfig(
                "max_append_retries must be positive".to_string(),
            ));
        }
        if self.checkpoint.max_records == 0 {
            return Err(LedgerError::InvalidConfig(
                "checkpoint.max_records must be positive".to_string(),
            ));
        }
        if self.checkpoint.max_interval_ms == 0 {
            return Err(LedgerError::InvalidConfig(
                "checkpoint.max_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
