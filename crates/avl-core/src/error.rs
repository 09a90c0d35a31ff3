//! Error types for the core crate.

use thiserror::Error;

/// Errors raised while canonically encoding a record.
///
/// Every variant is raised before any hash or store operation, so a record
/// that fails encoding is never partially persisted.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unsupported number (only 64-bit integers are allowed): {0}")]
    UnsupportedNumber(String),

    #[error("payload exceeds size cap: {size} bytes > {cap} bytes")]
    PayloadTooLarge { size: usize, cap: usize },

    #[error("invalid anchor id: {0:?}")]
    InvalidAnchorId(String),

    #[error("malformed value: {0}")]
    Malformed(String),
}

/// Core errors outside the encoding path.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    #[error("record id {0} is outside the checkpoint range {1}..={2}")]
    OutsideCheckpointRange(u64, u64, u64),

    #[error("empty batch: a checkpoint must cover at least one record")]
    EmptyBatch,

    #[error("trust weights must sum to 1.0, got {0}")]
    InvalidTrustWeights(f64),
}
