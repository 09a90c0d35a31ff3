//! Error types for the ledger facade.

use avl_core::AnchorId;
use thiserror::Error;

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The record could not be canonically encoded.
    #[error(transparent)]
    Encoding(#[from] avl_core::EncodingError),

    /// A core primitive rejected its input.
    #[error(transparent)]
    Core(#[from] avl_core::CoreError),

    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] avl_store::StoreError),

    /// The append lost the compare-and-append race on every retry.
    ///
    /// With the per-anchor serialization in [`Ledger`](crate::Ledger) this
    /// indicates another process writing to the same backend.
    #[error("chain conflict on anchor {anchor_id} after {retries} retries")]
    ChainConflict { anchor_id: AnchorId, retries: u32 },

    /// The draft carried a custom kind that is not registered.
    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    /// No checkpoint covers the requested record.
    #[error("record {record_id} of anchor {anchor_id} is not covered by any checkpoint")]
    NotCheckpointed {
        anchor_id: AnchorId,
        record_id: avl_core::RecordId,
    },

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
