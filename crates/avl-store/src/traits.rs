//! Backend trait: the abstract interface for record persistence.
//!
//! The ledger is storage-agnostic. Implementations include SQLite
//! (durable) and in-memory (volatile / fallback standby).

use async_trait::async_trait;
use avl_core::{AnchorId, Checkpoint, LedgerRecord, RecordHash, RecordId};

use crate::error::Result;

/// Position and hash of the newest record in one anchor's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailInfo {
    /// Record id of the tail.
    pub record_id: RecordId,
    /// Hash of the tail.
    pub hash: RecordHash,
}

/// Result of a compare-and-append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was persisted and is now the anchor's tail.
    Committed,
    /// The chain advanced since the caller read the tail. Nothing was
    /// written; the caller should refresh and retry.
    TailMismatch {
        /// The tail actually present at append time.
        actual: Option<TailInfo>,
    },
}

/// Aggregate counts for the stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Total records across all anchors.
    pub record_count: u64,
    /// Number of anchors with at least one record.
    pub anchor_count: u64,
    /// Total checkpoints across all anchors.
    pub checkpoint_count: u64,
}

/// Async interface for record persistence.
///
/// # Design Notes
///
/// - **Compare-and-append**: `append_record` commits only if the anchor's
///   tail still equals `expected_tail` (None = chain must be empty). The
///   check and the insert happen atomically inside the backend, so two
///   racing writers for one anchor can never fork the chain even if the
///   caller's per-anchor lock is bypassed.
/// - **Atomicity**: an append is fully persisted and linked, or not
///   persisted at all. Readers never observe a half-written record.
/// - **No mutation**: there is no update or delete. Checkpoints are
///   insert-only as well.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Compare-and-append one committed record.
    async fn append_record(
        &self,
        record: &LedgerRecord,
        expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome>;

    /// Current tail of an anchor's chain, if any.
    async fn tail(&self, anchor_id: &AnchorId) -> Result<Option<TailInfo>>;

    /// Fetch an ascending slice of an anchor's chain.
    ///
    /// `from`/`to` are inclusive record-id bounds; `None` means unbounded.
    async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>>;

    /// All anchors with at least one record.
    async fn list_anchors(&self) -> Result<Vec<AnchorId>>;

    /// Persist a checkpoint.
    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// All checkpoints for an anchor, ascending by range start.
    async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>>;

    /// The checkpoint with the highest covered range for an anchor.
    async fn latest_checkpoint(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>>;

    /// Aggregate counts.
    async fn stats(&self) -> Result<BackendStats>;
}
