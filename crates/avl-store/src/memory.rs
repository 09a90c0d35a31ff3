//! In-memory backend.
//!
//! Volatile storage for tests and for the degraded-mode standby. Chains
//! live in a `HashMap` behind an `RwLock`; all data is lost on drop.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use avl_core::{AnchorId, Checkpoint, LedgerRecord, RecordHash, RecordId};

use crate::error::{Result, StoreError};
use crate::traits::{AppendOutcome, BackendStats, RecordBackend, TailInfo};

#[derive(Default)]
struct Inner {
    /// Per-anchor chains, each kept in ascending record-id order.
    chains: HashMap<AnchorId, Vec<LedgerRecord>>,
    /// Per-anchor checkpoints, ascending by range start.
    checkpoints: HashMap<AnchorId, Vec<Checkpoint>>,
}

/// Volatile in-memory implementation of [`RecordBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> StoreError {
        StoreError::Unavailable("memory backend lock poisoned".to_string())
    }

    /// Overwrite the stored hash of one record, in place.
    ///
    /// Test hook for exercising tamper detection; not part of
    /// [`RecordBackend`]. Returns false if the record does not exist.
    pub fn corrupt_record_hash(
        &self,
        anchor_id: &AnchorId,
        record_id: RecordId,
        hash: RecordHash,
    ) -> bool {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let Some(chain) = inner.chains.get_mut(anchor_id) else {
            return false;
        };
        match chain.iter_mut().find(|r| r.record_id == record_id) {
            Some(record) => {
                record.hash = hash;
                true
            }
            None => false,
        }
    }

    /// Overwrite the stored payload of one record, in place.
    ///
    /// Test hook: the hash is left untouched, so verification will flag
    /// the record as tampered.
    pub fn corrupt_record_payload(
        &self,
        anchor_id: &AnchorId,
        record_id: RecordId,
        payload: avl_core::PayloadValue,
    ) -> bool {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let Some(chain) = inner.chains.get_mut(anchor_id) else {
            return false;
        };
        match chain.iter_mut().find(|r| r.record_id == record_id) {
            Some(record) => {
                record.payload = payload;
                true
            }
            None => false,
        }
    }
}

fn tail_of(chain: &[LedgerRecord]) -> Option<TailInfo> {
    chain.last().map(|r| TailInfo {
        record_id: r.record_id,
        hash: r.hash,
    })
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn append_record(
        &self,
        record: &LedgerRecord,
        expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        let chain = inner.chains.entry(record.anchor_id.clone()).or_default();
        let actual = tail_of(chain);
        if actual != expected_tail.copied() {
            return Ok(AppendOutcome::TailMismatch { actual });
        }
        chain.push(record.clone());
        Ok(AppendOutcome::Committed)
    }

    async fn tail(&self, anchor_id: &AnchorId) -> Result<Option<TailInfo>> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner.chains.get(anchor_id).and_then(|c| tail_of(c)))
    }

    async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        let Some(chain) = inner.chains.get(anchor_id) else {
            return Ok(Vec::new());
        };
        Ok(chain
            .iter()
            .filter(|r| {
                from.map_or(true, |f| r.record_id >= f) && to.map_or(true, |t| r.record_id <= t)
            })
            .cloned()
            .collect())
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorId>> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        let mut anchors: Vec<AnchorId> = inner
            .chains
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(anchor, _)| anchor.clone())
            .collect();
        anchors.sort();
        Ok(anchors)
    }

    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        let list = inner
            .checkpoints
            .entry(checkpoint.anchor_id.clone())
            .or_default();
        // Same uniqueness as the durable schema: one checkpoint per range
        // start, so two racing sealers cannot store overlapping ranges.
        if list.iter().any(|cp| cp.start == checkpoint.start) {
            return Err(StoreError::Constraint(format!(
                "checkpoint for {} already starts at {}",
                checkpoint.anchor_id,
                checkpoint.start.value()
            )));
        }
        list.push(checkpoint.clone());
        list.sort_by_key(|cp| cp.start);
        Ok(())
    }

    async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner.checkpoints.get(anchor_id).cloned().unwrap_or_default())
    }

    async fn latest_checkpoint(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner
            .checkpoints
            .get(anchor_id)
            .and_then(|list| list.last().cloned()))
    }

    async fn stats(&self) -> Result<BackendStats> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        let record_count = inner.chains.values().map(|c| c.len() as u64).sum();
        let anchor_count = inner.chains.values().filter(|c| !c.is_empty()).count() as u64;
        let checkpoint_count = inner.checkpoints.values().map(|c| c.len() as u64).sum();
        Ok(BackendStats {
            record_count,
            anchor_count,
            checkpoint_count,
        })
    }
}
