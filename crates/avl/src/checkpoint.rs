//! Checkpoint sealing and inclusion proofs.
//!
//! The builder seals contiguous, non-overlapping ranges: every new
//! checkpoint starts at the record after the previous checkpoint's end.
//! A range is sealed when it reaches the configured record count, or when
//! the periodic worker finds pending records older than the configured
//! interval, whichever comes first. Checkpoints are immutable once
//! written; late verification failures inside a sealed range are reported
//! by [`verify`](crate::verify), never patched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use avl_core::{
    merkle_proof, merkle_root, verify_proof, AnchorId, Checkpoint, Hasher, Keypair, MerkleProof,
    RecordId, RecordSignature, ED25519_ALGORITHM,
};
use avl_store::RecordBackend;

use crate::config::CheckpointPolicy;
use crate::error::{LedgerError, Result};
use crate::metrics::LedgerMetrics;

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Seals checkpoints and answers inclusion proofs for one backend.
pub struct CheckpointService {
    backend: Arc<dyn RecordBackend>,
    hasher: Arc<dyn Hasher>,
    policy: CheckpointPolicy,
    metrics: Arc<LedgerMetrics>,
    /// When set, every sealed checkpoint is signed with this key.
    signer: Option<(Keypair, String)>,
}

impl CheckpointService {
    pub fn new(
        backend: Arc<dyn RecordBackend>,
        hasher: Arc<dyn Hasher>,
        policy: CheckpointPolicy,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        Self {
            backend,
            hasher,
            policy,
            metrics,
            signer: None,
        }
    }

    /// Sign sealed checkpoints with the given key under `key_ref`.
    pub fn with_signer(mut self, keypair: Keypair, key_ref: impl Into<String>) -> Self {
        self.signer = Some((keypair, key_ref.into()));
        self
    }

    /// First record id not yet covered by a checkpoint.
    async fn next_start(&self, anchor_id: &AnchorId) -> Result<RecordId> {
        Ok(match self.backend.latest_checkpoint(anchor_id).await? {
            Some(cp) => cp.end.next(),
            None => RecordId::FIRST,
        })
    }

    /// Seal one checkpoint if the count bound is hit.
    ///
    /// Called after every append. Seals at most one full-sized range per
    /// call; a backlog drains across subsequent appends or worker ticks.
    pub async fn seal_on_count(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>> {
        let start = self.next_start(anchor_id).await?;
        let Some(tail) = self.backend.tail(anchor_id).await? else {
            return Ok(None);
        };
        let pending = tail.record_id.value().saturating_sub(start.value() - 1);
        if pending < self.policy.max_records {
            return Ok(None);
        }
        let end = RecordId(start.value() + self.policy.max_records - 1);
        self.seal(anchor_id, start, end).await.map(Some)
    }

    /// Seal pending records if the time bound is hit.
    ///
    /// The clock runs from the previous checkpoint's creation; with no
    /// previous checkpoint any pending record is considered overdue.
    pub async fn seal_on_elapsed(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>> {
        let last = self.backend.latest_checkpoint(anchor_id).await?;
        let start = match &last {
            Some(cp) => cp.end.next(),
            None => RecordId::FIRST,
        };
        let Some(tail) = self.backend.tail(anchor_id).await? else {
            return Ok(None);
        };
        if tail.record_id < start {
            return Ok(None);
        }
        if let Some(cp) = &last {
            if now_millis() - cp.created_at < self.policy.max_interval_ms as i64 {
                return Ok(None);
            }
        }
        // Cap at max_records so a long outage drains in bounded batches.
        let end = RecordId(
            tail.record_id
                .value()
                .min(start.value() + self.policy.max_records - 1),
        );
        self.seal(anchor_id, start, end).await.map(Some)
    }

    async fn seal(&self, anchor_id: &AnchorId, start: RecordId, end: RecordId) -> Result<Checkpoint> {
        let records = self
            .backend
            .fetch_chain(anchor_id, Some(start), Some(end))
            .await?;
        let leaves: Vec<_> = records.iter().map(|r| r.hash).collect();
        let root = merkle_root(self.hasher.as_ref(), &leaves)?;

        let mut checkpoint = Checkpoint::new(
            self.hasher.as_ref(),
            anchor_id.clone(),
            start,
            end,
            root,
            now_millis(),
        );
        if let Some((keypair, key_ref)) = &self.signer {
            checkpoint.signature = Some(RecordSignature {
                bytes: keypair.sign(&checkpoint.signable_message()),
                algorithm: ED25519_ALGORITHM.to_string(),
                key_ref: key_ref.clone(),
            });
        }

        self.backend.insert_checkpoint(&checkpoint).await?;
        self.metrics.record_checkpoint();
        debug!(
            anchor = %anchor_id,
            start = start.value(),
            end = end.value(),
            checkpoint = %checkpoint.checkpoint_id,
            "sealed checkpoint"
        );
        Ok(checkpoint)
    }

    /// Build an inclusion proof for one record against its covering
    /// checkpoint.
    pub async fn prove_inclusion(
        &self,
        anchor_id: &AnchorId,
        record_id: RecordId,
    ) -> Result<(Checkpoint, MerkleProof)> {
        let covering = self
            .backend
            .checkpoints(anchor_id)
            .await?
            .into_iter()
            .find(|cp| cp.covers(record_id))
            .ok_or_else(|| LedgerError::NotCheckpointed {
                anchor_id: anchor_id.clone(),
                record_id,
            })?;

        let records = self
            .backend
            .fetch_chain(anchor_id, Some(covering.start), Some(covering.end))
            .await?;
        let leaves: Vec<_> = records.iter().map(|r| r.hash).collect();
        let leaf_index = (record_id.value() - covering.start.value()) as usize;
        let proof = merkle_proof(self.hasher.as_ref(), &leaves, leaf_index)?;

        self.metrics.record_proof();
        Ok((covering, proof))
    }

    /// Check a previously issued proof against a checkpoint root.
    pub fn check_proof(
        &self,
        record_hash: &avl_core::RecordHash,
        proof: &MerkleProof,
        checkpoint: &Checkpoint,
    ) -> bool {
        verify_proof(
            self.hasher.as_ref(),
            record_hash,
            proof,
            &checkpoint.merkle_root,
        )
    }

    /// Spawn the periodic worker driving the time trigger.
    pub fn spawn_worker(self: &Arc<Self>, tick: Duration) -> CheckpointWorker {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = service.tick().await {
                            warn!(error = %e, "checkpoint worker tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        CheckpointWorker {
            handle,
            shutdown: shutdown_tx,
        }
    }

    async fn tick(&self) -> Result<()> {
        for anchor in self.backend.list_anchors().await? {
            // Drain any count backlog first, then the time trigger.
            while self.seal_on_count(&anchor).await?.is_some() {}
            self.seal_on_elapsed(&anchor).await?;
        }
        Ok(())
    }
}

/// Handle to the background checkpoint task.
pub struct CheckpointWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl CheckpointWorker {
    /// Signal the worker to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
