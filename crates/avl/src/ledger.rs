//! The ledger facade: append, fetch, verify, checkpoint, stats.
//!
//! Appends for one anchor are serialized through a per-anchor async
//! mutex, so concurrent producers queue instead of conflicting. The
//! backend's compare-and-append is kept as a second line of defense: if
//! another process writes the same database, the stale writer retries and
//! eventually surfaces a chain conflict instead of forking the chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use avl_core::{
    compute_record_hash, hasher_for, AnchorId, Checkpoint, DraftRecord, HashInput, Hasher,
    KindRegistry, LedgerRecord, MerkleProof, RecordHash, RecordId, RejectAllVerifier,
    SignatureVerifier, RECORD_VERSION,
};
use avl_store::{
    AppendOutcome, BackendStats, FallbackBackend, MemoryBackend, RecordBackend, SqliteBackend,
};

use crate::checkpoint::{CheckpointService, CheckpointWorker};
use crate::config::{BackendKind, LedgerConfig};
use crate::error::{LedgerError, Result};
use crate::metrics::LedgerMetrics;
use crate::verify::{verify_chain, VerifyReport};

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Aggregate ledger state for operators.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    /// Backend record, anchor and checkpoint counts.
    pub backend: BackendStats,
    /// Whether the store is serving from the volatile standby.
    pub degraded: bool,
    /// Last verification time per anchor (Unix milliseconds), for anchors
    /// verified during this process lifetime.
    pub last_verified: BTreeMap<AnchorId, i64>,
}

/// The Autonomous Verification Ledger.
pub struct Ledger {
    backend: Arc<dyn RecordBackend>,
    /// Kept separately from `backend` so degradation is observable.
    fallback: Option<Arc<FallbackBackend>>,
    hasher: Arc<dyn Hasher>,
    verifier: Arc<dyn SignatureVerifier>,
    kinds: KindRegistry,
    config: LedgerConfig,
    checkpoints: Arc<CheckpointService>,
    metrics: Arc<LedgerMetrics>,
    /// Per-anchor append serialization.
    anchor_locks: Mutex<HashMap<AnchorId, Arc<Mutex<()>>>>,
    /// Last verification time per anchor.
    last_verified: Mutex<BTreeMap<AnchorId, i64>>,
}

impl Ledger {
    /// Open a ledger per its configuration, with no signature keys.
    pub fn open(config: LedgerConfig) -> Result<Self> {
        Self::open_with_verifier(config, Arc::new(RejectAllVerifier))
    }

    /// Open a ledger with a pluggable signature verifier.
    pub fn open_with_verifier(
        config: LedgerConfig,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self> {
        config.validate()?;

        let durable: Arc<dyn RecordBackend> = match config.backend {
            BackendKind::Sqlite => Arc::new(SqliteBackend::open_with_pool(
                &config.database_path,
                config.pool_size,
            )?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Self::assemble(config, durable, verifier)
    }

    /// Build on an externally constructed backend. Used by tests that need
    /// direct backend access (fault injection, tampering).
    pub fn with_backend(
        config: LedgerConfig,
        backend: Arc<dyn RecordBackend>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, backend, verifier)
    }

    fn assemble(
        config: LedgerConfig,
        durable: Arc<dyn RecordBackend>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self> {
        let (backend, fallback): (Arc<dyn RecordBackend>, Option<Arc<FallbackBackend>>) =
            if config.fallback_enabled {
                let wrapped = Arc::new(FallbackBackend::new(
                    durable,
                    Duration::from_millis(config.op_timeout_ms),
                ));
                (wrapped.clone(), Some(wrapped))
            } else {
                (durable, None)
            };

        let hasher = hasher_for(config.hash_algorithm);
        let metrics = Arc::new(LedgerMetrics::new());
        let checkpoints = Arc::new(CheckpointService::new(
            Arc::clone(&backend),
            Arc::clone(&hasher),
            config.checkpoint,
            Arc::clone(&metrics),
        ));
        let kinds = KindRegistry::with_custom(config.custom_kinds.iter().cloned());

        info!(
            backend = ?config.backend,
            hash = %config.hash_algorithm,
            fallback = config.fallback_enabled,
            "ledger opened"
        );

        Ok(Self {
            backend,
            fallback,
            hasher,
            verifier,
            kinds,
            config,
            checkpoints,
            metrics,
            anchor_locks: Mutex::new(HashMap::new()),
            last_verified: Mutex::new(BTreeMap::new()),
        })
    }

    /// The operational counters.
    pub fn metrics(&self) -> &Arc<LedgerMetrics> {
        &self.metrics
    }

    /// Render metrics in Prometheus text format.
    pub fn render_metrics(&self) -> String {
        self.metrics.render(self.is_degraded())
    }

    /// Whether the store has degraded to the volatile standby.
    pub fn is_degraded(&self) -> bool {
        self.fallback.as_ref().is_some_and(|f| f.is_degraded())
    }

    /// Spawn the background checkpoint worker.
    pub fn spawn_checkpoint_worker(&self, tick: Duration) -> CheckpointWorker {
        self.checkpoints.spawn_worker(tick)
    }

    async fn anchor_lock(&self, anchor_id: &AnchorId) -> Arc<Mutex<()>> {
        let mut locks = self.anchor_locks.lock().await;
        Arc::clone(locks.entry(anchor_id.clone()).or_default())
    }

    /// Append a draft record to its anchor's chain.
    ///
    /// Validates the draft, links it to the current tail, hashes it over
    /// the canonical encoding and commits it. Returns the committed record
    /// with its assigned id and hashes.
    pub async fn append(&self, draft: DraftRecord) -> Result<LedgerRecord> {
        if !draft.anchor_id.is_valid() {
            self.metrics.record_rejected();
            return Err(avl_core::EncodingError::InvalidAnchorId(
                draft.anchor_id.as_str().to_string(),
            )
            .into());
        }
        if !self.kinds.is_allowed(&draft.kind) {
            self.metrics.record_rejected();
            return Err(LedgerError::UnknownKind(draft.kind.as_str().to_string()));
        }

        let lock = self.anchor_lock(&draft.anchor_id).await;
        let _guard = lock.lock().await;

        for attempt in 0..self.config.max_append_retries {
            if attempt > 0 {
                self.metrics.record_retry();
            }

            let tail = match self.backend.tail(&draft.anchor_id).await {
                Ok(tail) => tail,
                Err(e) => {
                    self.metrics.record_backend_error();
                    return Err(e.into());
                }
            };
            let (record_id, prev_hash) = match &tail {
                Some(t) => (t.record_id.next(), t.hash),
                None => (RecordId::FIRST, RecordHash::GENESIS),
            };

            let hash = match compute_record_hash(
                self.hasher.as_ref(),
                &HashInput::from_draft(&draft, &prev_hash),
                self.config.max_payload_bytes,
            ) {
                Ok(hash) => hash,
                Err(e) => {
                    self.metrics.record_rejected();
                    return Err(e.into());
                }
            };

            let record = LedgerRecord {
                version: RECORD_VERSION,
                record_id,
                anchor_id: draft.anchor_id.clone(),
                slot: draft.slot.clone(),
                kind: draft.kind.clone(),
                timestamp: draft.timestamp,
                prev_hash,
                hash,
                payload: draft.payload.clone(),
                signature: draft.signature.clone(),
            };

            let outcome = match self.backend.append_record(&record, tail.as_ref()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.metrics.record_backend_error();
                    return Err(e.into());
                }
            };
            match outcome {
                AppendOutcome::Committed => {
                    self.metrics.record_append(
                        record.anchor_id.as_str(),
                        record.kind.as_str(),
                        record.record_id.value(),
                    );
                    debug!(
                        anchor = %record.anchor_id,
                        record = record.record_id.value(),
                        hash = %record.hash,
                        "record committed"
                    );
                    // Count trigger runs inline; the time trigger belongs
                    // to the background worker. The record is already
                    // committed, so a seal failure is logged and left for
                    // the worker's backlog drain, never returned to the
                    // caller.
                    if let Err(e) = self.checkpoints.seal_on_count(&record.anchor_id).await {
                        warn!(
                            anchor = %record.anchor_id,
                            error = %e,
                            "inline checkpoint seal failed after commit"
                        );
                    }
                    return Ok(record);
                }
                AppendOutcome::TailMismatch { .. } => continue,
            }
        }

        self.metrics.record_conflict();
        Err(LedgerError::ChainConflict {
            anchor_id: draft.anchor_id,
            retries: self.config.max_append_retries,
        })
    }

    /// Fetch an ascending slice of an anchor's chain.
    pub async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>> {
        Ok(self.backend.fetch_chain(anchor_id, from, to).await?)
    }

    /// All anchors with at least one record.
    pub async fn list_anchors(&self) -> Result<Vec<AnchorId>> {
        Ok(self.backend.list_anchors().await?)
    }

    /// Verify an anchor's full chain and compute its trust score.
    pub async fn verify(&self, anchor_id: &AnchorId) -> Result<VerifyReport> {
        let records = self.backend.fetch_chain(anchor_id, None, None).await?;
        let verified_at = now_millis();
        let report = verify_chain(
            anchor_id,
            &records,
            self.hasher.as_ref(),
            self.verifier.as_ref(),
            &self.config.trust_weights,
            self.config.max_payload_bytes,
            verified_at,
        );
        self.metrics.record_verification(
            anchor_id.as_str(),
            report.valid,
            report.records_checked,
            report.trust.as_ref().map(|t| t.score),
            verified_at,
        );
        self.last_verified
            .lock()
            .await
            .insert(anchor_id.clone(), verified_at);
        Ok(report)
    }

    /// All checkpoints sealed for an anchor.
    pub async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>> {
        Ok(self.backend.checkpoints(anchor_id).await?)
    }

    /// Build an inclusion proof for one record.
    pub async fn prove_inclusion(
        &self,
        anchor_id: &AnchorId,
        record_id: RecordId,
    ) -> Result<(Checkpoint, MerkleProof)> {
        self.checkpoints.prove_inclusion(anchor_id, record_id).await
    }

    /// Check a previously issued inclusion proof.
    pub fn check_proof(
        &self,
        record_hash: &RecordHash,
        proof: &MerkleProof,
        checkpoint: &Checkpoint,
    ) -> bool {
        self.checkpoints.check_proof(record_hash, proof, checkpoint)
    }

    /// Aggregate counts, degradation state and verification freshness.
    pub async fn stats(&self) -> Result<LedgerStats> {
        let backend = self.backend.stats().await?;
        let last_verified = self.last_verified.lock().await.clone();
        Ok(LedgerStats {
            backend,
            degraded: self.is_degraded(),
            last_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avl_core::{payload_map, PayloadValue, RecordKind};

    fn draft(anchor: &str, kind: RecordKind, reading: i64) -> DraftRecord {
        DraftRecord::new(
            anchor,
            "sensor-a",
            kind,
            1_736_870_400_000 + reading,
            payload_map([("reading", PayloadValue::Int(reading))]),
        )
    }

    fn memory_ledger() -> Ledger {
        Ledger::open(LedgerConfig::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_append_links_chain() {
        let ledger = memory_ledger();
        let anchor = AnchorId::from("a1");

        let r1 = ledger.append(draft("a1", RecordKind::Create, 1)).await.unwrap();
        let r2 = ledger.append(draft("a1", RecordKind::Update, 2)).await.unwrap();

        assert_eq!(r1.record_id, RecordId(1));
        assert_eq!(r1.prev_hash, RecordHash::GENESIS);
        assert_eq!(r2.record_id, RecordId(2));
        assert_eq!(r2.prev_hash, r1.hash);

        let chain = ledger.fetch_chain(&anchor, None, None).await.unwrap();
        assert_eq!(chain, vec![r1, r2]);
    }

    #[tokio::test]
    async fn test_unknown_custom_kind_rejected() {
        let ledger = memory_ledger();
        let err = ledger
            .append(draft("a1", RecordKind::Custom("REGIME_SHIFT".into()), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKind(_)));
    }

    #[tokio::test]
    async fn test_registered_custom_kind_accepted() {
        let mut config = LedgerConfig::in_memory();
        config.custom_kinds = vec!["REGIME_SHIFT".to_string()];
        let ledger = Ledger::open(config).unwrap();

        ledger.append(draft("a1", RecordKind::Create, 1)).await.unwrap();
        let record = ledger
            .append(draft("a1", RecordKind::Custom("REGIME_SHIFT".into()), 2))
            .await
            .unwrap();
        assert_eq!(record.kind, RecordKind::Custom("REGIME_SHIFT".into()));
    }

    #[tokio::test]
    async fn test_invalid_anchor_rejected() {
        let ledger = memory_ledger();
        let err = ledger
            .append(draft("", RecordKind::Create, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Encoding(_)));
        assert_eq!(ledger.metrics().appends(), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let mut config = LedgerConfig::in_memory();
        config.max_payload_bytes = 16;
        let ledger = Ledger::open(config).unwrap();

        let big = DraftRecord::new(
            "a1",
            "sensor-a",
            RecordKind::Create,
            0,
            PayloadValue::Text("x".repeat(64)),
        );
        let err = ledger.append(big).await.unwrap_err();
        assert!(matches!(err, LedgerError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_anchors_isolated() {
        let ledger = memory_ledger();
        let r1 = ledger.append(draft("a1", RecordKind::Create, 1)).await.unwrap();
        let r2 = ledger.append(draft("a2", RecordKind::Create, 1)).await.unwrap();

        // Both chains start at genesis.
        assert_eq!(r1.record_id, RecordId(1));
        assert_eq!(r2.record_id, RecordId(1));
        assert_eq!(ledger.list_anchors().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_verify_and_stats() {
        let ledger = memory_ledger();
        let anchor = AnchorId::from("a1");
        ledger.append(draft("a1", RecordKind::Create, 1)).await.unwrap();
        ledger.append(draft("a1", RecordKind::Update, 2)).await.unwrap();

        let report = ledger.verify(&anchor).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.records_checked, 2);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.backend.record_count, 2);
        assert!(!stats.degraded);
        assert!(stats.last_verified.contains_key(&anchor));
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialize() {
        let ledger = Arc::new(memory_ledger());
        let anchor = AnchorId::from("a1");

        ledger.append(draft("a1", RecordKind::Create, 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=16i64 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.append(draft("a1", RecordKind::Update, i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let chain = ledger.fetch_chain(&anchor, None, None).await.unwrap();
        assert_eq!(chain.len(), 17);
        for (i, record) in chain.iter().enumerate() {
            assert_eq!(record.record_id, RecordId(i as u64 + 1));
            if i > 0 {
                assert_eq!(record.prev_hash, chain[i - 1].hash);
            }
        }

        let report = ledger.verify(&anchor).await.unwrap();
        assert!(report.valid);
    }

    #[tokio::test]
    async fn test_count_checkpoint_sealed_inline() {
        let mut config = LedgerConfig::in_memory();
        config.checkpoint.max_records = 3;
        let ledger = Ledger::open(config).unwrap();
        let anchor = AnchorId::from("a1");

        ledger.append(draft("a1", RecordKind::Create, 1)).await.unwrap();
        ledger.append(draft("a1", RecordKind::Update, 2)).await.unwrap();
        assert!(ledger.checkpoints(&anchor).await.unwrap().is_empty());

        ledger.append(draft("a1", RecordKind::Update, 3)).await.unwrap();
        let checkpoints = ledger.checkpoints(&anchor).await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].end, RecordId(3));

        let (cp, proof) = ledger.prove_inclusion(&anchor, RecordId(2)).await.unwrap();
        let record = &ledger
            .fetch_chain(&anchor, Some(RecordId(2)), Some(RecordId(2)))
            .await
            .unwrap()[0];
        assert!(ledger.check_proof(&record.hash, &proof, &cp));
    }
}
