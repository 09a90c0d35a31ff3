//! End-to-end ledger scenarios across append, verify, checkpoint and
//! fallback.

use std::sync::Arc;

use avl::{
    AnchorId, BackendKind, Checkpoint, DraftRecord, Issue, Ledger, LedgerConfig, LedgerError,
    LedgerRecord, PayloadValue, RecordId, RecordKind,
};
use avl_core::{payload_map, Ed25519KeyringVerifier};
use avl_store::{
    AppendOutcome, BackendStats, MemoryBackend, RecordBackend, StoreError, TailInfo,
};
use avl_testkit::SignedProducer;

fn draft(anchor: &str, slot: &str, kind: RecordKind, reading: i64) -> DraftRecord {
    DraftRecord::new(
        anchor,
        slot,
        kind,
        1_736_870_400_000 + reading,
        payload_map([
            ("reading", PayloadValue::Int(reading)),
            ("confidence", PayloadValue::Int(90)),
        ]),
    )
}

#[tokio::test]
async fn tampered_record_breaks_chain_at_exact_position() {
    let backend = Arc::new(MemoryBackend::new());
    let ledger = Ledger::with_backend(
        LedgerConfig::in_memory(),
        backend.clone(),
        Arc::new(avl_core::RejectAllVerifier),
    )
    .unwrap();
    let anchor = AnchorId::from("vehicle-7");

    ledger
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    for i in 2..=4 {
        ledger
            .append(draft("vehicle-7", "planner", RecordKind::Update, i))
            .await
            .unwrap();
    }
    assert!(ledger.verify(&anchor).await.unwrap().valid);

    // Rewrite record 2's payload behind the ledger's back.
    assert!(backend.corrupt_record_payload(
        &anchor,
        RecordId(2),
        payload_map([("reading", PayloadValue::Int(999_999))]),
    ));

    let report = ledger.verify(&anchor).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at, Some(RecordId(2)));
    assert!(report
        .findings
        .iter()
        .any(|f| f.record_id == RecordId(2) && f.issue == Issue::HashMismatch));
    // Records after the break are still examined.
    assert_eq!(report.records_checked, 4);
    assert_eq!(report.trust.unwrap().continuity, 0.0);
}

#[tokio::test]
async fn concurrent_producers_never_fork_a_chain() {
    let ledger = Arc::new(Ledger::open(LedgerConfig::in_memory()).unwrap());
    let anchor = AnchorId::from("vehicle-7");

    let mut handles = Vec::new();
    for i in 0..24i64 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            let kind = if i == 0 {
                RecordKind::Create
            } else {
                RecordKind::Update
            };
            ledger.append(draft("vehicle-7", "planner", kind, i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let chain = ledger.fetch_chain(&anchor, None, None).await.unwrap();
    assert_eq!(chain.len(), 24);
    for (i, record) in chain.iter().enumerate() {
        assert_eq!(record.record_id, RecordId(i as u64 + 1));
    }
    // The chain is linear and intact despite the contention. The first
    // committed record may not carry Create, which is fine: kinds are
    // labels, not a state machine.
    let report = ledger.verify(&anchor).await.unwrap();
    assert!(report.broken_at.is_none());
    assert_eq!(ledger.metrics().appends(), 24);
    assert_eq!(ledger.metrics().conflicts(), 0);
}

#[tokio::test]
async fn signed_chain_scores_higher_than_unsigned() {
    let producer = SignedProducer::from_seed(5, "perception-key");
    let mut keyring = Ed25519KeyringVerifier::new();
    keyring.register("perception-key", producer.keypair.public_key());

    let ledger =
        Ledger::open_with_verifier(LedgerConfig::in_memory(), Arc::new(keyring)).unwrap();

    let unsigned = draft("unsigned-anchor", "perception", RecordKind::Create, 1);
    ledger.append(unsigned).await.unwrap();

    let mut signed_draft = draft("signed-anchor", "perception", RecordKind::Create, 1);
    let canonical = avl_core::canonical_record_bytes(
        &avl_core::HashInput::from_draft(&signed_draft, &avl_core::RecordHash::GENESIS),
        avl_core::DEFAULT_MAX_PAYLOAD_BYTES,
    )
    .unwrap();
    signed_draft = signed_draft.with_signature(avl_core::RecordSignature {
        bytes: producer.keypair.sign(&canonical),
        algorithm: avl_core::ED25519_ALGORITHM.to_string(),
        key_ref: "perception-key".to_string(),
    });
    ledger.append(signed_draft).await.unwrap();

    let unsigned_trust = ledger
        .verify(&AnchorId::from("unsigned-anchor"))
        .await
        .unwrap()
        .trust
        .unwrap();
    let signed_trust = ledger
        .verify(&AnchorId::from("signed-anchor"))
        .await
        .unwrap()
        .trust
        .unwrap();

    assert_eq!(unsigned_trust.signed_rate, 0.0);
    assert_eq!(unsigned_trust.verified_rate, 1.0);
    assert_eq!(signed_trust.signed_rate, 1.0);
    assert_eq!(signed_trust.verified_rate, 1.0);
    assert!(signed_trust.score > unsigned_trust.score);
}

#[tokio::test]
async fn checkpoints_and_proofs_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LedgerConfig::default();
    config.backend = BackendKind::Sqlite;
    config.database_path = dir.path().join("ledger.db");
    config.fallback_enabled = false;
    config.checkpoint.max_records = 4;
    let ledger = Ledger::open(config).unwrap();
    let anchor = AnchorId::from("vehicle-7");

    ledger
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    for i in 2..=10 {
        ledger
            .append(draft("vehicle-7", "planner", RecordKind::Update, i))
            .await
            .unwrap();
    }

    // 10 records, max_records 4: two sealed ranges, two pending records.
    let checkpoints = ledger.checkpoints(&anchor).await.unwrap();
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(checkpoints[0].start, RecordId(1));
    assert_eq!(checkpoints[0].end, RecordId(4));
    assert_eq!(checkpoints[1].start, RecordId(5));
    assert_eq!(checkpoints[1].end, RecordId(8));

    // A covered record proves against its checkpoint root.
    let (covering, proof) = ledger.prove_inclusion(&anchor, RecordId(6)).await.unwrap();
    assert_eq!(covering.checkpoint_id, checkpoints[1].checkpoint_id);
    let record = &ledger
        .fetch_chain(&anchor, Some(RecordId(6)), Some(RecordId(6)))
        .await
        .unwrap()[0];
    assert!(ledger.check_proof(&record.hash, &proof, &covering));

    // A different record's hash does not.
    let other = &ledger
        .fetch_chain(&anchor, Some(RecordId(7)), Some(RecordId(7)))
        .await
        .unwrap()[0];
    assert!(!ledger.check_proof(&other.hash, &proof, &covering));

    // Pending records have no proof yet.
    let err = ledger
        .prove_inclusion(&anchor, RecordId(9))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotCheckpointed { .. }));
}

#[tokio::test]
async fn verification_is_deterministic() {
    let ledger = Ledger::open(LedgerConfig::in_memory()).unwrap();
    let anchor = AnchorId::from("vehicle-7");
    ledger
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    ledger
        .append(draft("vehicle-7", "planner", RecordKind::Update, 2))
        .await
        .unwrap();

    let a = ledger.verify(&anchor).await.unwrap();
    let b = ledger.verify(&anchor).await.unwrap();
    assert_eq!(a.trust, b.trust);
    assert_eq!(a.findings, b.findings);
    assert_eq!(a.broken_at, b.broken_at);
}

/// A durable backend that rejects everything, standing in for a dead disk.
struct DeadBackend;

fn dead() -> StoreError {
    StoreError::Unavailable("injected fault".to_string())
}

#[async_trait::async_trait]
impl RecordBackend for DeadBackend {
    async fn append_record(
        &self,
        _record: &LedgerRecord,
        _expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome, StoreError> {
        Err(dead())
    }

    async fn tail(&self, _anchor_id: &AnchorId) -> Result<Option<TailInfo>, StoreError> {
        Err(dead())
    }

    async fn fetch_chain(
        &self,
        _anchor_id: &AnchorId,
        _from: Option<RecordId>,
        _to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        Err(dead())
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorId>, StoreError> {
        Err(dead())
    }

    async fn insert_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), StoreError> {
        Err(dead())
    }

    async fn checkpoints(&self, _anchor_id: &AnchorId) -> Result<Vec<Checkpoint>, StoreError> {
        Err(dead())
    }

    async fn latest_checkpoint(
        &self,
        _anchor_id: &AnchorId,
    ) -> Result<Option<Checkpoint>, StoreError> {
        Err(dead())
    }

    async fn stats(&self) -> Result<BackendStats, StoreError> {
        Err(dead())
    }
}

/// Stores records fine but cannot persist checkpoints.
struct CheckpointlessBackend {
    inner: MemoryBackend,
}

#[async_trait::async_trait]
impl RecordBackend for CheckpointlessBackend {
    async fn append_record(
        &self,
        record: &LedgerRecord,
        expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome, StoreError> {
        self.inner.append_record(record, expected_tail).await
    }

    async fn tail(&self, anchor_id: &AnchorId) -> Result<Option<TailInfo>, StoreError> {
        self.inner.tail(anchor_id).await
    }

    async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.inner.fetch_chain(anchor_id, from, to).await
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorId>, StoreError> {
        self.inner.list_anchors().await
    }

    async fn insert_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("checkpoint table gone".to_string()))
    }

    async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>, StoreError> {
        self.inner.checkpoints(anchor_id).await
    }

    async fn latest_checkpoint(
        &self,
        anchor_id: &AnchorId,
    ) -> Result<Option<Checkpoint>, StoreError> {
        self.inner.latest_checkpoint(anchor_id).await
    }

    async fn stats(&self) -> Result<BackendStats, StoreError> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn seal_failure_does_not_poison_committed_append() {
    let mut config = LedgerConfig::in_memory();
    config.checkpoint.max_records = 1;
    let ledger = Ledger::with_backend(
        config,
        Arc::new(CheckpointlessBackend {
            inner: MemoryBackend::new(),
        }),
        Arc::new(avl_core::RejectAllVerifier),
    )
    .unwrap();
    let anchor = AnchorId::from("vehicle-7");

    // The count trigger fires on every append and its seal always fails;
    // the append must still report the committed record.
    let record = ledger
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    assert_eq!(record.record_id, RecordId(1));

    let chain = ledger.fetch_chain(&anchor, None, None).await.unwrap();
    assert_eq!(chain.len(), 1);
    assert!(ledger.checkpoints(&anchor).await.unwrap().is_empty());
}

#[tokio::test]
async fn dead_durable_backend_degrades_but_keeps_accepting() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = LedgerConfig::in_memory();
    config.fallback_enabled = true;
    let ledger = Ledger::with_backend(
        config,
        Arc::new(DeadBackend),
        Arc::new(avl_core::RejectAllVerifier),
    )
    .unwrap();
    let anchor = AnchorId::from("vehicle-7");

    assert!(!ledger.is_degraded());

    // The first append trips the fallback and lands in the standby.
    let record = ledger
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    assert_eq!(record.record_id, RecordId(1));
    assert!(ledger.is_degraded());

    // Subsequent operations keep working from volatile storage.
    ledger
        .append(draft("vehicle-7", "planner", RecordKind::Update, 2))
        .await
        .unwrap();
    let report = ledger.verify(&anchor).await.unwrap();
    assert!(report.valid);

    let stats = ledger.stats().await.unwrap();
    assert!(stats.degraded);
    assert_eq!(stats.backend.record_count, 2);
    assert!(ledger.render_metrics().contains("avl_storage_degraded 1"));
}

#[tokio::test]
async fn external_writers_share_one_linear_chain() {
    // Two ledgers over one backend mimic two processes sharing a database
    // without sharing the per-anchor locks.
    let backend = Arc::new(MemoryBackend::new());
    let config = LedgerConfig::in_memory();
    let verifier = Arc::new(avl_core::RejectAllVerifier);
    let ledger_a =
        Ledger::with_backend(config.clone(), backend.clone(), verifier.clone()).unwrap();
    let ledger_b = Ledger::with_backend(config, backend.clone(), verifier).unwrap();
    let anchor = AnchorId::from("vehicle-7");

    ledger_a
        .append(draft("vehicle-7", "perception", RecordKind::Create, 1))
        .await
        .unwrap();
    ledger_b
        .append(draft("vehicle-7", "planner", RecordKind::Update, 2))
        .await
        .unwrap();

    // Interleaved writers retried through compare-and-append: the chain
    // stays linear.
    let chain = ledger_a.fetch_chain(&anchor, None, None).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].prev_hash, chain[0].hash);
    assert!(ledger_a.verify(&anchor).await.unwrap().valid);
}
