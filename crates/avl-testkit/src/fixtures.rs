//! Deterministic chain fixtures.
//!
//! Builds committed records outside the ledger facade so tests can
//! construct exact chains, including deliberately broken ones, and load
//! them straight into a backend.

use avl_core::{
    canonical_record_bytes, AnchorId, DraftRecord, HashInput, Hasher, Keypair, LedgerRecord,
    PayloadValue, RecordHash, RecordId, RecordKind, RecordSignature, DEFAULT_MAX_PAYLOAD_BYTES,
    ED25519_ALGORITHM, RECORD_VERSION,
};
use avl_store::RecordBackend;

/// A producer identity that signs the records it emits.
pub struct SignedProducer {
    pub keypair: Keypair,
    pub key_ref: String,
}

impl SignedProducer {
    /// Deterministic producer derived from a seed.
    pub fn from_seed(seed: u8, key_ref: impl Into<String>) -> Self {
        Self {
            keypair: Keypair::from_seed(&[seed; 32]),
            key_ref: key_ref.into(),
        }
    }

    fn sign(&self, canonical: &[u8]) -> RecordSignature {
        RecordSignature {
            bytes: self.keypair.sign(canonical),
            algorithm: ED25519_ALGORITHM.to_string(),
            key_ref: self.key_ref.clone(),
        }
    }
}

/// Builds one anchor's chain record by record.
pub struct ChainFixture<'a> {
    hasher: &'a dyn Hasher,
    anchor_id: AnchorId,
    records: Vec<LedgerRecord>,
}

impl<'a> ChainFixture<'a> {
    pub fn new(hasher: &'a dyn Hasher, anchor_id: impl Into<AnchorId>) -> Self {
        Self {
            hasher,
            anchor_id: anchor_id.into(),
            records: Vec::new(),
        }
    }

    fn tail(&self) -> (RecordId, RecordHash) {
        match self.records.last() {
            Some(r) => (r.record_id.next(), r.hash),
            None => (RecordId::FIRST, RecordHash::GENESIS),
        }
    }

    /// Append an unsigned record.
    pub fn push(&mut self, slot: &str, kind: RecordKind, timestamp: i64, payload: PayloadValue) {
        self.push_inner(slot, kind, timestamp, payload, None);
    }

    /// Append a record signed by the given producer.
    pub fn push_signed(
        &mut self,
        producer: &SignedProducer,
        slot: &str,
        kind: RecordKind,
        timestamp: i64,
        payload: PayloadValue,
    ) {
        self.push_inner(slot, kind, timestamp, payload, Some(producer));
    }

    fn push_inner(
        &mut self,
        slot: &str,
        kind: RecordKind,
        timestamp: i64,
        payload: PayloadValue,
        producer: Option<&SignedProducer>,
    ) {
        let (record_id, prev_hash) = self.tail();
        let draft = DraftRecord::new(
            self.anchor_id.clone(),
            slot,
            kind,
            timestamp,
            payload,
        );
        let canonical = canonical_record_bytes(
            &HashInput::from_draft(&draft, &prev_hash),
            DEFAULT_MAX_PAYLOAD_BYTES,
        )
        .expect("fixture payloads must encode");
        let hash = self.hasher.digest(&canonical);

        self.records.push(LedgerRecord {
            version: RECORD_VERSION,
            record_id,
            anchor_id: self.anchor_id.clone(),
            slot: draft.slot,
            kind: draft.kind,
            timestamp: draft.timestamp,
            prev_hash,
            hash,
            payload: draft.payload,
            signature: producer.map(|p| p.sign(&canonical)),
        });
    }

    /// The built chain.
    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    /// Consume the fixture, returning the chain.
    pub fn into_records(self) -> Vec<LedgerRecord> {
        self.records
    }

    /// Load the chain into a backend through ordinary appends.
    pub async fn load_into(&self, backend: &dyn RecordBackend) {
        for record in &self.records {
            let tail = backend
                .tail(&self.anchor_id)
                .await
                .expect("fixture backend tail");
            backend
                .append_record(record, tail.as_ref())
                .await
                .expect("fixture backend append");
        }
    }
}
