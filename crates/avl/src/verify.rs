//! Chain verification and trust scoring.
//!
//! Verification is a pure pass over a fetched chain: no writes, no
//! repairs. It walks from genesis re-deriving every hash and link, checks
//! each carried signature through the pluggable verifier, and folds the
//! results into a trust score. Signature failures are findings, not
//! aborts; the walk always covers the whole chain so a report lists every
//! problem, not just the first.

use serde::{Deserialize, Serialize};

use avl_core::{
    canonical_record_bytes, AnchorId, HashInput, Hasher, LedgerRecord, RecordId, SignatureVerifier,
    TrustScore, TrustWeights,
};

/// What went wrong with one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Issue {
    /// Stored hash does not match the recomputed hash.
    HashMismatch,
    /// `prev_hash` does not equal the predecessor's hash.
    BrokenLink,
    /// First record does not carry the genesis sentinel, or a later record
    /// does.
    BadGenesis,
    /// Record ids do not increase by exactly one.
    NonSequentialId,
    /// The carried signature failed verification.
    SignatureInvalid,
    /// The stored record no longer canonically encodes.
    EncodingFailed,
}

/// One problem found during a verification walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub record_id: RecordId,
    pub issue: Issue,
}

/// The result of verifying one anchor's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub anchor_id: AnchorId,
    /// True when chain continuity holds: every stored hash matches its
    /// recomputation and every link, id and genesis check passes.
    /// Signature failures appear in `findings` and lower the trust score
    /// but do not clear this flag.
    pub valid: bool,
    /// First record where chain continuity failed, if any. Signature
    /// failures do not break continuity.
    pub broken_at: Option<RecordId>,
    /// Records examined.
    pub records_checked: u64,
    /// Composite trust score. Absent for an empty chain.
    pub trust: Option<TrustScore>,
    /// Every problem found, in chain order.
    pub findings: Vec<Finding>,
    /// When the verification ran (Unix milliseconds).
    pub verified_at: i64,
}

/// Verify a full chain slice fetched in ascending record-id order.
pub fn verify_chain(
    anchor_id: &AnchorId,
    records: &[LedgerRecord],
    hasher: &dyn Hasher,
    verifier: &dyn SignatureVerifier,
    weights: &TrustWeights,
    max_payload_bytes: usize,
    verified_at: i64,
) -> VerifyReport {
    let mut findings = Vec::new();
    let mut broken_at: Option<RecordId> = None;
    let mut quality_sum = 0.0;
    let mut signed = 0u64;
    let mut signed_valid = 0u64;

    let mut note_break = |findings: &mut Vec<Finding>, id: RecordId, issue: Issue| {
        findings.push(Finding {
            record_id: id,
            issue,
        });
        if broken_at.is_none() {
            broken_at = Some(id);
        }
    };

    let mut prev: Option<&LedgerRecord> = None;
    for record in records {
        let id = record.record_id;

        match prev {
            None => {
                if !record.is_genesis() {
                    note_break(&mut findings, id, Issue::BadGenesis);
                }
            }
            Some(prev_record) => {
                if id != prev_record.record_id.next() {
                    note_break(&mut findings, id, Issue::NonSequentialId);
                }
                if record.prev_hash == avl_core::RecordHash::GENESIS {
                    note_break(&mut findings, id, Issue::BadGenesis);
                } else if record.prev_hash != prev_record.hash {
                    note_break(&mut findings, id, Issue::BrokenLink);
                }
            }
        }

        match canonical_record_bytes(&HashInput::from_record(record), max_payload_bytes) {
            Ok(bytes) => {
                if hasher.digest(&bytes) != record.hash {
                    note_break(&mut findings, id, Issue::HashMismatch);
                }
                if let Some(signature) = &record.signature {
                    signed += 1;
                    if verifier.verify(&bytes, &signature.bytes, &signature.key_ref) {
                        signed_valid += 1;
                    } else {
                        // A finding, not a continuity break.
                        findings.push(Finding {
                            record_id: id,
                            issue: Issue::SignatureInvalid,
                        });
                    }
                }
            }
            Err(_) => note_break(&mut findings, id, Issue::EncodingFailed),
        }

        quality_sum += record.payload.confidence();
        prev = Some(record);
    }

    let records_checked = records.len() as u64;
    let trust = if records.is_empty() {
        None
    } else {
        let mean_quality = quality_sum / records_checked as f64;
        let signed_rate = signed as f64 / records_checked as f64;
        // Vacuously perfect when nothing is signed.
        let verified_rate = if signed == 0 {
            1.0
        } else {
            signed_valid as f64 / signed as f64
        };
        let continuity = if broken_at.is_none() { 1.0 } else { 0.0 };
        Some(TrustScore::compose(
            weights,
            mean_quality,
            signed_rate,
            verified_rate,
            continuity,
        ))
    };

    VerifyReport {
        anchor_id: anchor_id.clone(),
        valid: broken_at.is_none(),
        broken_at,
        records_checked,
        trust,
        findings,
        verified_at,
    }
}
