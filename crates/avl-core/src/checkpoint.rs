//! Checkpoints: immutable Merkle summaries of committed record ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::Hasher;
use crate::record::RecordSignature;
use crate::types::{AnchorId, RecordHash, RecordId};

/// Content-derived checkpoint identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub [u8; 32]);

impl CheckpointId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckpointId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// An immutable summary of one committed record range.
///
/// Ranges for an anchor are non-overlapping and monotonically increasing;
/// the builder enforces this by always starting a new checkpoint at the
/// record after the previous checkpoint's `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Content-derived identifier.
    pub checkpoint_id: CheckpointId,
    /// The anchor this checkpoint covers.
    pub anchor_id: AnchorId,
    /// First covered record (inclusive).
    pub start: RecordId,
    /// Last covered record (inclusive).
    pub end: RecordId,
    /// Root of the binary Merkle tree over covered record hashes,
    /// leaves ordered by record id.
    pub merkle_root: RecordHash,
    /// Optional signature over the signable message bytes.
    pub signature: Option<RecordSignature>,
    /// When the checkpoint was built (Unix milliseconds).
    pub created_at: i64,
    /// Number of records covered.
    pub record_count: u64,
}

impl Checkpoint {
    /// Assemble a checkpoint, deriving its id from content.
    pub fn new(
        hasher: &dyn Hasher,
        anchor_id: AnchorId,
        start: RecordId,
        end: RecordId,
        merkle_root: RecordHash,
        created_at: i64,
    ) -> Self {
        let record_count = end.value() - start.value() + 1;
        let message = signable_message(&anchor_id, start, end, &merkle_root);
        let checkpoint_id = CheckpointId(hasher.digest(&message).0);
        Self {
            checkpoint_id,
            anchor_id,
            start,
            end,
            merkle_root,
            signature: None,
            created_at,
            record_count,
        }
    }

    /// The bytes a checkpoint signer signs: anchor, range and root.
    pub fn signable_message(&self) -> Vec<u8> {
        signable_message(&self.anchor_id, self.start, self.end, &self.merkle_root)
    }

    /// Whether the given record id falls in this checkpoint's range.
    pub fn covers(&self, record_id: RecordId) -> bool {
        self.start <= record_id && record_id <= self.end
    }
}

fn signable_message(
    anchor_id: &AnchorId,
    start: RecordId,
    end: RecordId,
    merkle_root: &RecordHash,
) -> Vec<u8> {
    let anchor = anchor_id.as_str().as_bytes();
    let mut buf = Vec::with_capacity(anchor.len() + 8 + 8 + 8 + 32);
    buf.extend_from_slice(&(anchor.len() as u64).to_be_bytes());
    buf.extend_from_slice(anchor);
    buf.extend_from_slice(&start.value().to_be_bytes());
    buf.extend_from_slice(&end.value().to_be_bytes());
    buf.extend_from_slice(merkle_root.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3Hasher;

    fn checkpoint(start: u64, end: u64) -> Checkpoint {
        Checkpoint::new(
            &Blake3Hasher,
            AnchorId::from("x"),
            RecordId(start),
            RecordId(end),
            RecordHash::from_bytes([0xaa; 32]),
            1_736_870_400_000,
        )
    }

    #[test]
    fn test_id_content_derived() {
        assert_eq!(checkpoint(1, 4).checkpoint_id, checkpoint(1, 4).checkpoint_id);
        assert_ne!(checkpoint(1, 4).checkpoint_id, checkpoint(1, 5).checkpoint_id);
    }

    #[test]
    fn test_record_count() {
        assert_eq!(checkpoint(1, 4).record_count, 4);
        assert_eq!(checkpoint(5, 5).record_count, 1);
    }

    #[test]
    fn test_covers() {
        let cp = checkpoint(3, 7);
        assert!(!cp.covers(RecordId(2)));
        assert!(cp.covers(RecordId(3)));
        assert!(cp.covers(RecordId(7)));
        assert!(!cp.covers(RecordId(8)));
    }
}
