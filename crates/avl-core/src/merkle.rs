//! Binary Merkle tree over record hashes.
//!
//! Leaves are record hashes ordered by record id. Hashing is
//! domain-separated: a leaf node is `H(0x00 || record_hash)` and an
//! interior node is `H(0x01 || left || right)`, so an interior node can
//! never be replayed as a leaf. Pairing rule for odd counts: the unpaired
//! node at the end of a level is carried up to the next level unchanged.
//!
//! Proofs are O(log n): a consumer can check a single record against a
//! checkpoint's root without replaying the chain.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::Hasher;
use crate::types::RecordHash;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Which side a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// The sibling digest combined with the running digest at this level.
    pub sibling: RecordHash,
    /// Side the sibling occupies.
    pub side: Side,
}

/// An inclusion proof for one leaf against a Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Zero-based index of the leaf within the batch.
    pub leaf_index: usize,
    /// Sibling path from leaf level to the root.
    pub steps: Vec<ProofStep>,
}

fn leaf_digest(hasher: &dyn Hasher, leaf: &RecordHash) -> RecordHash {
    let mut buf = [0u8; 33];
    buf[0] = LEAF_TAG;
    buf[1..].copy_from_slice(leaf.as_bytes());
    hasher.digest(&buf)
}

fn node_digest(hasher: &dyn Hasher, left: &RecordHash, right: &RecordHash) -> RecordHash {
    let mut buf = [0u8; 65];
    buf[0] = NODE_TAG;
    buf[1..33].copy_from_slice(left.as_bytes());
    buf[33..].copy_from_slice(right.as_bytes());
    hasher.digest(&buf)
}

/// Compute the Merkle root over a batch of record hashes.
///
/// Fails with [`CoreError::EmptyBatch`] for an empty slice: a checkpoint
/// always covers at least one record.
pub fn merkle_root(hasher: &dyn Hasher, leaves: &[RecordHash]) -> Result<RecordHash, CoreError> {
    if leaves.is_empty() {
        return Err(CoreError::EmptyBatch);
    }

    let mut level: Vec<RecordHash> = leaves.iter().map(|l| leaf_digest(hasher, l)).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(node_digest(hasher, left, right)),
                // Odd node carried up unchanged.
                [single] => next.push(*single),
                _ => unreachable!("chunks(2) yields 1 or 2 elements"),
            }
        }
        level = next;
    }
    Ok(level[0])
}

/// Build an inclusion proof for the leaf at `leaf_index`.
pub fn merkle_proof(
    hasher: &dyn Hasher,
    leaves: &[RecordHash],
    leaf_index: usize,
) -> Result<MerkleProof, CoreError> {
    if leaves.is_empty() {
        return Err(CoreError::EmptyBatch);
    }
    if leaf_index >= leaves.len() {
        return Err(CoreError::OutsideCheckpointRange(
            leaf_index as u64,
            0,
            leaves.len() as u64 - 1,
        ));
    }

    let mut level: Vec<RecordHash> = leaves.iter().map(|l| leaf_digest(hasher, l)).collect();
    let mut index = leaf_index;
    let mut steps = Vec::new();

    while level.len() > 1 {
        if index % 2 == 0 {
            // Sibling on the right, unless this is an unpaired trailing node.
            if index + 1 < level.len() {
                steps.push(ProofStep {
                    sibling: level[index + 1],
                    side: Side::Right,
                });
            }
        } else {
            steps.push(ProofStep {
                sibling: level[index - 1],
                side: Side::Left,
            });
        }

        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(node_digest(hasher, left, right)),
                [single] => next.push(*single),
                _ => unreachable!(),
            }
        }
        level = next;
        index /= 2;
    }

    Ok(MerkleProof { leaf_index, steps })
}

/// Check an inclusion proof: does `record_hash` sit under `root`?
pub fn verify_proof(
    hasher: &dyn Hasher,
    record_hash: &RecordHash,
    proof: &MerkleProof,
    root: &RecordHash,
) -> bool {
    let mut running = leaf_digest(hasher, record_hash);
    for step in &proof.steps {
        running = match step.side {
            Side::Left => node_digest(hasher, &step.sibling, &running),
            Side::Right => node_digest(hasher, &running, &step.sibling),
        };
    }
    running == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3Hasher;

    fn leaves(n: u8) -> Vec<RecordHash> {
        (0..n).map(|i| RecordHash::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            merkle_root(&Blake3Hasher, &[]),
            Err(CoreError::EmptyBatch)
        ));
    }

    #[test]
    fn test_single_leaf_root_is_leaf_digest() {
        let ls = leaves(1);
        let root = merkle_root(&Blake3Hasher, &ls).unwrap();
        assert_eq!(root, leaf_digest(&Blake3Hasher, &ls[0]));
        // The raw record hash is not the root (domain separation).
        assert_ne!(root, ls[0]);
    }

    #[test]
    fn test_root_depends_on_order() {
        let mut ls = leaves(4);
        let root = merkle_root(&Blake3Hasher, &ls).unwrap();
        ls.swap(0, 3);
        assert_ne!(root, merkle_root(&Blake3Hasher, &ls).unwrap());
    }

    #[test]
    fn test_proofs_validate_for_all_sizes() {
        for n in 1..=9u8 {
            let ls = leaves(n);
            let root = merkle_root(&Blake3Hasher, &ls).unwrap();
            for (i, leaf) in ls.iter().enumerate() {
                let proof = merkle_proof(&Blake3Hasher, &ls, i).unwrap();
                assert!(
                    verify_proof(&Blake3Hasher, leaf, &proof, &root),
                    "proof failed for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn test_wrong_leaf_fails_proof() {
        let ls = leaves(5);
        let root = merkle_root(&Blake3Hasher, &ls).unwrap();
        let proof = merkle_proof(&Blake3Hasher, &ls, 2).unwrap();
        let outsider = RecordHash::from_bytes([0xee; 32]);
        assert!(!verify_proof(&Blake3Hasher, &outsider, &proof, &root));
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let ls = leaves(3);
        assert!(merkle_proof(&Blake3Hasher, &ls, 3).is_err());
    }

    #[test]
    fn test_proof_length_logarithmic() {
        let ls = leaves(64);
        let proof = merkle_proof(&Blake3Hasher, &ls, 17).unwrap();
        assert_eq!(proof.steps.len(), 6);
    }
}
