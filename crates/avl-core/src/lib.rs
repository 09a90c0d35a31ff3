//! # AVL Core
//!
//! Pure primitives for the Autonomous Verification Ledger: records,
//! canonical encoding, hashing, signature verification, Merkle batches
//! and trust arithmetic.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`LedgerRecord`] - A committed, immutable chain entry
//! - [`DraftRecord`] - What a producer submits to append
//! - [`AnchorId`] / [`RecordId`] / [`RecordHash`] - Strongly typed identifiers
//! - [`Checkpoint`] - Immutable Merkle summary of a record range
//!
//! ## Canonicalization
//!
//! Record hashes are computed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod checkpoint;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod payload;
pub mod record;
pub mod signature;
pub mod trust;
pub mod types;

pub use canonical::{
    canonical_record_bytes, compute_record_hash, HashInput, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use checkpoint::{Checkpoint, CheckpointId};
pub use error::{CoreError, EncodingError};
pub use hash::{hasher_for, Blake3Hasher, HashAlgorithm, Hasher, Sha3Hasher};
pub use merkle::{merkle_proof, merkle_root, verify_proof, MerkleProof, ProofStep, Side};
pub use payload::{payload_map, PayloadValue};
pub use record::{
    DraftRecord, KindRegistry, LedgerRecord, RecordKind, RecordSignature, RECORD_VERSION,
};
pub use signature::{
    Ed25519KeyringVerifier, Ed25519PublicKey, Keypair, RejectAllVerifier, SignatureVerifier,
    ED25519_ALGORITHM,
};
pub use trust::{TrustScore, TrustWeights};
pub use types::{AnchorId, RecordHash, RecordId};
