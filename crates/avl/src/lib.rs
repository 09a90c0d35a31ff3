//! # Autonomous Verification Ledger
//!
//! A tamper-evident record store for autonomous producers. Each anchor
//! owns one linear, hash-linked chain of structured records; the ledger
//! verifies chains on demand, scores their cryptographic health, and
//! seals Merkle checkpoints so single records can be proven against a
//! compact root in O(log n).
//!
//! ## Example
//!
//! ```no_run
//! use avl::{
//!     payload_map, AnchorId, DraftRecord, Ledger, LedgerConfig, PayloadValue, RecordKind,
//! };
//!
//! # async fn run() -> avl::Result<()> {
//! let ledger = Ledger::open(LedgerConfig::default())?;
//!
//! let record = ledger
//!     .append(DraftRecord::new(
//!         "vehicle-7",
//!         "perception",
//!         RecordKind::Create,
//!         1_736_870_400_000,
//!         payload_map([("lane", PayloadValue::Int(2))]),
//!     ))
//!     .await?;
//!
//! let report = ledger.verify(&AnchorId::from("vehicle-7")).await?;
//! assert!(report.valid);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod verify;

pub use checkpoint::{CheckpointService, CheckpointWorker};
pub use config::{BackendKind, CheckpointPolicy, LedgerConfig};
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, LedgerStats};
pub use metrics::LedgerMetrics;
pub use verify::{Finding, Issue, VerifyReport};

// Re-export the core vocabulary so most callers need only this crate.
pub use avl_core::{
    payload_map, AnchorId, Checkpoint, DraftRecord, HashAlgorithm, LedgerRecord, MerkleProof,
    PayloadValue, RecordHash, RecordId, RecordKind, RecordSignature, TrustScore, TrustWeights,
};
