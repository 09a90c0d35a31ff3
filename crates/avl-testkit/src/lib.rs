//! Test fixtures and generators for ledger crates.
//!
//! Everything here is test support: deterministic chain builders for
//! integrity scenarios and proptest strategies for payload fuzzing.

pub mod fixtures;
pub mod generators;

pub use fixtures::{ChainFixture, SignedProducer};
pub use generators::{arb_draft, arb_payload};
