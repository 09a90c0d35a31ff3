//! # AVL Store
//!
//! Persistence backends for the Autonomous Verification Ledger.
//!
//! The [`RecordBackend`] trait abstracts storage behind a compare-and-append
//! interface. Three implementations:
//!
//! - [`SqliteBackend`] - durable, the default
//! - [`MemoryBackend`] - volatile, for tests and ephemeral deployments
//! - [`FallbackBackend`] - durable with automatic one-way degradation to
//!   a volatile standby

pub mod error;
pub mod fallback;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use fallback::{FallbackBackend, DEFAULT_OP_TIMEOUT};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{AppendOutcome, BackendStats, RecordBackend, TailInfo};
