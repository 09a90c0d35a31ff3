//! Degradation fallback: durable backend with a volatile standby.
//!
//! Wraps the durable backend and routes around it when it becomes
//! unresponsive. Every operation gets a bounded timeout; on timeout or an
//! unavailability error the wrapper flips to degraded mode and serves all
//! further traffic from an in-memory standby. The transition is
//! one-directional for the life of the process: flapping between backends
//! would interleave two histories, so recovery is an operator decision,
//! not an automatic one.
//!
//! The standby starts empty. Chains restart there from genesis, and
//! nothing written while degraded is reconciled back into the durable
//! store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use avl_core::{AnchorId, Checkpoint, LedgerRecord, RecordId};

use crate::error::{Result, StoreError};
use crate::memory::MemoryBackend;
use crate::traits::{AppendOutcome, BackendStats, RecordBackend, TailInfo};

/// Default bound on a single durable operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2_000);

/// A [`RecordBackend`] decorator that degrades to volatile storage when
/// the durable backend stops responding.
pub struct FallbackBackend {
    durable: Arc<dyn RecordBackend>,
    standby: MemoryBackend,
    degraded: AtomicBool,
    op_timeout: Duration,
}

impl FallbackBackend {
    /// Wrap a durable backend with an empty in-memory standby.
    pub fn new(durable: Arc<dyn RecordBackend>, op_timeout: Duration) -> Self {
        Self {
            durable,
            standby: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
            op_timeout,
        }
    }

    /// Whether the wrapper has switched to the volatile standby.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, reason: &str) {
        // Log only on the actual transition, not on every degraded op.
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                reason,
                "durable backend unavailable, degrading to volatile storage"
            );
        }
    }

    /// Whether an error means the durable backend itself is gone, as
    /// opposed to a caller-level problem (constraint violation, corrupt
    /// row) that the standby could not fix.
    fn should_degrade(err: &StoreError) -> bool {
        match err {
            StoreError::Unavailable(_) | StoreError::Io(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

/// Run one operation against the durable backend with a timeout, falling
/// back to the standby on unavailability.
macro_rules! route {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {{
        if $self.is_degraded() {
            return $self.standby.$method($($arg),*).await;
        }
        match timeout($self.op_timeout, $self.durable.$method($($arg),*)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if Self::should_degrade(&err) => {
                $self.degrade(&err.to_string());
                $self.standby.$method($($arg),*).await
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                $self.degrade("operation timed out");
                $self.standby.$method($($arg),*).await
            }
        }
    }};
}

#[async_trait]
impl RecordBackend for FallbackBackend {
    async fn append_record(
        &self,
        record: &LedgerRecord,
        expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome> {
        route!(self, append_record(record, expected_tail))
    }

    async fn tail(&self, anchor_id: &AnchorId) -> Result<Option<TailInfo>> {
        route!(self, tail(anchor_id))
    }

    async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>> {
        route!(self, fetch_chain(anchor_id, from, to))
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorId>> {
        route!(self, list_anchors())
    }

    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        route!(self, insert_checkpoint(checkpoint))
    }

    async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>> {
        route!(self, checkpoints(anchor_id))
    }

    async fn latest_checkpoint(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>> {
        route!(self, latest_checkpoint(anchor_id))
    }

    async fn stats(&self) -> Result<BackendStats> {
        route!(self, stats())
    }
}
