//! SQLite implementation of the backend trait.
//!
//! The durable backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via `tokio::task::spawn_blocking`; the compare-and-append runs
//! inside a single transaction so a chain can never fork on disk.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use avl_core::{
    AnchorId, Checkpoint, CheckpointId, LedgerRecord, PayloadValue, RecordHash, RecordId,
    RecordKind, RecordSignature,
};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{AppendOutcome, BackendStats, RecordBackend, TailInfo};

/// SQLite-based backend.
///
/// Writes go through a single dedicated connection so the
/// compare-and-append transaction never contends with another writer.
/// Reads fan out over a small pool of connections, picked round-robin;
/// WAL mode lets them run while a write is in flight. Every trait method
/// moves its work onto the blocking thread pool.
pub struct SqliteBackend {
    writer: Arc<Mutex<Connection>>,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    // journal_mode reports the resulting mode as a row.
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

impl SqliteBackend {
    /// Open a database at the given path, creating and migrating it as
    /// needed, with a single connection serving reads and writes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool(path, 1)
    }

    /// Open a database with `pool_size` read connections alongside the
    /// write connection.
    pub fn open_with_pool(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        migration::migrate(&mut conn)?;
        let writer = Arc::new(Mutex::new(conn));

        let readers = if pool_size <= 1 {
            vec![Arc::clone(&writer)]
        } else {
            let mut readers = Vec::with_capacity(pool_size as usize);
            for _ in 0..pool_size {
                let conn = Connection::open(path)?;
                configure(&conn)?;
                readers.push(Arc::new(Mutex::new(conn)));
            }
            readers
        };

        Ok(Self {
            writer,
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory database. Useful for testing.
    ///
    /// In-memory databases are private to their connection, so reads share
    /// the write connection regardless of pool settings.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        let writer = Arc::new(Mutex::new(conn));
        Ok(Self {
            readers: vec![Arc::clone(&writer)],
            writer,
            next_reader: AtomicUsize::new(0),
        })
    }

    fn reader(&self) -> Arc<Mutex<Connection>> {
        let i = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        Arc::clone(&self.readers[i])
    }

    async fn run_on<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }

    /// Run a closure against the write connection on the blocking pool.
    async fn run_write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::run_on(Arc::clone(&self.writer), f).await
    }

    /// Run a closure against a pooled read connection on the blocking pool.
    async fn run_read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::run_on(self.reader(), f).await
    }
}

fn query_tail(conn: &Connection, anchor: &str) -> Result<Option<TailInfo>> {
    let row: Option<(i64, Vec<u8>)> = conn
        .query_row(
            "SELECT record_id, hash FROM records
             WHERE anchor_id = ?1
             ORDER BY record_id DESC LIMIT 1",
            params![anchor],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((record_id, hash_bytes)) => Ok(Some(TailInfo {
            record_id: RecordId(record_id as u64),
            hash: decode_hash(&hash_bytes, "records.hash")?,
        })),
        None => Ok(None),
    }
}

fn decode_hash(bytes: &[u8], column: &str) -> Result<RecordHash> {
    RecordHash::try_from(bytes)
        .map_err(|_| StoreError::Corrupt(format!("{}: expected 32 bytes, got {}", column, bytes.len())))
}

fn encode_payload(payload: &PayloadValue) -> Result<String> {
    serde_json::to_string(&payload.to_json())
        .map_err(|e| StoreError::Serialization(format!("payload: {}", e)))
}

fn decode_payload(text: &str) -> Result<PayloadValue> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StoreError::Corrupt(format!("records.payload: {}", e)))?;
    PayloadValue::from_json(&json)
        .map_err(|e| StoreError::Corrupt(format!("records.payload: {}", e)))
}

fn encode_signature(signature: &RecordSignature) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(signature, &mut buf)
        .map_err(|e| StoreError::Serialization(format!("signature: {}", e)))?;
    Ok(buf)
}

fn decode_signature(bytes: &[u8], column: &str) -> Result<RecordSignature> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

/// Raw columns of one record row, before decoding.
struct RawRecord {
    version: u8,
    record_id: i64,
    anchor_id: String,
    slot: String,
    kind: String,
    timestamp: i64,
    prev_hash: Vec<u8>,
    hash: Vec<u8>,
    payload: String,
    signature: Option<Vec<u8>>,
}

const RECORD_COLUMNS: &str =
    "version, record_id, anchor_id, slot, kind, timestamp, prev_hash, hash, payload, signature";

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        version: row.get(0)?,
        record_id: row.get(1)?,
        anchor_id: row.get(2)?,
        slot: row.get(3)?,
        kind: row.get(4)?,
        timestamp: row.get(5)?,
        prev_hash: row.get(6)?,
        hash: row.get(7)?,
        payload: row.get(8)?,
        signature: row.get(9)?,
    })
}

fn decode_record(raw: RawRecord) -> Result<LedgerRecord> {
    // Kind parsing is infallible: unknown strings land in Custom.
    let kind = RecordKind::try_from(raw.kind).unwrap_or_else(|e| match e {});
    Ok(LedgerRecord {
        version: raw.version,
        record_id: RecordId(raw.record_id as u64),
        anchor_id: AnchorId::from(raw.anchor_id),
        slot: raw.slot,
        kind,
        timestamp: raw.timestamp,
        prev_hash: decode_hash(&raw.prev_hash, "records.prev_hash")?,
        hash: decode_hash(&raw.hash, "records.hash")?,
        payload: decode_payload(&raw.payload)?,
        signature: raw
            .signature
            .as_deref()
            .map(|b| decode_signature(b, "records.signature"))
            .transpose()?,
    })
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCheckpoint> {
    Ok(RawCheckpoint {
        checkpoint_id: row.get(0)?,
        anchor_id: row.get(1)?,
        start_id: row.get(2)?,
        end_id: row.get(3)?,
        merkle_root: row.get(4)?,
        signature: row.get(5)?,
        created_at: row.get(6)?,
        record_count: row.get(7)?,
    })
}

struct RawCheckpoint {
    checkpoint_id: Vec<u8>,
    anchor_id: String,
    start_id: i64,
    end_id: i64,
    merkle_root: Vec<u8>,
    signature: Option<Vec<u8>>,
    created_at: i64,
    record_count: i64,
}

const CHECKPOINT_COLUMNS: &str =
    "checkpoint_id, anchor_id, start_id, end_id, merkle_root, signature, created_at, record_count";

fn decode_checkpoint(raw: RawCheckpoint) -> Result<Checkpoint> {
    Ok(Checkpoint {
        checkpoint_id: CheckpointId::from_bytes(
            decode_hash(&raw.checkpoint_id, "checkpoints.checkpoint_id")?.0,
        ),
        anchor_id: AnchorId::from(raw.anchor_id),
        start: RecordId(raw.start_id as u64),
        end: RecordId(raw.end_id as u64),
        merkle_root: decode_hash(&raw.merkle_root, "checkpoints.merkle_root")?,
        signature: raw
            .signature
            .as_deref()
            .map(|b| decode_signature(b, "checkpoints.signature"))
            .transpose()?,
        created_at: raw.created_at,
        record_count: raw.record_count as u64,
    })
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    async fn append_record(
        &self,
        record: &LedgerRecord,
        expected_tail: Option<&TailInfo>,
    ) -> Result<AppendOutcome> {
        let record = record.clone();
        let expected = expected_tail.copied();

        self.run_write(move |conn| {
            let tx = conn.transaction()?;

            // Tail check and insert are one transaction: racing writers
            // serialize here, so a stale expected tail is always caught.
            let actual = query_tail(&tx, record.anchor_id.as_str())?;
            if actual != expected {
                return Ok(AppendOutcome::TailMismatch { actual });
            }

            let payload = encode_payload(&record.payload)?;
            let signature = record.signature.as_ref().map(encode_signature).transpose()?;

            tx.execute(
                "INSERT INTO records (
                    hash, anchor_id, record_id, slot, kind, timestamp,
                    prev_hash, payload, signature, version, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.hash.as_bytes().as_slice(),
                    record.anchor_id.as_str(),
                    record.record_id.value() as i64,
                    &record.slot,
                    record.kind.as_str(),
                    record.timestamp,
                    record.prev_hash.as_bytes().as_slice(),
                    payload,
                    signature,
                    record.version as i64,
                    now_millis(),
                ],
            )?;

            tx.commit()?;
            Ok(AppendOutcome::Committed)
        })
        .await
    }

    async fn tail(&self, anchor_id: &AnchorId) -> Result<Option<TailInfo>> {
        let anchor = anchor_id.as_str().to_string();
        self.run_read(move |conn| query_tail(conn, &anchor)).await
    }

    async fn fetch_chain(
        &self,
        anchor_id: &AnchorId,
        from: Option<RecordId>,
        to: Option<RecordId>,
    ) -> Result<Vec<LedgerRecord>> {
        let anchor = anchor_id.as_str().to_string();
        let from = from.map_or(1, |r| r.value() as i64);
        let to = to.map_or(i64::MAX, |r| r.value() as i64);

        self.run_read(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM records
                 WHERE anchor_id = ?1 AND record_id >= ?2 AND record_id <= ?3
                 ORDER BY record_id",
                RECORD_COLUMNS
            ))?;

            let raws = stmt
                .query_map(params![anchor, from, to], row_to_raw)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            raws.into_iter().map(decode_record).collect()
        })
        .await
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorId>> {
        self.run_read(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT anchor_id FROM records ORDER BY anchor_id")?;
            let anchors = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(anchors.into_iter().map(AnchorId::from).collect())
        })
        .await
    }

    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let cp = checkpoint.clone();

        self.run_write(move |conn| {
            let signature = cp.signature.as_ref().map(encode_signature).transpose()?;

            conn.execute(
                "INSERT INTO checkpoints (
                    checkpoint_id, anchor_id, start_id, end_id, merkle_root,
                    signature, created_at, record_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    cp.checkpoint_id.0.as_slice(),
                    cp.anchor_id.as_str(),
                    cp.start.value() as i64,
                    cp.end.value() as i64,
                    cp.merkle_root.as_bytes().as_slice(),
                    signature,
                    cp.created_at,
                    cp.record_count as i64,
                ],
            )?;

            Ok(())
        })
        .await
    }

    async fn checkpoints(&self, anchor_id: &AnchorId) -> Result<Vec<Checkpoint>> {
        let anchor = anchor_id.as_str().to_string();

        self.run_read(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM checkpoints WHERE anchor_id = ?1 ORDER BY start_id",
                CHECKPOINT_COLUMNS
            ))?;

            let raws = stmt
                .query_map(params![anchor], row_to_checkpoint)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            raws.into_iter().map(decode_checkpoint).collect()
        })
        .await
    }

    async fn latest_checkpoint(&self, anchor_id: &AnchorId) -> Result<Option<Checkpoint>> {
        let anchor = anchor_id.as_str().to_string();

        self.run_read(move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM checkpoints
                         WHERE anchor_id = ?1
                         ORDER BY start_id DESC LIMIT 1",
                        CHECKPOINT_COLUMNS
                    ),
                    params![anchor],
                    row_to_checkpoint,
                )
                .optional()?;

            raw.map(decode_checkpoint).transpose()
        })
        .await
    }

    async fn stats(&self) -> Result<BackendStats> {
        self.run_read(|conn| {
            let record_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            let anchor_count: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT anchor_id) FROM records",
                [],
                |row| row.get(0),
            )?;
            let checkpoint_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?;

            Ok(BackendStats {
                record_count: record_count as u64,
                anchor_count: anchor_count as u64,
                checkpoint_count: checkpoint_count as u64,
            })
        })
        .await
    }
}
