//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison at every nesting level
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (payloads carry 64-bit integers only)
//!
//! The canonical encoding is critical: it ensures that the same record
//! produces identical bytes (and thus an identical hash) regardless of the
//! field order or whitespace of whatever document the producer started
//! from. The record hash is computed over exactly
//! {anchor_id, slot, kind, timestamp, payload, prev_hash}.

use crate::error::EncodingError;
use crate::hash::Hasher;
use crate::payload::PayloadValue;
use crate::record::{DraftRecord, LedgerRecord, RecordKind};
use crate::types::{AnchorId, RecordHash};

/// Default cap on the encoded payload size.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Envelope field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR. The envelope map is built in
/// key order, which is already the canonical order for these keys.
mod keys {
    pub const ANCHOR_ID: u64 = 0;
    pub const SLOT: u64 = 1;
    pub const KIND: u64 = 2;
    pub const TIMESTAMP: u64 = 3;
    pub const PREV_HASH: u64 = 4;
    pub const PAYLOAD: u64 = 5;
}

/// The fields that feed a record's hash.
///
/// Borrowed views so drafts and committed records share one encoding path.
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub anchor_id: &'a AnchorId,
    pub slot: &'a str,
    pub kind: &'a RecordKind,
    pub timestamp: i64,
    pub prev_hash: &'a RecordHash,
    pub payload: &'a PayloadValue,
}

impl<'a> HashInput<'a> {
    /// Hash input of a draft with a known predecessor hash.
    pub fn from_draft(draft: &'a DraftRecord, prev_hash: &'a RecordHash) -> Self {
        Self {
            anchor_id: &draft.anchor_id,
            slot: &draft.slot,
            kind: &draft.kind,
            timestamp: draft.timestamp,
            prev_hash,
            payload: &draft.payload,
        }
    }

    /// Hash input of a committed record, as used when re-verifying a chain.
    pub fn from_record(record: &'a LedgerRecord) -> Self {
        Self {
            anchor_id: &record.anchor_id,
            slot: &record.slot,
            kind: &record.kind,
            timestamp: record.timestamp,
            prev_hash: &record.prev_hash,
            payload: &record.payload,
        }
    }
}

/// Encode a record's hash input to canonical bytes.
///
/// The payload is encoded first and checked against `max_payload_bytes`
/// before the envelope is assembled, so oversized payloads are rejected
/// without any hash or store work.
pub fn canonical_record_bytes(
    input: &HashInput<'_>,
    max_payload_bytes: usize,
) -> Result<Vec<u8>, EncodingError> {
    if !input.anchor_id.is_valid() {
        return Err(EncodingError::InvalidAnchorId(
            input.anchor_id.as_str().to_string(),
        ));
    }

    let mut payload_buf = Vec::new();
    encode_payload(&mut payload_buf, input.payload);
    if payload_buf.len() > max_payload_bytes {
        return Err(EncodingError::PayloadTooLarge {
            size: payload_buf.len(),
            cap: max_payload_bytes,
        });
    }

    let mut buf = Vec::with_capacity(payload_buf.len() + 128);
    // Envelope map: 6 entries, integer keys already in canonical order.
    encode_uint(&mut buf, 5, 6);

    encode_uint(&mut buf, 0, keys::ANCHOR_ID);
    encode_text(&mut buf, input.anchor_id.as_str());

    encode_uint(&mut buf, 0, keys::SLOT);
    encode_text(&mut buf, input.slot);

    encode_uint(&mut buf, 0, keys::KIND);
    encode_text(&mut buf, input.kind.as_str());

    encode_uint(&mut buf, 0, keys::TIMESTAMP);
    encode_i64(&mut buf, input.timestamp);

    encode_uint(&mut buf, 0, keys::PREV_HASH);
    encode_bytes(&mut buf, input.prev_hash.as_bytes());

    encode_uint(&mut buf, 0, keys::PAYLOAD);
    buf.extend_from_slice(&payload_buf);

    Ok(buf)
}

/// Compute a record hash: digest over the canonical bytes.
pub fn compute_record_hash(
    hasher: &dyn Hasher,
    input: &HashInput<'_>,
    max_payload_bytes: usize,
) -> Result<RecordHash, EncodingError> {
    let bytes = canonical_record_bytes(input, max_payload_bytes)?;
    Ok(hasher.digest(&bytes))
}

/// Recursively encode a payload value.
fn encode_payload(buf: &mut Vec<u8>, value: &PayloadValue) {
    match value {
        PayloadValue::Null => buf.push(0xf6),
        PayloadValue::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        PayloadValue::Int(n) => encode_i64(buf, *n),
        PayloadValue::Text(s) => encode_text(buf, s),
        PayloadValue::Array(items) => {
            encode_uint(buf, 4, items.len() as u64);
            for item in items {
                encode_payload(buf, item);
            }
        }
        PayloadValue::Map(entries) => {
            // Sort by encoded key bytes. For text keys this matches the
            // BTreeMap order only when lengths agree, so sort explicitly.
            let mut encoded: Vec<(Vec<u8>, &PayloadValue)> = entries
                .iter()
                .map(|(k, v)| {
                    let mut key_buf = Vec::new();
                    encode_text(&mut key_buf, k);
                    (key_buf, v)
                })
                .collect();
            encoded.sort_by(|a, b| a.0.cmp(&b.0));

            encode_uint(buf, 5, encoded.len() as u64);
            for (key_bytes, v) in encoded {
                buf.extend_from_slice(&key_bytes);
                encode_payload(buf, v);
            }
        }
    }
}

/// Encode a signed 64-bit integer (major types 0 and 1).
fn encode_i64(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, !(n as u64));
    }
}

/// Encode an unsigned integer with the given major type, smallest form.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}
