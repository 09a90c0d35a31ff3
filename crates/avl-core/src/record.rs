//! Ledger records: the atomic unit of tamper-evident history.
//!
//! A record is immutable once committed. There is no update or delete
//! surface anywhere in the crate; corrections are new records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::payload::PayloadValue;
use crate::types::{AnchorId, RecordHash, RecordId};

/// The current record schema version.
pub const RECORD_VERSION: u8 = 1;

/// Category label of a record.
///
/// A small closed core plus an extensible catalog: custom kinds are plain
/// strings validated against a [`KindRegistry`] at append time rather than
/// hardcoded into the enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RecordKind {
    /// First substantive event for a subject.
    Create,
    /// A change to previously recorded state.
    Update,
    /// An attestation or measurement about a subject.
    Attest,
    /// Key material rotation by a producer.
    KeyRotation,
    /// Registry-validated extension kind.
    Custom(String),
}

impl RecordKind {
    /// Canonical string form, used for hashing and storage.
    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::Create => "CREATE",
            RecordKind::Update => "UPDATE",
            RecordKind::Attest => "ATTEST",
            RecordKind::KeyRotation => "KEY_ROTATION",
            RecordKind::Custom(s) => s,
        }
    }

    /// Whether this is one of the closed core kinds.
    pub fn is_core(&self) -> bool {
        !matches!(self, RecordKind::Custom(_))
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for RecordKind {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(match s.as_str() {
            "CREATE" => RecordKind::Create,
            "UPDATE" => RecordKind::Update,
            "ATTEST" => RecordKind::Attest,
            "KEY_ROTATION" => RecordKind::KeyRotation,
            _ => RecordKind::Custom(s),
        })
    }
}

/// Catalog of accepted record kinds.
///
/// Core kinds are always accepted. Custom kinds must be registered before
/// a producer may append them.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    custom: BTreeSet<String>,
}

impl KindRegistry {
    /// A registry accepting only the closed core kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with custom kinds.
    pub fn with_custom<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            custom: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Register a custom kind.
    pub fn register(&mut self, kind: impl Into<String>) {
        self.custom.insert(kind.into());
    }

    /// Whether the given kind may be appended.
    pub fn is_allowed(&self, kind: &RecordKind) -> bool {
        match kind {
            RecordKind::Custom(s) => self.custom.contains(s),
            _ => true,
        }
    }
}

/// An optional detached signature carried by a record.
///
/// The ledger verifies signatures through the pluggable
/// [`SignatureVerifier`](crate::signature::SignatureVerifier) capability;
/// it never implements the algorithm itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSignature {
    /// Raw signature bytes.
    pub bytes: Vec<u8>,
    /// Algorithm tag, e.g. `"ed25519"`.
    pub algorithm: String,
    /// Opaque reference resolving to the signer's key.
    pub key_ref: String,
}

/// What a producer submits to `append`.
///
/// The store assigns `record_id`, `prev_hash` and `hash` at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    /// The chain to append to.
    pub anchor_id: AnchorId,
    /// Producer label.
    pub slot: String,
    /// Category, validated against the kind registry.
    pub kind: RecordKind,
    /// Producer-supplied timestamp (Unix milliseconds). Untrusted.
    pub timestamp: i64,
    /// Structured document. Opaque to the ledger.
    pub payload: PayloadValue,
    /// Optional detached signature over the canonical record bytes.
    pub signature: Option<RecordSignature>,
}

impl DraftRecord {
    /// Convenience constructor for unsigned drafts.
    pub fn new(
        anchor_id: impl Into<AnchorId>,
        slot: impl Into<String>,
        kind: RecordKind,
        timestamp: i64,
        payload: PayloadValue,
    ) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            slot: slot.into(),
            kind,
            timestamp,
            payload,
            signature: None,
        }
    }

    /// Attach a signature.
    pub fn with_signature(mut self, signature: RecordSignature) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// A committed, immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Schema version.
    pub version: u8,
    /// Position within the anchor's chain (1-indexed).
    pub record_id: RecordId,
    /// The owning chain.
    pub anchor_id: AnchorId,
    /// Producer label.
    pub slot: String,
    /// Category.
    pub kind: RecordKind,
    /// Producer-supplied timestamp (Unix milliseconds).
    pub timestamp: i64,
    /// Hash of the preceding record; [`RecordHash::GENESIS`] for the first.
    pub prev_hash: RecordHash,
    /// This record's hash.
    pub hash: RecordHash,
    /// Structured document.
    pub payload: PayloadValue,
    /// Optional detached signature.
    pub signature: Option<RecordSignature>,
}

impl LedgerRecord {
    /// Whether this is the first record of its chain.
    pub fn is_genesis(&self) -> bool {
        self.record_id == RecordId::FIRST && self.prev_hash == RecordHash::GENESIS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in [
            RecordKind::Create,
            RecordKind::Update,
            RecordKind::Attest,
            RecordKind::KeyRotation,
            RecordKind::Custom("REGIME_SHIFT".into()),
        ] {
            let s: String = kind.clone().into();
            assert_eq!(RecordKind::try_from(s).unwrap(), kind);
        }
    }

    #[test]
    fn test_core_kinds_always_allowed() {
        let registry = KindRegistry::new();
        assert!(registry.is_allowed(&RecordKind::Create));
        assert!(registry.is_allowed(&RecordKind::KeyRotation));
        assert!(!registry.is_allowed(&RecordKind::Custom("REGIME_SHIFT".into())));
    }

    #[test]
    fn test_registered_custom_kind_allowed() {
        let registry = KindRegistry::with_custom(["REGIME_SHIFT"]);
        assert!(registry.is_allowed(&RecordKind::Custom("REGIME_SHIFT".into())));
        assert!(!registry.is_allowed(&RecordKind::Custom("OTHER".into())));
    }

    #[test]
    fn test_draft_builder() {
        let draft = DraftRecord::new(
            "anchor-1",
            "threshold-detector",
            RecordKind::Create,
            1_736_870_400_000,
            PayloadValue::empty(),
        );
        assert!(draft.signature.is_none());
        assert_eq!(draft.kind, RecordKind::Create);
    }
}
