//! Proptest strategies for ledger inputs.

use proptest::prelude::*;

use avl_core::{DraftRecord, PayloadValue, RecordKind};

/// Arbitrary structured payloads within the supported value set: no
/// floats, string keys only, bounded depth.
pub fn arb_payload() -> impl Strategy<Value = PayloadValue> {
    let leaf = prop_oneof![
        Just(PayloadValue::Null),
        any::<bool>().prop_map(PayloadValue::Bool),
        any::<i64>().prop_map(PayloadValue::Int),
        "[a-zA-Z0-9 _-]{0,24}".prop_map(PayloadValue::Text),
    ];
    leaf.prop_recursive(4, 48, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(PayloadValue::Array),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..8).prop_map(PayloadValue::Map),
        ]
    })
}

fn arb_kind() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        Just(RecordKind::Create),
        Just(RecordKind::Update),
        Just(RecordKind::Attest),
        Just(RecordKind::KeyRotation),
    ]
}

/// Arbitrary unsigned drafts for a fixed anchor.
pub fn arb_draft(anchor: &'static str) -> impl Strategy<Value = DraftRecord> {
    (
        "[a-z-]{1,16}",
        arb_kind(),
        0i64..=4_102_444_800_000,
        arb_payload(),
    )
        .prop_map(move |(slot, kind, timestamp, payload)| {
            DraftRecord::new(anchor, slot, kind, timestamp, payload)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use avl_core::{canonical_record_bytes, HashInput, RecordHash, DEFAULT_MAX_PAYLOAD_BYTES};

    proptest! {
        #[test]
        fn prop_generated_drafts_encode(draft in arb_draft("anchor-1")) {
            let bytes = canonical_record_bytes(
                &HashInput::from_draft(&draft, &RecordHash::GENESIS),
                DEFAULT_MAX_PAYLOAD_BYTES,
            );
            prop_assert!(bytes.is_ok());
        }

        #[test]
        fn prop_generated_payloads_json_roundtrip(payload in arb_payload()) {
            let json = payload.to_json();
            prop_assert_eq!(PayloadValue::from_json(&json).unwrap(), payload);
        }
    }
}
