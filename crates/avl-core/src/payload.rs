//! Structured payload documents.
//!
//! Payloads are restricted to null, booleans, 64-bit integers, strings,
//! arrays and string-keyed maps. Floats are rejected outright, which
//! removes the float-representation ambiguity from canonical encoding:
//! there is no value for which `1` and `1.0` could collide.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EncodingError;

/// A structured payload value.
///
/// Maps use `BTreeMap` so iteration order is already deterministic at the
/// value level; the canonical encoder additionally sorts by encoded key
/// bytes, which for string keys coincides with `BTreeMap` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer. The only numeric type payloads may carry.
    Int(i64),
    /// UTF-8 string.
    Text(String),
    /// Ordered list.
    Array(Vec<PayloadValue>),
    /// String-keyed document.
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    /// An empty map payload.
    pub fn empty() -> Self {
        PayloadValue::Map(BTreeMap::new())
    }

    /// Look up a top-level key, if this value is a map.
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        match self {
            PayloadValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Producer-supplied quality signal for trust scoring.
    ///
    /// Reads an optional integer `confidence` field (0..=100) from a map
    /// payload and normalizes it to [0,1]. Absent, non-map, or out-of-range
    /// values default to 1.0 so producers that do not report confidence are
    /// not penalized.
    pub fn confidence(&self) -> f64 {
        match self.get("confidence") {
            Some(PayloadValue::Int(n)) if (0..=100).contains(n) => *n as f64 / 100.0,
            _ => 1.0,
        }
    }

    /// Convert from a JSON document, rejecting floats and non-string keys.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EncodingError> {
        match value {
            serde_json::Value::Null => Ok(PayloadValue::Null),
            serde_json::Value::Bool(b) => Ok(PayloadValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(PayloadValue::Int)
                .ok_or_else(|| EncodingError::UnsupportedNumber(n.to_string())),
            serde_json::Value::String(s) => Ok(PayloadValue::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(PayloadValue::Array),
            serde_json::Value::Object(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    map.insert(k.clone(), Self::from_json(v)?);
                }
                Ok(PayloadValue::Map(map))
            }
        }
    }

    /// Convert to a JSON document. Infallible: every payload value has a
    /// JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PayloadValue::Null => serde_json::Value::Null,
            PayloadValue::Bool(b) => serde_json::Value::Bool(*b),
            PayloadValue::Int(n) => serde_json::Value::Number((*n).into()),
            PayloadValue::Text(s) => serde_json::Value::String(s.clone()),
            PayloadValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            PayloadValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Default for PayloadValue {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shorthand for building a map payload from (key, value) pairs.
pub fn payload_map<const N: usize>(entries: [(&str, PayloadValue); N]) -> PayloadValue {
    PayloadValue::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"v": 1, "tags": ["a", "b"], "ok": true, "note": null}"#)
                .unwrap();
        let payload = PayloadValue::from_json(&json).unwrap();
        assert_eq!(payload.to_json(), json);
    }

    #[test]
    fn test_floats_rejected() {
        let json: serde_json::Value = serde_json::from_str(r#"{"v": 1.5}"#).unwrap();
        let err = PayloadValue::from_json(&json).unwrap_err();
        assert!(matches!(err, EncodingError::UnsupportedNumber(_)));
    }

    #[test]
    fn test_confidence_default() {
        assert_eq!(PayloadValue::empty().confidence(), 1.0);
        assert_eq!(PayloadValue::Int(3).confidence(), 1.0);
    }

    #[test]
    fn test_confidence_normalized() {
        let p = payload_map([("confidence", PayloadValue::Int(80))]);
        assert!((p.confidence() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_out_of_range_ignored() {
        let p = payload_map([("confidence", PayloadValue::Int(150))]);
        assert_eq!(p.confidence(), 1.0);
    }
}
