//! Content fingerprints for deduplicating log records
//!
//! A fingerprint is the 128-bit MD5 digest of a canonical serialization of a
//! decoded JSON payload. Object keys are emitted in sorted order so the digest
//! does not depend on the key order in the log line.
//!
//! Uniqueness is probabilistic: request ids and timestamps inside the payload
//! make two distinct events colliding extremely unlikely. This is not a
//! cryptographic property.
//!
//! Numbers are hashed in the textual form they had in the log line. This
//! relies on serde_json's `arbitrary_precision` feature; without it integers
//! beyond `u64` decode to `f64` and distinct values can serialize alike.

use serde_json::{Map, Value};
use std::fmt;

/// Width of a fingerprint in bytes
pub const FINGERPRINT_LEN: usize = 16;

/// 128-bit digest of a canonical JSON payload, kept in binary form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Compute the fingerprint of a decoded JSON value
    pub fn of(value: &Value) -> Self {
        Self(md5::compute(canonical_json(value)).0)
    }

    /// Raw digest bytes, as stored in the database
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex rendering, for logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Serialize a JSON value compactly with object keys in sorted order
pub fn canonical_json(value: &Value) -> Vec<u8> {
    sorted(value).to_string().into_bytes()
}

// Rebuilds objects in key order; insertion order is what gets serialized even
// when serde_json is built with `preserve_order`.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut out = Map::with_capacity(map.len());
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), sorted(v));
                }
            }
            Value::Object(out)
        },
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value: Value =
            serde_json::from_str(r#"{"b":1,"a":{"z":null,"y":[{"d":2,"c":3}]}}"#).unwrap();
        assert_eq!(
            String::from_utf8(canonical_json(&value)).unwrap(),
            r#"{"a":{"y":[{"c":3,"d":2}],"z":null},"b":1}"#
        );
    }

    #[test]
    fn test_fingerprint_known_digest() {
        // MD5 of the two bytes "{}"
        let fingerprint = Fingerprint::of(&json!({}));
        assert_eq!(fingerprint.to_hex(), "99914b932bd37a50b983c5e7c90ae93b");
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"request_id":"a","datetime":"x"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"datetime":"x","request_id":"a"}"#).unwrap();
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = Fingerprint::of(&json!({"request_id": "a"}));
        let b = Fingerprint::of(&json!({"request_id": "b"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_hex() {
        let fingerprint = Fingerprint::of(&json!({"request_id": "a"}));
        assert_eq!(fingerprint.to_string(), fingerprint.to_hex());
        assert_eq!(fingerprint.to_string().len(), 2 * FINGERPRINT_LEN);
    }

    #[test]
    fn test_huge_integers_keep_their_digits() {
        // both round to the same f64
        let a: Value = serde_json::from_str(r#"{"n":123456789012345678901234567890}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"n":123456789012345678901234567891}"#).unwrap();

        assert_eq!(
            String::from_utf8(canonical_json(&a)).unwrap(),
            r#"{"n":123456789012345678901234567890}"#
        );
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    proptest! {
        #[test]
        fn prop_fingerprint_stable_under_key_permutation(
            entries in proptest::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 1..10),
        ) {
            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let reversed: Map<String, Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();

            let a = Fingerprint::of(&Value::Object(forward));
            let b = Fingerprint::of(&Value::Object(reversed));
            prop_assert_eq!(a, b);
            prop_assert_eq!(a, Fingerprint::of(&Value::Object(
                entries.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
            )));
        }
    }
}
