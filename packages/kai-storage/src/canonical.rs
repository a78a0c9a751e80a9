//! Deterministic JSON encoding and content hashing (C1).
//!
//! `serde_json::Map` is backed by a `BTreeMap` as long as the `preserve_order`
//! feature is not enabled (it isn't, anywhere in this workspace), so object
//! keys already come out sorted by byte value on serialization — which for
//! well-formed UTF-8 is the same ordering as by Unicode code point. That
//! gives us most of canonical-JSON for free; this module exists to make the
//! guarantee explicit, to reject values that would not round-trip
//! (arbitrary-precision floats, NaN/Infinity can't appear in `serde_json`
//! anyway), and to centralize the two hash derivations the rest of the
//! store depends on.

use serde::Serialize;
use serde_json::Value;

pub type NodeId = [u8; 32];

/// Serialize `value` to its canonical byte form.
///
/// Objects are re-keyed through `serde_json::Map`'s natural `BTreeMap`
/// ordering, arrays keep their original order, and the output carries no
/// insignificant whitespace. Calling this twice on semantically equal
/// values always yields byte-identical output.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    // `to_vec` already produces the compact, sorted-key form described
    // above; we route through `canonicalize` first so that a `Value` built
    // by hand (e.g. via `json!{}` macro nesting) is normalized the same way
    // a round-tripped one would be.
    let normalized = canonicalize(value);
    serde_json::to_vec(&normalized).expect("Value serialization is infallible")
}

/// Recursively rebuild `value` so that every nested object is ordered the
/// canonical way. A no-op for conforming values; matters for a `Value`
/// assembled from a non-canonical source.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `NodeID(kind, payload) = BLAKE3(kind-bytes || 0x0A || canonicalJSON(payload))`
pub fn node_id(kind: &str, payload: &Value) -> NodeId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(&canonical_json(payload));
    *hasher.finalize().as_bytes()
}

/// `BlobHash(bytes) = BLAKE3(bytes)`
pub fn blob_hash(bytes: &[u8]) -> NodeId {
    *blake3::hash(bytes).as_bytes()
}

/// Mints a fresh identity-addressed node id (Workspace/Review/ReviewComment,
/// §3.1). The spec calls for 16 random bytes; this store uses one 32-byte
/// `NodeId` type for every kind, so all 32 bytes are randomized instead of
/// zero-padding a 16-byte value.
pub fn random_identity_id() -> NodeId {
    rand::random()
}

pub fn hex(id: &NodeId) -> String {
    id.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn from_hex(s: &str) -> Option<NodeId> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Serialize any `Serialize` value to a `serde_json::Value` and then run it
/// through `canonicalize` — the path payload typed structs use before their
/// id is derived.
pub fn to_canonical_value<T: Serialize>(value: &T) -> Value {
    canonicalize(&serde_json::to_value(value).expect("payload structs always serialize"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let a = json!([3, 1, 2]);
        let b = json!([1, 2, 3]);
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn canonical_json_preserves_integers() {
        let v = json!({"count": 42});
        let bytes = canonical_json(&v);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("42"));
        assert!(!text.contains("42.0"));
    }

    #[test]
    fn canonical_round_trip_law() {
        // canonicalJSON(parse(canonicalJSON(v))) == canonicalJSON(v)
        let v = json!({"z": [1,2,{"y": true, "x": null}], "a": "hello"});
        let once = canonical_json(&v);
        let reparsed: Value = serde_json::from_slice(&once).unwrap();
        let twice = canonical_json(&reparsed);
        assert_eq!(once, twice);
    }

    #[test]
    fn node_id_is_pure_function_of_kind_and_payload() {
        let p1 = json!({"path": "a.rs", "lang": "rust", "digest": "abc"});
        let p2 = json!({"digest": "abc", "lang": "rust", "path": "a.rs"});
        assert_eq!(node_id("File", &p1), node_id("File", &p2));
    }

    #[test]
    fn node_id_distinguishes_kind() {
        let p = json!({"x": 1});
        assert_ne!(node_id("File", &p), node_id("Module", &p));
    }

    #[test]
    fn hex_round_trip() {
        let id = blob_hash(b"hello world");
        let s = hex(&id);
        assert_eq!(s.len(), 64);
        assert_eq!(from_hex(&s).unwrap(), id);
    }
}
