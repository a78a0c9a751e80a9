//! Pack format (§6.6): a self-contained, content-verified bundle of nodes
//! for external sync. `[4-byte BE header length][header JSON][object
//! bodies]`, the whole thing zstd-compressed. Each body is
//! `kind-bytes || 0x0A || canonical-json-payload`; for content-addressed
//! kinds `BLAKE3(body)` is the node id. Identity-addressed nodes
//! (workspaces) carry their real id in the payload under `_uuid` instead,
//! since the pack digest there is just a body checksum, not the id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kai_storage::canonical::{canonical_json, hex, node_id, NodeId};
use kai_storage::model::NodeKind;
use kai_storage::store::SqliteStore;

use crate::error::{EngineError, Result};

const UUID_KEY: &str = "_uuid";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackEntry {
    digest: String,
    kind: String,
    offset: u64,
    length: u64,
}

fn body_for(kind: NodeKind, id: &NodeId, payload: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(kind.as_str().as_bytes());
    out.push(b'\n');
    let payload_bytes = if kind.is_identity_addressed() {
        let mut with_uuid = payload.clone();
        if let Value::Object(map) = &mut with_uuid {
            map.insert(UUID_KEY.to_string(), Value::String(hex(id)));
        }
        canonical_json(&with_uuid)
    } else {
        canonical_json(payload)
    };
    out.extend_from_slice(&payload_bytes);
    out
}

/// Builds a pack from `node_ids`, in the order given. Returns the
/// zstd-compressed bytes.
pub fn build_pack(store: &SqliteStore, node_ids: &[NodeId]) -> Result<Vec<u8>> {
    let mut entries = Vec::with_capacity(node_ids.len());
    let mut bodies = Vec::new();

    for id in node_ids {
        let node = store.get_node(id)?;
        let body = body_for(node.kind, id, &node.payload);
        let digest = if node.kind.is_identity_addressed() {
            hex(blake3::hash(&body).as_bytes())
        } else {
            hex(id)
        };
        entries.push(PackEntry {
            digest,
            kind: node.kind.as_str().to_string(),
            offset: bodies.len() as u64,
            length: body.len() as u64,
        });
        bodies.extend_from_slice(&body);
    }

    let header_json = serde_json::to_vec(&entries)?;
    let mut raw = Vec::with_capacity(4 + header_json.len() + bodies.len());
    raw.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
    raw.extend_from_slice(&header_json);
    raw.extend_from_slice(&bodies);

    zstd::encode_all(raw.as_slice(), 0).map_err(EngineError::Io)
}

/// A node read back out of a pack: its restored id, kind, and payload
/// (with `_uuid` stripped for identity-addressed kinds).
#[derive(Debug, Clone)]
pub struct UnpackedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub payload: Value,
}

/// Decompresses and verifies every object in a pack built by
/// [`build_pack`]. Content-addressed bodies must re-hash to their
/// recorded digest; identity-addressed bodies restore their id from
/// `_uuid`.
pub fn unpack(bytes: &[u8]) -> Result<Vec<UnpackedNode>> {
    let raw = zstd::decode_all(bytes).map_err(EngineError::Io)?;
    if raw.len() < 4 {
        return Err(EngineError::ParseError("pack too short for header length".to_string()));
    }
    let header_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let header_start = 4;
    let header_end = header_start + header_len;
    if raw.len() < header_end {
        return Err(EngineError::ParseError("pack header truncated".to_string()));
    }
    let entries: Vec<PackEntry> = serde_json::from_slice(&raw[header_start..header_end])?;
    let bodies = &raw[header_end..];

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let body = bodies
            .get(start..end)
            .ok_or_else(|| EngineError::ParseError(format!("pack entry {} out of range", entry.digest)))?;

        let kind = NodeKind::from_str(&entry.kind)
            .ok_or_else(|| EngineError::ParseError(format!("unknown node kind {:?}", entry.kind)))?;

        let newline = body
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| EngineError::ParseError(format!("pack entry {} missing header separator", entry.digest)))?;
        let payload_bytes = &body[newline + 1..];
        let mut payload: Value = serde_json::from_slice(payload_bytes)?;

        let id = if kind.is_identity_addressed() {
            let actual_digest = hex(blake3::hash(body).as_bytes());
            if actual_digest != entry.digest {
                return Err(EngineError::ParseError(format!("pack entry {} failed integrity check", entry.digest)));
            }
            let uuid_hex = payload
                .as_object_mut()
                .and_then(|m| m.remove(UUID_KEY))
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| EngineError::ParseError(format!("identity node {} missing _uuid", entry.digest)))?;
            kai_storage::canonical::from_hex(&uuid_hex)
                .ok_or_else(|| EngineError::ParseError(format!("identity node {} has malformed _uuid", entry.digest)))?
        } else {
            let recomputed = node_id(kind.as_str(), &payload);
            if hex(&recomputed) != entry.digest {
                return Err(EngineError::ParseError(format!("pack entry {} failed integrity check", entry.digest)));
            }
            recomputed
        };

        out.push(UnpackedNode { id, kind, payload });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_storage::payloads::FilePayload;

    #[test]
    fn content_addressed_round_trips_and_verifies() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let payload = kai_storage::canonical::to_canonical_value(&FilePayload {
            path: "a.rs".into(),
            lang: "rust".into(),
            digest: "deadbeef".into(),
        });
        let id = store.insert_node(&tx, NodeKind::File, payload, 1).unwrap();
        tx.commit().unwrap();

        let packed = build_pack(&store, &[id]).unwrap();
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked.len(), 1);
        assert_eq!(unpacked[0].id, id);
        assert_eq!(unpacked[0].kind, NodeKind::File);
    }

    #[test]
    fn identity_addressed_restores_uuid_and_strips_it_from_payload() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let id = kai_storage::canonical::random_identity_id();
        let payload = kai_storage::canonical::to_canonical_value(&kai_storage::payloads::WorkspacePayload {
            name: "feature".into(),
            base_snapshot: hex(&[0u8; 32]),
            head_snapshot: hex(&[0u8; 32]),
            status: kai_storage::payloads::WorkspaceStatus::Active,
            open_change_sets: Vec::new(),
            description: String::new(),
            created_at: 1,
        });
        store.insert_identity_node(&tx, NodeKind::Workspace, id, payload, 1).unwrap();
        tx.commit().unwrap();

        let packed = build_pack(&store, &[id]).unwrap();
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked[0].id, id);
        assert!(unpacked[0].payload.get("_uuid").is_none());
    }

    #[test]
    fn tampered_body_fails_integrity_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let payload = kai_storage::canonical::to_canonical_value(&FilePayload {
            path: "a.rs".into(),
            lang: "rust".into(),
            digest: "deadbeef".into(),
        });
        let id = store.insert_node(&tx, NodeKind::File, payload, 1).unwrap();
        tx.commit().unwrap();

        let mut packed = build_pack(&store, &[id]).unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0xFF;
        // A single flipped byte in the compressed stream either fails
        // decompression outright or corrupts a body past its digest check;
        // either way this must not silently succeed.
        assert!(unpack(&packed).is_err());
    }
}
