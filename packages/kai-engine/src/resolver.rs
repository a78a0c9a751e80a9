//! Reference Resolver (C8, §4.8): maps a user-supplied string to
//! `(NodeId, NodeKind)`. Resolution order, first match wins:
//! selector, named ref, slug, full hex id, short hex prefix.

use kai_storage::canonical::{from_hex, hex, NodeId};
use kai_storage::model::NodeKind;
use kai_storage::store::SqliteStore;

use crate::error::{EngineError, Result};

const KINDS: &[NodeKind] = &[
    NodeKind::File,
    NodeKind::Module,
    NodeKind::Symbol,
    NodeKind::Snapshot,
    NodeKind::ChangeSet,
    NodeKind::ChangeType,
    NodeKind::Workspace,
    NodeKind::Review,
    NodeKind::ReviewComment,
];

/// Resolve `input` to a node id and kind, optionally constrained to
/// `expected_kind`. Returns `EngineError::NotFound` if nothing matches and
/// `EngineError::AmbiguousPrefix` if a short hex prefix matches more than
/// one node.
pub fn resolve(store: &SqliteStore, input: &str, expected_kind: Option<NodeKind>) -> Result<(NodeId, NodeKind)> {
    if let Some(hit) = resolve_selector(store, input)? {
        return Ok(filter_kind(hit, expected_kind)?);
    }
    if let Ok(hit) = store.get_ref(input) {
        return Ok(filter_kind(hit, expected_kind)?);
    }
    if let Some(id) = store.resolve_slug(input)? {
        let node = store.get_node(&id)?;
        return Ok(filter_kind((id, node.kind), expected_kind)?);
    }
    if input.len() == 64 {
        if let Some(id) = from_hex(input) {
            let node = store.get_node(&id)?;
            return Ok(filter_kind((id, node.kind), expected_kind)?);
        }
    }
    if input.len() >= 8 && input.chars().all(|c| c.is_ascii_hexdigit()) {
        return resolve_prefix(store, input, expected_kind);
    }
    Err(EngineError::not_found(format!("could not resolve {input:?}")))
}

fn filter_kind(hit: (NodeId, NodeKind), expected: Option<NodeKind>) -> Result<(NodeId, NodeKind)> {
    if let Some(kind) = expected {
        if hit.1 != kind {
            return Err(EngineError::not_found(format!(
                "{} resolved to {} but {} was expected",
                hex(&hit.0),
                hit.1,
                kind
            )));
        }
    }
    Ok(hit)
}

fn resolve_selector(store: &SqliteStore, input: &str) -> Result<Option<(NodeId, NodeKind)>> {
    let Some(body) = input.strip_prefix('@') else { return Ok(None) };

    if let Some(rest) = body.strip_prefix("snap:") {
        return resolve_log_selector(store, NodeKind::Snapshot, rest);
    }
    if let Some(rest) = body.strip_prefix("cs:") {
        return resolve_log_selector(store, NodeKind::ChangeSet, rest);
    }
    if let Some(rest) = body.strip_prefix("ws:") {
        let Some((name, role)) = rest.rsplit_once(':') else {
            return Err(EngineError::not_found(format!("malformed workspace selector {input:?}")));
        };
        let ref_name = match role {
            "head" => format!("ws.{name}.head"),
            "base" => format!("ws.{name}.base"),
            _ => return Err(EngineError::not_found(format!("unknown workspace selector role {role:?}"))),
        };
        return Ok(Some(store.get_ref(&ref_name)?));
    }
    Err(EngineError::not_found(format!("unknown selector {input:?}")))
}

fn resolve_log_selector(store: &SqliteStore, kind: NodeKind, rest: &str) -> Result<Option<(NodeId, NodeKind)>> {
    let id = match rest {
        "last" => store.latest_log(kind)?,
        "prev" => nth_back(store, kind, 1)?,
        _ => {
            let Some(n) = rest.strip_prefix("last~") else {
                return Err(EngineError::not_found(format!("unknown selector @{kind}:{rest}")));
            };
            let n: i64 = n
                .parse()
                .map_err(|_| EngineError::not_found(format!("bad selector offset {n:?}")))?;
            nth_back(store, kind, n)?
        }
    };
    match id {
        Some(id) => Ok(Some((id, kind))),
        None => Err(EngineError::not_found(format!("no {kind} in log"))),
    }
}

fn nth_back(store: &SqliteStore, kind: NodeKind, n: i64) -> Result<Option<NodeId>> {
    let len = store.log_len(kind)?;
    let seq = len - n;
    if seq < 1 {
        return Ok(None);
    }
    Ok(store.log_at(kind, seq)?)
}

fn resolve_prefix(store: &SqliteStore, prefix: &str, expected_kind: Option<NodeKind>) -> Result<(NodeId, NodeKind)> {
    let prefix_lower = prefix.to_ascii_lowercase();
    let kinds: &[NodeKind] = match expected_kind {
        Some(ref k) => std::slice::from_ref(k),
        None => KINDS,
    };
    let mut matches: Vec<(NodeId, NodeKind)> = Vec::new();
    for kind in kinds {
        for node in store.get_nodes_by_kind(*kind)? {
            if hex(&node.id).starts_with(&prefix_lower) {
                matches.push((node.id, *kind));
            }
        }
    }
    match matches.len() {
        0 => Err(EngineError::not_found(format!("no node with prefix {prefix:?}"))),
        1 => Ok(matches[0]),
        n => Err(EngineError::ambiguous_prefix(prefix, n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_storage::payloads::FilePayload;

    fn store_with_file(path: &str, digest: &str) -> (SqliteStore, NodeId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let payload = kai_storage::canonical::to_canonical_value(&FilePayload {
            path: path.to_string(),
            lang: "rust".to_string(),
            digest: digest.to_string(),
        });
        let id = store.insert_node(&tx, NodeKind::File, payload, 1).unwrap();
        tx.commit().unwrap();
        (store, id)
    }

    #[test]
    fn full_hex_id_resolves() {
        let (store, id) = store_with_file("a.rs", "deadbeef");
        let (resolved, kind) = resolve(&store, &hex(&id), None).unwrap();
        assert_eq!(resolved, id);
        assert_eq!(kind, NodeKind::File);
    }

    #[test]
    fn short_prefix_resolves_when_unique() {
        let (store, id) = store_with_file("a.rs", "deadbeef");
        let prefix = &hex(&id)[..10];
        let (resolved, _) = resolve(&store, prefix, None).unwrap();
        assert_eq!(resolved, id);
    }

    #[test]
    fn ambiguous_prefix_when_kind_unconstrained_but_no_collision_still_unique() {
        let (store, id) = store_with_file("a.rs", "deadbeef");
        let prefix = &hex(&id)[..8];
        let result = resolve(&store, prefix, Some(NodeKind::File));
        assert!(result.is_ok());
    }

    #[test]
    fn unknown_input_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = resolve(&store, "nonexistent", None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn snap_last_consults_log_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let payload = kai_storage::canonical::to_canonical_value(&serde_json::json!({"x": 1}));
        let id = store.insert_node(&tx, NodeKind::Snapshot, payload, 1).unwrap();
        store.append_log(&tx, NodeKind::Snapshot, &id).unwrap();
        tx.commit().unwrap();

        let (resolved, kind) = resolve(&store, "@snap:last", None).unwrap();
        assert_eq!(resolved, id);
        assert_eq!(kind, NodeKind::Snapshot);
    }

    #[test]
    fn snap_prev_is_not_found_with_only_one_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let payload = kai_storage::canonical::to_canonical_value(&serde_json::json!({"x": 1}));
        let id = store.insert_node(&tx, NodeKind::Snapshot, payload, 1).unwrap();
        store.append_log(&tx, NodeKind::Snapshot, &id).unwrap();
        tx.commit().unwrap();

        let err = resolve(&store, "@snap:prev", None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
