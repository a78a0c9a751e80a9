//! Workspace & Integration (C6, §4.6): the mutable overlay lifecycle,
//! staging new snapshots against a workspace head, and three-way
//! integration into a target snapshot via the merge engine (C7).

use std::collections::{BTreeMap, BTreeSet};

use kai_core::{merge_file, MergeInput, MergeOutcome};
use kai_storage::canonical::{hex, random_identity_id, to_canonical_value, NodeId};
use kai_storage::model::{EdgeType, NodeKind};
use kai_storage::payloads::{FilePayload, SnapshotPayload, WorkspacePayload, WorkspaceStatus};
use kai_storage::store::SqliteStore;
use tracing::{info, warn};

use crate::changeset::build_changeset;
use crate::error::{EngineError, Result};
use crate::file_source::FileSource;
use crate::matcher::Matcher;
use crate::snapshot::create_snapshot;

/// Creates a new active Workspace based on `base_snapshot` (§4.6.1). Maintains
/// the `ws.<name>.base`/`ws.<name>.head` auto-refs (§4.8).
pub fn create_workspace(
    store: &SqliteStore,
    name: &str,
    base_snapshot: &NodeId,
    now_ms: i64,
) -> Result<NodeId> {
    let id = random_identity_id();
    let payload = to_canonical_value(&WorkspacePayload {
        name: name.to_string(),
        base_snapshot: hex(base_snapshot),
        head_snapshot: hex(base_snapshot),
        status: WorkspaceStatus::Active,
        open_change_sets: Vec::new(),
        description: String::new(),
        created_at: now_ms,
    });
    let tx = store.begin_tx()?;
    store.insert_identity_node(&tx, NodeKind::Workspace, id, payload, now_ms)?;
    store.insert_edge(&tx, &id, EdgeType::BasedOn, base_snapshot, None, now_ms)?;
    store.set_singleton_edge(&tx, &id, EdgeType::HeadAt, base_snapshot, now_ms)?;
    store.set_ref(&tx, &format!("ws.{name}.base"), base_snapshot, NodeKind::Snapshot, now_ms)?;
    store.set_ref(&tx, &format!("ws.{name}.head"), base_snapshot, NodeKind::Snapshot, now_ms)?;
    tx.commit()?;
    info!(workspace = %hex(&id), name, "workspace created");
    Ok(id)
}

fn load_workspace(store: &SqliteStore, id: &NodeId) -> Result<WorkspacePayload> {
    let node = store.get_node(id)?;
    Ok(serde_json::from_value(node.payload)?)
}

fn save_workspace(store: &SqliteStore, id: &NodeId, payload: &WorkspacePayload) -> Result<()> {
    let tx = store.begin_tx()?;
    store.update_payload(&tx, id, to_canonical_value(payload))?;
    tx.commit()?;
    Ok(())
}

fn require_status(payload: &WorkspacePayload, expected: WorkspaceStatus, action: &str) -> Result<()> {
    if payload.status != expected {
        return Err(EngineError::invalid_state(format!(
            "cannot {action} workspace {:?} in status {:?}",
            payload.name, payload.status
        )));
    }
    Ok(())
}

/// `active -> shelved` (§4.6.1).
pub fn shelve(store: &SqliteStore, id: &NodeId, _now_ms: i64) -> Result<()> {
    let mut payload = load_workspace(store, id)?;
    require_status(&payload, WorkspaceStatus::Active, "shelve")?;
    payload.status = WorkspaceStatus::Shelved;
    save_workspace(store, id, &payload)
}

/// `shelved -> active` (§4.6.1).
pub fn unshelve(store: &SqliteStore, id: &NodeId, _now_ms: i64) -> Result<()> {
    let mut payload = load_workspace(store, id)?;
    require_status(&payload, WorkspaceStatus::Shelved, "unshelve")?;
    payload.status = WorkspaceStatus::Active;
    save_workspace(store, id, &payload)
}

/// `active|shelved -> closed`, terminal (§4.6.1).
pub fn close(store: &SqliteStore, id: &NodeId, _now_ms: i64) -> Result<()> {
    let mut payload = load_workspace(store, id)?;
    if payload.status == WorkspaceStatus::Closed {
        return Err(EngineError::invalid_state(format!(
            "workspace {:?} is already closed",
            payload.name
        )));
    }
    payload.status = WorkspaceStatus::Closed;
    save_workspace(store, id, &payload)
}

/// Result of [`stage`].
#[derive(Debug, Clone)]
pub enum StageOutcome {
    NoChanges,
    Staged {
        changeset_id: NodeId,
        head_snapshot: NodeId,
        files_changed: usize,
        change_types: usize,
    },
}

/// Stage(name_or_id, source, matcher) (§4.6.2): builds a new Snapshot,
/// checks for conflicts with the workspace head, and on success updates the
/// workspace's `openChangeSets` and `HEAD_AT` atomically.
pub fn stage(
    store: &SqliteStore,
    workspace_id: &NodeId,
    matcher: &dyn Matcher,
    source: &dyn FileSource,
    now_ms: i64,
) -> Result<StageOutcome> {
    let mut payload = load_workspace(store, workspace_id)?;
    require_status(&payload, WorkspaceStatus::Active, "stage into")?;

    let head_id = kai_storage::canonical::from_hex(&payload.head_snapshot)
        .ok_or_else(|| EngineError::not_found("workspace head is not a valid snapshot id"))?;

    let new_snapshot = create_snapshot(store, matcher, source, now_ms)?;
    if new_snapshot.snapshot_id == head_id {
        return Ok(StageOutcome::NoChanges);
    }

    let summary = build_changeset(store, matcher, &head_id, &new_snapshot.snapshot_id, now_ms)?;

    let tx = store.begin_tx()?;
    payload.open_change_sets.push(hex(&summary.changeset_id));
    payload.head_snapshot = hex(&new_snapshot.snapshot_id);
    store.update_payload(&tx, workspace_id, to_canonical_value(&payload))?;
    store.insert_edge(&tx, workspace_id, EdgeType::HasChangeSet, &summary.changeset_id, None, now_ms)?;
    store.set_singleton_edge(&tx, workspace_id, EdgeType::HeadAt, &new_snapshot.snapshot_id, now_ms)?;
    tx.commit()?;

    let ref_tx = store.begin_tx()?;
    store.set_ref(&ref_tx, &format!("ws.{}.head", payload.name), &new_snapshot.snapshot_id, NodeKind::Snapshot, now_ms)?;
    ref_tx.commit()?;

    Ok(StageOutcome::Staged {
        changeset_id: summary.changeset_id,
        head_snapshot: new_snapshot.snapshot_id,
        files_changed: summary.files_changed,
        change_types: summary.change_types.len(),
    })
}

/// Result of [`integrate`].
#[derive(Debug, Clone)]
pub struct IntegrationResult {
    pub result_snapshot: NodeId,
    pub applied_change_sets: Vec<NodeId>,
    pub auto_resolved: usize,
}

/// Integrate(workspace, targetSnapshot) (§4.6.3): fast-forwards when
/// `base == target`, else delegates path-level three-way merge to C7 and
/// assembles a new merged Snapshot on success.
pub fn integrate(
    store: &SqliteStore,
    workspace_id: &NodeId,
    target: &NodeId,
    now_ms: i64,
) -> Result<IntegrationResult> {
    let payload = load_workspace(store, workspace_id)?;
    let base = kai_storage::canonical::from_hex(&payload.base_snapshot)
        .ok_or_else(|| EngineError::not_found("workspace base is not a valid snapshot id"))?;
    let head = kai_storage::canonical::from_hex(&payload.head_snapshot)
        .ok_or_else(|| EngineError::not_found("workspace head is not a valid snapshot id"))?;
    let open_change_sets: Vec<NodeId> = payload
        .open_change_sets
        .iter()
        .filter_map(|s| kai_storage::canonical::from_hex(s))
        .collect();

    if base == *target {
        return Ok(IntegrationResult {
            result_snapshot: head,
            applied_change_sets: open_change_sets,
            auto_resolved: 0,
        });
    }

    let base_files = load_file_map_with_lang(store, &base)?;
    let left_files = load_file_map_with_lang(store, &head)?;
    let right_files = load_file_map_with_lang(store, target)?;

    let mut candidate_paths = BTreeSet::new();
    for path in base_files.keys().chain(left_files.keys()).chain(right_files.keys()) {
        let modified_in_ws = left_files.get(path).map(|f| &f.1) != base_files.get(path).map(|f| &f.1);
        let modified_in_target = right_files.get(path).map(|f| &f.1) != base_files.get(path).map(|f| &f.1);
        if modified_in_ws && modified_in_target {
            candidate_paths.insert(path.clone());
        }
    }

    let mut auto_resolved_blobs: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for path in &candidate_paths {
        let lang = right_files
            .get(path)
            .or_else(|| left_files.get(path))
            .map(|f| f.2.clone())
            .unwrap_or_default();
        let Some(language) = kai_core::Language::from_extension(ext_of(path)) else {
            conflicts.push(kai_core::Conflict {
                kind: kai_core::ConflictKind::BodyDiverged,
                key: kai_core::UnitKey {
                    file_path: path.clone(),
                    symbol_path: Vec::new(),
                    kind: kai_core::UnitKind::Module,
                },
                message: format!("no parser for language {lang:?}; cannot auto-merge {path}"),
            });
            continue;
        };
        let base_bytes = read_if_present(store, &base_files, path)?;
        let left_bytes = read_if_present(store, &left_files, path)?;
        let right_bytes = read_if_present(store, &right_files, path)?;

        let input = MergeInput {
            base: base_bytes.as_deref(),
            left: left_bytes.as_deref(),
            right: right_bytes.as_deref(),
            language,
            path,
        };
        match merge_file(&input) {
            MergeOutcome::Merged(bytes) => {
                auto_resolved_blobs.insert(path.clone(), bytes);
            }
            MergeOutcome::Conflicts(path_conflicts) => {
                conflicts.extend(path_conflicts);
            }
        }
    }

    if !conflicts.is_empty() {
        warn!(workspace = %hex(workspace_id), conflicts = conflicts.len(), "integration aborted");
        return Err(EngineError::IntegrationConflict(conflicts));
    }

    // Merged file set: R, overridden by ws-only changes, overridden by
    // auto-merged paths, minus workspace deletions (§4.6.3 step 4).
    let mut final_files: BTreeMap<String, (Vec<u8>, String)> = BTreeMap::new();
    for (path, (_, digest, lang)) in &right_files {
        let bytes = store.read_blob(digest)?;
        final_files.insert(path.clone(), (bytes, lang.clone()));
    }
    for (path, (_, digest, lang)) in &left_files {
        if base_files.get(path).map(|f| &f.1) != Some(digest) {
            let bytes = store.read_blob(digest)?;
            final_files.insert(path.clone(), (bytes, lang.clone()));
        }
    }
    for path in base_files.keys() {
        if !left_files.contains_key(path) {
            final_files.remove(path);
        }
    }
    for (path, bytes) in &auto_resolved_blobs {
        let lang = right_files
            .get(path)
            .or_else(|| left_files.get(path))
            .map(|f| f.2.clone())
            .unwrap_or_else(|| crate::file_source::guess_lang(path));
        final_files.insert(path.clone(), (bytes.clone(), lang));
    }

    let tx = store.begin_tx()?;
    let mut file_digests = Vec::with_capacity(final_files.len());
    for (path, (bytes, lang)) in &final_files {
        let digest = store.write_blob(&tx, bytes)?;
        let file_payload = to_canonical_value(&FilePayload {
            path: path.clone(),
            lang: lang.clone(),
            digest,
        });
        let file_id = store.insert_node(&tx, NodeKind::File, file_payload, now_ms)?;
        file_digests.push(hex(&file_id));
    }

    let snapshot_payload = to_canonical_value(&SnapshotPayload {
        source_type: "merged".to_string(),
        source_ref: format!("integrate:{}->{}", hex(workspace_id), hex(target)),
        file_count: final_files.len() as i64,
        created_at: now_ms,
        file_digests,
        files: None,
        integrated_from: Some(hex(workspace_id)),
        target_snapshot: Some(hex(target)),
        git_ref: None,
    });
    let result_snapshot = store.insert_node(&tx, NodeKind::Snapshot, snapshot_payload, now_ms)?;
    for path in final_files.keys() {
        if let Some((id, _, _)) = right_files.get(path).or_else(|| left_files.get(path)) {
            store.insert_edge(&tx, &result_snapshot, EdgeType::HasFile, id, None, now_ms)?;
        }
    }
    store.append_log(&tx, NodeKind::Snapshot, &result_snapshot)?;
    tx.commit()?;

    info!(
        workspace = %hex(workspace_id),
        result = %hex(&result_snapshot),
        auto_resolved = auto_resolved_blobs.len(),
        "integration succeeded"
    );
    Ok(IntegrationResult {
        result_snapshot,
        applied_change_sets: open_change_sets,
        auto_resolved: auto_resolved_blobs.len(),
    })
}

fn ext_of(path: &str) -> &str {
    std::path::Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or_default()
}

fn read_if_present(
    store: &SqliteStore,
    files: &BTreeMap<String, (NodeId, String, String)>,
    path: &str,
) -> Result<Option<Vec<u8>>> {
    match files.get(path) {
        Some((_, digest, _)) => Ok(Some(store.read_blob(digest)?)),
        None => Ok(None),
    }
}

fn load_file_map_with_lang(store: &SqliteStore, snapshot_id: &NodeId) -> Result<BTreeMap<String, (NodeId, String, String)>> {
    let mut out = BTreeMap::new();
    for edge in store.get_edges(snapshot_id, EdgeType::HasFile)? {
        let node = store.get_node(&edge.dst)?;
        let path = node.payload["path"].as_str().unwrap_or_default().to_string();
        let digest = node.payload["digest"].as_str().unwrap_or_default().to_string();
        let lang = node.payload["lang"].as_str().unwrap_or_default().to_string();
        out.insert(path, (edge.dst, digest, lang));
    }
    Ok(out)
}
