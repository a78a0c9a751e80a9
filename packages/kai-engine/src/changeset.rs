//! Change Detector orchestration (C5, §4.5.4) and intent rendering
//! (§4.5.4, SPEC_FULL intent table). Per-file classification lives in
//! `kai_core::change_detector`; this module diffs two Snapshots' file
//! sets, drives the detector over every changed path, and assembles the
//! ChangeSet node graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use kai_core::change_detector::{detect_file_change, ChangeCategory, ChangeType};
use kai_storage::canonical::{hex, NodeId};
use kai_storage::model::{EdgeType, NodeKind};
use kai_storage::payloads::{
    ChangeSetPayload, ChangeTypePayload, Evidence as EvidencePayload, FileRangeEvidence as FileRangeEvidencePayload,
};
use kai_storage::store::SqliteStore;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::matcher::Matcher;

#[derive(Debug, Clone)]
pub struct ChangeSetSummary {
    pub changeset_id: NodeId,
    pub files_changed: usize,
    pub change_types: Vec<ChangeType>,
    pub affected_modules: Vec<String>,
}

fn load_file_map(store: &SqliteStore, snapshot_id: &NodeId) -> Result<BTreeMap<String, (NodeId, String)>> {
    let mut out = BTreeMap::new();
    for edge in store.get_edges(snapshot_id, EdgeType::HasFile)? {
        let node = store.get_node(&edge.dst)?;
        let path = node.payload["path"].as_str().unwrap_or_default().to_string();
        let digest = node.payload["digest"].as_str().unwrap_or_default().to_string();
        out.insert(path, (edge.dst, digest));
    }
    Ok(out)
}

enum PathDiff {
    Added,
    Deleted,
    Modified,
}

struct PathChanges {
    modifies_files: Vec<NodeId>,
    change_types: Vec<(ChangeType, Vec<NodeId>)>,
}

/// Resolves a change detector's `"name:<fq_name>"` sentinel (§4.5.3) to the
/// indexed Symbol node it refers to, via the `DEFINES_IN` edge from Symbol
/// to File scoped to `head` (the snapshot context `analyze_symbols` wrote
/// it under). Returns `None` if the symbol was never indexed (e.g. the
/// language isn't extractable, or `analyze_symbols` hasn't run yet).
fn resolve_symbol(store: &SqliteStore, head: &NodeId, file_id: &NodeId, fq_name: &str) -> Result<Option<NodeId>> {
    for edge in store.get_edges_by_context_and_dst(head, EdgeType::DefinesIn, file_id)? {
        let node = store.get_node(&edge.src)?;
        if node.payload["fqName"].as_str() == Some(fq_name) {
            return Ok(Some(edge.src));
        }
    }
    Ok(None)
}

/// BuildChangeSet (§4.5.4): diffs `base`/`head` Snapshots' files, classifies
/// every add/modify, and inserts the ChangeSet node plus its `MODIFIES`,
/// `HAS`, and `AFFECTS` edges, all within one transaction.
pub fn build_changeset(
    store: &SqliteStore,
    matcher: &dyn Matcher,
    base: &NodeId,
    head: &NodeId,
    now_ms: i64,
) -> Result<ChangeSetSummary> {
    let base_files = load_file_map(store, base)?;
    let head_files = load_file_map(store, head)?;

    let mut paths: BTreeMap<String, PathDiff> = BTreeMap::new();
    for path in base_files.keys().chain(head_files.keys()) {
        if paths.contains_key(path) {
            continue;
        }
        let diff = match (base_files.get(path), head_files.get(path)) {
            (None, Some(_)) => PathDiff::Added,
            (Some(_), None) => PathDiff::Deleted,
            (Some((_, bd)), Some((_, hd))) if bd != hd => PathDiff::Modified,
            _ => continue,
        };
        paths.insert(path.clone(), diff);
    }

    // Blob reads, change detection and DEFINES_IN lookups all lock the
    // store's connection independently of any open `Tx` (store.rs's `Tx`
    // holds its guard for its whole lifetime), so everything that only
    // reads happens here, before `begin_tx`. Only graph writes happen
    // inside the transaction below.
    let previous = store.latest_log(NodeKind::ChangeSet)?;

    let mut per_path: BTreeMap<String, PathChanges> = BTreeMap::new();
    let mut affected: BTreeSet<String> = BTreeSet::new();

    for (path, diff) in &paths {
        let mut modifies_files = Vec::new();
        let before = match diff {
            PathDiff::Added => None,
            _ => {
                let (file_id, digest) = &base_files[path];
                modifies_files.push(*file_id);
                Some(store.read_blob(digest)?)
            }
        };
        let after_bytes = match diff {
            PathDiff::Deleted => {
                // No head content; detector still needs dispatch, so treat
                // as a zero-length "after" (the detector's file-level
                // short-circuits aren't consulted here — change detection
                // runs on paths modified within one snapshot pair, not the
                // merge engine's deletion handling).
                continue;
            }
            _ => {
                let (file_id, digest) = &head_files[path];
                modifies_files.push(*file_id);
                store.read_blob(digest)?
            }
        };

        let change_types = detect_file_change(path, before.as_deref(), &after_bytes);
        for module_name in matcher.match_path(path) {
            affected.insert(module_name);
        }

        let head_file_id = head_files[path].0;
        let mut resolved_types = Vec::with_capacity(change_types.len());
        for ct in change_types {
            let mut symbol_ids = Vec::new();
            for symbol_ref in &ct.evidence.symbols {
                if let Some(fq_name) = symbol_ref.strip_prefix("name:") {
                    if let Some(symbol_id) = resolve_symbol(store, head, &head_file_id, fq_name)? {
                        symbol_ids.push(symbol_id);
                    }
                } else if let Some(symbol_id) = kai_storage::canonical::from_hex(symbol_ref) {
                    symbol_ids.push(symbol_id);
                }
            }
            resolved_types.push((ct, symbol_ids));
        }

        per_path.insert(path.clone(), PathChanges { modifies_files, change_types: resolved_types });
    }

    let tx = store.begin_tx()?;
    let changeset_payload = kai_storage::canonical::to_canonical_value(&ChangeSetPayload {
        base: hex(base),
        head: hex(head),
        title: String::new(),
        description: String::new(),
        intent: String::new(),
    });
    let changeset_id = store.insert_node(&tx, NodeKind::ChangeSet, changeset_payload, now_ms)?;

    let mut all_change_types = Vec::new();

    for changes in per_path.values() {
        for file_id in &changes.modifies_files {
            store.insert_edge(&tx, &changeset_id, EdgeType::Modifies, file_id, None, now_ms)?;
        }
        for (ct, symbol_ids) in &changes.change_types {
            let payload = kai_storage::canonical::to_canonical_value(&ChangeTypePayload {
                category: ct.category.as_str().to_string(),
                evidence: EvidencePayload {
                    file_ranges: ct
                        .evidence
                        .file_ranges
                        .iter()
                        .map(|r| FileRangeEvidencePayload {
                            path: r.path.clone(),
                            start: [r.start.0, r.start.1],
                            end: [r.end.0, r.end.1],
                        })
                        .collect(),
                    symbols: ct.evidence.symbols.clone(),
                },
            });
            let change_type_id = store.insert_node(&tx, NodeKind::ChangeType, payload, now_ms)?;
            store.insert_edge(&tx, &changeset_id, EdgeType::Has, &change_type_id, None, now_ms)?;
            for symbol_id in symbol_ids {
                store.insert_edge(&tx, &changeset_id, EdgeType::Modifies, symbol_id, None, now_ms)?;
            }
            all_change_types.push(ct.clone());
        }
    }

    for module_name in &affected {
        if let Some(module_id) = find_module_id(store, matcher, module_name, &tx, now_ms)? {
            store.insert_edge(&tx, &changeset_id, EdgeType::Affects, &module_id, None, now_ms)?;
        }
    }

    store.append_log(&tx, NodeKind::ChangeSet, &changeset_id)?;
    tx.commit()?;

    update_changeset_refs(store, &changeset_id, previous, now_ms)?;

    info!(changeset = %hex(&changeset_id), changed_files = paths.len(), "changeset built");
    Ok(ChangeSetSummary {
        changeset_id,
        files_changed: paths.len(),
        change_types: all_change_types,
        affected_modules: affected.into_iter().collect(),
    })
}

fn find_module_id(
    store: &SqliteStore,
    matcher: &dyn Matcher,
    name: &str,
    tx: &kai_storage::store::Tx,
    now_ms: i64,
) -> Result<Option<NodeId>> {
    let rule = matcher.all_modules().into_iter().find(|m| m.name == name);
    let Some(rule) = rule else { return Ok(None) };
    let payload = kai_storage::canonical::to_canonical_value(&kai_storage::payloads::ModulePayload {
        name: rule.name,
        patterns: rule.include,
    });
    Ok(Some(store.insert_node(tx, NodeKind::Module, payload, now_ms)?))
}

fn update_changeset_refs(
    store: &SqliteStore,
    new_id: &NodeId,
    previous_latest: Option<NodeId>,
    now_ms: i64,
) -> Result<()> {
    let tx = store.begin_tx()?;
    if let Some(prev) = previous_latest {
        if prev != *new_id {
            store.set_ref(&tx, "cs.prev", &prev, NodeKind::ChangeSet, now_ms)?;
        }
    }
    store.set_ref(&tx, "cs.latest", new_id, NodeKind::ChangeSet, now_ms)?;
    tx.commit()?;
    Ok(())
}

/// render_intent (§4.5.4, SPEC_FULL intent table): a pure function over a
/// ChangeSet's categories, affected modules, changed function names, and
/// touched paths.
pub fn render_intent(
    categories: &BTreeSet<ChangeCategory>,
    affected_modules: &[String],
    changed_function_names: &BTreeSet<String>,
    paths: &[String],
) -> String {
    let verb = choose_verb(categories);
    let area = choose_area(affected_modules, changed_function_names, paths);
    format!("{verb} {area}")
}

fn choose_verb(categories: &BTreeSet<ChangeCategory>) -> &'static str {
    let has = |c: ChangeCategory| categories.contains(&c);
    if has(ChangeCategory::FunctionAdded) && has(ChangeCategory::FunctionRemoved) {
        "Refactor"
    } else if has(ChangeCategory::FunctionAdded) {
        "Add"
    } else if has(ChangeCategory::FunctionRemoved) {
        "Remove"
    } else if has(ChangeCategory::ApiSurfaceChanged) {
        "Update"
    } else if has(ChangeCategory::ConditionChanged) || has(ChangeCategory::ConstantUpdated) {
        "Update"
    } else {
        "Modify"
    }
}

fn choose_area(
    affected_modules: &[String],
    changed_function_names: &BTreeSet<String>,
    paths: &[String],
) -> String {
    if changed_function_names.len() == 1 {
        return changed_function_names.iter().next().unwrap().clone();
    }
    if affected_modules.len() > 1 {
        let mut sorted = affected_modules.to_vec();
        sorted.sort();
        return sorted[0].clone();
    }
    if paths.len() == 1 {
        return paths[0].clone();
    }
    let prefix = common_dir_prefix(paths);
    if prefix.is_empty() {
        "root".to_string()
    } else {
        prefix
    }
}

fn common_dir_prefix(paths: &[String]) -> String {
    if paths.is_empty() {
        return String::new();
    }
    let split: Vec<Vec<&str>> = paths.iter().map(|p| p.split('/').collect()).collect();
    let mut common = split[0].clone();
    for segments in &split[1..] {
        let len = common.iter().zip(segments.iter()).take_while(|(a, b)| a == b).count();
        common.truncate(len);
    }
    // A directory prefix never includes the filename, even when every path
    // is identical.
    if !common.is_empty() {
        common.pop();
    }
    common.join("/")
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpedNode {
    pub id: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpedEdge {
    pub src: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub dst: String,
}

/// JSON dump of a ChangeSet (§6.5): the changeset node plus every node
/// reachable through `MODIFIES`, `HAS`, and `AFFECTS` from it.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSetDump {
    pub changeset: DumpedNode,
    pub nodes: Vec<DumpedNode>,
    pub edges: Vec<DumpedEdge>,
}

const DUMP_EDGE_TYPES: &[EdgeType] = &[EdgeType::Modifies, EdgeType::Has, EdgeType::Affects];

/// Walks `MODIFIES`/`HAS`/`AFFECTS` edges out of `changeset_id` breadth-first,
/// collecting every reachable node and the edges traversed to reach it.
pub fn dump_changeset(store: &SqliteStore, changeset_id: &NodeId) -> Result<ChangeSetDump> {
    let changeset_node = store.get_node(changeset_id)?;
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    seen.insert(*changeset_id);
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(*changeset_id);

    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    while let Some(src) = queue.pop_front() {
        for edge_type in DUMP_EDGE_TYPES {
            for edge in store.get_edges(&src, *edge_type)? {
                edges.push(DumpedEdge {
                    src: hex(&edge.src),
                    edge_type: edge_type.as_str().to_string(),
                    dst: hex(&edge.dst),
                });
                if seen.insert(edge.dst) {
                    let node = store.get_node(&edge.dst)?;
                    nodes.push(DumpedNode {
                        id: hex(&node.id),
                        kind: node.kind.as_str().to_string(),
                        payload: node.payload,
                    });
                    queue.push_back(edge.dst);
                }
            }
        }
    }

    Ok(ChangeSetDump {
        changeset: DumpedNode {
            id: hex(&changeset_node.id),
            kind: changeset_node.kind.as_str().to_string(),
            payload: changeset_node.payload,
        },
        nodes,
        edges,
    })
}

/// Picks the explicit edit if present, else the rendered sentence
/// (SPEC_FULL "Intent purity" — render_intent is never consulted once an
/// edit has been recorded).
pub fn resolve_intent(
    explicit: &str,
    categories: &BTreeSet<ChangeCategory>,
    affected_modules: &[String],
    changed_function_names: &BTreeSet<String>,
    paths: &[String],
) -> String {
    if !explicit.is_empty() {
        explicit.to_string()
    } else {
        render_intent(categories, affected_modules, changed_function_names, paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_source::MemoryFileSource;
    use crate::snapshot::create_snapshot;

    #[test]
    fn dump_changeset_only_includes_modifies_has_affects_reachable_nodes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let matcher = crate::matcher::YamlMatcher::empty();
        let base = create_snapshot(&store, &matcher, &MemoryFileSource::new("s0").with_file("a.py", "x = 1"), 1000).unwrap();
        let head = create_snapshot(
            &store,
            &matcher,
            &MemoryFileSource::new("s1").with_file("a.py", "x = 1\ndef f():\n    return 1\n"),
            1100,
        )
        .unwrap();
        let summary = build_changeset(&store, &matcher, &base.snapshot_id, &head.snapshot_id, 1200).unwrap();

        let dump = dump_changeset(&store, &summary.changeset_id).unwrap();
        assert_eq!(dump.changeset.id, hex(&summary.changeset_id));
        assert!(dump.nodes.iter().any(|n| n.kind == "File"));
        assert!(dump.edges.iter().all(|e| e.src == dump.changeset.id || dump.nodes.iter().any(|n| n.id == e.src)));
    }

    #[test]
    fn refactor_when_function_added_and_removed() {
        let mut cats = BTreeSet::new();
        cats.insert(ChangeCategory::FunctionAdded);
        cats.insert(ChangeCategory::FunctionRemoved);
        assert_eq!(choose_verb(&cats), "Refactor");
    }

    #[test]
    fn area_prefers_single_function_name() {
        let mut names = BTreeSet::new();
        names.insert("isSessionExpired".to_string());
        let area = choose_area(&["Auth".to_string()], &names, &["auth/session.ts".to_string()]);
        assert_eq!(area, "isSessionExpired");
    }

    #[test]
    fn area_falls_back_to_common_directory_prefix() {
        let names = BTreeSet::new();
        let paths = vec!["auth/session.ts".to_string(), "auth/constants.ts".to_string()];
        let area = choose_area(&[], &names, &paths);
        assert_eq!(area, "auth");
    }

    #[test]
    fn area_uses_root_when_paths_share_no_directory() {
        let names = BTreeSet::new();
        let paths = vec!["a.ts".to_string(), "b.ts".to_string()];
        let area = choose_area(&[], &names, &paths);
        assert_eq!(area, "root");
    }

    #[test]
    fn explicit_edit_overrides_rendered_intent() {
        let cats = BTreeSet::new();
        let names = BTreeSet::new();
        let resolved = resolve_intent("Reduce session timeout", &cats, &[], &names, &[]);
        assert_eq!(resolved, "Reduce session timeout");
    }

    #[test]
    fn intent_is_pure_for_same_inputs() {
        let mut cats = BTreeSet::new();
        cats.insert(ChangeCategory::ConditionChanged);
        let modules = vec!["Auth".to_string()];
        let names = BTreeSet::new();
        let paths = vec!["auth/session.ts".to_string()];
        let a = render_intent(&cats, &modules, &names, &paths);
        let b = render_intent(&cats, &modules, &names, &paths);
        assert_eq!(a, b);
    }
}
