//! Snapshot Engine (C4, §4.4): CreateSnapshot, AnalyzeSymbols, Checkout.

use std::collections::BTreeMap;
use std::path::Path;

use kai_core::{extract_symbols, is_binary_extension, Language, SymbolKind, TreeSitterParser, MAX_EXTRACTABLE_BYTES};
use kai_storage::canonical::{to_canonical_value, NodeId};
use kai_storage::model::{EdgeType, NodeKind};
use kai_storage::payloads::{FilePayload, InlineFileMeta, ModulePayload, SnapshotPayload, SymbolPayload, SymbolRange};
use kai_storage::store::SqliteStore;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::file_source::FileSource;
use crate::matcher::Matcher;

/// Summary returned by [`create_snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub snapshot_id: NodeId,
    pub file_count: usize,
}

/// CreateSnapshot (§4.4.1): pulls every file from `source`, writes blobs,
/// indexes File/Module nodes, and inserts one Snapshot node whose payload
/// content-addresses the exact file set.
///
/// `now_ms` is supplied by the caller rather than read from the system
/// clock, so that the same source run at the same logical instant always
/// produces the same Snapshot id (§8 "Snapshot determinism").
pub fn create_snapshot(
    store: &SqliteStore,
    matcher: &dyn Matcher,
    source: &dyn FileSource,
    now_ms: i64,
) -> Result<SnapshotSummary> {
    let mut files = source.files()?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let previous = store.latest_log(NodeKind::Snapshot)?;

    let tx = store.begin_tx()?;

    let mut file_digests = Vec::with_capacity(files.len());
    let mut inline_files = Vec::with_capacity(files.len());
    let mut file_ids_by_path: BTreeMap<String, NodeId> = BTreeMap::new();

    for file in &files {
        let digest = store.write_blob(&tx, &file.content)?;
        let file_payload = to_canonical_value(&FilePayload {
            path: file.path.clone(),
            lang: file.lang.clone(),
            digest: digest.clone(),
        });
        let file_id = store.insert_node(&tx, NodeKind::File, file_payload, now_ms)?;
        file_digests.push(kai_storage::canonical::hex(&file_id));
        inline_files.push(InlineFileMeta {
            path: file.path.clone(),
            lang: file.lang.clone(),
            file_id: kai_storage::canonical::hex(&file_id),
            content_digest: digest,
        });
        file_ids_by_path.insert(file.path.clone(), file_id);
    }

    let snapshot_payload = to_canonical_value(&SnapshotPayload {
        source_type: source.source_type(),
        source_ref: source.identifier(),
        file_count: files.len() as i64,
        created_at: now_ms,
        file_digests,
        files: Some(inline_files),
        integrated_from: None,
        target_snapshot: None,
        git_ref: None,
    });
    let snapshot_id = store.insert_node(&tx, NodeKind::Snapshot, snapshot_payload, now_ms)?;

    for (path, file_id) in &file_ids_by_path {
        store.insert_edge(&tx, &snapshot_id, EdgeType::HasFile, file_id, None, now_ms)?;
        for module_name in matcher.match_path(path) {
            let module_id = ensure_module(store, &tx, matcher, &module_name, now_ms)?;
            store.insert_edge(&tx, &module_id, EdgeType::Contains, file_id, Some(&snapshot_id), now_ms)?;
        }
    }

    store.append_log(&tx, NodeKind::Snapshot, &snapshot_id)?;
    tx.commit()?;

    update_snapshot_refs(store, &snapshot_id, previous, now_ms)?;

    info!(snapshot = %kai_storage::canonical::hex(&snapshot_id), files = files.len(), "snapshot created");
    Ok(SnapshotSummary {
        snapshot_id,
        file_count: files.len(),
    })
}

fn ensure_module(
    store: &SqliteStore,
    tx: &kai_storage::store::Tx,
    matcher: &dyn Matcher,
    name: &str,
    now_ms: i64,
) -> Result<NodeId> {
    let rule = matcher
        .all_modules()
        .into_iter()
        .find(|m| m.name == name)
        .expect("match_path only returns names present in all_modules");
    let payload = to_canonical_value(&ModulePayload {
        name: rule.name,
        patterns: rule.include,
    });
    Ok(store.insert_node(tx, NodeKind::Module, payload, now_ms)?)
}

fn update_snapshot_refs(
    store: &SqliteStore,
    new_id: &NodeId,
    previous_latest: Option<NodeId>,
    now_ms: i64,
) -> Result<()> {
    let tx = store.begin_tx()?;
    if let Some(prev) = previous_latest {
        if prev != *new_id {
            store.set_ref(&tx, "snap.prev", &prev, NodeKind::Snapshot, now_ms)?;
        }
    }
    store.set_ref(&tx, "snap.latest", new_id, NodeKind::Snapshot, now_ms)?;
    tx.commit()?;
    Ok(())
}

/// AnalyzeSymbols (§4.4.2): parses every indexable File in the snapshot and
/// inserts a Symbol node + `DEFINES_IN` edge per extracted declaration.
/// Per-file parse failures are logged and skipped, never fatal.
pub fn analyze_symbols(
    store: &SqliteStore,
    snapshot_id: &NodeId,
    now_ms: i64,
    mut progress: impl FnMut(usize, usize, &str),
) -> Result<usize> {
    let has_file_edges = store.get_edges(snapshot_id, EdgeType::HasFile)?;
    let total = has_file_edges.len();

    // `get_node`/`read_blob` each lock the store's connection independently
    // of any open `Tx`, so every read happens here, before `begin_tx` — only
    // the Symbol node/edge writes below happen inside the transaction.
    struct FileToIndex {
        file_id: NodeId,
        path: String,
        content: Vec<u8>,
        language: Language,
    }

    let mut to_index = Vec::new();
    for (i, edge) in has_file_edges.iter().enumerate() {
        let file_node = store.get_node(&edge.dst)?;
        let path = file_node.payload["path"].as_str().unwrap_or_default().to_string();
        progress(i + 1, total, &path);

        let ext = Path::new(&path).extension().and_then(|e| e.to_str()).unwrap_or_default();
        if is_binary_extension(ext) {
            continue;
        }
        let Some(language) = Language::from_extension(ext) else {
            continue;
        };
        let digest = file_node.payload["digest"].as_str().unwrap_or_default();
        let content = match store.read_blob(digest) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path, error = %e, "skipping file: blob missing");
                continue;
            }
        };
        if content.len() > MAX_EXTRACTABLE_BYTES {
            continue;
        }
        to_index.push(FileToIndex { file_id: edge.dst, path, content, language });
    }

    let mut inserted = 0usize;
    let tx = store.begin_tx()?;
    for file in &to_index {
        let Ok(source) = std::str::from_utf8(&file.content) else {
            continue;
        };

        let parser = TreeSitterParser::new(file.language);
        let parsed = match parser.parse(source, &file.path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %file.path, error = %e, "parse failed, skipping file");
                continue;
            }
        };

        for symbol in extract_symbols(&parsed) {
            let payload = to_canonical_value(&SymbolPayload {
                fq_name: symbol.name.clone(),
                kind: symbol_kind_str(symbol.kind).to_string(),
                file_id: kai_storage::canonical::hex(&file.file_id),
                range: SymbolRange {
                    start: [symbol.range.start_line, symbol.range.start_col],
                    end: [symbol.range.end_line, symbol.range.end_col],
                },
                signature: symbol.signature.clone(),
            });
            let symbol_id = store.insert_node(&tx, NodeKind::Symbol, payload, now_ms)?;
            store.insert_edge(&tx, &symbol_id, EdgeType::DefinesIn, &file.file_id, Some(snapshot_id), now_ms)?;
            inserted += 1;
        }
    }
    tx.commit()?;
    debug!(snapshot = %kai_storage::canonical::hex(snapshot_id), symbols = inserted, "symbol analysis complete");
    Ok(inserted)
}

fn symbol_kind_str(kind: SymbolKind) -> &'static str {
    kind.as_str()
}

/// Result of [`checkout`].
#[derive(Debug, Clone, Default)]
pub struct CheckoutResult {
    pub files_written: usize,
    pub files_deleted: usize,
    pub files_skipped: usize,
    pub target_dir: String,
}

const PRESERVED_DIRS: &[&str] = &[".git", "node_modules", "dist", "build"];

/// Checkout (§4.4.3): writes every File's blob to `target_dir/path`
/// atomically (write-to-temp-then-rename), skipping files whose on-disk
/// BLAKE3 already matches. `clean` removes extraneous files not in the
/// snapshot, without descending into hidden or generated directories.
pub fn checkout(
    store: &SqliteStore,
    snapshot_id: &NodeId,
    target_dir: &Path,
    clean: bool,
) -> Result<CheckoutResult> {
    std::fs::create_dir_all(target_dir)?;
    let mut result = CheckoutResult {
        target_dir: target_dir.display().to_string(),
        ..Default::default()
    };

    let mut snapshot_paths = std::collections::BTreeSet::new();
    for edge in store.get_edges(snapshot_id, EdgeType::HasFile)? {
        let node = store.get_node(&edge.dst)?;
        let path = node.payload["path"].as_str().unwrap_or_default().to_string();
        let digest = node.payload["digest"].as_str().unwrap_or_default().to_string();
        snapshot_paths.insert(path.clone());

        let dest = target_dir.join(&path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.is_file() {
            let existing = std::fs::read(&dest)?;
            if kai_storage::canonical::hex(blake3::hash(&existing).as_bytes()) == digest {
                result.files_skipped += 1;
                continue;
            }
        }
        let bytes = store.read_blob(&digest)?;
        let mut tmp_name = dest.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".kai-tmp");
        let tmp = dest.with_file_name(tmp_name);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &dest)?;
        result.files_written += 1;
    }

    if clean {
        result.files_deleted = clean_extraneous(target_dir, target_dir, &snapshot_paths)?;
    }
    Ok(result)
}

fn clean_extraneous(
    target_dir: &Path,
    dir: &Path,
    keep: &std::collections::BTreeSet<String>,
) -> Result<usize> {
    let mut deleted = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if name.starts_with('.') || PRESERVED_DIRS.contains(&name.as_str()) {
                continue;
            }
            deleted += clean_extraneous(target_dir, &path, keep)?;
            if std::fs::read_dir(&path)?.next().is_none() {
                std::fs::remove_dir(&path)?;
            }
        } else {
            let rel = path
                .strip_prefix(target_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if !keep.contains(&rel) {
                std::fs::remove_file(&path)?;
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_source::MemoryFileSource;
    use crate::matcher::YamlMatcher;

    #[test]
    fn create_snapshot_is_deterministic_for_same_source_and_clock() {
        let store = SqliteStore::open_in_memory().unwrap();
        let matcher = YamlMatcher::empty();
        let source = MemoryFileSource::new("mem:1").with_file("a.py", "x = 1");
        let s1 = create_snapshot(&store, &matcher, &source, 1000).unwrap();
        let s2 = create_snapshot(&store, &matcher, &source, 1000).unwrap();
        assert_eq!(s1.snapshot_id, s2.snapshot_id);
    }

    #[test]
    fn analyze_symbols_indexes_top_level_function() {
        let store = SqliteStore::open_in_memory().unwrap();
        let matcher = YamlMatcher::empty();
        let source = MemoryFileSource::new("mem:1").with_file("a.py", "def f():\n    return 1\n");
        let summary = create_snapshot(&store, &matcher, &source, 1000).unwrap();
        let count = analyze_symbols(&store, &summary.snapshot_id, 1000, |_, _, _| {}).unwrap();
        assert_eq!(count, 1);
        let symbols = store.get_nodes_by_kind(NodeKind::Symbol).unwrap();
        assert_eq!(symbols[0].payload["fqName"], "f");
    }

    #[test]
    fn checkout_round_trips_byte_for_byte() {
        let store = SqliteStore::open_in_memory().unwrap();
        let matcher = YamlMatcher::empty();
        let source = MemoryFileSource::new("mem:1").with_file("a.py", "x = 1\n");
        let summary = create_snapshot(&store, &matcher, &source, 1000).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = checkout(&store, &summary.snapshot_id, dir.path(), false).unwrap();
        assert_eq!(result.files_written, 1);
        assert_eq!(std::fs::read(dir.path().join("a.py")).unwrap(), b"x = 1\n");
    }

    #[test]
    fn checkout_skips_unchanged_file_on_second_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let matcher = YamlMatcher::empty();
        let source = MemoryFileSource::new("mem:1").with_file("a.py", "x = 1\n");
        let summary = create_snapshot(&store, &matcher, &source, 1000).unwrap();
        let dir = tempfile::tempdir().unwrap();
        checkout(&store, &summary.snapshot_id, dir.path(), false).unwrap();
        let second = checkout(&store, &summary.snapshot_id, dir.path(), false).unwrap();
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.files_written, 0);
    }
}
