//! Change Detector (C5, §4.5). Classifies the difference between two
//! versions of a file's bytes into a sequence of typed [`ChangeType`]s.
//! Orchestration above the Snapshot pair diff (path add/remove/modify,
//! ChangeSet assembly, intent rendering) lives in kai-engine; this module
//! covers the per-file dispatch and the category detectors themselves.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::ast::{Span, SyntaxKind, SyntaxNode};
use crate::parser::{extract_symbols, Language, ParsedFile, Symbol, SymbolKind, TreeSitterParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeCategory {
    FunctionAdded,
    FunctionRemoved,
    ApiSurfaceChanged,
    ConditionChanged,
    ConstantUpdated,
    JsonFieldAdded,
    JsonFieldRemoved,
    JsonValueChanged,
    JsonArrayChanged,
    YamlKeyAdded,
    YamlKeyRemoved,
    YamlValueChanged,
    FileContentChanged,
}

impl ChangeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::FunctionAdded => "FUNCTION_ADDED",
            ChangeCategory::FunctionRemoved => "FUNCTION_REMOVED",
            ChangeCategory::ApiSurfaceChanged => "API_SURFACE_CHANGED",
            ChangeCategory::ConditionChanged => "CONDITION_CHANGED",
            ChangeCategory::ConstantUpdated => "CONSTANT_UPDATED",
            ChangeCategory::JsonFieldAdded => "JSON_FIELD_ADDED",
            ChangeCategory::JsonFieldRemoved => "JSON_FIELD_REMOVED",
            ChangeCategory::JsonValueChanged => "JSON_VALUE_CHANGED",
            ChangeCategory::JsonArrayChanged => "JSON_ARRAY_CHANGED",
            ChangeCategory::YamlKeyAdded => "YAML_KEY_ADDED",
            ChangeCategory::YamlKeyRemoved => "YAML_KEY_REMOVED",
            ChangeCategory::YamlValueChanged => "YAML_VALUE_CHANGED",
            ChangeCategory::FileContentChanged => "FILE_CONTENT_CHANGED",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileRangeEvidence {
    pub path: String,
    pub start: (u32, u32),
    pub end: (u32, u32),
}

/// Either a hex Symbol-node id or `"name:<fq_name>"` (§4.5.3) — left to the
/// caller, which knows whether the symbol is already indexed in this
/// snapshot. Here we only ever produce the name-sentinel form.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub file_ranges: Vec<FileRangeEvidence>,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChangeType {
    pub category: ChangeCategory,
    pub evidence: Evidence,
}

fn symbol_sentinel(name: &str) -> String {
    format!("name:{name}")
}

fn span_evidence(path: &str, span: Span) -> FileRangeEvidence {
    FileRangeEvidence {
        path: path.to_string(),
        start: (span.start_line, span.start_col),
        end: (span.end_line, span.end_col),
    }
}

/// Dispatch a single modified/added path to the right detector (§4.5.2).
pub fn detect_file_change(path: &str, before: Option<&[u8]>, after: &[u8]) -> Vec<ChangeType> {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    if crate::parser::is_binary_extension(&ext) {
        return vec![file_content_changed()];
    }

    if ext == "json" {
        return detect_json_change(path, before, after).unwrap_or_else(|| vec![file_content_changed()]);
    }
    if ext == "yaml" || ext == "yml" {
        return detect_yaml_change(path, before, after).unwrap_or_else(|| vec![file_content_changed()]);
    }

    if let Some(language) = Language::from_extension(&ext) {
        if after.len() <= crate::parser::MAX_EXTRACTABLE_BYTES {
            if let Some(changes) = detect_code_change(path, before, after, language) {
                return changes;
            }
        }
    }

    vec![file_content_changed()]
}

fn file_content_changed() -> ChangeType {
    ChangeType {
        category: ChangeCategory::FileContentChanged,
        evidence: Evidence::default(),
    }
}

/// §4.5.3 semantic categories for code files.
fn detect_code_change(path: &str, before: Option<&[u8]>, after: &[u8], language: Language) -> Option<Vec<ChangeType>> {
    let after_src = std::str::from_utf8(after).ok()?;
    let parser = TreeSitterParser::new(language);
    let after_file = parser.parse(after_src, path).ok()?;

    let Some(before) = before else {
        // New file: every top-level function is FUNCTION_ADDED.
        let symbols = extract_symbols(&after_file);
        return Some(
            symbols
                .iter()
                .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
                .map(|s| ChangeType {
                    category: ChangeCategory::FunctionAdded,
                    evidence: Evidence {
                        file_ranges: vec![span_evidence(path, s.range)],
                        symbols: vec![symbol_sentinel(&s.name)],
                    },
                })
                .collect(),
        );
    };

    let before_src = std::str::from_utf8(before).ok()?;
    let before_file = parser.parse(before_src, path).ok()?;

    let before_symbols = extract_symbols(&before_file);
    let after_symbols = extract_symbols(&after_file);

    let before_by_name: BTreeMap<&str, &Symbol> = before_symbols.iter().map(|s| (s.name.as_str(), s)).collect();
    let after_by_name: BTreeMap<&str, &Symbol> = after_symbols.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut out = Vec::new();

    for (name, sym) in &after_by_name {
        if !before_by_name.contains_key(name) && is_function_like(sym.kind) {
            out.push(ChangeType {
                category: ChangeCategory::FunctionAdded,
                evidence: Evidence {
                    file_ranges: vec![span_evidence(path, sym.range)],
                    symbols: vec![symbol_sentinel(name)],
                },
            });
        }
    }
    for (name, sym) in &before_by_name {
        if !after_by_name.contains_key(name) && is_function_like(sym.kind) {
            out.push(ChangeType {
                category: ChangeCategory::FunctionRemoved,
                evidence: Evidence {
                    file_ranges: vec![span_evidence(path, sym.range)],
                    symbols: vec![symbol_sentinel(name)],
                },
            });
        }
    }

    for (name, before_sym) in &before_by_name {
        let Some(after_sym) = after_by_name.get(name) else { continue };
        if !is_function_like(before_sym.kind) || !is_function_like(after_sym.kind) {
            continue;
        }
        if before_sym.signature != after_sym.signature {
            out.push(ChangeType {
                category: ChangeCategory::ApiSurfaceChanged,
                evidence: Evidence {
                    file_ranges: vec![span_evidence(path, after_sym.range)],
                    symbols: vec![symbol_sentinel(name)],
                },
            });
        }
    }

    let exported_before: BTreeSet<&str> = before_by_name.keys().copied().collect();
    let exported_after: BTreeSet<&str> = after_by_name.keys().copied().collect();
    if exported_before != exported_after && out.iter().all(|c| c.category != ChangeCategory::ApiSurfaceChanged) {
        out.push(ChangeType {
            category: ChangeCategory::ApiSurfaceChanged,
            evidence: Evidence {
                file_ranges: vec![span_evidence(path, after_file.root.span)],
                symbols: vec![symbol_sentinel("module")],
            },
        });
    }

    for (name, before_sym) in &before_by_name {
        if !is_function_like(before_sym.kind) {
            continue;
        }
        let Some(after_sym) = after_by_name.get(name) else { continue };
        if !is_function_like(after_sym.kind) {
            continue;
        }
        let (Some(before_node), Some(after_node)) = (
            find_node_by_span(&before_file.root, before_sym.range),
            find_node_by_span(&after_file.root, after_sym.range),
        ) else {
            continue;
        };
        out.extend(detect_body_internal_changes(path, &before_file, before_node, &after_file, after_node));
    }

    Some(out)
}

fn is_function_like(kind: SymbolKind) -> bool {
    matches!(kind, SymbolKind::Function | SymbolKind::Method)
}

fn find_node_by_span<'a>(node: &'a SyntaxNode, span: Span) -> Option<&'a SyntaxNode> {
    if node.span == span {
        return Some(node);
    }
    node.children.iter().find_map(|c| find_node_by_span(c, span))
}

/// CONDITION_CHANGED / CONSTANT_UPDATED: walk both matched symbols' bodies
/// in lock-step by position, comparing binary-expression operators and
/// literal values at matching syntactic positions (§4.5.3). Scoped to one
/// symbol at a time so unrelated functions that happen to share a position
/// after lines shift elsewhere in the file never get compared to each other.
fn detect_body_internal_changes<'a>(
    path: &str,
    before: &ParsedFile,
    before_root: &'a SyntaxNode,
    after: &ParsedFile,
    after_root: &'a SyntaxNode,
) -> Vec<ChangeType> {
    let mut out = Vec::new();
    let before_nodes = index_by_position(before_root);
    let after_nodes = index_by_position(after_root);

    let mut condition_positions = BTreeSet::new();

    for (pos, before_node) in &before_nodes {
        let Some(after_node) = after_nodes.get(pos) else { continue };
        if matches!(before_node.kind, SyntaxKind::BinaryExpr) && matches!(after_node.kind, SyntaxKind::BinaryExpr) {
            let before_op = operator_text(before_node, before);
            let after_op = operator_text(after_node, after);
            let before_bound = numeric_literal_child(before_node, before);
            let after_bound = numeric_literal_child(after_node, after);
            if before_op != after_op || before_bound != after_bound {
                condition_positions.insert(*pos);
                if let Some(lit) = numeric_literal_child_node(before_node) {
                    condition_positions.insert(pos_key(lit));
                }
                out.push(ChangeType {
                    category: ChangeCategory::ConditionChanged,
                    evidence: Evidence {
                        file_ranges: vec![span_evidence(path, after_node.span)],
                        symbols: Vec::new(),
                    },
                });
            }
        }
    }

    for (pos, before_node) in &before_nodes {
        if condition_positions.contains(pos) {
            continue;
        }
        let Some(after_node) = after_nodes.get(pos) else { continue };
        let is_literal = matches!(before_node.kind, SyntaxKind::NumberLiteral | SyntaxKind::StringLiteral)
            && matches!(after_node.kind, SyntaxKind::NumberLiteral | SyntaxKind::StringLiteral);
        if is_literal && before.text(before_node) != after.text(after_node) {
            out.push(ChangeType {
                category: ChangeCategory::ConstantUpdated,
                evidence: Evidence {
                    file_ranges: vec![span_evidence(path, after_node.span)],
                    symbols: Vec::new(),
                },
            });
        }
    }

    out
}

/// Keys nodes by their full span so same-position comparisons across two
/// trees are O(1); a full tree-edit-distance alignment is out of scope
/// here. Keying on the full span (not just the start position) matters: a
/// `BinaryExpr` and its left-operand leaf share a start position, and with
/// `walk()`'s pre-order traversal the leaf would otherwise overwrite its
/// own parent in the map.
fn index_by_position(root: &SyntaxNode) -> BTreeMap<(u32, u32, u32, u32), &SyntaxNode> {
    root.walk().into_iter().map(|n| (pos_key(n), n)).collect()
}

fn operator_text<'a>(node: &'a SyntaxNode, file: &'a ParsedFile) -> String {
    node.children
        .iter()
        .find(|c| !matches!(c.kind, SyntaxKind::Identifier | SyntaxKind::NumberLiteral | SyntaxKind::StringLiteral | SyntaxKind::CallExpr))
        .map(|c| file.text(c).to_string())
        .unwrap_or_default()
}

fn numeric_literal_child(node: &SyntaxNode, file: &ParsedFile) -> Option<String> {
    numeric_literal_child_node(node).map(|c| file.text(c).to_string())
}

fn numeric_literal_child_node(node: &SyntaxNode) -> Option<&SyntaxNode> {
    node.children.iter().find(|c| matches!(c.kind, SyntaxKind::NumberLiteral))
}

fn pos_key(n: &SyntaxNode) -> (u32, u32, u32, u32) {
    (n.span.start_line, n.span.start_col, n.span.end_line, n.span.end_col)
}

fn detect_json_change(path: &str, before: Option<&[u8]>, after: &[u8]) -> Option<Vec<ChangeType>> {
    let after_value: Value = serde_json::from_slice(after).ok()?;
    let before_value: Value = match before {
        Some(b) => serde_json::from_slice(b).ok()?,
        None => Value::Object(serde_json::Map::new()),
    };
    let mut out = Vec::new();
    diff_json(path, "", &before_value, &after_value, &mut out);
    Some(out)
}

fn diff_json(path: &str, pointer: &str, before: &Value, after: &Value, out: &mut Vec<ChangeType>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (k, av) in a {
                let child_pointer = format!("{pointer}/{k}");
                match b.get(k) {
                    None => out.push(simple_change(path, ChangeCategory::JsonFieldAdded, &child_pointer)),
                    Some(bv) => diff_json(path, &child_pointer, bv, av, out),
                }
            }
            for k in b.keys() {
                if !a.contains_key(k) {
                    out.push(simple_change(path, ChangeCategory::JsonFieldRemoved, &format!("{pointer}/{k}")));
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            if b != a {
                out.push(simple_change(path, ChangeCategory::JsonArrayChanged, pointer));
            }
        }
        (b, a) if b != a => out.push(simple_change(path, ChangeCategory::JsonValueChanged, pointer)),
        _ => {}
    }
}

fn detect_yaml_change(path: &str, before: Option<&[u8]>, after: &[u8]) -> Option<Vec<ChangeType>> {
    let after_value: serde_yaml::Value = serde_yaml::from_slice(after).ok()?;
    let before_value: serde_yaml::Value = match before {
        Some(b) => serde_yaml::from_slice(b).ok()?,
        None => serde_yaml::Value::Mapping(Default::default()),
    };
    let mut out = Vec::new();
    diff_yaml(path, "", &before_value, &after_value, &mut out);
    Some(out)
}

fn diff_yaml(path: &str, pointer: &str, before: &serde_yaml::Value, after: &serde_yaml::Value, out: &mut Vec<ChangeType>) {
    use serde_yaml::Value as Y;
    match (before, after) {
        (Y::Mapping(b), Y::Mapping(a)) => {
            for (k, av) in a {
                let key_str = yaml_key_string(k);
                let child_pointer = format!("{pointer}/{key_str}");
                match b.get(k) {
                    None => out.push(simple_change(path, ChangeCategory::YamlKeyAdded, &child_pointer)),
                    Some(bv) => diff_yaml(path, &child_pointer, bv, av, out),
                }
            }
            for k in b.keys() {
                if a.get(k).is_none() {
                    out.push(simple_change(path, ChangeCategory::YamlKeyRemoved, &format!("{pointer}/{}", yaml_key_string(k))));
                }
            }
        }
        (b, a) if b != a => out.push(simple_change(path, ChangeCategory::YamlValueChanged, pointer)),
        _ => {}
    }
}

fn yaml_key_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn simple_change(path: &str, category: ChangeCategory, pointer: &str) -> ChangeType {
    ChangeType {
        category,
        evidence: Evidence {
            file_ranges: vec![FileRangeEvidence {
                path: path.to_string(),
                start: (0, 0),
                end: (0, 0),
            }],
            symbols: vec![pointer.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_function_added() {
        let before = b"def f():\n    pass\n";
        let after = b"def f():\n    pass\n\ndef g():\n    pass\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::FunctionAdded));
    }

    #[test]
    fn detects_function_removed() {
        let before = b"def f():\n    pass\n\ndef g():\n    pass\n";
        let after = b"def f():\n    pass\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::FunctionRemoved));
    }

    #[test]
    fn detects_api_surface_change_on_parameter_list() {
        let before = b"def f(x):\n    return x\n";
        let after = b"def f(x, y):\n    return x\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::ApiSurfaceChanged));
    }

    #[test]
    fn detects_condition_changed_on_operator_flip() {
        let before = b"def f(x):\n    if x > 1:\n        return x\n";
        let after = b"def f(x):\n    if x < 1:\n        return x\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::ConditionChanged));
    }

    #[test]
    fn detects_constant_updated_on_literal_change() {
        let before = b"def f():\n    return 100\n";
        let after = b"def f():\n    return 200\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::ConstantUpdated));
    }

    #[test]
    fn condition_bound_change_emits_condition_changed_not_constant_updated() {
        let before = b"def f(age):\n    if age > 3600:\n        return age\n";
        let after = b"def f(age):\n    if age > 1800:\n        return age\n";
        let changes = detect_file_change("a.py", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::ConditionChanged));
        assert!(!changes.iter().any(|c| c.category == ChangeCategory::ConstantUpdated));
    }

    #[test]
    fn binary_extension_yields_file_content_changed() {
        let changes = detect_file_change("logo.png", Some(b"a"), b"b");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::FileContentChanged);
    }

    #[test]
    fn json_field_added_and_removed() {
        let before = br#"{"a": 1}"#;
        let after = br#"{"b": 2}"#;
        let changes = detect_file_change("config.json", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::JsonFieldAdded));
        assert!(changes.iter().any(|c| c.category == ChangeCategory::JsonFieldRemoved));
    }

    #[test]
    fn yaml_key_added() {
        let before = b"a: 1\n";
        let after = b"a: 1\nb: 2\n";
        let changes = detect_file_change("config.yaml", Some(before), after);
        assert!(changes.iter().any(|c| c.category == ChangeCategory::YamlKeyAdded));
    }

    #[test]
    fn new_file_reports_all_functions_as_added() {
        let after = b"def f():\n    pass\n";
        let changes = detect_file_change("a.py", None, after);
        assert!(changes.iter().all(|c| c.category == ChangeCategory::FunctionAdded));
    }
}
