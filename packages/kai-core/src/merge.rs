//! AST-aware three-way merge (C7, §4.7).

use std::collections::BTreeSet;

use crate::parser::Language;
use crate::units::{extract_units, Unit, UnitKey, UnitKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ApiSignatureDiverged,
    BodyDiverged,
    ConstValueConflict,
    ImportAliasConflict,
    ConcurrentCreate,
    DeleteVsModify,
    ModifyVsDelete,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::ApiSignatureDiverged => "API_SIGNATURE_DIVERGED",
            ConflictKind::BodyDiverged => "BODY_DIVERGED",
            ConflictKind::ConstValueConflict => "CONST_VALUE_CONFLICT",
            ConflictKind::ImportAliasConflict => "IMPORT_ALIAS_CONFLICT",
            ConflictKind::ConcurrentCreate => "CONCURRENT_CREATE",
            ConflictKind::DeleteVsModify => "DELETE_vs_MODIFY",
            ConflictKind::ModifyVsDelete => "MODIFY_vs_DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub key: UnitKey,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MergeInput<'a> {
    pub base: Option<&'a [u8]>,
    pub left: Option<&'a [u8]>,
    pub right: Option<&'a [u8]>,
    pub language: Language,
    pub path: &'a str,
}

#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged(Vec<u8>),
    Conflicts(Vec<Conflict>),
}

/// Entry point for C7. Applies the file-level short-circuits of §4.7.4
/// before falling back to unit-level merge.
pub fn merge_file(input: &MergeInput) -> MergeOutcome {
    match (input.base, input.left, input.right) {
        (None, None, None) => MergeOutcome::Merged(Vec::new()),
        (None, Some(l), None) => MergeOutcome::Merged(l.to_vec()),
        (None, None, Some(r)) => MergeOutcome::Merged(r.to_vec()),
        (None, Some(l), Some(r)) if l == r => MergeOutcome::Merged(l.to_vec()),
        (None, Some(_), Some(_)) => MergeOutcome::Conflicts(vec![whole_file_conflict(
            ConflictKind::ConcurrentCreate,
            input.path,
            "both sides created this file with different content",
        )]),

        (Some(_), None, None) => MergeOutcome::Merged(Vec::new()),
        (Some(b), None, Some(r)) => {
            if r == b {
                MergeOutcome::Merged(Vec::new())
            } else {
                MergeOutcome::Conflicts(vec![whole_file_conflict(
                    ConflictKind::DeleteVsModify,
                    input.path,
                    "left deleted the file while right modified it",
                )])
            }
        }
        (Some(b), Some(l), None) => {
            if l == b {
                MergeOutcome::Merged(Vec::new())
            } else {
                MergeOutcome::Conflicts(vec![whole_file_conflict(
                    ConflictKind::ModifyVsDelete,
                    input.path,
                    "right deleted the file while left modified it",
                )])
            }
        }

        (Some(_), Some(l), Some(r)) if l == r => MergeOutcome::Merged(l.to_vec()),
        (Some(b), Some(l), Some(r)) if l == b => MergeOutcome::Merged(r.to_vec()),
        (Some(b), Some(l), Some(r)) if r == b => MergeOutcome::Merged(l.to_vec()),

        (Some(b), Some(l), Some(r)) => merge_units(b, l, r, input),
    }
}

fn whole_file_conflict(kind: ConflictKind, path: &str, message: &str) -> Conflict {
    Conflict {
        kind,
        key: UnitKey {
            file_path: path.to_string(),
            symbol_path: Vec::new(),
            kind: UnitKind::Module,
        },
        message: message.to_string(),
    }
}

fn merge_units(base: &[u8], left: &[u8], right: &[u8], input: &MergeInput) -> MergeOutcome {
    let b = extract_units(input.path, base, input.language);
    let l = extract_units(input.path, left, input.language);
    let r = extract_units(input.path, right, input.language);

    let mut keys: BTreeSet<UnitKey> = BTreeSet::new();
    keys.extend(b.keys().cloned());
    keys.extend(l.keys().cloned());
    keys.extend(r.keys().cloned());

    let mut conflicts = Vec::new();
    let mut resolved: Vec<(UnitKey, Option<Unit>)> = Vec::new();

    for key in keys {
        let bu = b.get(&key);
        let lu = l.get(&key);
        let ru = r.get(&key);

        match unit_merge(&key, bu, lu, ru) {
            Ok(outcome) => resolved.push((key, outcome)),
            Err(c) => conflicts.push(c),
        }
    }

    if !conflicts.is_empty() {
        return MergeOutcome::Conflicts(conflicts);
    }

    MergeOutcome::Merged(reconstruct(resolved, &l, &r, &b))
}

/// §4.7.2 three-way unit merge plus §4.7.3 kind dispatch. Returns the unit
/// to keep (`None` means deleted) or a conflict.
fn unit_merge(
    key: &UnitKey,
    b: Option<&Unit>,
    l: Option<&Unit>,
    r: Option<&Unit>,
) -> Result<Option<Unit>, Conflict> {
    match (b, l, r) {
        (Some(b), Some(l), Some(r)) if b == l && l == r => Ok(Some(b.clone())),

        (None, l, r) => match (l, r) {
            (Some(l), Some(r)) if l == r => Ok(Some(l.clone())),
            (Some(_), Some(_)) => Err(conflict(key, ConflictKind::ConcurrentCreate, "both sides independently created this unit")),
            (Some(l), None) => Ok(Some(l.clone())),
            (None, Some(r)) => Ok(Some(r.clone())),
            (None, None) => Ok(None),
        },

        (Some(_), None, None) => Ok(None),
        (Some(b), None, Some(r)) => {
            if r == b {
                Ok(None)
            } else {
                Err(conflict(key, ConflictKind::DeleteVsModify, "left deleted a unit right modified"))
            }
        }
        (Some(b), Some(l), None) => {
            if l == b {
                Ok(None)
            } else {
                Err(conflict(key, ConflictKind::ModifyVsDelete, "right deleted a unit left modified"))
            }
        }

        (Some(b), Some(l), Some(r)) => {
            if l == b {
                return Ok(Some(r.clone()));
            }
            if r == b {
                return Ok(Some(l.clone()));
            }
            dispatch_by_kind(key, b, l, r)
        }
    }
}

fn dispatch_by_kind(key: &UnitKey, b: &Unit, l: &Unit, r: &Unit) -> Result<Option<Unit>, Conflict> {
    match key.kind {
        UnitKind::Function | UnitKind::Method => {
            let left_changed_sig = l.signature != b.signature;
            let right_changed_sig = r.signature != b.signature;
            match (left_changed_sig, right_changed_sig) {
                (true, true) if l.signature != r.signature => {
                    Err(conflict(key, ConflictKind::ApiSignatureDiverged, "both sides changed the signature differently"))
                }
                (true, false) => Ok(Some(l.clone())),
                (false, true) => Ok(Some(r.clone())),
                _ if l.body_hash != r.body_hash => {
                    Err(conflict(key, ConflictKind::BodyDiverged, "both sides changed the body"))
                }
                _ => Ok(Some(l.clone())),
            }
        }
        UnitKind::Class | UnitKind::Module => {
            if l.body_hash != r.body_hash {
                Err(conflict(key, ConflictKind::BodyDiverged, "both sides changed the body"))
            } else {
                Ok(Some(l.clone()))
            }
        }
        UnitKind::Const | UnitKind::Variable => {
            if l.body_hash != r.body_hash {
                Err(conflict(key, ConflictKind::ConstValueConflict, "both sides set a different value"))
            } else {
                Ok(Some(l.clone()))
            }
        }
        UnitKind::Import => {
            if l.content != r.content {
                Err(conflict(key, ConflictKind::ImportAliasConflict, "both sides changed the import differently"))
            } else {
                Ok(Some(l.clone()))
            }
        }
        UnitKind::Export | UnitKind::Type => {
            if l.body_hash != r.body_hash {
                Err(conflict(key, ConflictKind::BodyDiverged, "both sides changed the body"))
            } else {
                Ok(Some(l.clone()))
            }
        }
    }
}

fn conflict(key: &UnitKey, kind: ConflictKind, message: &str) -> Conflict {
    Conflict {
        kind,
        key: key.clone(),
        message: message.to_string(),
    }
}

/// §4.7.5: reassemble in ascending left-source-range order (falling back
/// to right, then base), separated by blank lines, newline-terminated.
fn reconstruct(
    resolved: Vec<(UnitKey, Option<Unit>)>,
    l: &std::collections::BTreeMap<UnitKey, Unit>,
    r: &std::collections::BTreeMap<UnitKey, Unit>,
    b: &std::collections::BTreeMap<UnitKey, Unit>,
) -> Vec<u8> {
    let mut units: Vec<&Unit> = resolved
        .iter()
        .filter_map(|(key, unit)| unit.as_ref().or_else(|| l.get(key)).or_else(|| r.get(key)).or_else(|| b.get(key)))
        .collect();

    let order_key = |u: &Unit| {
        l.get(&u.key)
            .or_else(|| r.get(&u.key))
            .or_else(|| b.get(&u.key))
            .map(|resolved| resolved.range)
            .unwrap_or(u.range)
    };
    units.sort_by(|x, y| order_key(x).cmp_start(&order_key(y)));

    let mut out = String::new();
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&String::from_utf8_lossy(&unit.content));
        out.push('\n');
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(base: Option<&'a [u8]>, left: Option<&'a [u8]>, right: Option<&'a [u8]>) -> MergeInput<'a> {
        MergeInput {
            base,
            left,
            right,
            language: Language::Python,
            path: "a.py",
        }
    }

    #[test]
    fn identical_sides_merge_trivially() {
        let content = b"def f():\n    return 1\n";
        let outcome = merge_file(&input(Some(content), Some(content), Some(content)));
        assert!(matches!(outcome, MergeOutcome::Merged(_)));
    }

    #[test]
    fn only_left_changed_takes_left() {
        let base = b"def f():\n    return 1\n".as_slice();
        let left = b"def f():\n    return 2\n".as_slice();
        let outcome = merge_file(&input(Some(base), Some(left), Some(base)));
        match outcome {
            MergeOutcome::Merged(bytes) => assert_eq!(bytes, left.to_vec()),
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn divergent_bodies_conflict() {
        let base = b"def f():\n    return 1\n".as_slice();
        let left = b"def f():\n    return 2\n".as_slice();
        let right = b"def f():\n    return 3\n".as_slice();
        let outcome = merge_file(&input(Some(base), Some(left), Some(right)));
        match outcome {
            MergeOutcome::Conflicts(cs) => {
                assert_eq!(cs.len(), 1);
                assert_eq!(cs[0].kind, ConflictKind::BodyDiverged);
            }
            _ => panic!("expected conflicts"),
        }
    }

    #[test]
    fn divergent_signatures_conflict() {
        let base = b"def f(x):\n    return x\n".as_slice();
        let left = b"def f(x, y):\n    return x\n".as_slice();
        let right = b"def f(x, z):\n    return x\n".as_slice();
        let outcome = merge_file(&input(Some(base), Some(left), Some(right)));
        match outcome {
            MergeOutcome::Conflicts(cs) => assert_eq!(cs[0].kind, ConflictKind::ApiSignatureDiverged),
            _ => panic!("expected conflicts"),
        }
    }

    #[test]
    fn one_side_added_a_new_function_cleanly() {
        let base = b"def f():\n    return 1\n".as_slice();
        let left = b"def f():\n    return 1\n\ndef g():\n    return 2\n".as_slice();
        let outcome = merge_file(&input(Some(base), Some(left), Some(base)));
        match outcome {
            MergeOutcome::Merged(bytes) => {
                let text = String::from_utf8(bytes).unwrap();
                assert!(text.contains("def g"));
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn delete_vs_modify_conflicts() {
        let base = b"def f():\n    return 1\n".as_slice();
        let right = b"def f():\n    return 2\n".as_slice();
        let outcome = merge_file(&input(Some(base), None, Some(right)));
        match outcome {
            MergeOutcome::Conflicts(cs) => assert_eq!(cs[0].kind, ConflictKind::DeleteVsModify),
            _ => panic!("expected conflicts"),
        }
    }

    #[test]
    fn deletion_accepted_when_other_side_unchanged() {
        let base = b"def f():\n    return 1\n".as_slice();
        let outcome = merge_file(&input(Some(base), None, Some(base)));
        match outcome {
            MergeOutcome::Merged(bytes) => assert!(bytes.is_empty()),
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn both_sides_created_with_different_content_conflicts() {
        let left = b"def f():\n    return 1\n".as_slice();
        let right = b"def f():\n    return 2\n".as_slice();
        let outcome = merge_file(&input(None, Some(left), Some(right)));
        match outcome {
            MergeOutcome::Conflicts(cs) => assert_eq!(cs[0].kind, ConflictKind::ConcurrentCreate),
            _ => panic!("expected conflicts"),
        }
    }
}
