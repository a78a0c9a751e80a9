//! Unit extraction for the merge engine (§4.7.1). A Unit is the smallest
//! thing three-way merge reasons about: one function, method, class,
//! const, variable, import, export, type, or module-level block.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::ast::{Span, SyntaxKind, SyntaxNode};
use crate::parser::{Language, ParsedFile, TreeSitterParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitKind {
    Function,
    Method,
    Class,
    Const,
    Variable,
    Import,
    Export,
    Type,
    Module,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Function => "function",
            UnitKind::Method => "method",
            UnitKind::Class => "class",
            UnitKind::Const => "const",
            UnitKind::Variable => "variable",
            UnitKind::Import => "import",
            UnitKind::Export => "export",
            UnitKind::Type => "type",
            UnitKind::Module => "module",
        }
    }
}

/// `(filePath, symbolPath, kind)` — the merge engine's key for a Unit
/// (§4.7.1). `symbolPath` is the dotted nesting path; imports use their own
/// literal text as the path element so two distinct imports never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnitKey {
    pub file_path: String,
    pub symbol_path: Vec<String>,
    pub kind: UnitKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub key: UnitKey,
    /// Present for function/method units; the header up to the body.
    pub signature: Option<String>,
    pub body_hash: [u8; 32],
    pub range: Span,
    pub content: Vec<u8>,
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Extract the flat `key -> Unit` map for one file version. `path` is the
/// file's logical path (not necessarily on disk); `content` is its bytes.
pub fn extract_units(path: &str, content: &[u8], language: Language) -> BTreeMap<UnitKey, Unit> {
    let mut units = BTreeMap::new();
    let Ok(source) = std::str::from_utf8(content) else {
        return units;
    };
    let parser = TreeSitterParser::new(language);
    let Ok(file) = parser.parse(source, path) else {
        return units;
    };
    walk_units(&file.root, &file, path, &[], &mut units);
    units
}

fn walk_units(
    node: &SyntaxNode,
    file: &ParsedFile,
    path: &str,
    scope: &[String],
    out: &mut BTreeMap<UnitKey, Unit>,
) {
    for child in &node.children {
        match &child.kind {
            SyntaxKind::FunctionDef | SyntaxKind::MethodDef => {
                if let Some(name) = declared_name(child, file) {
                    let kind = if scope.is_empty() { UnitKind::Function } else { UnitKind::Method };
                    insert_unit(out, path, scope, name, kind, child, file, Some(signature_of(child, file)));
                }
            }
            SyntaxKind::ClassDef => {
                if let Some(name) = declared_name(child, file) {
                    insert_unit(out, path, scope, name.clone(), UnitKind::Class, child, file, None);
                    let mut nested = scope.to_vec();
                    nested.push(name);
                    walk_units(child, file, path, &nested, out);
                }
            }
            SyntaxKind::VariableDecl | SyntaxKind::ConstDecl => {
                if let Some(name) = declared_name(child, file) {
                    let kind = if matches!(child.kind, SyntaxKind::ConstDecl) {
                        UnitKind::Const
                    } else {
                        UnitKind::Variable
                    };
                    insert_unit(out, path, scope, name, kind, child, file, None);
                }
            }
            SyntaxKind::ImportDecl => {
                let text = file.text(child).trim().to_string();
                let label = format!("import:{text}");
                insert_unit(out, path, scope, label, UnitKind::Import, child, file, None);
            }
            SyntaxKind::ExportDecl => {
                if let Some(name) = declared_name(child, file) {
                    insert_unit(out, path, scope, name, UnitKind::Export, child, file, None);
                }
                walk_units(child, file, path, scope, out);
            }
            SyntaxKind::TypeDecl => {
                if let Some(name) = declared_name(child, file) {
                    insert_unit(out, path, scope, name, UnitKind::Type, child, file, None);
                }
            }
            SyntaxKind::Block | SyntaxKind::Module => {
                walk_units(child, file, path, scope, out);
            }
            _ => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_unit(
    out: &mut BTreeMap<UnitKey, Unit>,
    path: &str,
    scope: &[String],
    name: String,
    kind: UnitKind,
    node: &SyntaxNode,
    file: &ParsedFile,
    signature: Option<String>,
) {
    let mut symbol_path = scope.to_vec();
    symbol_path.push(name);
    let key = UnitKey {
        file_path: path.to_string(),
        symbol_path,
        kind,
    };
    let content = file.text(node).as_bytes().to_vec();
    let body_hash = sha256(&content);
    out.insert(
        key.clone(),
        Unit {
            key,
            signature,
            body_hash,
            range: node.span,
            content,
        },
    );
}

fn declared_name(node: &SyntaxNode, file: &ParsedFile) -> Option<String> {
    node.children
        .iter()
        .find(|c| matches!(c.kind, SyntaxKind::Identifier))
        .map(|c| file.text(c).to_string())
}

fn signature_of(node: &SyntaxNode, file: &ParsedFile) -> String {
    if let Some(block) = node.children.iter().find(|c| matches!(c.kind, SyntaxKind::Block)) {
        file.source
            .get(node.byte_range.0..block.byte_range.0)
            .unwrap_or(file.text(node))
            .trim()
            .to_string()
    } else {
        file.text(node).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function_and_class_units_with_dotted_keys() {
        let source = "class Foo:\n    def bar(self):\n        return 1\n";
        let units = extract_units("a.py", source.as_bytes(), Language::Python);
        let keys: Vec<Vec<String>> = units.keys().map(|k| k.symbol_path.clone()).collect();
        assert!(keys.contains(&vec!["Foo".to_string()]));
        assert!(keys.contains(&vec!["Foo".to_string(), "bar".to_string()]));
    }

    #[test]
    fn body_hash_changes_when_body_changes() {
        let a = extract_units("a.py", b"def f():\n    return 1\n", Language::Python);
        let b = extract_units("a.py", b"def f():\n    return 2\n", Language::Python);
        let ka = a.keys().next().unwrap();
        assert_ne!(a[ka].body_hash, b[ka].body_hash);
    }

    #[test]
    fn invalid_utf8_yields_empty_unit_map() {
        let units = extract_units("a.py", &[0xff, 0xfe, 0x00], Language::Python);
        assert!(units.is_empty());
    }
}
