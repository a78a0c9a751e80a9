//! Parser Adapter (C3, §4.3). Wraps tree-sitter grammars behind a uniform
//! interface: parse to a normalized [`crate::ast::SyntaxNode`] tree, then
//! extract top-level symbols and the import/call surface.

use std::collections::BTreeMap;

use tree_sitter::{Node as TsNode, Parser as TsParser, Tree};

use crate::ast::{Span, SyntaxKind, SyntaxNode};
use crate::error::{CoreError, Result};

/// Files above this size are skipped for symbol/call extraction — likely
/// minified or generated (§4.3).
pub const MAX_EXTRACTABLE_BYTES: usize = 500 * 1024;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "woff", "woff2", "ttf", "otf", "eot",
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "pdf", "mp3", "mp4", "mov", "avi", "wasm", "so",
    "dylib", "dll", "exe", "class", "jar", "bin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Ruby,
    Rust,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "rb" => Language::Ruby,
            "rs" => Language::Rust,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::Rust => "rust",
        }
    }

    fn ts_language(&self) -> tree_sitter::Language {
        match self {
            Language::JavaScript => tree_sitter_javascript::language(),
            Language::TypeScript => tree_sitter_typescript::language_typescript(),
            Language::Python => tree_sitter_python::language(),
            Language::Ruby => tree_sitter_ruby::language(),
            Language::Rust => tree_sitter_rust::language(),
        }
    }
}

pub fn is_binary_extension(ext: &str) -> bool {
    BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub root: SyntaxNode,
    pub source: String,
    pub path: String,
    pub language: Language,
    pub has_errors: bool,
    pub errors: Vec<ParseIssue>,
}

impl ParsedFile {
    pub fn text(&self, node: &SyntaxNode) -> &str {
        self.source
            .get(node.byte_range.0..node.byte_range.1)
            .unwrap_or("")
    }

    pub fn is_too_large(&self) -> bool {
        self.source.len() > MAX_EXTRACTABLE_BYTES
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Const,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Const => "const",
            SymbolKind::Variable => "variable",
        }
    }
}

/// A top-level (or flattened-nested, §4.3) declaration.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub range: Span,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub source: String,
    pub is_relative: bool,
    pub default: Option<String>,
    pub named: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CallInfo {
    pub callee_name: String,
    pub is_method_call: bool,
    pub range: Span,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub imports: Vec<ImportInfo>,
    pub exports: Vec<String>,
    pub calls: Vec<CallInfo>,
}

fn ts_span(node: &TsNode) -> Span {
    Span::new(
        node.start_position().row as u32 + 1,
        node.start_position().column as u32,
        node.end_position().row as u32 + 1,
        node.end_position().column as u32,
    )
}

/// Tree-sitter-backed implementation of the parser adapter, one instance
/// per language.
pub struct TreeSitterParser {
    language: Language,
}

impl TreeSitterParser {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    pub fn parse(&self, source: &str, path: &str) -> Result<ParsedFile> {
        let mut parser = TsParser::new();
        parser
            .set_language(&self.language.ts_language())
            .map_err(|e| CoreError::parse(format!("failed to load grammar: {e}")).with_file(path))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| CoreError::parse("tree-sitter returned no tree").with_file(path))?;

        let root_ts = tree.root_node();
        let root = self.convert(&root_ts, source);
        let mut errors = Vec::new();
        collect_errors(&root_ts, &mut errors);

        Ok(ParsedFile {
            has_errors: !errors.is_empty(),
            errors,
            root,
            source: source.to_string(),
            path: path.to_string(),
            language: self.language,
        })
    }

    fn convert(&self, node: &TsNode, source: &str) -> SyntaxNode {
        let kind = self.map_kind(node.kind());
        let span = ts_span(node);
        let byte_range = (node.start_byte(), node.end_byte());

        let children: Vec<SyntaxNode> = (0..node.child_count())
            .filter_map(|i| node.child(i))
            .filter(|c| !c.is_extra())
            .map(|c| self.convert(&c, source))
            .collect();

        let text = if children.is_empty() {
            source.get(byte_range.0..byte_range.1).map(str::to_string)
        } else {
            None
        };

        let mut out = SyntaxNode::new(kind, span)
            .with_raw_kind(node.kind())
            .with_children(children)
            .with_byte_range(byte_range);
        if let Some(t) = text {
            out = out.with_text(t);
        }
        out
    }

    fn map_kind(&self, raw: &str) -> SyntaxKind {
        use SyntaxKind::*;
        match (self.language, raw) {
            (_, "comment") => Other("comment".into()),

            (Language::Python, k) => match k {
                "module" => Module,
                "function_definition" => FunctionDef,
                "class_definition" => ClassDef,
                "assignment" => VariableDecl,
                "parameters" | "parameter" | "default_parameter" | "typed_parameter" => ParameterDecl,
                "import_statement" | "import_from_statement" => ImportDecl,
                "call" => CallExpr,
                "identifier" => Identifier,
                "integer" | "float" => NumberLiteral,
                "string" => StringLiteral,
                "binary_operator" | "comparison_operator" | "boolean_operator" => BinaryExpr,
                "not_operator" | "unary_operator" => UnaryExpr,
                "block" => Block,
                other => Other(other.to_string()),
            },

            (Language::JavaScript | Language::TypeScript, k) => match k {
                "program" => Module,
                "function_declaration" | "function" | "arrow_function" | "generator_function_declaration" => FunctionDef,
                "method_definition" => MethodDef,
                "class_declaration" | "class" => ClassDef,
                "lexical_declaration" | "variable_declaration" => VariableDecl,
                "variable_declarator" => VariableDecl,
                "formal_parameters" | "required_parameter" | "optional_parameter" => ParameterDecl,
                "import_statement" => ImportDecl,
                "export_statement" => ExportDecl,
                "interface_declaration" | "type_alias_declaration" => TypeDecl,
                "call_expression" => CallExpr,
                "identifier" | "property_identifier" | "type_identifier" => Identifier,
                "number" => NumberLiteral,
                "string" | "template_string" => StringLiteral,
                "binary_expression" => BinaryExpr,
                "unary_expression" => UnaryExpr,
                "statement_block" => Block,
                other => Other(other.to_string()),
            },

            (Language::Ruby, k) => match k {
                "program" => Module,
                "method" => FunctionDef,
                "singleton_method" => MethodDef,
                "class" | "module" => ClassDef,
                "assignment" => VariableDecl,
                "method_parameters" => ParameterDecl,
                "call" => CallExpr,
                "identifier" | "constant" => Identifier,
                "integer" | "float" => NumberLiteral,
                "string" => StringLiteral,
                "binary" => BinaryExpr,
                "body_statement" => Block,
                other => Other(other.to_string()),
            },

            (Language::Rust, k) => match k {
                "source_file" => Module,
                "function_item" => FunctionDef,
                "impl_item" => ClassDef,
                "struct_item" | "enum_item" | "trait_item" => ClassDef,
                "let_declaration" => VariableDecl,
                "const_item" | "static_item" => ConstDecl,
                "parameters" | "parameter" => ParameterDecl,
                "use_declaration" => ImportDecl,
                "call_expression" => CallExpr,
                "identifier" | "type_identifier" | "field_identifier" => Identifier,
                "integer_literal" | "float_literal" => NumberLiteral,
                "string_literal" => StringLiteral,
                "binary_expression" => BinaryExpr,
                "unary_expression" => UnaryExpr,
                "block" => Block,
                other => Other(other.to_string()),
            },
        }
    }
}

fn collect_errors(node: &TsNode, out: &mut Vec<ParseIssue>) {
    if node.is_error() || node.is_missing() {
        out.push(ParseIssue {
            message: format!("parse error at {:?}", node.kind()),
            span: ts_span(node),
        });
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_errors(&child, out);
        }
    }
}

/// Top-level declaration names, flattened with `.` into FQ names (§4.3).
/// Arrow/function-expression assignments count as functions of the bound
/// identifier's name.
pub fn extract_symbols(file: &ParsedFile) -> Vec<Symbol> {
    let mut out = Vec::new();
    walk_declarations(&file.root, file, &[], &mut out);
    out
}

fn walk_declarations(node: &SyntaxNode, file: &ParsedFile, scope: &[String], out: &mut Vec<Symbol>) {
    for child in &node.children {
        match &child.kind {
            SyntaxKind::FunctionDef | SyntaxKind::MethodDef => {
                if let Some(name) = declared_name(child, file) {
                    let fq = fq_name(scope, &name);
                    let kind = if scope.is_empty() {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Method
                    };
                    out.push(Symbol {
                        name: fq,
                        kind,
                        range: child.span,
                        signature: signature_of(child, file),
                    });
                }
                // Functions don't nest further declarations we track.
            }
            SyntaxKind::ClassDef => {
                if let Some(name) = declared_name(child, file) {
                    let fq = fq_name(scope, &name);
                    out.push(Symbol {
                        name: fq.clone(),
                        kind: SymbolKind::Class,
                        range: child.span,
                        signature: signature_of(child, file),
                    });
                    let mut nested_scope = scope.to_vec();
                    nested_scope.push(name);
                    walk_declarations(child, file, &nested_scope, out);
                }
            }
            SyntaxKind::VariableDecl | SyntaxKind::ConstDecl => {
                if let Some((name, is_function_value)) = variable_binding(child, file) {
                    if is_function_value {
                        out.push(Symbol {
                            name: fq_name(scope, &name),
                            kind: SymbolKind::Function,
                            range: child.span,
                            signature: name.clone(),
                        });
                    } else if scope.is_empty() {
                        let kind = if matches!(child.kind, SyntaxKind::ConstDecl) {
                            SymbolKind::Const
                        } else {
                            SymbolKind::Variable
                        };
                        out.push(Symbol {
                            name: fq_name(scope, &name),
                            kind,
                            range: child.span,
                            signature: file.text(child).to_string(),
                        });
                    }
                }
            }
            SyntaxKind::ExportDecl | SyntaxKind::Block | SyntaxKind::Module => {
                walk_declarations(child, file, scope, out);
            }
            _ => {}
        }
    }
}

fn fq_name(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope.join("."), name)
    }
}

fn declared_name(node: &SyntaxNode, file: &ParsedFile) -> Option<String> {
    for child in &node.children {
        if matches!(child.kind, SyntaxKind::Identifier) {
            return Some(file.text(child).to_string());
        }
    }
    None
}

/// `const foo = () => ...` / `let bar = function() {}` binds a function
/// value to an identifier; this returns `(name, is_function_value)`.
fn variable_binding(node: &SyntaxNode, file: &ParsedFile) -> Option<(String, bool)> {
    let name_node = node.children.iter().find(|c| matches!(c.kind, SyntaxKind::Identifier))?;
    let name = file.text(name_node).to_string();
    let is_function_value = node
        .children
        .iter()
        .any(|c| matches!(c.kind, SyntaxKind::FunctionDef));
    Some((name, is_function_value))
}

fn signature_of(node: &SyntaxNode, file: &ParsedFile) -> String {
    // Signature = text up to (and including) the parameter list / header,
    // cutting off at the body Block.
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

/// `{imports, exports, calls}` (§4.3).
pub fn extract_calls(file: &ParsedFile) -> ExtractResult {
    let mut result = ExtractResult::default();
    walk_calls(&file.root, file, &mut result);
    result
}

fn walk_calls(node: &SyntaxNode, file: &ParsedFile, out: &mut ExtractResult) {
    match &node.kind {
        SyntaxKind::ImportDecl => {
            if let Some(info) = parse_import(node, file) {
                out.imports.push(info);
            }
        }
        SyntaxKind::ExportDecl => {
            if let Some(name) = node
                .children
                .iter()
                .find(|c| matches!(c.kind, SyntaxKind::Identifier))
                .map(|c| file.text(c).to_string())
            {
                out.exports.push(name);
            }
        }
        SyntaxKind::CallExpr => {
            if let Some(callee) = node.children.first() {
                let is_method_call = matches!(
                    callee.raw_kind.as_deref(),
                    Some("member_expression") | Some("attribute")
                );
                let name = leaf_identifier_text(callee, file).unwrap_or_default();
                if !name.is_empty() {
                    out.calls.push(CallInfo {
                        callee_name: name,
                        is_method_call,
                        range: node.span,
                    });
                }
            }
        }
        _ => {}
    }
    for child in &node.children {
        walk_calls(child, file, out);
    }
}

fn leaf_identifier_text(node: &SyntaxNode, file: &ParsedFile) -> Option<String> {
    if matches!(node.kind, SyntaxKind::Identifier) {
        return Some(file.text(node).to_string());
    }
    // member/attribute access: take the rightmost identifier (method name).
    node.children
        .iter()
        .rev()
        .find_map(|c| leaf_identifier_text(c, file))
}

fn parse_import(node: &SyntaxNode, file: &ParsedFile) -> Option<ImportInfo> {
    let text = file.text(node);
    let source = node
        .children
        .iter()
        .find(|c| matches!(c.kind, SyntaxKind::StringLiteral))
        .map(|c| file.text(c).trim_matches(['"', '\'']).to_string())
        .unwrap_or_default();
    if source.is_empty() && !text.contains("import") {
        return None;
    }
    let is_relative = source.starts_with('.');
    let default = node
        .children
        .iter()
        .find(|c| matches!(c.kind, SyntaxKind::Identifier))
        .map(|c| file.text(c).to_string());
    Some(ImportInfo {
        source,
        is_relative,
        default,
        named: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_function() {
        let parser = TreeSitterParser::new(Language::Python);
        let file = parser.parse("def hello():\n    pass\n", "a.py").unwrap();
        assert!(!file.has_errors);
    }

    #[test]
    fn extracts_python_top_level_function() {
        let parser = TreeSitterParser::new(Language::Python);
        let file = parser.parse("def hello(x):\n    return x\n", "a.py").unwrap();
        let symbols = extract_symbols(&file);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "hello");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
    }

    #[test]
    fn flattens_class_methods_with_dotted_fq_names() {
        let parser = TreeSitterParser::new(Language::Python);
        let source = "class Foo:\n    def bar(self):\n        pass\n";
        let file = parser.parse(source, "a.py").unwrap();
        let symbols = extract_symbols(&file);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Foo"));
        assert!(names.contains(&"Foo.bar"));
    }

    #[test]
    fn extracts_typescript_arrow_function_bound_to_const() {
        let parser = TreeSitterParser::new(Language::TypeScript);
        let source = "const add = (a, b) => a + b;\n";
        let file = parser.parse(source, "a.ts").unwrap();
        let symbols = extract_symbols(&file);
        assert!(symbols.iter().any(|s| s.name == "add" && s.kind == SymbolKind::Function));
    }

    #[test]
    fn rejects_binary_extensions_before_parsing() {
        assert!(is_binary_extension("PNG"));
        assert!(!is_binary_extension("py"));
    }

    #[test]
    fn language_from_extension_covers_primary_and_extension_languages() {
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("rb"), Some(Language::Ruby));
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("exe"), None);
    }
}
