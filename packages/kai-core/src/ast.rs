//! Language-neutral AST representation (§4.3). Every tree-sitter grammar the
//! parser adapter supports gets mapped into this shape before anything
//! downstream looks at it, so the change detector and merge engine never
//! need to know a file's language.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    pub fn zero() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Ascending order by start position, spec §4.7.5 reconstruction order.
    pub fn cmp_start(&self, other: &Span) -> std::cmp::Ordering {
        (self.start_line, self.start_col).cmp(&(other.start_line, other.start_col))
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::zero()
    }
}

/// Language-neutral node kind. Covers exactly the shapes the detector and
/// merge engine reason about; everything else collapses to `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxKind {
    Module,
    FunctionDef,
    MethodDef,
    ClassDef,
    VariableDecl,
    ConstDecl,
    ParameterDecl,
    ImportDecl,
    ExportDecl,
    TypeDecl,
    CallExpr,
    Identifier,
    BinaryExpr,
    UnaryExpr,
    NumberLiteral,
    StringLiteral,
    Block,
    Other(String),
}

impl SyntaxKind {
    pub fn is_definition(&self) -> bool {
        matches!(self, SyntaxKind::FunctionDef | SyntaxKind::MethodDef | SyntaxKind::ClassDef)
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    pub span: Span,
    pub text: Option<String>,
    pub children: Vec<SyntaxNode>,
    pub raw_kind: Option<String>,
    /// Byte offsets into the owning file's source, for slicing signatures
    /// and bodies without re-deriving them from line/col spans.
    pub byte_range: (usize, usize),
}

impl SyntaxNode {
    pub fn new(kind: SyntaxKind, span: Span) -> Self {
        Self {
            kind,
            span,
            text: None,
            children: Vec::new(),
            raw_kind: None,
            byte_range: (0, 0),
        }
    }

    pub fn with_byte_range(mut self, range: (usize, usize)) -> Self {
        self.byte_range = range;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_children(mut self, children: Vec<SyntaxNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_raw_kind(mut self, raw_kind: impl Into<String>) -> Self {
        self.raw_kind = Some(raw_kind.into());
        self
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Depth-first walk yielding every node, self included.
    pub fn walk(&self) -> Vec<&SyntaxNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_cmp_start_orders_by_line_then_col() {
        let a = Span::new(1, 5, 1, 10);
        let b = Span::new(1, 2, 1, 8);
        assert_eq!(a.cmp_start(&b), std::cmp::Ordering::Greater);
    }

    #[test]
    fn walk_visits_all_descendants() {
        let leaf = SyntaxNode::new(SyntaxKind::Identifier, Span::zero());
        let root = SyntaxNode::new(SyntaxKind::Block, Span::zero())
            .with_children(vec![leaf.clone(), leaf]);
        assert_eq!(root.walk().len(), 3);
    }
}
