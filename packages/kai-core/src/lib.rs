//! Parser Adapter, Change Detector, and Merge Engine (C3, C5, C7).
//!
//! Pure functions and data types over bytes and tree-sitter grammars. No
//! I/O, no storage: kai-engine owns the Snapshot/ChangeSet/Workspace
//! orchestration that calls into this crate.

pub mod ast;
pub mod change_detector;
pub mod error;
pub mod merge;
pub mod parser;
pub mod units;

pub use ast::{Span, SyntaxKind, SyntaxNode};
pub use change_detector::{
    detect_file_change, ChangeCategory, ChangeType, Evidence, FileRangeEvidence,
};
pub use error::{CoreError, ErrorKind, Result};
pub use merge::{merge_file, Conflict, ConflictKind, MergeInput, MergeOutcome};
pub use parser::{
    extract_calls, extract_symbols, is_binary_extension, CallInfo, ExtractResult, ImportInfo,
    Language, ParseIssue, ParsedFile, Symbol, SymbolKind, TreeSitterParser, MAX_EXTRACTABLE_BYTES,
};
pub use units::{extract_units, Unit, UnitKey, UnitKind};
