//! Snapshot Engine, Workspace & Integration, and Reference Resolver
//! (C4, C6, C8): the orchestration layer that turns `kai-core`'s pure
//! parsing/diffing/merging into a versioned graph over a `kai-storage`
//! store.

pub mod changeset;
pub mod config;
pub mod error;
pub mod file_source;
pub mod matcher;
pub mod pack;
pub mod resolver;
pub mod snapshot;
pub mod workspace;

pub use changeset::{
    build_changeset, dump_changeset, render_intent, resolve_intent, ChangeSetDump, ChangeSetSummary,
    DumpedEdge, DumpedNode,
};
pub use config::{ChangeTypeRule, ModuleRule, RepoConfig, RepoLayout};
pub use error::{EngineError, Result};
pub use file_source::{guess_lang, DirFileSource, FileSource, MemoryFileSource, SourceFile};
pub use matcher::{Matcher, YamlMatcher};
pub use pack::{build_pack, unpack, UnpackedNode};
pub use resolver::resolve;
pub use snapshot::{analyze_symbols, checkout, create_snapshot, CheckoutResult, SnapshotSummary};
pub use workspace::{
    close, create_workspace, integrate, shelve, stage, unshelve, IntegrationResult, StageOutcome,
};
