//! Error type for kai-engine (§7): the kinds a caller of C4/C6/C8 sees,
//! converting from the lower crates' errors with `#[from]`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous prefix {prefix:?}: {candidates} candidates")]
    AmbiguousPrefix { prefix: String, candidates: usize },

    #[error("invalid workspace state: {0}")]
    InvalidWorkspaceState(String),

    #[error("integration conflict ({} conflicts)", .0.len())]
    IntegrationConflict(Vec<kai_core::Conflict>),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Storage(#[from] kai_storage::StorageError),

    #[error(transparent)]
    Core(#[from] kai_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn ambiguous_prefix(prefix: impl Into<String>, candidates: usize) -> Self {
        Self::AmbiguousPrefix {
            prefix: prefix.into(),
            candidates,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidWorkspaceState(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
