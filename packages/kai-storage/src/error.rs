//! Error types for kai-storage (§7, the storage-facing subset).

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite).
    Database,
    /// Serialization/deserialization errors.
    Serialization,
    /// Node, ref, blob, or log entry missing.
    NotFound,
    /// Referenced blob not present in the object store.
    BlobMissing,
    /// Payload re-hash disagrees with stored id, or an edge endpoint is missing.
    CorruptStore,
    /// Transaction errors.
    Transaction,
    /// I/O errors.
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BlobMissing => "blob_missing",
            ErrorKind::CorruptStore => "corrupt_store",
            ErrorKind::Transaction => "transaction",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn blob_missing(digest: impl Into<String>) -> Self {
        let digest = digest.into();
        Self::new(ErrorKind::BlobMissing, format!("blob missing: {digest}"))
    }

    pub fn corrupt_store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptStore, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, err.to_string()).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn database_error_display() {
        let err = StorageError::database("connection failed");
        assert_eq!(format!("{}", err), "[database] connection failed");
    }

    #[test]
    fn blob_missing_carries_digest() {
        let err = StorageError::blob_missing("ab12");
        assert_eq!(err.kind, ErrorKind::BlobMissing);
        assert!(err.message.contains("ab12"));
    }

    #[test]
    fn with_source_chains() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StorageError::database("db file missing").with_source(io_err);
        assert!(err.source().unwrap().to_string().contains("gone"));
    }

    #[test]
    fn from_rusqlite_error() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind, ErrorKind::Database);
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: StorageError = json_err.into();
        assert_eq!(err.kind, ErrorKind::Serialization);
    }
}
