//! Error types for kai-core (§7, the parse/detect/merge subset).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Parser failed on unrecoverable syntax errors.
    Parse,
    /// Unsupported language or extension.
    UnsupportedLanguage,
    /// Change detection failed.
    Detect,
    /// Merge engine failed outside of reporting typed conflicts.
    Merge,
    /// Serialization errors (YAML module rules, etc).
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::UnsupportedLanguage => "unsupported_language",
            ErrorKind::Detect => "detect",
            ErrorKind::Merge => "merge",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub file_path: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file_path: None,
            source: None,
        }
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        let lang = lang.into();
        Self::new(ErrorKind::UnsupportedLanguage, format!("unsupported language: {lang}"))
    }

    pub fn detect(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Detect, message)
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Merge, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(ref file) = self.file_path {
            write!(f, " in {file}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::new(ErrorKind::Serialization, format!("YAML error: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_file() {
        let err = CoreError::parse("unexpected token").with_file("a.py");
        let msg = format!("{err}");
        assert!(msg.contains("parse"));
        assert!(msg.contains("a.py"));
    }

    #[test]
    fn unsupported_language_names_the_language() {
        let err = CoreError::unsupported_language("cobol");
        assert!(err.message.contains("cobol"));
    }
}
