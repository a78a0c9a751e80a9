//! `FileSource` (§4.4): the engine's only view into a set of files. Ignore
//! filtering, directory scanning, and Git reading are external collaborators
//! per §1 Non-goals; these two implementations exist so C4 can be exercised
//! end to end in tests, exactly as a real deployment wires in its own.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: Vec<u8>,
    pub lang: String,
}

pub trait FileSource {
    /// Git ref or directory path identifying this source's revision.
    fn identifier(&self) -> String;
    /// `"git"`, `"dir"`, or a caller-defined source kind.
    fn source_type(&self) -> String;
    /// All files, in no particular order; callers sort by path (§4.4.1 tie-break).
    fn files(&self) -> Result<Vec<SourceFile>>;
    fn file(&self, path: &str) -> Result<Option<SourceFile>>;
}

/// Guesses a language tag from extension, matching `kai_core::Language`'s
/// coverage plus a few non-code extensions the detector special-cases.
pub fn guess_lang(path: &str) -> String {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("js" | "jsx" | "mjs" | "cjs") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("py") => "python",
        Some("rb") => "ruby",
        Some("rs") => "rust",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        _ => "text",
    }
    .to_string()
}

/// Walks a directory tree on disk. The caller is responsible for any
/// ignore-pattern filtering (§6.4); this source reads whatever is present,
/// skipping `.kai` and common VCS/build directories as a minimal default.
pub struct DirFileSource {
    root: std::path::PathBuf,
}

const SKIP_DIRS: &[&str] = &[".git", ".kai", "node_modules", "dist", "build", "target"];

impl DirFileSource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for DirFileSource {
    fn identifier(&self) -> String {
        self.root.display().to_string()
    }

    fn source_type(&self) -> String {
        "dir".to_string()
    }

    fn files(&self) -> Result<Vec<SourceFile>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            if e.file_type().is_dir() {
                let name = e.file_name().to_string_lossy();
                !SKIP_DIRS.contains(&name.as_ref())
            } else {
                true
            }
        });
        for entry in walker {
            let entry = entry.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let content = std::fs::read(entry.path())?;
            let lang = guess_lang(&rel);
            out.push(SourceFile { path: rel, content, lang });
        }
        Ok(out)
    }

    fn file(&self, path: &str) -> Result<Option<SourceFile>> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        let content = std::fs::read(&full)?;
        Ok(Some(SourceFile {
            path: path.to_string(),
            content,
            lang: guess_lang(path),
        }))
    }
}

/// An in-memory source, for tests that don't want a temp directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSource {
    identifier: String,
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFileSource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

impl FileSource for MemoryFileSource {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn source_type(&self) -> String {
        "mem".to_string()
    }

    fn files(&self) -> Result<Vec<SourceFile>> {
        Ok(self
            .files
            .iter()
            .map(|(path, content)| SourceFile {
                path: path.clone(),
                content: content.clone(),
                lang: guess_lang(path),
            })
            .collect())
    }

    fn file(&self, path: &str) -> Result<Option<SourceFile>> {
        Ok(self.files.get(path).map(|content| SourceFile {
            path: path.to_string(),
            content: content.clone(),
            lang: guess_lang(path),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_lists_files_sorted_by_btreemap_order() {
        let source = MemoryFileSource::new("mem:test")
            .with_file("b.py", "b")
            .with_file("a.py", "a");
        let files = source.files().unwrap();
        assert_eq!(files[0].path, "a.py");
        assert_eq!(files[1].path, "b.py");
    }

    #[test]
    fn dir_source_skips_kai_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".kai/objects")).unwrap();
        std::fs::write(dir.path().join(".kai/objects/x"), b"blob").unwrap();
        std::fs::write(dir.path().join("a.py"), b"x = 1").unwrap();
        let source = DirFileSource::new(dir.path());
        let files = source.files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.py");
    }
}
