//! On-disk repository layout (§6.1) and the module/changetype rule files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Locates the parts of a `.kai/` repository directory.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    pub root: PathBuf,
}

impl RepoLayout {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { root: repo_root.into() }
    }

    pub fn kai_dir(&self) -> PathBuf {
        self.root.join(".kai")
    }

    pub fn db_path(&self) -> PathBuf {
        self.kai_dir().join("db.sqlite3")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.kai_dir().join("objects")
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.kai_dir().join("rules")
    }

    pub fn modules_yaml(&self) -> PathBuf {
        self.rules_dir().join("modules.yaml")
    }

    pub fn changetypes_yaml(&self) -> PathBuf {
        self.rules_dir().join("changetypes.yaml")
    }

    /// Create `.kai/`, `.kai/objects/`, and `.kai/rules/` if absent.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.objects_dir())?;
        std::fs::create_dir_all(self.rules_dir())?;
        Ok(())
    }
}

/// One entry of `modules.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRule {
    pub name: String,
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesFile {
    #[serde(default)]
    pub modules: Vec<ModuleRule>,
}

/// Informational rule declarations (§6.3); the effective category set is
/// frozen in the change detector regardless of what's declared here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeTypeRule {
    pub id: String,
    #[serde(default, rename = "nodeTypes")]
    pub node_types: Vec<String>,
    #[serde(default)]
    pub detector: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeTypesFile {
    #[serde(default)]
    pub rules: Vec<ChangeTypeRule>,
}

#[derive(Debug, Clone, Default)]
pub struct RepoConfig {
    pub modules: ModulesFile,
    pub change_types: ChangeTypesFile,
}

impl RepoConfig {
    /// Load `modules.yaml`/`changetypes.yaml` from `layout`; missing files
    /// yield an empty, valid config rather than an error (a fresh repo has
    /// neither yet).
    pub fn load(layout: &RepoLayout) -> Result<Self> {
        Ok(Self {
            modules: read_yaml_or_default(&layout.modules_yaml())?,
            change_types: read_yaml_or_default(&layout.changetypes_yaml())?,
        })
    }
}

fn read_yaml_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| EngineError::config(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_nest_under_kai_dir() {
        let layout = RepoLayout::new("/repo");
        assert_eq!(layout.db_path(), Path::new("/repo/.kai/db.sqlite3"));
        assert_eq!(layout.objects_dir(), Path::new("/repo/.kai/objects"));
        assert_eq!(layout.modules_yaml(), Path::new("/repo/.kai/rules/modules.yaml"));
    }

    #[test]
    fn missing_rule_files_yield_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        let cfg = RepoConfig::load(&layout).unwrap();
        assert!(cfg.modules.modules.is_empty());
        assert!(cfg.change_types.rules.is_empty());
    }

    #[test]
    fn parses_modules_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.ensure_dirs().unwrap();
        std::fs::write(
            layout.modules_yaml(),
            "modules:\n  - name: auth\n    include: [\"auth/**\"]\n",
        )
        .unwrap();
        let cfg = RepoConfig::load(&layout).unwrap();
        assert_eq!(cfg.modules.modules.len(), 1);
        assert_eq!(cfg.modules.modules[0].name, "auth");
    }
}
