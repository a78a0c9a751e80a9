//! `Matcher` (§6.4): maps a file path to the modules that claim it.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{ModuleRule, RepoConfig};
use crate::error::{EngineError, Result};

pub trait Matcher {
    /// Names of every module whose include pattern matches `path`.
    fn match_path(&self, path: &str) -> Vec<String>;
    fn all_modules(&self) -> Vec<ModuleRule>;
}

struct CompiledModule {
    name: String,
    patterns: Vec<String>,
    set: GlobSet,
}

/// Reads `modules.yaml` and matches paths with doublestar-style globs
/// (`globset`), normalizing to forward slashes first (§6.2).
pub struct YamlMatcher {
    modules: Vec<CompiledModule>,
}

impl YamlMatcher {
    pub fn from_config(config: &RepoConfig) -> Result<Self> {
        let mut modules = Vec::with_capacity(config.modules.modules.len());
        for rule in &config.modules.modules {
            let mut builder = GlobSetBuilder::new();
            for pattern in &rule.include {
                let glob = Glob::new(pattern)
                    .map_err(|e| EngineError::config(format!("bad glob {pattern:?}: {e}")))?;
                builder.add(glob);
            }
            let set = builder
                .build()
                .map_err(|e| EngineError::config(format!("module {:?}: {e}", rule.name)))?;
            modules.push(CompiledModule {
                name: rule.name.clone(),
                patterns: rule.include.clone(),
                set,
            });
        }
        Ok(Self { modules })
    }

    pub fn empty() -> Self {
        Self { modules: Vec::new() }
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

impl Matcher for YamlMatcher {
    fn match_path(&self, path: &str) -> Vec<String> {
        let normalized = normalize(path);
        self.modules
            .iter()
            .filter(|m| m.set.is_match(&normalized))
            .map(|m| m.name.clone())
            .collect()
    }

    fn all_modules(&self) -> Vec<ModuleRule> {
        self.modules
            .iter()
            .map(|m| ModuleRule {
                name: m.name.clone(),
                include: m.patterns.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModulesFile;

    fn config(rules: Vec<ModuleRule>) -> RepoConfig {
        RepoConfig {
            modules: ModulesFile { modules: rules },
            change_types: Default::default(),
        }
    }

    #[test]
    fn matches_doublestar_patterns() {
        let cfg = config(vec![ModuleRule {
            name: "auth".into(),
            include: vec!["auth/**/*.ts".into()],
        }]);
        let matcher = YamlMatcher::from_config(&cfg).unwrap();
        assert_eq!(matcher.match_path("auth/session.ts"), vec!["auth".to_string()]);
        assert_eq!(matcher.match_path("auth/nested/deep.ts"), vec!["auth".to_string()]);
        assert!(matcher.match_path("billing/plan.ts").is_empty());
    }

    #[test]
    fn a_path_can_match_multiple_modules() {
        let cfg = config(vec![
            ModuleRule { name: "all".into(), include: vec!["**/*.ts".into()] },
            ModuleRule { name: "auth".into(), include: vec!["auth/**".into()] },
        ]);
        let matcher = YamlMatcher::from_config(&cfg).unwrap();
        let mut names = matcher.match_path("auth/session.ts");
        names.sort();
        assert_eq!(names, vec!["all".to_string(), "auth".to_string()]);
    }
}
