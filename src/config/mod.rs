//! Configuration handling
//!
//! Parses and manages hastegraph.toml configuration files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

mod schema;

pub use schema::*;

use crate::utils::normalize_path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Project metadata
    pub project: ProjectConfig,

    /// Watched root directories
    #[serde(default)]
    pub roots: RootsConfig,

    /// Resolution behavior
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// On-disk cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,

    /// Compiled blacklist patterns (computed on load)
    #[serde(skip)]
    compiled_blacklist: Vec<Regex>,
}

impl GraphConfig {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = std::fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config: GraphConfig =
            toml::from_str(&content).with_context(|| "Failed to parse hastegraph.toml")?;

        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.finish()?;

        Ok(config)
    }

    /// Create a default configuration rooted at the given directory
    pub fn default_config(root: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            project: ProjectConfig {
                name: "app".to_string(),
                version: "0.1.0".to_string(),
            },
            roots: RootsConfig::default(),
            resolution: ResolutionConfig::default(),
            cache: CacheConfig::default(),
            root: root.into(),
            compiled_blacklist: Vec::new(),
        };
        config.roots.project = vec![".".to_string()];
        config
    }

    /// Compile derived state and validate
    pub fn finish(&mut self) -> Result<()> {
        if self.roots.project.is_empty() {
            anyhow::bail!("At least one project root must be specified in hastegraph.toml");
        }

        for root in self.project_roots() {
            if !root.exists() {
                anyhow::bail!("Project root does not exist: {}", root.display());
            }
        }

        self.compiled_blacklist = self
            .resolution
            .blacklist
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid blacklist pattern: {}", pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(())
    }

    /// Absolute project root paths
    pub fn project_roots(&self) -> Vec<PathBuf> {
        self.roots
            .project
            .iter()
            .map(|p| self.absolute(p))
            .collect()
    }

    /// Absolute asset root paths
    pub fn asset_roots(&self) -> Vec<PathBuf> {
        self.roots.assets.iter().map(|p| self.absolute(p)).collect()
    }

    /// Absolute lazy root paths
    pub fn lazy_roots(&self) -> Vec<PathBuf> {
        self.roots.lazy.iter().map(|p| self.absolute(p)).collect()
    }

    /// Whether a path is excluded from crawling and indexing
    pub fn is_blacklisted(&self, path: &Path) -> bool {
        let key = path.display().to_string();
        self.compiled_blacklist.iter().any(|re| re.is_match(&key))
    }

    /// Directory holding the on-disk metadata cache and haste snapshot
    pub fn cache_dir(&self) -> PathBuf {
        self.absolute(&self.cache.dir)
    }

    fn absolute(&self, p: &str) -> PathBuf {
        let path = Path::new(p);
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default_config("/tmp");
        assert_eq!(config.resolution.project_exts, vec!["js", "json"]);
        assert!(config.resolution.prefer_native_platform);
        assert_eq!(config.project_roots(), vec![PathBuf::from("/tmp")]);
    }

    #[test]
    fn test_blacklist() {
        let mut config = GraphConfig::default_config("/tmp");
        config.resolution.blacklist = vec![r"__tests__".to_string()];
        config.finish().unwrap();

        assert!(config.is_blacklisted(Path::new("/tmp/__tests__/a.js")));
        assert!(!config.is_blacklisted(Path::new("/tmp/src/a.js")));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [project]
            name = "demo"

            [roots]
            project = ["."]

            [resolution]
            platforms = ["ios", "android"]
            project_exts = ["js", "json"]

            [resolution.redirect]
            "/abs/old.js" = "/abs/new.js"
            "dead-module" = false
        "#;

        let config: GraphConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "demo");
        assert!(matches!(
            config.resolution.redirect.get("dead-module"),
            Some(RedirectTarget::Disabled(false))
        ));
    }
}
