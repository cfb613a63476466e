//! Configuration schema definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Watched root directories, relative to the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootsConfig {
    /// Project roots: crawled eagerly, searched for source modules
    #[serde(default = "default_project_roots")]
    pub project: Vec<String>,

    /// Asset roots: crawled for files with asset extensions
    #[serde(default)]
    pub assets: Vec<String>,

    /// Lazy roots: file nodes materialize on first access
    #[serde(default)]
    pub lazy: Vec<String>,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            project: default_project_roots(),
            assets: Vec::new(),
            lazy: Vec::new(),
        }
    }
}

fn default_project_roots() -> Vec<String> {
    vec![".".to_string()]
}

/// Resolution behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Source extensions, in fallback order
    #[serde(default = "default_project_exts")]
    pub project_exts: Vec<String>,

    /// Asset extensions
    #[serde(default = "default_asset_exts")]
    pub asset_exts: Vec<String>,

    /// Recognized platform tags
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,

    /// Try `.native.{ext}` variants before plain ones
    #[serde(default = "default_true")]
    pub prefer_native_platform: bool,

    /// Regex patterns for paths excluded from crawl and indexing
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Fallback bases for bare specifiers whose first segment matches a key
    #[serde(default)]
    pub extra_node_modules: HashMap<String, String>,

    /// Global redirect table, applied after package-level redirection
    #[serde(default)]
    pub redirect: HashMap<String, RedirectTarget>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            project_exts: default_project_exts(),
            asset_exts: default_asset_exts(),
            platforms: default_platforms(),
            prefer_native_platform: true,
            blacklist: Vec::new(),
            extra_node_modules: HashMap::new(),
            redirect: HashMap::new(),
        }
    }
}

/// A redirect value: a substitute path, or `false` to disable the module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RedirectTarget {
    /// Substitute path, resolved normally afterwards
    Path(String),
    /// `false` disables the request; any other boolean is rejected downstream
    Disabled(bool),
}

fn default_project_exts() -> Vec<String> {
    vec!["js".to_string(), "json".to_string()]
}

fn default_asset_exts() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "svg", "ttf", "otf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_platforms() -> Vec<String> {
    vec!["ios".to_string(), "android".to_string(), "web".to_string()]
}

fn default_true() -> bool {
    true
}

/// On-disk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether to persist transform metadata between runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory, relative to the config file
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// File name of the haste snapshot written after each index build
    #[serde(default = "default_snapshot")]
    pub snapshot: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            snapshot: default_snapshot(),
        }
    }
}

fn default_cache_dir() -> String {
    ".hastegraph".to_string()
}

fn default_snapshot() -> String {
    "haste-map.json".to_string()
}
