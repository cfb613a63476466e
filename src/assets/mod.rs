//! Asset index
//!
//! Maps logical asset names to concrete resource files by platform and
//! scale. `img@2x.ios.png` indexes under the logical name `img` with scale
//! 2.0 for platform `ios`; entries keep their files sorted by ascending
//! scale so the smallest variant is first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::config::GraphConfig;
use crate::error::Result;
use crate::fastfs::{ChangeKind, Fastfs};
use crate::utils::normalize_path;

/// Parsed pieces of an asset file name
#[derive(Debug, Clone, PartialEq)]
pub struct AssetName {
    /// Logical name, without scale, platform, or extension
    pub name: String,

    /// Resolution scale; `1.0` when unqualified
    pub scale: f64,

    /// Platform tag, when the name carries one
    pub platform: Option<String>,

    /// File extension
    pub ext: String,
}

/// Files registered under one `(name, platform)` key, sorted by scale
#[derive(Debug, Clone, Default)]
pub struct AssetEntry {
    pub scales: Vec<f64>,
    pub files: Vec<PathBuf>,
}

impl AssetEntry {
    fn insert(&mut self, scale: f64, file: PathBuf) {
        let idx = self
            .scales
            .iter()
            .position(|&s| s > scale)
            .unwrap_or(self.scales.len());
        self.scales.insert(idx, scale);
        self.files.insert(idx, file);
    }

    fn remove(&mut self, file: &Path) {
        if let Some(idx) = self.files.iter().position(|f| f == file) {
            self.files.remove(idx);
            self.scales.remove(idx);
        }
    }
}

/// The asset index
pub struct AssetMap {
    config: Arc<GraphConfig>,
    fastfs: Arc<Fastfs>,
    name_regex: Regex,
    entries: RwLock<HashMap<(String, Option<String>), AssetEntry>>,
}

impl AssetMap {
    pub fn new(config: Arc<GraphConfig>, fastfs: Arc<Fastfs>) -> Self {
        let name_regex = build_name_regex(
            &config.resolution.platforms,
            &config.resolution.asset_exts,
        );
        Self {
            config,
            fastfs,
            name_regex,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Scan the filesystem index and rebuild all entries
    pub fn build(&self) -> Result<()> {
        let asset_roots = self.config.asset_roots();
        let files = self
            .fastfs
            .find_files_by_exts(&self.config.resolution.asset_exts);

        let mut entries: HashMap<(String, Option<String>), AssetEntry> = HashMap::new();
        for file in files {
            // With no dedicated asset roots, every indexed asset counts.
            if !asset_roots.is_empty() && !asset_roots.iter().any(|r| file.starts_with(r)) {
                continue;
            }
            if let Some(parsed) = self.parse_name(&file) {
                entries
                    .entry((parsed.name, parsed.platform))
                    .or_default()
                    .insert(parsed.scale, file);
            }
        }

        debug!(entries = entries.len(), "asset map built");
        *self.entries.write() = entries;
        Ok(())
    }

    /// Parse scale, platform and extension out of an asset file name
    pub fn parse_name(&self, path: &Path) -> Option<AssetName> {
        let file_name = path.file_name()?.to_string_lossy();
        let caps = self.name_regex.captures(&file_name)?;
        Some(AssetName {
            name: caps.name("name")?.as_str().to_string(),
            scale: caps
                .name("scale")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1.0),
            platform: caps.name("platform").map(|m| m.as_str().to_string()),
            ext: caps.name("ext")?.as_str().to_string(),
        })
    }

    /// Resolve an asset request to a concrete file.
    ///
    /// Absolute paths match sibling variants in their directory; the legacy
    /// `image!name` form looks the logical name up in the index. Returns the
    /// smallest-scale match, preferring platform-qualified files.
    pub fn resolve(&self, specifier: &str, platform: Option<&str>) -> Option<PathBuf> {
        if let Some(name) = specifier.strip_prefix("image!") {
            return self.resolve_by_name(name, platform);
        }

        let path = Path::new(specifier);
        if !path.is_absolute() {
            return None;
        }
        let parsed = self.parse_name(path)?;
        let dir = normalize_path(path).parent()?.to_path_buf();

        let platform_alt = match platform {
            Some(p) => format!("(?:\\.(?:{}|native))?", regex::escape(p)),
            None => String::new(),
        };
        let sibling = Regex::new(&format!(
            r"^{}(@[\d.]+x)?{}\.{}$",
            regex::escape(&parsed.name),
            platform_alt,
            regex::escape(&parsed.ext),
        ))
        .ok()?;

        let candidates = self.fastfs.matches(&dir, &sibling);
        self.pick(candidates, platform)
    }

    fn resolve_by_name(&self, name: &str, platform: Option<&str>) -> Option<PathBuf> {
        let entries = self.entries.read();
        let keyed = platform
            .and_then(|p| entries.get(&(name.to_string(), Some(p.to_string()))))
            .or_else(|| entries.get(&(name.to_string(), None)))?;
        keyed.files.first().cloned()
    }

    fn pick(&self, candidates: Vec<PathBuf>, platform: Option<&str>) -> Option<PathBuf> {
        let mut best: Option<(bool, f64, PathBuf)> = None;
        for file in candidates {
            let Some(parsed) = self.parse_name(&file) else {
                continue;
            };
            let platform_match = match (&parsed.platform, platform) {
                (Some(p), Some(requested)) => p.as_str() == requested || p == "native",
                (Some(_), None) => continue,
                (None, _) => false,
            };
            let better = match &best {
                None => true,
                Some((best_platform, best_scale, _)) => {
                    platform_match > *best_platform
                        || (platform_match == *best_platform && parsed.scale < *best_scale)
                }
            };
            if better {
                best = Some((platform_match, parsed.scale, file));
            }
        }
        best.map(|(_, _, file)| file)
    }

    /// React to a filesystem change for a possible asset file
    pub fn process_file_change(&self, kind: ChangeKind, path: &Path) {
        let Some(parsed) = self.parse_name(path) else {
            return;
        };
        let key = (parsed.name.clone(), parsed.platform.clone());
        let mut entries = self.entries.write();
        let emptied = entries
            .get_mut(&key)
            .map(|entry| {
                entry.remove(path);
                entry.files.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            entries.remove(&key);
        }
        if kind != ChangeKind::Delete && self.fastfs.file_exists(path) {
            entries
                .entry(key)
                .or_default()
                .insert(parsed.scale, path.to_path_buf());
        }
    }
}

fn build_name_regex(platforms: &[String], exts: &[String]) -> Regex {
    let platform_alt = platforms
        .iter()
        .map(|p| regex::escape(p))
        .chain(std::iter::once("native".to_string()))
        .collect::<Vec<_>>()
        .join("|");
    let ext_alt = exts
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"^(?P<name>.+?)(?:@(?P<scale>[\d.]+)x)?(?:\.(?P<platform>{}))?\.(?P<ext>{})$",
        platform_alt, ext_alt
    ))
    .expect("asset name regex")
}
