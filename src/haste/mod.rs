//! Haste name index
//!
//! Maps declared module names to concrete files, keyed by platform. A file
//! declares its name with `@providesModule` in its leading docblock; a
//! package declares one through its `package.json` `name` field. The
//! reserved platform keys are `generic` (unqualified files) and `native`
//! (`.native.ext` files).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::fastfs::{ChangeKind, Fastfs};
use crate::module::ModuleCache;
use crate::utils::split_platform_ext;

/// Platform key for unqualified files
pub const GENERIC_PLATFORM: &str = "generic";

/// Platform key for `.native.ext` files
pub const NATIVE_PLATFORM: &str = "native";

/// What a haste name points at for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HasteEntry {
    /// A source file declaring `@providesModule`
    Module(PathBuf),

    /// A `package.json` with a `name` field
    Package(PathBuf),
}

impl HasteEntry {
    /// The concrete file backing the entry
    pub fn path(&self) -> &Path {
        match self {
            HasteEntry::Module(p) | HasteEntry::Package(p) => p,
        }
    }
}

/// The haste name index
pub struct HasteMap {
    config: Arc<GraphConfig>,
    fastfs: Arc<Fastfs>,
    modules: Arc<ModuleCache>,
    map: RwLock<HashMap<String, HashMap<String, HasteEntry>>>,
}

impl HasteMap {
    pub fn new(config: Arc<GraphConfig>, fastfs: Arc<Fastfs>, modules: Arc<ModuleCache>) -> Self {
        Self {
            config,
            fastfs,
            modules,
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Enumerate every indexed file and rebuild the map
    pub async fn build(&self) -> Result<()> {
        self.map.write().clear();

        let mut exts = self.config.resolution.project_exts.clone();
        if !exts.iter().any(|e| e == "json") {
            exts.push("json".to_string());
        }

        for file in self.fastfs.find_files_by_exts(&exts) {
            self.index_file(&file).await?;
        }

        debug!(names = self.map.read().len(), "haste map built");
        Ok(())
    }

    async fn index_file(&self, path: &Path) -> Result<()> {
        if path.file_name().map(|n| n == "package.json").unwrap_or(false) {
            return self.index_package(path).await;
        }

        let is_source_ext = path
            .extension()
            .map(|e| {
                self.config
                    .resolution
                    .project_exts
                    .iter()
                    .any(|x| e.eq_ignore_ascii_case(x))
            })
            .unwrap_or(false);
        if !is_source_ext || !self.is_haste_compatible(path) {
            return Ok(());
        }

        let module = self.modules.get_module(path);
        // `is_haste` reads the owning package.json for the package-main
        // check; unparseable ones are skipped here like everywhere else in
        // the indexing path.
        let is_haste = match module.is_haste().await {
            Ok(flag) => flag,
            Err(GraphError::MalformedPackage { path, message }) => {
                warn!(path = %path.display(), "skipping malformed package.json: {}", message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !is_haste {
            return Ok(());
        }
        let name = module.name().await?;

        let platform = self.platform_of(path);
        self.update(&name, &platform, HasteEntry::Module(path.to_path_buf()))
    }

    async fn index_package(&self, path: &Path) -> Result<()> {
        if !self.is_haste_compatible(path) {
            return Ok(());
        }
        let package = self.modules.get_package(path);
        let name = match package.name().await {
            Ok(name) => name,
            // Unparseable package.json files are skipped while indexing.
            Err(GraphError::MalformedPackage { path, message }) => {
                warn!(path = %path.display(), "skipping malformed package.json: {}", message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let Some(name) = name else {
            return Ok(());
        };
        self.update(
            &name,
            GENERIC_PLATFORM,
            HasteEntry::Package(path.to_path_buf()),
        )
    }

    /// Register an entry, applying the collision rules
    fn update(&self, name: &str, platform: &str, entry: HasteEntry) -> Result<()> {
        let mut map = self.map.write();
        let platforms = map.entry(name.to_string()).or_default();

        match platforms.get(platform).cloned() {
            None => {}
            Some(existing) if existing.path() == entry.path() => {}
            // A module overrides a package of the same name, whichever of
            // the two the enumeration happens to reach first. This is what
            // lets a package and its own main (which inherits the package
            // name) coexist as one entry.
            Some(HasteEntry::Package(_)) if matches!(entry, HasteEntry::Module(_)) => {
                debug!(name, platform, "haste module overrides package");
            }
            Some(HasteEntry::Module(_)) if matches!(entry, HasteEntry::Package(_)) => {
                debug!(name, platform, "haste module stands over package");
                return Ok(());
            }
            Some(existing) => {
                return Err(GraphError::HasteCollision {
                    name: name.to_string(),
                    platform: platform.to_string(),
                    existing: existing.path().to_path_buf(),
                    incoming: entry.path().to_path_buf(),
                });
            }
        }
        platforms.insert(platform.to_string(), entry);
        Ok(())
    }

    /// Remove the entry registered for `(name, platform)` when it points at
    /// the given path
    pub fn remove(&self, name: &str, platform: &str, path: &Path) {
        let mut map = self.map.write();
        let emptied = match map.get_mut(name) {
            Some(platforms) => {
                if platforms
                    .get(platform)
                    .map(|e| e.path() == path)
                    .unwrap_or(false)
                {
                    platforms.remove(platform);
                }
                platforms.is_empty()
            }
            None => false,
        };
        if emptied {
            map.remove(name);
        }
    }

    /// Look a name up: exact platform, then `native` when preferred, then
    /// `generic`
    pub fn get_module(&self, name: &str, platform: Option<&str>) -> Option<HasteEntry> {
        let map = self.map.read();
        let platforms = map.get(name)?;

        if let Some(platform) = platform {
            if let Some(entry) = platforms.get(platform) {
                return Some(entry.clone());
            }
        }
        if self.config.resolution.prefer_native_platform {
            if let Some(entry) = platforms.get(NATIVE_PLATFORM) {
                return Some(entry.clone());
            }
        }
        platforms.get(GENERIC_PLATFORM).cloned()
    }

    /// React to a filesystem change: sweep stale entries, then re-index the
    /// file if it still exists
    pub async fn process_file_change(&self, kind: ChangeKind, path: &Path) -> Result<()> {
        {
            let mut map = self.map.write();
            for platforms in map.values_mut() {
                platforms.retain(|_, entry| entry.path() != path);
            }
            map.retain(|_, platforms| !platforms.is_empty());
        }

        if kind != ChangeKind::Delete && self.fastfs.file_exists(path) {
            self.index_file(path).await?;
        }
        Ok(())
    }

    /// Snapshot of the map: `name → path relative to the first project root`
    pub fn snapshot(&self) -> serde_json::Value {
        let roots = self.config.project_roots();
        let map = self.map.read();

        let mut out = serde_json::Map::new();
        let mut names: Vec<_> = map.keys().collect();
        names.sort();
        for name in names {
            let platforms = &map[name];
            let entry = platforms
                .get(GENERIC_PLATFORM)
                .or_else(|| platforms.values().next());
            if let Some(entry) = entry {
                let rel = roots
                    .first()
                    .and_then(|root| crate::utils::relative_path(root, entry.path()))
                    .unwrap_or_else(|| entry.path().display().to_string());
                out.insert(name.clone(), serde_json::Value::String(rel));
            }
        }
        serde_json::Value::Object(out)
    }

    /// Platform key for a file, derived from its name suffix
    fn platform_of(&self, path: &Path) -> String {
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
        let Some(file_name) = file_name else {
            return GENERIC_PLATFORM.to_string();
        };
        let (_, platform, _) = split_platform_ext(&file_name, &self.config.resolution.platforms);
        platform.unwrap_or_else(|| GENERIC_PLATFORM.to_string())
    }

    /// Files under `node_modules` are haste-compatible only when their
    /// package root is itself a configured eager root
    fn is_haste_compatible(&self, path: &Path) -> bool {
        let components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let Some(last_nm) = components.iter().rposition(|c| c == "node_modules") else {
            return true;
        };

        // Package root: node_modules/<name> or node_modules/@scope/<name>.
        let mut end = last_nm + 2;
        if components
            .get(last_nm + 1)
            .map(|c| c.starts_with('@'))
            .unwrap_or(false)
        {
            end += 1;
        }
        if end > components.len() {
            return false;
        }
        let package_root: PathBuf = components[..end].iter().collect();
        self.fastfs.roots().iter().any(|root| *root == package_root)
    }
}
