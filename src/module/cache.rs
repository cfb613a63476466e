//! Deduplicating registry of module and package instances
//!
//! The cache is the ownership root of the graph: every other container holds
//! paths into it. `get_module(p)` returns the same instance for the same
//! canonical path until the file is deleted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::MetaCache;
use crate::fastfs::{ChangeKind, Fastfs};
use crate::transform::TransformCode;
use crate::utils::normalize_path;

use super::{Module, ModuleKind, Package};

#[derive(Default)]
struct CacheState {
    modules: HashMap<PathBuf, Arc<Module>>,
    packages: HashMap<PathBuf, Arc<Package>>,
    null_modules: HashMap<String, Arc<Module>>,

    /// Lower-cased path → first canonical path seen under that identity
    module_ids: HashMap<String, PathBuf>,

    /// Lower-cased identities claimed by more than one canonical path
    conflicts: HashSet<String>,

    /// Module path → owning package.json path
    package_for_module: HashMap<PathBuf, PathBuf>,

    /// Registered polyfills by id
    polyfills: HashMap<String, PathBuf>,
}

/// The module/package registry
pub struct ModuleCache {
    fastfs: Arc<Fastfs>,
    transformer: Arc<dyn TransformCode>,
    meta: Arc<MetaCache>,

    /// Handed to each created module so it can answer package queries
    self_ref: Weak<ModuleCache>,

    state: Mutex<CacheState>,
}

impl ModuleCache {
    /// Create an empty registry over the given filesystem index
    pub fn new(
        fastfs: Arc<Fastfs>,
        transformer: Arc<dyn TransformCode>,
        meta: Arc<MetaCache>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            fastfs,
            transformer,
            meta,
            self_ref: me.clone(),
            state: Mutex::new(CacheState::default()),
        })
    }

    /// Get or create the source module at `path`
    pub fn get_module(&self, path: &Path) -> Arc<Module> {
        self.get_with_kind(path, ModuleKind::Source)
    }

    /// Get or create the asset module at `path`
    pub fn get_asset_module(&self, path: &Path) -> Arc<Module> {
        self.get_with_kind(path, ModuleKind::Asset)
    }

    fn get_with_kind(&self, path: &Path, kind: ModuleKind) -> Arc<Module> {
        let path = normalize_path(path);
        let mut state = self.state.lock();
        if let Some(module) = state.modules.get(&path) {
            return module.clone();
        }

        let module = Arc::new(Module::new(
            path.clone(),
            kind,
            self.fastfs.clone(),
            self.transformer.clone(),
            self.meta.clone(),
            self.self_ref.clone(),
        ));
        state.modules.insert(path.clone(), module.clone());
        Self::track_identity(&mut state, &path);
        module
    }

    /// Get or create the null module standing in for `specifier`
    pub fn get_null_module(&self, specifier: &str) -> Arc<Module> {
        let mut state = self.state.lock();
        if let Some(module) = state.null_modules.get(specifier) {
            return module.clone();
        }
        let module = Arc::new(Module::new(
            PathBuf::from(specifier),
            ModuleKind::Null {
                specifier: specifier.to_string(),
            },
            self.fastfs.clone(),
            self.transformer.clone(),
            self.meta.clone(),
            self.self_ref.clone(),
        ));
        state
            .null_modules
            .insert(specifier.to_string(), module.clone());
        module
    }

    /// Create and register a polyfill module
    pub fn create_polyfill(
        &self,
        file: &Path,
        id: &str,
        dependencies: Vec<String>,
    ) -> Arc<Module> {
        let path = normalize_path(file);
        let module = Arc::new(Module::new(
            path.clone(),
            ModuleKind::Polyfill {
                id: id.to_string(),
                dependencies,
            },
            self.fastfs.clone(),
            self.transformer.clone(),
            self.meta.clone(),
            self.self_ref.clone(),
        ));
        let mut state = self.state.lock();
        state.modules.insert(path.clone(), module.clone());
        state.polyfills.insert(id.to_string(), path);
        module
    }

    /// Look up a registered polyfill by id
    pub fn polyfill_for(&self, id: &str) -> Option<Arc<Module>> {
        let state = self.state.lock();
        let path = state.polyfills.get(id)?;
        state.modules.get(path).cloned()
    }

    /// Get or create the package rooted at the given `package.json` path
    pub fn get_package(&self, path: &Path) -> Arc<Package> {
        let path = normalize_path(path);
        let mut state = self.state.lock();
        if let Some(package) = state.packages.get(&path) {
            return package.clone();
        }
        let package = Arc::new(Package::new(path.clone(), self.fastfs.clone()));
        state.packages.insert(path, package.clone());
        package
    }

    /// The package owning `module_path`, found via the closest `package.json`
    pub fn get_package_for_module(&self, module_path: &Path) -> Option<Arc<Package>> {
        let module_path = normalize_path(module_path);
        let memo = self
            .state
            .lock()
            .package_for_module
            .get(&module_path)
            .cloned();
        if let Some(pkg_path) = memo {
            // The memo can outlive a deleted package; re-check liveness.
            if self.fastfs.file_exists(&pkg_path) {
                return Some(self.get_package(&pkg_path));
            }
        }

        let dir = self.fastfs.closest(&module_path, "package.json")?;
        let pkg_path = dir.join("package.json");
        self.state
            .lock()
            .package_for_module
            .insert(module_path, pkg_path.clone());
        Some(self.get_package(&pkg_path))
    }

    /// An already-created module for `path`, of whatever kind, including
    /// null modules whose path is their placeholder specifier
    pub fn lookup(&self, path: &Path) -> Option<Arc<Module>> {
        let state = self.state.lock();
        if let Some(module) = state.modules.get(&normalize_path(path)) {
            return Some(module.clone());
        }
        state
            .null_modules
            .values()
            .find(|m| m.path() == path)
            .cloned()
    }

    /// Whether two distinct paths collide on a case-insensitive identity
    pub fn has_conflict(&self, path: &Path) -> bool {
        let key = normalize_path(path).display().to_string().to_lowercase();
        self.state.lock().conflicts.contains(&key)
    }

    /// React to a filesystem change: invalidate on change, evict on delete
    pub fn process_file_change(&self, kind: ChangeKind, path: &Path) {
        let path = normalize_path(path);
        self.meta.invalidate(&path);

        let mut state = self.state.lock();
        match kind {
            ChangeKind::Change | ChangeKind::Add => {
                if let Some(module) = state.modules.get(&path) {
                    module.invalidate();
                }
                if let Some(package) = state.packages.get(&path) {
                    package.invalidate();
                }
            }
            ChangeKind::Delete => {
                debug!(path = %path.display(), "evicting module record");
                state.modules.remove(&path);
                if state.packages.remove(&path).is_some() {
                    state.package_for_module.retain(|_, pkg| pkg != &path);
                }
                let key = path.display().to_string().to_lowercase();
                if state.module_ids.get(&key) == Some(&path) {
                    state.module_ids.remove(&key);
                }
                state.package_for_module.remove(&path);
            }
        }
    }

    fn track_identity(state: &mut CacheState, path: &Path) {
        let key = path.display().to_string().to_lowercase();
        match state.module_ids.get(&key) {
            Some(existing) if existing != path => {
                state.conflicts.insert(key);
            }
            Some(_) => {}
            None => {
                state.module_ids.insert(key, path.to_path_buf());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetaCache;
    use crate::config::GraphConfig;
    use crate::transform::DefaultTransformer;
    use tempfile::tempdir;

    fn cache_fixture() -> (tempfile::TempDir, Arc<ModuleCache>) {
        let dir = tempdir().unwrap();
        let root = normalize_path(dir.path());
        std::fs::write(root.join("a.js"), "").unwrap();
        std::fs::write(root.join("package.json"), r#"{"name": "root", "main": "a.js"}"#).unwrap();

        let config = Arc::new(GraphConfig::default_config(root));
        let fastfs = Arc::new(Fastfs::new(config));
        fastfs.build().unwrap();

        let cache = ModuleCache::new(fastfs, Arc::new(DefaultTransformer), MetaCache::in_memory());
        (dir, cache)
    }

    #[test]
    fn test_identity_is_preserved() {
        let (dir, cache) = cache_fixture();
        let path = normalize_path(dir.path()).join("a.js");

        let first = cache.get_module(&path);
        let second = cache.get_module(&path);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_eviction_creates_fresh_instance() {
        let (dir, cache) = cache_fixture();
        let path = normalize_path(dir.path()).join("a.js");

        let first = cache.get_module(&path);
        cache.process_file_change(ChangeKind::Delete, &path);
        let second = cache.get_module(&path);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_case_conflict_detection() {
        let (dir, cache) = cache_fixture();
        let root = normalize_path(dir.path());

        cache.get_module(&root.join("Button.js"));
        assert!(!cache.has_conflict(&root.join("Button.js")));

        cache.get_module(&root.join("button.js"));
        assert!(cache.has_conflict(&root.join("button.js")));
        assert!(cache.has_conflict(&root.join("Button.js")));
    }

    #[test]
    fn test_package_for_module() {
        let (dir, cache) = cache_fixture();
        let root = normalize_path(dir.path());

        let package = cache.get_package_for_module(&root.join("a.js")).unwrap();
        assert_eq!(package.path(), root.join("package.json"));

        // Memoized lookup returns the same instance.
        let again = cache.get_package_for_module(&root.join("a.js")).unwrap();
        assert!(Arc::ptr_eq(&package, &again));
    }

    #[test]
    fn test_null_modules_keyed_by_specifier() {
        let (_dir, cache) = cache_fixture();
        let a = cache.get_null_module("net");
        let b = cache.get_null_module("net");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.path(), Path::new("net"));
    }

    #[test]
    fn test_module_get_package() {
        let (dir, cache) = cache_fixture();
        let root = normalize_path(dir.path());

        let module = cache.get_module(&root.join("a.js"));
        let package = module.get_package().unwrap();
        assert_eq!(package.path(), root.join("package.json"));

        // Null modules have no owning package.
        assert!(cache.get_null_module("net").get_package().is_none());
    }

    #[tokio::test]
    async fn test_package_main_is_haste() {
        let (dir, cache) = cache_fixture();
        let root = normalize_path(dir.path());
        std::fs::write(root.join("other.js"), "").unwrap();
        cache.fastfs.process_change(
            crate::fastfs::ChangeKind::Add,
            &root,
            Path::new("other.js"),
        );

        // a.js is the main of the "root" package and inherits its name.
        let main = cache.get_module(&root.join("a.js"));
        assert!(main.is_haste().await.unwrap());
        assert_eq!(main.name().await.unwrap(), "root");

        // A sibling that is not the main stays anonymous.
        let other = cache.get_module(&root.join("other.js"));
        assert!(!other.is_haste().await.unwrap());
        assert_eq!(
            other.name().await.unwrap(),
            root.join("other.js").display().to_string()
        );
    }
}
