//! Per-request dependency response
//!
//! Collects the modules discovered for one request in discovery order with
//! duplicates suppressed, identifies the main module, and becomes read-only
//! once finalized.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::module::Module;

/// The ordered result of a dependency request
pub struct Response {
    dependencies: Vec<Arc<Module>>,
    seen: HashSet<PathBuf>,
    main_module: Option<Arc<Module>>,
    main_module_id: Option<String>,
    errors: Vec<GraphError>,
    num_prepended: usize,
    finalized: bool,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            seen: HashSet::new(),
            main_module: None,
            main_module_id: None,
            errors: Vec::new(),
            num_prepended: 0,
            finalized: false,
        }
    }

    /// Append a discovered module; the first one becomes the main module
    pub(crate) fn push(&mut self, module: Arc<Module>) -> Result<()> {
        self.check_mutable()?;
        if !self.seen.insert(module.path().to_path_buf()) {
            return Ok(());
        }
        if self.main_module.is_none() {
            self.main_module = Some(module.clone());
        }
        self.dependencies.push(module);
        Ok(())
    }

    /// Remove a module that left the graph; the main module is stable
    pub(crate) fn remove(&mut self, path: &Path) -> Result<()> {
        self.check_mutable()?;
        if self.seen.remove(path) {
            self.dependencies.retain(|m| m.path() != path);
        }
        Ok(())
    }

    /// Record a per-dependency resolution failure
    pub(crate) fn push_error(&mut self, error: GraphError) {
        self.errors.push(error);
    }

    /// Seal the response; it must hold at least the entry
    pub(crate) fn finalize(&mut self, main_module_id: String, entry: &Path) -> Result<()> {
        self.check_mutable()?;
        if self.dependencies.is_empty() {
            return Err(GraphError::EmptyResponse(entry.to_path_buf()));
        }
        self.main_module_id = Some(main_module_id);
        self.finalized = true;
        Ok(())
    }

    fn check_mutable(&self) -> Result<()> {
        if self.finalized {
            return Err(GraphError::ResponseFinalized);
        }
        Ok(())
    }

    /// The ordered, deduplicated module list
    pub fn dependencies(&self) -> &[Arc<Module>] {
        &self.dependencies
    }

    /// The entry module of the request
    pub fn main_module(&self) -> Option<&Arc<Module>> {
        self.main_module.as_ref()
    }

    /// Haste name (or path) of the entry, set at finalization
    pub fn main_module_id(&self) -> Option<&str> {
        self.main_module_id.as_deref()
    }

    /// Resolution failures surfaced while the request ran
    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    /// How many modules were prepended by [`Response::copy`]
    pub fn num_prepended(&self) -> usize {
        self.num_prepended
    }

    /// Finalized view with modules (typically polyfills) prepended ahead of
    /// the real dependency list
    pub fn copy(&self, prepended: Vec<Arc<Module>>) -> Response {
        let num_prepended = prepended.len();
        let mut dependencies = prepended;
        let mut seen: HashSet<PathBuf> =
            dependencies.iter().map(|m| m.path().to_path_buf()).collect();
        for module in &self.dependencies {
            if seen.insert(module.path().to_path_buf()) {
                dependencies.push(module.clone());
            }
        }

        Response {
            dependencies,
            seen,
            main_module: self.main_module.clone(),
            main_module_id: self.main_module_id.clone(),
            errors: Vec::new(),
            num_prepended,
            finalized: true,
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("dependencies", &self.dependencies.len())
            .field("main_module_id", &self.main_module_id)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetaCache;
    use crate::config::GraphConfig;
    use crate::fastfs::Fastfs;
    use crate::module::ModuleCache;
    use crate::transform::DefaultTransformer;
    use crate::utils::normalize_path;
    use tempfile::tempdir;

    fn modules_for(names: &[&str]) -> (tempfile::TempDir, Vec<Arc<Module>>) {
        let dir = tempdir().unwrap();
        let root = normalize_path(dir.path());
        for name in names {
            std::fs::write(root.join(name), "").unwrap();
        }
        let config = Arc::new(GraphConfig::default_config(root.clone()));
        let fastfs = Arc::new(Fastfs::new(config));
        fastfs.build().unwrap();
        let cache = ModuleCache::new(fastfs, Arc::new(DefaultTransformer), MetaCache::in_memory());
        let modules = names.iter().map(|n| cache.get_module(&root.join(n))).collect();
        (dir, modules)
    }

    #[test]
    fn test_push_dedups_and_sets_main() {
        let (_dir, modules) = modules_for(&["a.js", "b.js"]);
        let mut response = Response::new();

        response.push(modules[0].clone()).unwrap();
        response.push(modules[1].clone()).unwrap();
        response.push(modules[0].clone()).unwrap();

        assert_eq!(response.dependencies().len(), 2);
        assert_eq!(
            response.main_module().unwrap().path(),
            modules[0].path()
        );
    }

    #[test]
    fn test_finalize_is_single_shot() {
        let (_dir, modules) = modules_for(&["a.js"]);
        let mut response = Response::new();
        response.push(modules[0].clone()).unwrap();
        response
            .finalize("a".to_string(), modules[0].path())
            .unwrap();

        let err = response.push(modules[0].clone());
        assert!(matches!(err, Err(GraphError::ResponseFinalized)));
    }

    #[test]
    fn test_finalize_requires_a_dependency() {
        let mut response = Response::new();
        let err = response.finalize("a".to_string(), Path::new("/r/a.js"));
        assert!(matches!(err, Err(GraphError::EmptyResponse(_))));
    }

    #[test]
    fn test_copy_prepends() {
        let (_dir, modules) = modules_for(&["poly.js", "a.js", "b.js"]);
        let mut response = Response::new();
        response.push(modules[1].clone()).unwrap();
        response.push(modules[2].clone()).unwrap();
        response
            .finalize("a".to_string(), modules[1].path())
            .unwrap();

        let copied = response.copy(vec![modules[0].clone()]);
        assert_eq!(copied.num_prepended(), 1);
        assert_eq!(copied.dependencies().len(), 3);
        assert_eq!(copied.dependencies()[0].path(), modules[0].path());
        assert_eq!(copied.dependencies()[1].path(), modules[1].path());
        // The main module does not move.
        assert_eq!(copied.main_module().unwrap().path(), modules[1].path());
    }

    #[test]
    fn test_remove_keeps_main_stable() {
        let (_dir, modules) = modules_for(&["a.js", "b.js"]);
        let mut response = Response::new();
        response.push(modules[0].clone()).unwrap();
        response.push(modules[1].clone()).unwrap();

        response.remove(modules[1].path()).unwrap();
        assert_eq!(response.dependencies().len(), 1);
        assert!(response.main_module().is_some());
    }
}
