//! The dependency graph facade
//!
//! Owns every index and drives requests: building the module graph from an
//! entry file, keeping resolutions incrementally correct under filesystem
//! changes, and producing ordered [`Response`]s.

mod resolution;
mod response;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::assets::AssetMap;
use crate::cache::MetaCache;
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::fastfs::{ChangeKind, Fastfs};
use crate::haste::HasteMap;
use crate::module::{Module, ModuleCache};
use crate::resolver::Resolver;
use crate::transform::{DefaultTransformer, TransformCode, TransformOptions};
use crate::utils::normalize_path;

pub use resolution::{GraphEvent, Resolution, ResolutionCache};
pub use response::Response;

/// Options for one dependency request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Entry file, absolute or relative to a project root
    pub entry_file: PathBuf,

    /// Platform tag selecting among variant files
    pub platform: Option<String>,

    /// Whether to follow dependencies transitively
    pub recursive: bool,

    /// Options forwarded to the transform pipeline
    pub transform_options: TransformOptions,

    /// Re-raise the first unresolved dependency after completion
    pub fail_on_unresolved: bool,
}

impl RequestOptions {
    pub fn new(entry_file: impl Into<PathBuf>) -> Self {
        Self {
            entry_file: entry_file.into(),
            platform: None,
            recursive: true,
            transform_options: TransformOptions::default(),
            fail_on_unresolved: false,
        }
    }
}

/// The dependency graph and module resolver core
pub struct DependencyGraph {
    config: Arc<GraphConfig>,
    fastfs: Arc<Fastfs>,
    haste: Arc<HasteMap>,
    assets: Arc<AssetMap>,
    modules: Arc<ModuleCache>,
    resolver: Resolver,
    resolutions: ResolutionCache,
    meta: Arc<MetaCache>,

    /// Set after a haste collision; the next change event rebuilds the map
    haste_needs_rebuild: AtomicBool,
}

impl DependencyGraph {
    /// Build all indexes for the configured roots
    pub async fn new(config: GraphConfig, transformer: Arc<dyn TransformCode>) -> Result<Self> {
        let config = Arc::new(config);
        let meta = if config.cache.enabled {
            MetaCache::load(&config.cache_dir(), true)
        } else {
            MetaCache::in_memory()
        };

        let fastfs = Arc::new(Fastfs::new(config.clone()));
        fastfs.build()?;

        let modules = ModuleCache::new(fastfs.clone(), transformer, meta.clone());
        let haste = Arc::new(HasteMap::new(
            config.clone(),
            fastfs.clone(),
            modules.clone(),
        ));
        haste.build().await?;
        let assets = Arc::new(AssetMap::new(config.clone(), fastfs.clone()));
        assets.build()?;

        let resolver = Resolver::new(
            config.clone(),
            fastfs.clone(),
            haste.clone(),
            assets.clone(),
            modules.clone(),
        );

        let graph = Self {
            config,
            fastfs,
            haste,
            assets,
            modules,
            resolver,
            resolutions: ResolutionCache::new(),
            meta,
            haste_needs_rebuild: AtomicBool::new(false),
        };
        graph.write_haste_snapshot();
        info!("dependency graph ready");
        Ok(graph)
    }

    /// Build a graph with the passthrough transformer
    pub async fn load(config: GraphConfig) -> Result<Self> {
        Self::new(config, Arc::new(DefaultTransformer)).await
    }

    /// Compute the ordered, deduplicated module list reachable from the entry
    pub async fn get_dependencies(&self, options: &RequestOptions) -> Result<Response> {
        if self.haste_needs_rebuild.swap(false, Ordering::SeqCst) {
            self.haste.build().await?;
            self.write_haste_snapshot();
        }

        let entry_path = self.entry_path(&options.entry_file)?;
        let entry = self.modules.get_module(&entry_path);
        self.resolutions.register_entry(&entry_path);

        let errors = Mutex::new(Vec::new());
        self.reload(entry.clone(), options, false, options.recursive, &errors)
            .await?;
        self.all_resolved(options, &errors).await?;
        debug_assert!(!self.resolutions.is_resolving());

        let mut errors = errors.into_inner();
        if options.fail_on_unresolved && !errors.is_empty() {
            return Err(errors.remove(0));
        }

        let mut response = Response::new();
        self.fill_response(&mut response, &entry_path)?;
        for error in errors {
            response.push_error(error);
        }
        let main_module_id = entry.name().await?;
        response.finalize(main_module_id, &entry_path)?;
        Ok(response)
    }

    fn fill_response(&self, response: &mut Response, entry_path: &Path) -> Result<()> {
        for path in self.resolutions.ordered_from(entry_path) {
            if let Some(module) = self.modules.lookup(&path) {
                response.push(module)?;
            }
        }
        Ok(())
    }

    /// The raw specifier list of one module
    pub async fn get_shallow_dependencies(
        &self,
        entry_file: &Path,
        transform_options: &TransformOptions,
    ) -> Result<Vec<String>> {
        let entry_path = self.entry_path(entry_file)?;
        let module = self.modules.get_module(&entry_path);
        module.read_dependencies(transform_options).await
    }

    /// The module record for a path, asset-kinded for asset extensions
    pub fn get_module_for_path(&self, path: &Path) -> Result<Arc<Module>> {
        let path = self.entry_path(path)?;
        let is_asset = path
            .extension()
            .map(|e| {
                self.config
                    .resolution
                    .asset_exts
                    .iter()
                    .any(|x| e.eq_ignore_ascii_case(x))
            })
            .unwrap_or(false);
        Ok(if is_asset {
            self.modules.get_asset_module(&path)
        } else {
            self.modules.get_module(&path)
        })
    }

    /// All indexed files whose path matches the pattern
    pub fn match_files_by_pattern(&self, pattern: &regex::Regex) -> Vec<PathBuf> {
        self.fastfs.match_files_by_pattern(pattern)
    }

    /// Create and register a polyfill module
    pub fn create_polyfill(
        &self,
        file: &Path,
        id: &str,
        dependencies: Vec<String>,
    ) -> Arc<Module> {
        self.modules.create_polyfill(file, id, dependencies)
    }

    /// Apply one watcher event to every index and the resolution cache
    pub async fn process_file_change(
        &self,
        kind: ChangeKind,
        root: &Path,
        rel_path: &Path,
    ) -> Result<()> {
        let Some(path) = self.fastfs.process_change(kind, root, rel_path) else {
            return Ok(());
        };
        debug!(kind = ?kind, path = %path.display(), "file change");

        self.modules.process_file_change(kind, &path);
        self.assets.process_file_change(kind, &path);

        let haste_result = if self.haste_needs_rebuild.swap(false, Ordering::SeqCst) {
            self.haste.build().await.map(|_| self.write_haste_snapshot())
        } else {
            self.haste.process_file_change(kind, &path).await
        };
        if let Err(error) = haste_result {
            if matches!(error, GraphError::HasteCollision { .. }) {
                self.haste_needs_rebuild.store(true, Ordering::SeqCst);
            }
            return Err(error);
        }

        match kind {
            ChangeKind::Add => self.resolutions.on_file_added(&path),
            ChangeKind::Change => self.resolutions.on_file_changed(&path),
            ChangeKind::Delete => self.resolutions.on_file_deleted(&path),
        }
        Ok(())
    }

    /// The resolution cache, exposed for event subscription
    pub fn resolutions(&self) -> &ResolutionCache {
        &self.resolutions
    }

    /// The virtual filesystem index
    pub fn fastfs(&self) -> &Arc<Fastfs> {
        &self.fastfs
    }

    /// Flush pending metadata-cache writes to disk
    pub fn persist_caches(&self) {
        self.meta.persist();
    }

    /// Reload one resolution record; at most one reload runs per record
    async fn reload(
        &self,
        module: Arc<Module>,
        options: &RequestOptions,
        force: bool,
        recursive: bool,
        errors: &Mutex<Vec<GraphError>>,
    ) -> Result<()> {
        let path = module.path().to_path_buf();
        self.resolutions.ensure(&path);
        if !self.resolutions.mark_resolving(&path) {
            return Ok(());
        }
        let result = self
            .reload_inner(&module, &path, options, force, recursive, errors)
            .await;
        self.resolutions.mark_resolved(&path);
        result
    }

    async fn reload_inner(
        &self,
        module: &Arc<Module>,
        path: &Path,
        options: &RequestOptions,
        force: bool,
        recursive: bool,
        errors: &Mutex<Vec<GraphError>>,
    ) -> Result<()> {
        let requires = module
            .read_dependencies(&options.transform_options)
            .await?;
        let previous = self.resolutions.snapshot(path).unwrap_or_default();

        let unchanged = !force
            && previous.platform == options.platform
            && previous.requires == requires
            && previous.resolved.len() == requires.len()
            && previous.resolved.iter().all(|slot| slot.is_some());

        let resolved = if unchanged {
            previous.resolved
        } else {
            let mut slots = Vec::with_capacity(requires.len());
            for specifier in &requires {
                match self
                    .resolver
                    .resolve(module, specifier, options.platform.as_deref())
                    .await
                {
                    Ok(child) => slots.push(Some(child.path().to_path_buf())),
                    Err(error) if error.is_unable_to_resolve() => {
                        warn!(
                            from = %path.display(),
                            specifier = %specifier,
                            "unable to resolve"
                        );
                        errors.lock().push(error);
                        slots.push(None);
                    }
                    Err(error) => return Err(error),
                }
            }
            self.resolutions
                .commit(path, requires, slots.clone(), options.platform.clone());
            slots
        };

        if recursive {
            for target in resolved.iter().flatten() {
                let fresh = match self.resolutions.snapshot(target) {
                    None => true,
                    // A record resolved under another platform reloads too.
                    Some(record) => record.platform != options.platform,
                };
                if !fresh {
                    continue;
                }
                let Some(child) = self.modules.lookup(target) else {
                    continue;
                };
                Box::pin(self.reload(child, options, false, true, errors)).await?;
            }
        }
        Ok(())
    }

    /// Flush dirty records until none remain, then the barrier is fulfilled
    async fn all_resolved(
        &self,
        options: &RequestOptions,
        errors: &Mutex<Vec<GraphError>>,
    ) -> Result<()> {
        loop {
            let dirty = self.resolutions.take_dirty();
            if dirty.is_empty() {
                break;
            }
            for path in dirty {
                let Some(module) = self.modules.lookup(&path) else {
                    self.resolutions.delete_resolution(&path);
                    continue;
                };
                self.reload(module, options, true, options.recursive, errors)
                    .await?;
            }
        }
        Ok(())
    }

    /// Absolutize an entry against the project roots and require it to exist
    fn entry_path(&self, entry: &Path) -> Result<PathBuf> {
        if entry.is_absolute() {
            let path = normalize_path(entry);
            if self.fastfs.file_exists(&path) {
                return Ok(path);
            }
            return Err(if self.fastfs.root_of(&path).is_none() {
                GraphError::NotFoundInRoots(path)
            } else {
                GraphError::FileNotFound(path)
            });
        }

        for root in self.config.project_roots() {
            let candidate = normalize_path(&root.join(entry));
            if self.fastfs.file_exists(&candidate) {
                return Ok(candidate);
            }
        }
        Err(GraphError::FileNotFound(entry.to_path_buf()))
    }

    /// Write the informational haste snapshot; never read back
    fn write_haste_snapshot(&self) {
        if !self.config.cache.enabled {
            return;
        }
        let snapshot = self.haste.snapshot();
        let path = self.config.cache_dir().join(&self.config.cache.snapshot);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&path, serialized) {
                    warn!(path = %path.display(), "failed to write haste snapshot: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize haste snapshot: {}", e),
        }
    }
}
