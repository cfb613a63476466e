//! Source-file records
//!
//! A [`Module`] is the unit the graph traverses. The four kinds share one
//! struct with a tag; behavior that differs per kind is a pattern match in
//! `read`, `read_dependencies`, `name` and `is_haste`.

mod cache;
mod package;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::cache::MetaCache;
use crate::error::{GraphError, Result};
use crate::fastfs::Fastfs;
use crate::transform::{extract_requires, TransformCode, TransformOptions};

pub use cache::ModuleCache;
pub use package::{Package, RedirectResult};

/// Matches `@providesModule Name` or `@provides Name` in a docblock
static PROVIDES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@provides(?:Module)?\s+(\S+)").unwrap());

/// The fixed set of module kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    /// Ordinary source file: docblock, extracted deps, transformed code
    Source,

    /// Binary asset file: no deps, no code body
    Asset,

    /// Placeholder for disabled or platform-absent dependencies
    Null {
        /// The specifier the placeholder stands in for
        specifier: String,
    },

    /// Synthetic module with a caller-supplied id and fixed dep list
    Polyfill {
        id: String,
        dependencies: Vec<String>,
    },
}

/// Result of reading a module
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// Transformed code
    pub code: String,

    /// Dependency specifiers in source order
    pub dependencies: Vec<String>,

    /// Docblock id (haste name) when the module declares one
    pub id: Option<String>,
}

#[derive(Default)]
struct ModuleState {
    /// `None` until the docblock was scanned; then the extracted name, if any
    docblock_name: Option<Option<String>>,

    /// Read results keyed by transform-options hash
    reads: HashMap<String, Arc<ReadResult>>,
}

/// A file participating in the dependency graph
pub struct Module {
    path: PathBuf,
    kind: ModuleKind,
    fastfs: Arc<Fastfs>,
    transformer: Arc<dyn TransformCode>,
    meta: Arc<MetaCache>,

    /// Handle back to the owning cache, for package lookups
    cache: Weak<ModuleCache>,

    state: Mutex<ModuleState>,
}

impl Module {
    fn new(
        path: PathBuf,
        kind: ModuleKind,
        fastfs: Arc<Fastfs>,
        transformer: Arc<dyn TransformCode>,
        meta: Arc<MetaCache>,
        cache: Weak<ModuleCache>,
    ) -> Self {
        Self {
            path,
            kind,
            fastfs,
            transformer,
            meta,
            cache,
            state: Mutex::new(ModuleState::default()),
        }
    }

    /// Absolute normalized path identifying this module
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The module kind tag
    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    /// The package owning this module, via the closest `package.json`
    pub fn get_package(&self) -> Option<Arc<Package>> {
        match &self.kind {
            ModuleKind::Source | ModuleKind::Asset => self
                .cache
                .upgrade()
                .and_then(|cache| cache.get_package_for_module(&self.path)),
            ModuleKind::Null { .. } | ModuleKind::Polyfill { .. } => None,
        }
    }

    /// Whether the module carries a haste name: a `@providesModule`
    /// docblock, or being the main of a named package
    pub async fn is_haste(&self) -> Result<bool> {
        match &self.kind {
            ModuleKind::Source => {
                if self.docblock_name().await?.is_some() {
                    return Ok(true);
                }
                Ok(self.package_main_name().await?.is_some())
            }
            _ => Ok(false),
        }
    }

    /// The module's name: its haste name when declared, its package's name
    /// when it is that package's main, the placeholder specifier for null
    /// modules, the given id for polyfills, and the absolute path otherwise
    pub async fn name(&self) -> Result<String> {
        match &self.kind {
            ModuleKind::Source => {
                if let Some(name) = self.docblock_name().await? {
                    return Ok(name);
                }
                if let Some(name) = self.package_main_name().await? {
                    return Ok(name);
                }
                Ok(self.path.display().to_string())
            }
            ModuleKind::Asset => Ok(self.path.display().to_string()),
            ModuleKind::Null { specifier } => Ok(specifier.clone()),
            ModuleKind::Polyfill { id, .. } => Ok(id.clone()),
        }
    }

    /// The owning package's name, when this file is that package's main
    async fn package_main_name(&self) -> Result<Option<String>> {
        let Some(package) = self.get_package() else {
            return Ok(None);
        };
        let Some(name) = package.name().await? else {
            return Ok(None);
        };
        if package.get_main().await? == self.path {
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    /// Read the module: transformed code, dependency list, docblock id
    pub async fn read(&self, options: &TransformOptions) -> Result<Arc<ReadResult>> {
        match &self.kind {
            ModuleKind::Source => self.read_source(options).await,
            ModuleKind::Asset => Ok(Arc::new(ReadResult {
                code: String::new(),
                dependencies: Vec::new(),
                id: None,
            })),
            ModuleKind::Null { .. } => Ok(Arc::new(ReadResult {
                code: "module.exports = null;".to_string(),
                dependencies: Vec::new(),
                id: None,
            })),
            ModuleKind::Polyfill { id, dependencies } => {
                let code = self.read_polyfill_source().await?;
                Ok(Arc::new(ReadResult {
                    code,
                    dependencies: dependencies.clone(),
                    id: Some(id.clone()),
                }))
            }
        }
    }

    /// The module's dependency specifiers, in source order
    pub async fn read_dependencies(&self, options: &TransformOptions) -> Result<Vec<String>> {
        Ok(self.read(options).await?.dependencies.clone())
    }

    /// Drop cached reads and docblock state after a file change
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.docblock_name = None;
        state.reads.clear();
    }

    async fn read_source(&self, options: &TransformOptions) -> Result<Arc<ReadResult>> {
        let options_hash = options.stable_hash();
        if let Some(cached) = self.state.lock().reads.get(&options_hash) {
            return Ok(cached.clone());
        }

        let id = self.docblock_name().await?;

        // Persisted transforms survive restarts; validated by mtime on load.
        if let Some(value) = self.meta.get(&self.path, "transform", &options_hash) {
            if let (Some(code), Some(deps)) = (
                value.get("code").and_then(|v| v.as_str()),
                value.get("dependencies").and_then(|v| v.as_array()),
            ) {
                let result = Arc::new(ReadResult {
                    code: code.to_string(),
                    dependencies: deps
                        .iter()
                        .filter_map(|d| d.as_str().map(str::to_string))
                        .collect(),
                    id: id.clone(),
                });
                self.state
                    .lock()
                    .reads
                    .insert(options_hash, result.clone());
                return Ok(result);
            }
        }

        let source = self.fastfs.read_file(&self.path).await?;
        let transformed = self
            .transformer
            .transform(&self.path, &source, options)
            .await?;
        let dependencies = transformed
            .dependencies
            .unwrap_or_else(|| extract_requires(&transformed.code).sync);

        debug!(
            path = %self.path.display(),
            deps = dependencies.len(),
            "module read"
        );

        self.meta.set(
            &self.path,
            "transform",
            &options_hash,
            serde_json::json!({ "code": transformed.code, "dependencies": dependencies }),
        );

        let result = Arc::new(ReadResult {
            code: transformed.code,
            dependencies,
            id,
        });
        self.state
            .lock()
            .reads
            .insert(options_hash, result.clone());
        Ok(result)
    }

    async fn docblock_name(&self) -> Result<Option<String>> {
        if let Some(name) = self.state.lock().docblock_name.clone() {
            return Ok(name);
        }

        if let Some(value) = self.meta.get(&self.path, "docblock", "0") {
            let name = value.as_str().filter(|s| !s.is_empty()).map(str::to_string);
            self.state.lock().docblock_name = Some(name.clone());
            return Ok(name);
        }

        let header = self
            .fastfs
            .read_while(&self.path, |_, index, accumulated| {
                if index == 0 && !accumulated.trim_start().starts_with("/*") {
                    return false;
                }
                !accumulated.contains("*/")
            })
            .await?;

        let name = parse_docblock_name(&header);
        self.meta.set(
            &self.path,
            "docblock",
            "0",
            serde_json::json!(name.clone().unwrap_or_default()),
        );
        self.state.lock().docblock_name = Some(name.clone());
        Ok(name)
    }

    async fn read_polyfill_source(&self) -> Result<String> {
        match self.fastfs.read_file(&self.path).await {
            Ok(content) => Ok(content.as_str().to_string()),
            // Polyfills may live outside the watched roots.
            Err(GraphError::NotFoundInRoots(_)) => {
                Ok(tokio::fs::read_to_string(&self.path).await?)
            }
            Err(e) => Err(e),
        }
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Module {}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Extract a haste name from the opening docblock, if present
fn parse_docblock_name(header: &str) -> Option<String> {
    let trimmed = header.trim_start();
    if !trimmed.starts_with("/*") {
        return None;
    }
    let docblock = match trimmed.find("*/") {
        Some(end) => &trimmed[..end],
        None => trimmed,
    };
    PROVIDES_REGEX
        .captures(docblock)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docblock_name() {
        assert_eq!(
            parse_docblock_name("/**\n * @providesModule Foo\n */\ncode"),
            Some("Foo".to_string())
        );
        assert_eq!(
            parse_docblock_name("/** @provides Bar */"),
            Some("Bar".to_string())
        );
        assert_eq!(parse_docblock_name("// @providesModule Nope"), None);
        assert_eq!(parse_docblock_name("code();\n/** @providesModule Late */"), None);
    }

    #[test]
    fn test_docblock_only_scanned_in_leading_comment() {
        // The name must come from the docblock, not the body.
        let header = "/** plain */\nrequire('@providesModule trap');";
        assert_eq!(parse_docblock_name(header), None);
    }
}
