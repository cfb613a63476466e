//! Module resolution
//!
//! Resolves `require(...)` specifiers to concrete modules by walking a
//! multi-strategy search order: redirect → asset → haste → project path →
//! installed package → builtin. Each strategy is attempted only when the
//! previous one failed with an unresolvable-specifier error; any other
//! failure propagates immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::assets::AssetMap;
use crate::config::{GraphConfig, RedirectTarget};
use crate::error::{GraphError, Result};
use crate::fastfs::Fastfs;
use crate::haste::{HasteEntry, HasteMap};
use crate::module::{Module, ModuleCache, RedirectResult};
use crate::utils::{join_normalized, normalize_path};

/// Names on the built-in runtime's path list; bare specifiers matching one
/// resolve to a null module when every other strategy missed
const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "https",
    "net",
    "os",
    "path",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "zlib",
];

/// The per-request module resolver
pub struct Resolver {
    config: Arc<GraphConfig>,
    fastfs: Arc<Fastfs>,
    haste: Arc<HasteMap>,
    assets: Arc<AssetMap>,
    modules: Arc<ModuleCache>,
}

impl Resolver {
    pub fn new(
        config: Arc<GraphConfig>,
        fastfs: Arc<Fastfs>,
        haste: Arc<HasteMap>,
        assets: Arc<AssetMap>,
        modules: Arc<ModuleCache>,
    ) -> Self {
        Self {
            config,
            fastfs,
            haste,
            assets,
            modules,
        }
    }

    /// Resolve one specifier from the given module
    pub async fn resolve(
        &self,
        from: &Arc<Module>,
        specifier: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        debug!(
            from = %from.path().display(),
            specifier,
            "resolving"
        );

        let request = match self.apply_redirects(from, specifier).await? {
            Redirected::Disabled => return Ok(self.modules.get_null_module(specifier)),
            Redirected::Request(request) => request,
        };

        match self.resolve_asset(&request, platform) {
            Ok(module) => return Ok(module),
            Err(e) if e.is_unable_to_resolve() => {}
            Err(e) => return Err(e),
        }

        if is_bare(&request) {
            match self.resolve_haste(from, &request, platform).await {
                Ok(module) => return Ok(module),
                Err(e) if e.is_unable_to_resolve() => {}
                Err(e) => return Err(e),
            }
        } else {
            match self.resolve_project_path(from, &request, platform).await {
                Ok(module) => return Ok(module),
                Err(e) if e.is_unable_to_resolve() => {}
                Err(e) => return Err(e),
            }
        }

        if is_bare(&request) {
            match self.resolve_node_modules(from, &request, platform).await {
                Ok(module) => return Ok(module),
                Err(e) if e.is_unable_to_resolve() => {}
                Err(e) => return Err(e),
            }

            if NODE_BUILTINS.contains(&request.as_str()) {
                if let Some(polyfill) = self.modules.polyfill_for(&request) {
                    return Ok(polyfill);
                }
                return Ok(self.modules.get_null_module(&request));
            }
        }

        Err(GraphError::unresolved(
            from.path(),
            specifier,
            "no strategy matched",
        ))
    }

    /// Apply the requesting package's redirect table, then the global one.
    ///
    /// Relative specifiers become absolute against the requester's directory
    /// before keying, so one request shape reaches every later strategy.
    async fn apply_redirects(&self, from: &Arc<Module>, specifier: &str) -> Result<Redirected> {
        let from_dir = from
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut request = if is_relative(specifier) {
            join_normalized(&from_dir, specifier).display().to_string()
        } else {
            specifier.to_string()
        };

        if let Some(package) = from.get_package() {
            match package
                .redirect_require(&request, &self.config.resolution.project_exts)
                .await?
            {
                RedirectResult::Disabled => return Ok(Redirected::Disabled),
                RedirectResult::To(path) => request = path.display().to_string(),
                RedirectResult::Unchanged => {}
            }
        }

        match self.config.resolution.redirect.get(&request) {
            Some(RedirectTarget::Disabled(false)) => Ok(Redirected::Disabled),
            Some(RedirectTarget::Path(target)) => Ok(Redirected::Request(target.clone())),
            _ => Ok(Redirected::Request(request)),
        }
    }

    /// Strategy: asset lookup
    fn resolve_asset(&self, request: &str, platform: Option<&str>) -> Result<Arc<Module>> {
        match self.assets.resolve(request, platform) {
            Some(path) => Ok(self.modules.get_asset_module(&path)),
            None => Err(GraphError::unresolved(request, request, "not an asset")),
        }
    }

    /// Strategy: haste lookup for bare specifiers
    async fn resolve_haste(
        &self,
        from: &Arc<Module>,
        request: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        let normalized = crate::utils::clean_path(request);

        if let Some(entry) = self.haste.get_module(&normalized, platform) {
            match entry {
                HasteEntry::Module(path) => return Ok(self.modules.get_module(&path)),
                HasteEntry::Package(pkg_path) => {
                    let package = self.modules.get_package(&pkg_path);
                    let root = package.root().to_path_buf();
                    return self.load_as_dir(from, &root, request, platform).await;
                }
            }
        }

        // A prefix of the name may be a haste package; the remainder is a
        // path inside its root. A Module entry stands for its package when
        // it is that package's main.
        let segments: Vec<&str> = normalized.split('/').collect();
        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].join("/");
            let root = match self.haste.get_module(&prefix, platform) {
                Some(HasteEntry::Package(pkg_path)) => {
                    self.modules.get_package(&pkg_path).root().to_path_buf()
                }
                Some(HasteEntry::Module(main)) => {
                    let Some(package) = self.modules.get_package_for_module(&main) else {
                        continue;
                    };
                    if package.get_main().await? != main {
                        continue;
                    }
                    package.root().to_path_buf()
                }
                None => continue,
            };
            let inside = root.join(segments[split..].join("/"));
            return self.load_file_or_dir(from, &inside, request, platform).await;
        }

        Err(GraphError::unresolved(
            from.path(),
            request,
            "no haste entry",
        ))
    }

    /// Strategy: project-path lookup for relative/absolute specifiers
    async fn resolve_project_path(
        &self,
        from: &Arc<Module>,
        request: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        let base = normalize_path(Path::new(request));
        self.load_file_or_dir(from, &base, request, platform).await
    }

    /// Strategy: walk `node_modules` directories upward from the requester
    async fn resolve_node_modules(
        &self,
        from: &Arc<Module>,
        request: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        let mut dir = from.path().parent();
        while let Some(current) = dir {
            let skip = current
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("node_modules"))
                .unwrap_or(false);
            if !skip {
                let candidate = current.join("node_modules").join(request);
                match self.load_file_or_dir(from, &candidate, request, platform).await {
                    Ok(module) => return Ok(module),
                    Err(e) if e.is_unable_to_resolve() => {}
                    Err(e) => return Err(e),
                }
            }
            dir = current.parent();
        }

        // Fallback base keyed by the first path component.
        let first = request.split('/').next().unwrap_or(request);
        if let Some(base) = self.config.resolution.extra_node_modules.get(first) {
            let candidate = Path::new(base).join(request.strip_prefix(first).unwrap_or("").trim_start_matches('/'));
            return self
                .load_file_or_dir(from, &normalize_path(&candidate), request, platform)
                .await;
        }

        Err(GraphError::unresolved(
            from.path(),
            request,
            "not found in node_modules",
        ))
    }

    /// Try a path as a file, then as a directory
    async fn load_file_or_dir(
        &self,
        from: &Arc<Module>,
        base: &Path,
        specifier: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        match self.load_as_file(from, base, specifier, platform).await {
            Ok(module) => return Ok(module),
            Err(e) if e.is_unable_to_resolve() => {}
            Err(e) => return Err(e),
        }
        self.load_as_dir(from, base, specifier, platform).await
    }

    /// Load a path as a file, applying the owning package's redirects and
    /// the extension/platform fallback order
    async fn load_as_file(
        &self,
        from: &Arc<Module>,
        base: &Path,
        specifier: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        // The candidate's own package may redirect or disable it.
        let mut base = base.to_path_buf();
        if let Some(package) = self.modules.get_package_for_module(&base) {
            match package
                .redirect_require(
                    &base.display().to_string(),
                    &self.config.resolution.project_exts,
                )
                .await?
            {
                RedirectResult::Disabled => return Ok(self.modules.get_null_module(specifier)),
                RedirectResult::To(path) => base = path,
                RedirectResult::Unchanged => {}
            }
        }

        for candidate in self.file_candidates(&base, platform) {
            if self.fastfs.file_exists(&candidate) {
                return Ok(self.modules.get_module(&candidate));
            }
        }

        Err(GraphError::unresolved(from.path(), specifier, "no such file"))
    }

    /// Load a path as a directory: `package.json → main`, or `index`
    async fn load_as_dir(
        &self,
        from: &Arc<Module>,
        dir: &Path,
        specifier: &str,
        platform: Option<&str>,
    ) -> Result<Arc<Module>> {
        if !self.fastfs.dir_exists(dir) {
            return Err(GraphError::unresolved(
                from.path(),
                specifier,
                "no such directory",
            ));
        }

        let pkg_json = dir.join("package.json");
        if self.fastfs.file_exists(&pkg_json) {
            let package = self.modules.get_package(&pkg_json);
            let main = package.get_main().await?;
            if self.fastfs.file_exists(&main) {
                return Ok(self.modules.get_module(&main));
            }
            // Fall back to the extension/platform chain on the stripped main.
            let main_str = main.display().to_string();
            let stripped = match main_str.strip_suffix(".js") {
                Some(s) => PathBuf::from(s),
                None => main,
            };
            return self.load_as_file(from, &stripped, specifier, platform).await;
        }

        self.load_as_file(from, &dir.join("index"), specifier, platform)
            .await
    }

    /// Candidate paths for a base, per the extension/platform fallback.
    ///
    /// A base already carrying a project extension is used as-is.
    fn file_candidates(&self, base: &Path, platform: Option<&str>) -> Vec<PathBuf> {
        let exts = &self.config.resolution.project_exts;

        if let Some(ext) = base.extension().map(|e| e.to_string_lossy().to_string()) {
            if exts.iter().any(|x| *x == ext) {
                return vec![base.to_path_buf()];
            }
        }

        let base_str = base.display().to_string();
        let mut candidates = Vec::new();
        for ext in exts {
            if let Some(platform) = platform {
                candidates.push(PathBuf::from(format!("{}.{}.{}", base_str, platform, ext)));
            }
            if self.config.resolution.prefer_native_platform {
                candidates.push(PathBuf::from(format!("{}.native.{}", base_str, ext)));
            }
            candidates.push(PathBuf::from(format!("{}.{}", base_str, ext)));
        }
        candidates
    }
}

enum Redirected {
    /// Proceed with this (possibly rewritten) request
    Request(String),

    /// The request is disabled; resolve to a null module
    Disabled,
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".."
}

fn is_bare(request: &str) -> bool {
    !request.starts_with('.') && !request.starts_with('/') && !request.starts_with("image!")
}
