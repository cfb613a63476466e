//! `package.json` wrapper
//!
//! Computes `main` per Node rules with the `react-native` extensions, and
//! carries the merged `react-native`/`browser` redirection table applied
//! during resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::fastfs::Fastfs;
use crate::utils::normalize_path;

/// Outcome of applying a package redirect table to a request
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectResult {
    /// No table entry matched; the request is unchanged
    Unchanged,

    /// The request maps to this absolute path
    To(PathBuf),

    /// The request is disabled and resolves to a null module
    Disabled,
}

struct PackageContent {
    json: Value,

    /// Merged `browser` + `react-native` tables, `react-native` overriding
    redirects: HashMap<String, Value>,
}

/// A `package.json` file
pub struct Package {
    path: PathBuf,
    root: PathBuf,
    fastfs: Arc<Fastfs>,
    content: Mutex<Option<Arc<PackageContent>>>,
}

impl Package {
    pub(super) fn new(path: PathBuf, fastfs: Arc<Fastfs>) -> Self {
        let root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            path,
            root,
            fastfs,
            content: Mutex::new(None),
        }
    }

    /// Path of the `package.json` file itself
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the `package.json`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The declared package name, if any
    pub async fn name(&self) -> Result<Option<String>> {
        let content = self.read().await?;
        Ok(content
            .json
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// A package participates in haste iff it declares a name
    pub async fn is_haste(&self) -> Result<bool> {
        Ok(self.name().await?.is_some())
    }

    /// Compute the package's main module path.
    ///
    /// A string-valued `react-native` field replaces `main`; the result is
    /// stripped of a leading `./` and a trailing `.js`/`.json`, given the
    /// default extension, and joined against the package root.
    pub async fn get_main(&self) -> Result<PathBuf> {
        let content = self.read().await?;
        let json = &content.json;

        let mut main = json
            .get("main")
            .and_then(|v| v.as_str())
            .unwrap_or("index")
            .to_string();

        if let Some(replacement) = json.get("react-native").and_then(|v| v.as_str()) {
            main = replacement.to_string();
        }

        let main = main.strip_prefix("./").unwrap_or(&main);
        let main = main
            .strip_suffix(".js")
            .or_else(|| main.strip_suffix(".json"))
            .unwrap_or(main);

        Ok(normalize_path(&self.root.join(format!("{}.js", main))))
    }

    /// Apply this package's redirection table to a request.
    ///
    /// Absolute requests are keyed relative to the package root with a
    /// leading `./`; bare requests are keyed verbatim. Misses are retried
    /// with each project extension appended to the key.
    pub async fn redirect_require(&self, request: &str, exts: &[String]) -> Result<RedirectResult> {
        let content = self.read().await?;
        if content.redirects.is_empty() {
            return Ok(RedirectResult::Unchanged);
        }

        let key = if Path::new(request).is_absolute() {
            match pathdiff::diff_paths(request, &self.root) {
                Some(rel) => format!("./{}", rel.display()),
                None => request.to_string(),
            }
        } else {
            request.to_string()
        };

        let mut candidates = vec![key.clone()];
        for ext in exts {
            candidates.push(format!("{}.{}", key, ext));
        }

        for candidate in &candidates {
            let Some(value) = content.redirects.get(candidate) else {
                continue;
            };
            return match value {
                Value::Bool(false) => Ok(RedirectResult::Disabled),
                Value::String(target) if Path::new(target).is_absolute() => {
                    Err(GraphError::AbsoluteRedirect {
                        package: self.path.clone(),
                        key: candidate.clone(),
                        value: target.clone(),
                    })
                }
                Value::String(target) => {
                    Ok(RedirectResult::To(normalize_path(&self.root.join(target))))
                }
                _ => Ok(RedirectResult::Unchanged),
            };
        }

        Ok(RedirectResult::Unchanged)
    }

    async fn read(&self) -> Result<Arc<PackageContent>> {
        if let Some(content) = self.content.lock().clone() {
            return Ok(content);
        }

        let source = self.fastfs.read_file(&self.path).await?;
        let json: Value =
            serde_json::from_str(&source).map_err(|e| GraphError::MalformedPackage {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        let mut redirects: HashMap<String, Value> = HashMap::new();
        for field in ["browser", "react-native"] {
            if let Some(Value::Object(table)) = json.get(field) {
                for (key, value) in table {
                    redirects.insert(key.clone(), value.clone());
                }
            }
        }

        let content = Arc::new(PackageContent { json, redirects });
        *self.content.lock() = Some(content.clone());
        Ok(content)
    }

    /// Drop the parsed content after a file change
    pub fn invalidate(&self) {
        *self.content.lock() = None;
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package").field("path", &self.path).finish()
    }
}
