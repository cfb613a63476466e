//! Code transform contract
//!
//! The transform pipeline itself lives outside this crate; the graph only
//! depends on the [`TransformCode`] trait. The default implementation passes
//! source through untouched (wrapping JSON files as modules) so the CLI and
//! tests can run without an external pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::utils::hash_content;

/// Regex patterns for extracting imports
static IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:import|export)\s+(?:(?:\{[^}]*\}|\*\s+as\s+\w+|\w+)\s+from\s+)?["']([^"']+)["']|require\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap());

/// Options forwarded to the transform pipeline.
///
/// Opaque to the graph apart from a stable hash used to key cached results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions(BTreeMap<String, serde_json::Value>);

impl TransformOptions {
    /// Set an option value
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Stable hash of the option set, identical across runs
    pub fn stable_hash(&self) -> String {
        let serialized = serde_json::to_string(&self.0).unwrap_or_default();
        hash_content(serialized.as_bytes())
    }
}

/// Result of transforming one module's source
#[derive(Debug, Clone)]
pub struct TransformedCode {
    /// The rewritten source
    pub code: String,

    /// Dependency specifiers, when the pipeline already extracted them
    pub dependencies: Option<Vec<String>>,

    /// Optional source map payload
    pub map: Option<String>,
}

/// Contract for the external code-transform pipeline
#[async_trait]
pub trait TransformCode: Send + Sync {
    /// Rewrite one module's source
    async fn transform(
        &self,
        path: &Path,
        source: &str,
        options: &TransformOptions,
    ) -> Result<TransformedCode>;
}

/// Passthrough transformer used when no pipeline is plugged in
pub struct DefaultTransformer;

#[async_trait]
impl TransformCode for DefaultTransformer {
    async fn transform(
        &self,
        path: &Path,
        source: &str,
        _options: &TransformOptions,
    ) -> Result<TransformedCode> {
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let code = if is_json {
            serde_json::from_str::<serde_json::Value>(source).map_err(|e| {
                GraphError::Transform {
                    path: path.to_path_buf(),
                    message: format!("invalid JSON: {}", e),
                }
            })?;
            format!("module.exports = {};", source.trim_end())
        } else {
            source.to_string()
        };

        Ok(TransformedCode {
            code,
            dependencies: None,
            map: None,
        })
    }
}

/// Dependency specifiers extracted from a module's source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRequires {
    /// Synchronously-required specifiers, in source order
    pub sync: Vec<String>,
}

/// Extract import/require dependencies from (transformed) source code
pub fn extract_requires(code: &str) -> ExtractedRequires {
    let mut sync = Vec::new();

    // Static imports/exports and require() calls
    for cap in IMPORT_REGEX.captures_iter(code) {
        if let Some(specifier) = cap.get(1).or_else(|| cap.get(2)) {
            let spec = specifier.as_str().to_string();
            if !sync.contains(&spec) {
                sync.push(spec);
            }
        }
    }

    // Dynamic imports
    for cap in DYNAMIC_IMPORT_REGEX.captures_iter(code) {
        if let Some(specifier) = cap.get(1) {
            let spec = specifier.as_str().to_string();
            if !sync.contains(&spec) {
                sync.push(spec);
            }
        }
    }

    debug!("Found {} dependencies", sync.len());

    ExtractedRequires { sync }
}
