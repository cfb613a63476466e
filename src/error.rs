//! Error types for the graph core
//!
//! Strategy steps in the resolver recover only [`GraphError::UnableToResolve`];
//! everything else propagates to the request.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while indexing or resolving modules
#[derive(Debug, Error)]
pub enum GraphError {
    /// A specifier could not be resolved by any strategy
    #[error("Unable to resolve module '{specifier}' from '{from}': {message}")]
    UnableToResolve {
        /// Path of the requesting module
        from: PathBuf,
        /// The `require(...)` argument that failed
        specifier: String,
        /// Reason for failure
        message: String,
    },

    /// A path was looked up outside every configured root
    #[error("'{0}' not found in any of the configured roots")]
    NotFoundInRoots(PathBuf),

    /// A file node exists in no tree and on no disk
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Two files declared the same haste name for the same platform
    #[error("Haste module '{name}' ({platform}) provided by both '{existing}' and '{incoming}'")]
    HasteCollision {
        /// Declared module name
        name: String,
        /// Platform key of the colliding entry
        platform: String,
        /// Path already registered
        existing: PathBuf,
        /// Path attempting to register
        incoming: PathBuf,
    },

    /// `package.json` failed to parse
    #[error("Malformed package.json at '{path}': {message}")]
    MalformedPackage {
        /// Path of the offending package.json
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A package redirect value must be relative to the package root
    #[error("Redirect for '{key}' in '{package}' must be a relative path, got '{value}'")]
    AbsoluteRedirect {
        /// Path of the package.json carrying the table
        package: PathBuf,
        /// Requested key
        key: String,
        /// Offending absolute value
        value: String,
    },

    /// A response was mutated after finalization
    #[error("Response is finalized and can no longer change")]
    ResponseFinalized,

    /// A response finished with no dependencies at all
    #[error("Dependency response for '{0}' is empty")]
    EmptyResponse(PathBuf),

    /// File system error
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// Code transform failure, surfaced from the transform contract
    #[error("Transform error in '{path}': {message}")]
    Transform {
        /// Module being transformed
        path: PathBuf,
        /// Transformer message
        message: String,
    },
}

impl GraphError {
    /// Create an unresolvable-specifier error
    pub fn unresolved(
        from: impl Into<PathBuf>,
        specifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::UnableToResolve {
            from: from.into(),
            specifier: specifier.into(),
            message: message.into(),
        }
    }

    /// True for errors that strategy boundaries may recover from
    pub fn is_unable_to_resolve(&self) -> bool {
        matches!(self, Self::UnableToResolve { .. })
    }
}
