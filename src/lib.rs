//! hastegraph library
//!
//! The dependency graph and module resolver core of a mobile JavaScript
//! bundler: given an entry file, a platform tag, and a set of watched
//! roots, produce the ordered, deduplicated list of reachable modules and
//! keep it incrementally correct under filesystem changes.

pub mod assets;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fastfs;
pub mod graph;
pub mod haste;
pub mod module;
pub mod resolver;
pub mod transform;
pub mod utils;
pub mod watch;

pub use cli::Cli;
pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{DependencyGraph, RequestOptions, Response};
