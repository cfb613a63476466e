//! Filesystem watcher adapter
//!
//! Bridges debounced notify events into the change-event shape the graph
//! consumes. The watcher itself stays external to the core: this module
//! only classifies raw paths against the virtual tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify::{RecursiveMode, Watcher as _};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tracing::error;

use crate::fastfs::{ChangeKind, Fastfs};

/// A classified change, ready for [`DependencyGraph::process_file_change`]
///
/// [`DependencyGraph::process_file_change`]: crate::graph::DependencyGraph::process_file_change
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub root: PathBuf,
    pub rel_path: PathBuf,
}

/// A live watcher over a set of roots
pub struct Watcher {
    // Kept alive for the duration of the watch.
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl Watcher {
    /// Watch the given roots recursively, debouncing bursts of events
    pub fn new(roots: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            Duration::from_millis(100),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        let _ = tx.send(event.path);
                    }
                }
                Err(e) => error!("watch error: {:?}", e),
            },
        )?;

        for root in roots {
            debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
        }

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Next changed path, or `None` when the watcher shut down
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }
}

/// Classify a raw changed path against the virtual tree
pub fn classify(fastfs: &Fastfs, path: &Path) -> Option<WatchEvent> {
    let root = fastfs.root_of(path)?;
    let rel_path = path.strip_prefix(&root).ok()?.to_path_buf();

    let in_tree = fastfs.file_exists(path);
    let on_disk = path.is_file();
    let kind = match (in_tree, on_disk) {
        (false, true) => ChangeKind::Add,
        (true, true) => ChangeKind::Change,
        (_, false) => ChangeKind::Delete,
    };

    Some(WatchEvent {
        kind,
        root,
        rel_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::utils::normalize_path;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_classify() {
        let dir = tempdir().unwrap();
        let root = normalize_path(dir.path());
        std::fs::write(root.join("a.js"), "").unwrap();

        let config = Arc::new(GraphConfig::default_config(root.clone()));
        let fastfs = Fastfs::new(config);
        fastfs.build().unwrap();

        // Known file touched on disk: a change.
        let event = classify(&fastfs, &root.join("a.js")).unwrap();
        assert_eq!(event.kind, ChangeKind::Change);
        assert_eq!(event.rel_path, Path::new("a.js"));

        // New file on disk the tree has not seen: an add.
        std::fs::write(root.join("b.js"), "").unwrap();
        let event = classify(&fastfs, &root.join("b.js")).unwrap();
        assert_eq!(event.kind, ChangeKind::Add);

        // Known file gone from disk: a delete.
        std::fs::remove_file(root.join("a.js")).unwrap();
        let event = classify(&fastfs, &root.join("a.js")).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);

        // Paths outside every root are not classified.
        assert!(classify(&fastfs, Path::new("/elsewhere/x.js")).is_none());
    }
}
