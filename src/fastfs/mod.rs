//! Virtual filesystem index
//!
//! An in-memory tree of every watched file, built by crawling the configured
//! roots and kept live by change events. Lookups never touch the disk except
//! for file content and for paths under lazy roots, which materialize into
//! the tree on first access.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::utils::normalize_path;

/// Kind of filesystem change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Change,
    Delete,
}

/// A change applied to the tree, fanned out to subscribers
#[derive(Debug, Clone)]
pub struct FileChange {
    /// What happened
    pub kind: ChangeKind,

    /// Absolute normalized path of the affected file
    pub path: PathBuf,

    /// The watched root the path belongs to
    pub root: PathBuf,
}

/// A file node in the tree
#[derive(Debug, Default)]
struct FileNode {
    /// Cached content after the first read
    content: Option<Arc<String>>,
}

#[derive(Debug, Default)]
struct Tree {
    files: HashMap<PathBuf, FileNode>,
    dirs: HashSet<PathBuf>,
}

/// The virtual filesystem index
pub struct Fastfs {
    config: Arc<GraphConfig>,
    eager_roots: Vec<PathBuf>,
    lazy_roots: Vec<PathBuf>,
    tree: RwLock<Tree>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<FileChange>>>,
}

impl Fastfs {
    /// Create an index over the configured roots; call [`Fastfs::build`] to crawl
    pub fn new(config: Arc<GraphConfig>) -> Self {
        let mut eager_roots: Vec<PathBuf> = config.project_roots();
        for root in config.asset_roots() {
            if !eager_roots.contains(&root) {
                eager_roots.push(root);
            }
        }
        let lazy_roots = config.lazy_roots();

        Self {
            config,
            eager_roots,
            lazy_roots,
            tree: RwLock::new(Tree::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Crawl all eager roots and populate the tree
    pub fn build(&self) -> Result<()> {
        let mut tree = self.tree.write();
        tree.files.clear();
        tree.dirs.clear();

        for root in self.eager_roots.clone() {
            tree.dirs.insert(root.clone());
            self.crawl_dir(&mut tree, &root)?;
        }
        for root in &self.lazy_roots {
            tree.dirs.insert(root.clone());
        }

        debug!(
            files = tree.files.len(),
            dirs = tree.dirs.len(),
            "fastfs built"
        );
        Ok(())
    }

    fn crawl_dir(&self, tree: &mut Tree, dir: &Path) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = normalize_path(&entry.path());
            if self.config.is_blacklisted(&path) {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                tree.dirs.insert(path.clone());
                self.crawl_dir(tree, &path)?;
            } else if file_type.is_file() {
                tree.files.insert(path, FileNode::default());
            }
        }

        Ok(())
    }

    /// The eager roots this index watches
    pub fn roots(&self) -> &[PathBuf] {
        &self.eager_roots
    }

    /// Find the watched root (eager or lazy) that contains `path`
    pub fn root_of(&self, path: &Path) -> Option<PathBuf> {
        self.eager_roots
            .iter()
            .chain(self.lazy_roots.iter())
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .cloned()
    }

    fn in_lazy_root(&self, path: &Path) -> bool {
        self.lazy_roots.iter().any(|root| path.starts_with(root))
    }

    /// Whether a file exists in the tree (or on disk, for lazy subtrees)
    pub fn file_exists(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        if self.tree.read().files.contains_key(&path) {
            return true;
        }
        if self.in_lazy_root(&path) && path.is_file() {
            self.materialize(&path);
            return true;
        }
        false
    }

    /// Whether a directory exists in the tree (or on disk, for lazy subtrees)
    pub fn dir_exists(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        if self.tree.read().dirs.contains(&path) {
            return true;
        }
        self.in_lazy_root(&path) && path.is_dir()
    }

    fn materialize(&self, path: &Path) {
        self.tree
            .write()
            .files
            .insert(path.to_path_buf(), FileNode::default());
    }

    /// Read a file's content, cached after the first read
    pub async fn read_file(&self, path: &Path) -> Result<Arc<String>> {
        let path = normalize_path(path);

        if self.root_of(&path).is_none() {
            return Err(GraphError::NotFoundInRoots(path));
        }
        if !self.file_exists(&path) {
            return Err(GraphError::FileNotFound(path));
        }
        if let Some(content) = self.tree.read().files.get(&path).and_then(|n| n.content.clone()) {
            return Ok(content);
        }

        let content = Arc::new(tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GraphError::FileNotFound(path.clone())
            } else {
                GraphError::Io(e)
            }
        })?);

        let mut tree = self.tree.write();
        if let Some(node) = tree.files.get_mut(&path) {
            node.content = Some(content.clone());
        }
        Ok(content)
    }

    /// Stream chunks from a file, stopping when the predicate returns false.
    ///
    /// The predicate receives the current chunk, its index, and everything
    /// accumulated so far (chunk included). Used to read only the opening
    /// doc comment without pulling whole files into memory.
    pub async fn read_while<F>(&self, path: &Path, mut predicate: F) -> Result<String>
    where
        F: FnMut(&str, usize, &str) -> bool,
    {
        let path = normalize_path(path);
        if self.root_of(&path).is_none() {
            return Err(GraphError::NotFoundInRoots(path));
        }
        if !self.file_exists(&path) {
            return Err(GraphError::FileNotFound(path));
        }

        // Serve from cache when a full read already happened.
        if let Some(content) = self.tree.read().files.get(&path).and_then(|n| n.content.clone()) {
            let mut accumulated = String::new();
            for (index, chunk) in content.as_bytes().chunks(512).enumerate() {
                let chunk = String::from_utf8_lossy(chunk);
                accumulated.push_str(&chunk);
                if !predicate(&chunk, index, &accumulated) {
                    break;
                }
            }
            return Ok(accumulated);
        }

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GraphError::FileNotFound(path.clone())
            } else {
                GraphError::Io(e)
            }
        })?;

        let mut accumulated = String::new();
        let mut buf = [0u8; 512];
        let mut index = 0;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
            accumulated.push_str(&chunk);
            if !predicate(&chunk, index, &accumulated) {
                break;
            }
            index += 1;
        }
        Ok(accumulated)
    }

    /// Walk ancestors of `path` and return the nearest directory containing
    /// a child named `name`
    pub fn closest(&self, path: &Path, name: &str) -> Option<PathBuf> {
        let path = normalize_path(path);
        let root = self.root_of(&path)?;

        let mut dir = path.parent();
        while let Some(current) = dir {
            if self.file_exists(&current.join(name)) {
                return Some(current.to_path_buf());
            }
            if current == root {
                break;
            }
            dir = current.parent();
        }
        None
    }

    /// Files directly inside `dir` whose name matches the pattern
    pub fn matches(&self, dir: &Path, pattern: &Regex) -> Vec<PathBuf> {
        let dir = normalize_path(dir);
        let tree = self.tree.read();
        let mut found: Vec<PathBuf> = tree
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir.as_path()))
            .filter(|p| {
                p.file_name()
                    .map(|n| pattern.is_match(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// All files whose full path matches the pattern
    pub fn match_files_by_pattern(&self, pattern: &Regex) -> Vec<PathBuf> {
        let tree = self.tree.read();
        let mut found: Vec<PathBuf> = tree
            .files
            .keys()
            .filter(|p| pattern.is_match(&p.display().to_string()))
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// All files carrying one of the given extensions
    pub fn find_files_by_exts(&self, exts: &[String]) -> Vec<PathBuf> {
        let tree = self.tree.read();
        let mut found: Vec<PathBuf> = tree
            .files
            .keys()
            .filter(|p| {
                p.extension()
                    .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// Subscribe to change events applied to the tree
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FileChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// Apply a watcher event. Returns the affected absolute path when the
    /// event landed inside a watched root; events elsewhere are ignored, as
    /// are directory events.
    pub fn process_change(&self, kind: ChangeKind, root: &Path, rel_path: &Path) -> Option<PathBuf> {
        let path = normalize_path(&root.join(rel_path));
        let Some(root) = self.root_of(&path) else {
            warn!(path = %path.display(), "change event outside all roots, ignored");
            return None;
        };
        if self.config.is_blacklisted(&path) {
            return None;
        }
        if kind != ChangeKind::Delete && path.is_dir() {
            self.tree.write().dirs.insert(path);
            return None;
        }

        {
            let mut tree = self.tree.write();
            match kind {
                ChangeKind::Add => {
                    let mut parent = path.parent();
                    while let Some(dir) = parent {
                        if !tree.dirs.insert(dir.to_path_buf()) {
                            break;
                        }
                        parent = dir.parent();
                    }
                    tree.files.insert(path.clone(), FileNode::default());
                }
                ChangeKind::Change => {
                    if let Some(node) = tree.files.get_mut(&path) {
                        node.content = None;
                    } else {
                        tree.files.insert(path.clone(), FileNode::default());
                    }
                }
                ChangeKind::Delete => {
                    if tree.files.remove(&path).is_none() {
                        // Deleting a directory drops its whole subtree.
                        if tree.dirs.remove(&path) {
                            tree.files.retain(|p, _| !p.starts_with(&path));
                            tree.dirs.retain(|p| !p.starts_with(&path));
                        } else {
                            return None;
                        }
                    }
                }
            }
        }

        let event = FileChange {
            kind,
            path: path.clone(),
            root,
        };
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());

        Some(path)
    }
}
