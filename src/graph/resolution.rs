//! Incremental resolution cache
//!
//! One [`Resolution`] record per source module: the specifier list in source
//! order and a parallel array of resolved paths, `None` while a slot is
//! dirty or unresolvable. The cache owns the inverse `dependers` table, the
//! `dirty` and `resolving` sets, and fans out created/deleted events to
//! subscribed listeners.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle events for resolution records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// A record was created for the module at this path
    Created(PathBuf),

    /// The record for this path was destroyed
    Deleted(PathBuf),
}

/// Per-module resolution state
#[derive(Debug, Default, Clone)]
pub struct Resolution {
    /// Specifier strings extracted from the module's source, in order
    pub requires: Vec<String>,

    /// Parallel array: slot `i` holds the resolved path for `requires[i]`,
    /// or `None` while dirty, in flight, or unresolvable
    pub resolved: Vec<Option<PathBuf>>,

    /// Platform tag the slots were resolved under; a request for another
    /// platform re-resolves instead of reusing them
    pub platform: Option<String>,
}

#[derive(Default)]
struct CacheState {
    resolutions: HashMap<PathBuf, Resolution>,

    /// Inverse edges: target path → set of modules that resolved to it
    dependers: HashMap<PathBuf, HashSet<PathBuf>>,

    /// Records currently reloading
    resolving: HashSet<PathBuf>,

    /// Records needing a reload before the next barrier fulfills
    dirty: HashSet<PathBuf>,

    /// Request entries, pinned against garbage collection
    entries: HashSet<PathBuf>,
}

/// The cache of resolution records
pub struct ResolutionCache {
    state: Mutex<CacheState>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<GraphEvent>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to created/deleted events for the subscriber's lifetime
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GraphEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    fn emit(&self, events: Vec<GraphEvent>) {
        if events.is_empty() {
            return;
        }
        let mut listeners = self.listeners.lock();
        for event in events {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Pin a request entry so its record survives having no dependers
    pub fn register_entry(&self, path: &Path) {
        self.state.lock().entries.insert(path.to_path_buf());
    }

    /// Create an empty record when none exists; fires `Created` once
    pub fn ensure(&self, path: &Path) -> bool {
        let created = {
            let mut state = self.state.lock();
            if state.resolutions.contains_key(path) {
                false
            } else {
                state
                    .resolutions
                    .insert(path.to_path_buf(), Resolution::default());
                true
            }
        };
        if created {
            self.emit(vec![GraphEvent::Created(path.to_path_buf())]);
        }
        created
    }

    /// Whether a record exists for the path
    pub fn has(&self, path: &Path) -> bool {
        self.state.lock().resolutions.contains_key(path)
    }

    /// Current requires/resolved arrays of a record
    pub fn snapshot(&self, path: &Path) -> Option<Resolution> {
        self.state.lock().resolutions.get(path).cloned()
    }

    /// Modules depending on `path`; the inverse of the resolved arrays
    pub fn dependers_of(&self, path: &Path) -> HashSet<PathBuf> {
        self.state
            .lock()
            .dependers
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Enter the resolving set; false when a reload is already in flight
    pub fn mark_resolving(&self, path: &Path) -> bool {
        self.state.lock().resolving.insert(path.to_path_buf())
    }

    /// Leave the resolving set
    pub fn mark_resolved(&self, path: &Path) {
        self.state.lock().resolving.remove(path);
    }

    /// Whether any reload is in flight; the barrier fulfills when not
    pub fn is_resolving(&self) -> bool {
        !self.state.lock().resolving.is_empty()
    }

    /// Store a reload's outcome and maintain inverse edges.
    ///
    /// Targets dropped by the new arrays lose their inverse edge; records
    /// orphaned by that (no dependers, not an entry) are deleted, cascading.
    pub fn commit(
        &self,
        path: &Path,
        requires: Vec<String>,
        resolved: Vec<Option<PathBuf>>,
        platform: Option<String>,
    ) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();

            let old_targets: HashSet<PathBuf> = state
                .resolutions
                .get(path)
                .map(|r| r.resolved.iter().flatten().cloned().collect())
                .unwrap_or_default();
            let new_targets: HashSet<PathBuf> =
                resolved.iter().flatten().cloned().collect();

            let record = state
                .resolutions
                .entry(path.to_path_buf())
                .or_default();
            record.requires = requires;
            record.resolved = resolved;
            record.platform = platform;
            state.dirty.remove(path);

            for target in new_targets.difference(&old_targets) {
                state
                    .dependers
                    .entry(target.clone())
                    .or_default()
                    .insert(path.to_path_buf());
            }

            let mut orphans = Vec::new();
            for target in old_targets.difference(&new_targets) {
                if Self::drop_depender(&mut state, target, path) {
                    orphans.push(target.clone());
                }
            }
            Self::collect(&mut state, orphans, &mut events);
        }
        self.emit(events);
    }

    fn drop_depender(state: &mut CacheState, target: &Path, depender: &Path) -> bool {
        let emptied = match state.dependers.get_mut(target) {
            Some(set) => {
                set.remove(depender);
                set.is_empty()
            }
            None => true,
        };
        if emptied {
            state.dependers.remove(target);
        }
        emptied && state.resolutions.contains_key(target) && !state.entries.contains(target)
    }

    /// Delete orphaned records, cascading through edges they owned
    fn collect(state: &mut CacheState, mut orphans: Vec<PathBuf>, events: &mut Vec<GraphEvent>) {
        while let Some(victim) = orphans.pop() {
            let still_orphan = !state.entries.contains(&victim)
                && state
                    .dependers
                    .get(&victim)
                    .map(|set| set.is_empty())
                    .unwrap_or(true);
            if !still_orphan {
                continue;
            }
            let Some(record) = state.resolutions.remove(&victim) else {
                continue;
            };
            debug!(path = %victim.display(), "resolution collected");
            state.resolving.remove(&victim);
            state.dirty.remove(&victim);
            events.push(GraphEvent::Deleted(victim.clone()));

            for target in record.resolved.iter().flatten() {
                if Self::drop_depender(state, target, &victim) {
                    orphans.push(target.clone());
                }
            }
        }
    }

    /// Destroy a record unconditionally, clearing the edges it owned
    pub fn delete_resolution(&self, path: &Path) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(record) = state.resolutions.remove(path) else {
                return;
            };
            state.resolving.remove(path);
            state.dirty.remove(path);
            events.push(GraphEvent::Deleted(path.to_path_buf()));

            let mut orphans = Vec::new();
            for target in record.resolved.iter().flatten() {
                if Self::drop_depender(&mut state, target, path) {
                    orphans.push(target.clone());
                }
            }
            Self::collect(&mut state, orphans, &mut events);
        }
        self.emit(events);
    }

    /// A previously-resolved file changed: re-dirty its own record and every
    /// record holding a slot resolved to it
    pub fn on_file_changed(&self, path: &Path) {
        let mut state = self.state.lock();
        if state.resolutions.contains_key(path) {
            state.dirty.insert(path.to_path_buf());
        }
        Self::dirty_slots_pointing_at(&mut state, path);
    }

    /// A previously-resolved file was deleted: destroy its record and dirty
    /// its dependers
    pub fn on_file_deleted(&self, path: &Path) {
        {
            let mut state = self.state.lock();
            Self::dirty_slots_pointing_at(&mut state, path);
        }
        self.delete_resolution(path);
    }

    /// A file appeared: retry every record holding an unresolved slot
    pub fn on_file_added(&self, _path: &Path) {
        let mut state = self.state.lock();
        let retry: Vec<PathBuf> = state
            .resolutions
            .iter()
            .filter(|(_, r)| r.resolved.iter().any(|slot| slot.is_none()))
            .map(|(p, _)| p.clone())
            .collect();
        state.dirty.extend(retry);
    }

    fn dirty_slots_pointing_at(state: &mut CacheState, path: &Path) {
        let dependers: Vec<PathBuf> = state
            .dependers
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for depender in dependers {
            if let Some(record) = state.resolutions.get_mut(&depender) {
                for slot in record.resolved.iter_mut() {
                    if slot.as_deref() == Some(path) {
                        *slot = None;
                    }
                }
            }
            state.dirty.insert(depender);
        }
    }

    /// Drain the dirty set
    pub fn take_dirty(&self) -> Vec<PathBuf> {
        let mut state = self.state.lock();
        state.dirty.drain().collect()
    }

    /// Whether any record awaits a reload
    pub fn has_dirty(&self) -> bool {
        !self.state.lock().dirty.is_empty()
    }

    /// Depth-first enumeration of resolved paths from `entry`, duplicates
    /// suppressed at first occurrence
    pub fn ordered_from(&self, entry: &Path) -> Vec<PathBuf> {
        let state = self.state.lock();
        let mut order = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut stack = vec![entry.to_path_buf()];

        while let Some(path) = stack.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            order.push(path.clone());
            if let Some(record) = state.resolutions.get(&path) {
                for target in record.resolved.iter().rev().flatten() {
                    if !seen.contains(target) {
                        stack.push(target.clone());
                    }
                }
            }
        }
        order
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_create_fires_once() {
        let cache = ResolutionCache::new();
        let mut rx = cache.subscribe();

        assert!(cache.ensure(&p("/r/a.js")));
        assert!(!cache.ensure(&p("/r/a.js")));

        assert_eq!(rx.try_recv().unwrap(), GraphEvent::Created(p("/r/a.js")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_commit_maintains_inverse_edges() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        cache.ensure(&p("/r/a.js"));

        cache.commit(
            &p("/r/a.js"),
            vec!["./b".into()],
            vec![Some(p("/r/b.js"))],
            None,
        );
        assert!(cache.dependers_of(&p("/r/b.js")).contains(&p("/r/a.js")));

        // Re-resolving elsewhere drops the old inverse edge.
        cache.commit(
            &p("/r/a.js"),
            vec!["./b".into()],
            vec![Some(p("/r/b.ios.js"))],
            None,
        );
        assert!(cache.dependers_of(&p("/r/b.js")).is_empty());
        assert!(cache.dependers_of(&p("/r/b.ios.js")).contains(&p("/r/a.js")));
    }

    #[test]
    fn test_orphan_collection_cascades() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        for path in ["/r/a.js", "/r/b.js", "/r/c.js"] {
            cache.ensure(&p(path));
        }
        cache.commit(&p("/r/a.js"), vec!["./b".into()], vec![Some(p("/r/b.js"))], None);
        cache.commit(&p("/r/b.js"), vec!["./c".into()], vec![Some(p("/r/c.js"))], None);
        cache.commit(&p("/r/c.js"), vec![], vec![], None);

        let mut rx = cache.subscribe();

        // a stops depending on b: both b and (transitively) c are garbage.
        cache.commit(&p("/r/a.js"), vec![], vec![], None);
        assert!(!cache.has(&p("/r/b.js")));
        assert!(!cache.has(&p("/r/c.js")));
        assert!(cache.has(&p("/r/a.js")));

        let deleted: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(deleted.contains(&GraphEvent::Deleted(p("/r/b.js"))));
        assert!(deleted.contains(&GraphEvent::Deleted(p("/r/c.js"))));
    }

    #[test]
    fn test_entries_survive_orphaning() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        cache.ensure(&p("/r/a.js"));
        cache.commit(&p("/r/a.js"), vec![], vec![], None);
        assert!(cache.has(&p("/r/a.js")));
    }

    #[test]
    fn test_delete_dirties_dependers() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        cache.ensure(&p("/r/a.js"));
        cache.ensure(&p("/r/b.js"));
        cache.commit(&p("/r/a.js"), vec!["./b".into()], vec![Some(p("/r/b.js"))], None);

        cache.on_file_deleted(&p("/r/b.js"));

        assert!(!cache.has(&p("/r/b.js")));
        let snapshot = cache.snapshot(&p("/r/a.js")).unwrap();
        assert_eq!(snapshot.resolved, vec![None]);
        assert!(cache.has_dirty());
    }

    #[test]
    fn test_add_retries_unresolved_slots() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        cache.ensure(&p("/r/a.js"));
        cache.commit(&p("/r/a.js"), vec!["./b".into()], vec![None], None);
        assert!(cache.take_dirty().is_empty());

        cache.on_file_added(&p("/r/b.js"));
        assert_eq!(cache.take_dirty(), vec![p("/r/a.js")]);
    }

    #[test]
    fn test_resolving_set_guards_reentry() {
        let cache = ResolutionCache::new();
        assert!(cache.mark_resolving(&p("/r/a.js")));
        assert!(!cache.mark_resolving(&p("/r/a.js")));
        assert!(cache.is_resolving());
        cache.mark_resolved(&p("/r/a.js"));
        assert!(!cache.is_resolving());
    }

    #[test]
    fn test_ordered_from_is_depth_first() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        for path in ["/r/a.js", "/r/b.js", "/r/c.js", "/r/d.js"] {
            cache.ensure(&p(path));
        }
        // a → [b, d]; b → [c]. DFS: a, b, c, d.
        cache.commit(
            &p("/r/a.js"),
            vec!["./b".into(), "./d".into()],
            vec![Some(p("/r/b.js")), Some(p("/r/d.js"))],
            None,
        );
        cache.commit(&p("/r/b.js"), vec!["./c".into()], vec![Some(p("/r/c.js"))], None);

        assert_eq!(
            cache.ordered_from(&p("/r/a.js")),
            vec![p("/r/a.js"), p("/r/b.js"), p("/r/c.js"), p("/r/d.js")]
        );
    }

    #[test]
    fn test_ordered_from_handles_cycles() {
        let cache = ResolutionCache::new();
        cache.register_entry(&p("/r/a.js"));
        cache.ensure(&p("/r/a.js"));
        cache.ensure(&p("/r/b.js"));
        cache.commit(&p("/r/a.js"), vec!["./b".into()], vec![Some(p("/r/b.js"))], None);
        cache.commit(&p("/r/b.js"), vec!["./a".into()], vec![Some(p("/r/a.js"))], None);

        assert_eq!(
            cache.ordered_from(&p("/r/a.js")),
            vec![p("/r/a.js"), p("/r/b.js")]
        );
    }
}
