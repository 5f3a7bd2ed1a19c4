//! The set of roots a watcher is watching.
//!
//! Paths are interned (stored once) and shared with callers that ask for a
//! snapshot, so listing the watched set does not copy every path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of watched root paths.
#[derive(Debug, Default)]
pub struct WatchedPaths {
    paths: HashSet<Arc<PathBuf>>,
}

impl WatchedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add paths, returning how many were not tracked before.
    pub fn extend(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> usize {
        paths
            .into_iter()
            .filter(|path| self.paths.insert(Arc::new(path.clone())))
            .count()
    }

    /// Remove a path. Returns whether it was tracked.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.paths.remove(&path.to_path_buf())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(&path.to_path_buf())
    }

    /// Shared handles to every tracked path.
    pub fn snapshot(&self) -> Vec<Arc<PathBuf>> {
        self.paths.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}
