//! Shared handle over one graph store instance

use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to a single graph. Readers take a read guard for the
/// duration of one query; writes go through [`SharedGraph::commit`], which
/// holds the write lock for the whole closure so readers observe either the
/// state before or after it, never a partial one.
pub struct SharedGraph<S> {
    inner: Arc<RwLock<S>>,
    version: Arc<AtomicU64>,
}

impl<S> Clone for SharedGraph<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            version: Arc::clone(&self.version),
        }
    }
}

impl<S> SharedGraph<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Read-consistent view of the graph
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner.read()
    }

    /// Number of commits applied so far. Stable while a read guard is held.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Run `apply` with exclusive access to the store and bump the version.
    ///
    /// Only the ingestion merger should call this.
    pub fn commit<R>(&self, apply: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.write();
        let result = apply(&mut guard);
        self.version.fetch_add(1, Ordering::AcqRel);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraphStore, MemoryGraphStore};

    #[test]
    fn test_commit_bumps_version() {
        let graph = SharedGraph::new(MemoryGraphStore::new());
        assert_eq!(graph.version(), 0);

        let count = graph.commit(|store| store.node_count());
        assert_eq!(count, 0);
        assert_eq!(graph.version(), 1);

        let clone = graph.clone();
        clone.commit(|_| ());
        assert_eq!(graph.version(), 2);
        assert_eq!(graph.read().node_count(), 0);
    }
}
