//! Stride-keyed collection of deduplicating array stores.
//!
//! Each distinct element stride gets its own [`ChunkStore`]; the set is
//! shared between the foreground thread and background compaction tasks, so
//! each store sits behind its own mutex. Structural writes to one store are
//! serialized by that mutex; the set itself only grows.

mod chunk_store;

pub use chunk_store::{ArrayState, ChunkStore};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    /// Elements per chunk; the unit of content comparison and sharing.
    pub chunk_elems: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { chunk_elems: 256 }
    }
}

/// Shared handle to one per-stride store.
pub type SharedStore = Arc<Mutex<ChunkStore>>;

/// Collection of [`ChunkStore`]s keyed by element stride.
pub struct StoreSet {
    stores: Mutex<HashMap<usize, SharedStore>>,
    options: StoreOptions,
}

impl StoreSet {
    /// Create an empty set.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Store for the given stride, created on first use (idempotent).
    pub fn ensure(&self, stride: usize) -> SharedStore {
        let mut stores = self.stores.lock();
        Arc::clone(stores.entry(stride).or_insert_with(|| {
            Arc::new(Mutex::new(ChunkStore::new(stride, self.options.chunk_elems)))
        }))
    }

    /// Store previously created for the given stride.
    ///
    /// Reading a stride that was never written is a defect.
    pub fn get(&self, stride: usize) -> SharedStore {
        let stores = self.stores.lock();
        match stores.get(&stride) {
            Some(store) => Arc::clone(store),
            None => panic!("no store exists for stride {stride}"),
        }
    }

    /// Release every store. Valid only once no snapshots remain.
    pub fn clear(&self) {
        let mut stores = self.stores.lock();
        debug_assert!(stores.values().all(|s| s.lock().is_empty()));
        stores.clear();
    }

    /// Number of per-stride stores.
    pub fn store_count(&self) -> usize {
        self.stores.lock().len()
    }

    /// (expanded, compacted) byte totals across all strides.
    pub fn memory_usage(&self) -> (usize, usize) {
        let stores = self.stores.lock();
        let mut expanded = 0;
        let mut compacted = 0;
        for store in stores.values() {
            let (e, c) = store.lock().memory_usage();
            expanded += e;
            compacted += c;
        }
        (expanded, compacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_idempotent() {
        let set = StoreSet::new(StoreOptions::default());
        let a = set.ensure(4);
        let b = set.ensure(4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.store_count(), 1);

        set.ensure(12);
        assert_eq!(set.store_count(), 2);
    }

    #[test]
    fn test_get_after_ensure() {
        let set = StoreSet::new(StoreOptions::default());
        set.ensure(8);
        assert_eq!(set.get(8).lock().stride(), 8);
    }

    #[test]
    #[should_panic(expected = "no store exists")]
    fn test_get_missing_asserts() {
        let set = StoreSet::new(StoreOptions::default());
        let _ = set.get(8);
    }

    #[test]
    fn test_memory_usage_across_strides() {
        let set = StoreSet::new(StoreOptions { chunk_elems: 4 });
        let a = set.ensure(1);
        let sa = a.lock().state_add(&[1, 2, 3, 4], None);
        let b = set.ensure(2);
        let sb = b.lock().state_add(&[5, 6], None);

        assert_eq!(set.memory_usage(), (6, 6));

        a.lock().state_remove(sa);
        b.lock().state_remove(sb);
        assert_eq!(set.memory_usage(), (0, 0));

        set.clear();
        assert_eq!(set.store_count(), 0);
    }
}
