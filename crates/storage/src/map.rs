//! Ordered key to versioned-cell maps
//!
//! The contract the transaction core programs against: an ordered map whose
//! entries are shared cells, with atomic insert-if-absent standing in for
//! the B-tree's page-level latches. [`MemoryMap`] is the in-memory
//! implementation; a persistent engine plugs in behind the same trait.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Ordered map of keys to shared cells.
///
/// Cells are handed out as `Arc`s; the map owns the entry, everyone else
/// holds references. Mutating a cell in place is the caller's concern (and
/// is guarded by the cell's own lock slot), the map only guards the key
/// space.
pub trait StorageMap<K, C>: Send + Sync
where
    K: Ord + Clone,
{
    fn name(&self) -> &str;

    fn get(&self, key: &K) -> Option<Arc<C>>;

    /// Insert or replace, returning the displaced cell.
    fn insert(&self, key: K, cell: Arc<C>) -> Option<Arc<C>>;

    /// Atomic insert-if-absent. On conflict the existing cell is returned
    /// and the map is unchanged.
    fn try_insert(&self, key: K, cell: Arc<C>) -> std::result::Result<(), Arc<C>>;

    fn remove(&self, key: &K) -> Option<Arc<C>>;

    fn first_key(&self) -> Option<K>;

    fn last_key(&self) -> Option<K>;

    /// Snapshot of the keys in `range`, in ascending order.
    ///
    /// Iteration works against a key snapshot rather than a live borrow so
    /// cursors never hold the map latch across user code.
    fn range_keys(&self, range: (Bound<K>, Bound<K>)) -> Vec<K>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory `BTreeMap`-backed storage map.
pub struct MemoryMap<K, C> {
    name: String,
    entries: RwLock<BTreeMap<K, Arc<C>>>,
}

impl<K: Ord + Clone, C> MemoryMap<K, C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, C> StorageMap<K, C> for MemoryMap<K, C>
where
    K: Ord + Clone + Send + Sync,
    C: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &K) -> Option<Arc<C>> {
        self.entries.read().get(key).cloned()
    }

    fn insert(&self, key: K, cell: Arc<C>) -> Option<Arc<C>> {
        self.entries.write().insert(key, cell)
    }

    fn try_insert(&self, key: K, cell: Arc<C>) -> std::result::Result<(), Arc<C>> {
        let mut entries = self.entries.write();
        match entries.entry(key) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(cell);
                Ok(())
            }
            std::collections::btree_map::Entry::Occupied(e) => Err(e.get().clone()),
        }
    }

    fn remove(&self, key: &K) -> Option<Arc<C>> {
        self.entries.write().remove(key)
    }

    fn first_key(&self) -> Option<K> {
        self.entries.read().keys().next().cloned()
    }

    fn last_key(&self) -> Option<K> {
        self.entries.read().keys().next_back().cloned()
    }

    fn range_keys(&self, range: (Bound<K>, Bound<K>)) -> Vec<K> {
        self.entries.read().range(range).map(|(k, _)| k.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Named registry of in-memory maps, the `open_map` target.
pub struct MemoryStorage<K, C> {
    maps: RwLock<HashMap<String, Arc<MemoryMap<K, C>>>>,
}

impl<K: Ord + Clone, C> MemoryStorage<K, C> {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(HashMap::new()),
        }
    }

    /// Open the named map, creating it on first use.
    pub fn open_map(&self, name: &str) -> Arc<MemoryMap<K, C>> {
        if let Some(map) = self.maps.read().get(name) {
            return map.clone();
        }
        let mut maps = self.maps.write();
        maps.entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryMap::new(name)))
            .clone()
    }

    pub fn map_count(&self) -> usize {
        self.maps.read().len()
    }
}

impl<K: Ord + Clone, C> Default for MemoryStorage<K, C> {
    fn default() -> Self {
        Self::new()
    }
}
