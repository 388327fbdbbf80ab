// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The object tree's value cache: a bounded hash table from timestamp to the
//! latest live record, backing [`crate::Grove::get`] without descending the
//! LSM (spec.md §4.3).

use quick_cache::sync::Cache as QuickCache;
use quick_cache::Weighter;

#[derive(Clone)]
struct UnitWeighter;

impl<K, V> Weighter<K, V> for UnitWeighter {
    fn weight(&self, _key: &K, _value: &V) -> u64 {
        1
    }
}

/// A bounded timestamp → record cache, private to one Grove's object tree
/// (spec.md §5 "Cache: private to one Grove's object tree; not aliased").
pub struct ValueCache<V: Clone + Send + Sync + 'static> {
    data: QuickCache<u64, V, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl<V: Clone + Send + Sync + 'static> ValueCache<V> {
    /// Allocates a cache with room for roughly `capacity` live records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        Self {
            data: QuickCache::with(
                capacity.max(1),
                capacity.max(1) as u64,
                UnitWeighter,
                rustc_hash::FxBuildHasher,
                DefaultLifecycle::default(),
            ),
        }
    }

    /// Returns the cached record at `timestamp`, if present.
    #[must_use]
    pub fn get(&self, timestamp: u64) -> Option<V> {
        self.data.get(&timestamp)
    }

    /// Inserts or overwrites the cached record at `timestamp`.
    pub fn insert(&self, timestamp: u64, value: V) {
        self.data.insert(timestamp, value);
    }

    /// Evicts `timestamp` from the cache, e.g. after a tombstoning remove.
    pub fn remove(&self, timestamp: u64) {
        self.data.remove(&timestamp);
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let cache: ValueCache<Vec<u8>> = ValueCache::with_capacity(16);
        assert!(cache.get(1).is_none());

        cache.insert(1, vec![1, 2, 3]);
        assert_eq!(cache.get(1), Some(vec![1, 2, 3]));

        cache.remove(1);
        assert!(cache.get(1).is_none());
    }
}
