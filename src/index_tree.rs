// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An index tree: an LSM tree over a [`CompositeKey`], membership-only
//! (spec.md §4.4).

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use lsm_tree::{compaction::Leveled, AbstractTree, SequenceNumberCounter};

use crate::composite_key::CompositeKey;
use crate::error::GroveResult;
use crate::tree_phases::TreePhases;

/// Wraps one [`lsm_tree::AnyTree`] keyed by `K`, whose value is the same
/// composite key (membership only).
pub struct IndexTree<K: CompositeKey> {
    tree: lsm_tree::AnyTree,
    seqno: SequenceNumberCounter,
    name: &'static str,
    _marker: PhantomData<K>,
}

impl<K: CompositeKey> IndexTree<K> {
    /// Opens (or recovers) the index tree at `path`.
    ///
    /// Prefetch budget is zero (spec.md §4.4: "indexes are written from
    /// records already in hand, never pre-read on the hot path"), which
    /// this crate's backing tree already defaults to for a tree that is
    /// never range-scanned ahead of a write.
    pub fn open(path: impl AsRef<Path>, seqno: SequenceNumberCounter, name: &'static str) -> GroveResult<Self> {
        log::debug!("opening index tree {name:?} at {:?}", path.as_ref());

        let tree: lsm_tree::AnyTree = lsm_tree::Config::new(path).open()?.into();

        Ok(Self {
            tree,
            seqno,
            name,
            _marker: PhantomData,
        })
    }

    /// Inserts `key` into the index (spec.md §4.5 `insert`/`update`).
    pub fn put(&self, key: K) {
        let bytes = key.to_bytes();
        let seqno = self.seqno.next();
        self.tree.insert(bytes.clone(), bytes, seqno);

        log::trace!("index tree {:?}: put {key:?}", self.name);
    }

    /// Retracts `key` from the index (spec.md §4.5 `update`/`remove`).
    pub fn remove(&self, key: K) {
        let bytes = key.to_bytes();
        let seqno = self.seqno.next();
        self.tree.remove(bytes, seqno);

        log::trace!("index tree {:?}: remove {key:?}", self.name);
    }

    /// Whether `key` is currently a live (non-tombstoned) member of this index.
    ///
    /// Exposed for testing (T1: the index tree's live entries must exactly
    /// match the projected object set).
    pub fn contains(&self, key: K) -> GroveResult<bool> {
        Ok(self.tree.get(key.to_bytes(), self.seqno.get())?.is_some())
    }
}

impl<K: CompositeKey> TreePhases for IndexTree<K> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open_phase(&self, callback: Box<dyn FnOnce() + Send>) {
        callback();
    }

    fn compact_io_phase(&self, _op: u64, callback: Box<dyn FnOnce() + Send>) {
        if let Err(error) = self.tree.compact(Arc::new(Leveled::default()), self.seqno.get()) {
            log::error!("index tree {:?} compaction failed: {error:?}", self.name);
        }
        callback();
    }

    fn compact_cpu_phase(&self, _op: u64) {}

    fn checkpoint_phase(&self, _op: u64, callback: Box<dyn FnOnce() + Send>) {
        if let Err(error) = self.tree.flush_active_memtable(self.seqno.get()) {
            log::error!("index tree {:?} checkpoint flush failed: {error:?}", self.name);
        }
        callback();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::composite_key::Key64;

    fn open_test_tree() -> (tempfile::TempDir, IndexTree<Key64>) {
        let dir = tempfile::tempdir().unwrap();
        let seqno = SequenceNumberCounter::default();
        let tree = IndexTree::open(dir.path(), seqno, "ledger").unwrap();
        (dir, tree)
    }

    #[test]
    fn put_then_contains() {
        let (_dir, tree) = open_test_tree();
        let key = Key64::new(7, 1);
        assert!(!tree.contains(key).unwrap());
        tree.put(key);
        assert!(tree.contains(key).unwrap());
    }

    #[test]
    fn remove_retracts_membership() {
        let (_dir, tree) = open_test_tree();
        let key = Key64::new(7, 1);
        tree.put(key);
        tree.remove(key);
        assert!(!tree.contains(key).unwrap());
    }
}
