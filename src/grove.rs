// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A Grove: one object tree plus a fixed tuple of index trees for a single
//! record type (spec.md §4.5).

use std::path::Path;
use std::sync::{Arc, Mutex};

use lsm_tree::SequenceNumberCounter;

use crate::config::GroveOptions;
use crate::error::GroveResult;
use crate::grid::Grid;
use crate::join::Join;
use crate::node_pool::NodePool;
use crate::object_tree::{ObjectTree, Record};
use crate::schema::IndexTuple;
use crate::tree_phases::TreePhases;

/// Tags the async phase currently outstanding on a Grove, enforcing (I4)
/// through [`Join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrovePhase {
    /// spec.md §4.5 "open".
    Open,
    /// spec.md §4.5 "compact_io".
    CompactIo,
    /// spec.md §4.5 "checkpoint".
    Checkpoint,
}

/// One object tree and its fixed set of index trees.
///
/// `R` is the record type; `IXS` is the compile-time-fixed tuple of
/// [`crate::schema::IndexSlot`]s this record's schema declares (see
/// [`crate::schema::IndexTuple`]).
pub struct Grove<R: Record, IXS: IndexTuple<R>> {
    name: &'static str,
    objects: ObjectTree<R>,
    indexes: IXS,
    node_pool: Arc<NodePool>,
    #[allow(dead_code)] // held for (I5): the grid must outlive every tree reading through it
    grid: Arc<dyn Grid>,
    join: Arc<Mutex<Join<GrovePhase>>>,
}

impl<R: Record, IXS: IndexTuple<R>> Grove<R, IXS> {
    /// Constructs a Grove under `dir` with `options`.
    ///
    /// spec.md §4.5 describes reverse-order teardown of already-initialized
    /// resources on a failed construction step; in Rust this falls out of
    /// RAII automatically (a `?` return drops every already-constructed
    /// local in reverse declaration order), so no manual unwind path is
    /// needed here — see DESIGN.md "construction teardown".
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GroveError`] if schema validation fails or if
    /// any underlying tree fails to open.
    pub fn new(
        name: &'static str,
        dir: impl AsRef<Path>,
        grid: Arc<dyn Grid>,
        node_pool: Arc<NodePool>,
        seqno: SequenceNumberCounter,
        options: GroveOptions,
    ) -> GroveResult<Self> {
        IXS::validate()?;

        let dir = dir.as_ref();
        let objects = ObjectTree::open(dir.join("objects"), seqno.clone(), options.cache_size)?;
        let indexes = IXS::open_all(&dir.join("indexes"), seqno)?;

        log::debug!("grove {name:?} opened at {dir:?} with {} indexes", IXS::COUNT);

        Ok(Self {
            name,
            objects,
            indexes,
            node_pool,
            grid,
            join: Arc::new(Mutex::new(Join::new())),
        })
    }

    /// This Grove's name, as given at construction.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fully-qualified `grove.tree` names for every tree this Grove owns —
    /// the object tree and every index — used by [`crate::Forest`] to build
    /// each tree's schema-identity digest (spec.md §9 "Tree identity digests").
    #[must_use]
    pub fn tree_names(&self) -> Vec<String> {
        self.all_phases().into_iter().map(|tree| format!("{}.{}", self.name, tree.name())).collect()
    }

    /// Reads the live record at `timestamp` (spec.md §4.5 `get`). Pure read,
    /// non-blocking.
    pub fn get(&self, timestamp: u64) -> GroveResult<Option<R>> {
        self.objects.get(timestamp)
    }

    /// Inserts or updates `record`, keeping every index consistent (spec.md
    /// §4.5 `put`). Infallible per spec.md §7 "Propagation policy"
    /// ("write-path errors do not exist"): a read failure while looking up
    /// the currently-stored record is a storage malfunction, not a
    /// caller-recoverable condition, so it panics rather than propagating a
    /// `Result` (see DESIGN.md "The write path is infallible").
    ///
    /// # Panics
    ///
    /// Panics if the object tree's backing read fails.
    pub fn put(&self, record: &R) {
        match self.get(record.timestamp()).expect("object tree read failed during put") {
            Some(existing) => self.update(&existing, record),
            None => self.insert(record),
        }
    }

    /// spec.md §4.5 `insert`: a brand-new object.
    fn insert(&self, record: &R) {
        self.objects.put(record);
        self.indexes.put_all(record);
    }

    /// spec.md §4.5 `update`: diffs `old` against `new` field by field.
    ///
    /// (T3) If `old` and `new` are byte-identical, no tree operation is
    /// issued at all — the object-tree rewrite is skipped, and every
    /// per-index diff below degenerates to a no-op since every projected
    /// value is unchanged.
    fn update(&self, old: &R, new: &R) {
        if old.encode() != new.encode() {
            self.objects.remove(old.timestamp());
            self.objects.put(new);
        }

        self.indexes.diff_update_all(old, new);
    }

    /// Removes `record` (spec.md §4.5 `remove`). Infallible for the same
    /// reason as [`Grove::put`]: see DESIGN.md "The write path is
    /// infallible".
    ///
    /// # Panics
    ///
    /// Panics if the object tree's backing read fails, or (T2) unless the
    /// object tree currently holds a record that is byte-identical to
    /// `record` at `record.timestamp()` — this catches stale removes, per
    /// spec.md §7 "Programming errors".
    pub fn remove(&self, record: &R) {
        let stored = self
            .get(record.timestamp())
            .expect("object tree read failed during remove");

        let matches = stored.as_ref().is_some_and(|s| s.encode() == record.encode());
        assert!(
            matches,
            "remove({}) does not match the currently stored record",
            record.timestamp()
        );

        self.objects.remove(record.timestamp());
        self.indexes.remove_all(record);
    }

    fn all_phases(&self) -> Vec<&dyn TreePhases> {
        let mut trees: Vec<&dyn TreePhases> = vec![&self.objects];
        trees.extend(self.indexes.phases());
        trees
    }

    /// Recovers/opens every tree, joining their completions into one
    /// callback (spec.md §4.5 "Async phases").
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Grove.
    pub fn open(&self, callback: impl FnOnce() + Send + 'static) {
        self.dispatch(GrovePhase::Open, callback, |tree, cb| tree.open_phase(cb));
    }

    /// Runs the I/O-bound half of compaction for operation tag `op` across
    /// every tree, joining their completions.
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Grove.
    pub fn compact_io(&self, op: u64, callback: impl FnOnce() + Send + 'static) {
        let trees = self.all_phases();
        if !self.node_pool.acquire(trees.len()) {
            log::warn!("grove compact_io: node pool exhausted, proceeding without reservation");
        }

        let node_pool = self.node_pool.clone();
        let n = trees.len();
        let callback = move || {
            node_pool.release(n);
            callback();
        };

        self.dispatch(GrovePhase::CompactIo, callback, move |tree, cb| tree.compact_io_phase(op, cb));
    }

    /// Runs the CPU-bound half of compaction for operation tag `op`,
    /// synchronously and without a join (spec.md §4.5).
    pub fn compact_cpu(&self, op: u64) {
        for tree in self.all_phases() {
            tree.compact_cpu_phase(op);
        }
    }

    /// Checkpoints every tree, joining their completions.
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Grove.
    pub fn checkpoint(&self, callback: impl FnOnce() + Send + 'static) {
        self.dispatch(GrovePhase::Checkpoint, callback, |tree, cb| tree.checkpoint_phase(cb));
    }

    fn dispatch(
        &self,
        op: GrovePhase,
        callback: impl FnOnce() + Send + 'static,
        per_tree: impl Fn(&dyn TreePhases, Box<dyn FnOnce() + Send>),
    ) {
        let trees = self.all_phases();
        let pending = trees.len();

        self.join.lock().expect("join mutex poisoned").start(op, pending, move |_| callback());

        for tree in trees {
            let join = self.join.clone();
            per_tree(
                tree,
                Box::new(move || {
                    join.lock().expect("join mutex poisoned").child_done(op);
                }),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grid::InMemoryGrid;
    use crate::schema::IndexSlot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Account {
        timestamp: u64,
        id: u128,
        ledger: u32,
        flags: u16,
    }

    const FLAG_TAGGED: u16 = 1;

    impl Record for Account {
        fn timestamp(&self) -> u64 {
            self.timestamp
        }

        fn encode(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(32);
            buf.extend_from_slice(&self.timestamp.to_be_bytes());
            buf.extend_from_slice(&self.id.to_be_bytes());
            buf.extend_from_slice(&self.ledger.to_be_bytes());
            buf.extend_from_slice(&self.flags.to_be_bytes());
            buf
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                timestamp: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
                id: u128::from_be_bytes(bytes[8..24].try_into().unwrap()),
                ledger: u32::from_be_bytes(bytes[24..28].try_into().unwrap()),
                flags: u16::from_be_bytes(bytes[28..30].try_into().unwrap()),
            }
        }

        fn tombstone_from_key(timestamp: u64) -> Self {
            Self {
                timestamp: timestamp | crate::object_tree::TOMBSTONE_BIT,
                id: 0,
                ledger: 0,
                flags: 0,
            }
        }
    }

    // Schema declared via the macro instead of one hand-written `IndexField`
    // impl per field: `id`/`ledger` are indexed implicitly, `flags` is
    // excluded, and `category` (Scenario 4) is derived, absent unless a flag
    // bit is set.
    crate::grove_schema! {
        record = Account,
        indexes = TestIndexes,
        fields {
            IdField => id: u128,
            LedgerField => ledger: u32,
            #[ignore]
            flags: u16,
        }
        derived {
            CategoryField => category: u32 = |r: &Account| {
                if r.flags & FLAG_TAGGED == 0 { None } else { Some(5) }
            },
        }
    }

    fn open_test_grove() -> (tempfile::TempDir, Grove<Account, TestIndexes>) {
        let dir = tempfile::tempdir().unwrap();
        let grid: Arc<dyn Grid> = Arc::new(InMemoryGrid::new());
        let pool = Arc::new(NodePool::new(1_000));
        let seqno = SequenceNumberCounter::default();
        let options = GroveOptions::new(64, 8);
        let grove = Grove::new("accounts", dir.path(), grid, pool, seqno, options).unwrap();
        (dir, grove)
    }

    fn id_tree(grove: &Grove<Account, TestIndexes>) -> &IndexSlot<Account, IdField> {
        &grove.indexes.0
    }

    fn ledger_tree(grove: &Grove<Account, TestIndexes>) -> &IndexSlot<Account, LedgerField> {
        &grove.indexes.1
    }

    fn category_tree(grove: &Grove<Account, TestIndexes>) -> &IndexSlot<Account, CategoryField> {
        &grove.indexes.2
    }

    // Scenario 1: single insert/lookup.
    #[test]
    fn single_insert_lookup() {
        let (_dir, grove) = open_test_grove();

        let account = Account { timestamp: 1, id: 0xAA, ledger: 7, flags: 0 };
        grove.put(&account);

        assert_eq!(grove.get(1).unwrap(), Some(account));
        assert!(id_tree(&grove).contains(&account).unwrap());
        assert!(ledger_tree(&grove).contains(&account).unwrap());
    }

    // Scenario 2: update with one index change.
    #[test]
    fn update_changes_only_the_touched_index() {
        let (_dir, grove) = open_test_grove();

        let v1 = Account { timestamp: 1, id: 0xAA, ledger: 7, flags: 0 };
        grove.put(&v1);

        let v2 = Account { timestamp: 1, id: 0xAA, ledger: 9, flags: 0 };
        grove.put(&v2);

        assert_eq!(grove.get(1).unwrap(), Some(v2));
        assert!(id_tree(&grove).contains(&v2).unwrap());

        // old ledger key retracted, new ledger key live
        let stale = Account { ledger: 7, ..v2 };
        assert!(!ledger_tree(&grove).contains(&stale).unwrap());
        assert!(ledger_tree(&grove).contains(&v2).unwrap());
    }

    // Scenario 3: remove round-trip; (T1), (T2).
    #[test]
    fn remove_round_trip() {
        let (_dir, grove) = open_test_grove();

        let v1 = Account { timestamp: 1, id: 0xAA, ledger: 7, flags: 0 };
        grove.put(&v1);
        let v2 = Account { timestamp: 1, id: 0xAA, ledger: 9, flags: 0 };
        grove.put(&v2);

        grove.remove(&v2);

        assert_eq!(grove.get(1).unwrap(), None);
        assert!(!id_tree(&grove).contains(&v2).unwrap());
        assert!(!ledger_tree(&grove).contains(&v2).unwrap());
    }

    // (T2) removing a record that doesn't match the stored state panics.
    #[test]
    #[should_panic(expected = "does not match the currently stored record")]
    fn stale_remove_panics() {
        let (_dir, grove) = open_test_grove();

        let v1 = Account { timestamp: 1, id: 0xAA, ledger: 7, flags: 0 };
        grove.put(&v1);

        let stale = Account { timestamp: 1, id: 0xAA, ledger: 999, flags: 0 };
        grove.remove(&stale);
    }

    // Scenario 4: derived index absence/presence across updates.
    #[test]
    fn derived_index_tracks_absence() {
        let (_dir, grove) = open_test_grove();

        let untagged = Account { timestamp: 1, id: 1, ledger: 1, flags: 0 };
        grove.put(&untagged);
        assert!(!category_tree(&grove).contains(&untagged).unwrap());

        let tagged = Account { timestamp: 1, id: 1, ledger: 1, flags: FLAG_TAGGED };
        grove.put(&tagged);
        assert!(category_tree(&grove).contains(&tagged).unwrap());

        let untagged_again = Account { timestamp: 1, id: 1, ledger: 1, flags: 0 };
        grove.put(&untagged_again);
        assert!(!category_tree(&grove).contains(&untagged_again).unwrap());
    }

    // (T3) a byte-identical update issues no tree operations: re-putting the
    // same value must not disturb the category index's live/absent state.
    #[test]
    fn identical_update_is_a_no_op() {
        let (_dir, grove) = open_test_grove();

        let v1 = Account { timestamp: 1, id: 1, ledger: 1, flags: FLAG_TAGGED };
        grove.put(&v1);
        grove.put(&v1);

        assert_eq!(grove.get(1).unwrap(), Some(v1));
        assert!(category_tree(&grove).contains(&v1).unwrap());
    }

    // (T5) a Grove phase callback fires exactly once per start; overlapping
    // phases trip the Join's assertion. Fan-out/fan-in join-counter bugs are
    // exactly the kind of thing `log::trace!` output helps debug, so this
    // one runs with logging captured the way teacher's own tests do.
    #[test_log::test]
    fn phase_join_fires_once() {
        let (_dir, grove) = open_test_grove();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        grove.checkpoint(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn overlapping_phase_panics() {
        let (_dir, grove) = open_test_grove();

        // Hold the join lock open across two starts by driving them through
        // the private dispatch path directly with a callback that itself
        // tries to start a second phase before the first is released.
        grove.join.lock().unwrap().start(GrovePhase::Open, 1, |_| {});
        grove.open(|| {});
    }
}
