// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A Forest: the fixed collection of Groves that make up one deterministic
//! state machine's on-disk state (spec.md §4.6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lsm_tree::SequenceNumberCounter;

use crate::config::{ForestOptions, GroveOptions};
use crate::error::{ForestResult, GroveResult, SchemaError};
use crate::grid::Grid;
use crate::grove::Grove;
use crate::join::Join;
use crate::node_pool::NodePool;
use crate::object_tree::Record;
use crate::schema::IndexTuple;

/// The Forest's view of one Grove, erasing its record/index types.
///
/// Everything a [`Forest`] needs to drive a Grove's lifecycle and to collect
/// its tree names for digest checking is dynamic-dispatch friendly and lives
/// off the hot write path — callers reach the typed [`Grove<R, IXS>`]
/// directly for `get`/`put`/`remove`.
pub trait ForestMember: Send + Sync {
    /// This Grove's declared name.
    fn name(&self) -> &'static str;

    /// Fully-qualified `grove.tree` names for every tree this Grove owns.
    fn tree_names(&self) -> Vec<String>;

    /// See [`Grove::open`].
    fn open_phase(&self, callback: Box<dyn FnOnce() + Send>);

    /// See [`Grove::compact_io`].
    fn compact_io_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>);

    /// See [`Grove::compact_cpu`].
    fn compact_cpu_phase(&self, op: u64);

    /// See [`Grove::checkpoint`].
    fn checkpoint_phase(&self, callback: Box<dyn FnOnce() + Send>);
}

impl<R: Record, IXS: IndexTuple<R>> ForestMember for Grove<R, IXS> {
    fn name(&self) -> &'static str {
        Grove::name(self)
    }

    fn tree_names(&self) -> Vec<String> {
        Grove::tree_names(self)
    }

    fn open_phase(&self, callback: Box<dyn FnOnce() + Send>) {
        self.open(callback);
    }

    fn compact_io_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>) {
        self.compact_io(op, callback);
    }

    fn compact_cpu_phase(&self, op: u64) {
        self.compact_cpu(op);
    }

    fn checkpoint_phase(&self, callback: Box<dyn FnOnce() + Send>) {
        self.checkpoint(callback);
    }
}

/// Builds and opens one schema-declared Grove, given the Forest's shared
/// grid, node pool, sequence counter, and this Grove's own options.
///
/// Supplied per Grove, in schema-declared order, to [`Forest::new`]. Kept as
/// a boxed closure rather than a trait because each Grove's concrete `R`/
/// `IXS` types differ and have no common compile-time representation.
pub type GroveOpener =
    Box<dyn FnOnce(Arc<dyn Grid>, Arc<NodePool>, SequenceNumberCounter, GroveOptions) -> GroveResult<Box<dyn ForestMember>>>;

/// Tags the async phase currently outstanding on a Forest (I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForestPhase {
    /// spec.md §4.6 "open".
    Open,
    /// spec.md §4.6 "compact_io".
    CompactIo,
    /// spec.md §4.6 "checkpoint".
    Checkpoint,
}

/// The fixed collection of Groves backing one deterministic state machine,
/// plus the grid and node pool they share.
pub struct Forest {
    grid: Arc<dyn Grid>,
    #[allow(dead_code)] // kept alive for every Grove's cloned handle (I5)
    node_pool: Arc<NodePool>,
    groves: Vec<Box<dyn ForestMember>>,
    join: Arc<Mutex<Join<ForestPhase>>>,
}

impl Forest {
    /// Constructs a Forest: allocates the shared node pool, then opens every
    /// Grove in schema-declared order by calling its [`GroveOpener`].
    ///
    /// On a failing Grove, construction stops and returns
    /// [`crate::error::ForestError::Grove`] carrying that Grove's zero-based
    /// position — every already-opened Grove (and the pool, and the grid
    /// handle) is dropped via RAII, so there is no manual unwind path to
    /// write (see DESIGN.md "construction teardown").
    ///
    /// After every Grove opens, every tree's `grove.tree` name is hashed
    /// (Blake3, truncated to 128 bits) and checked pairwise for collisions
    /// (spec.md §9 "Tree identity digests"); a collision is
    /// [`crate::error::ForestError::Schema`].
    ///
    /// # Errors
    ///
    /// See above.
    ///
    /// # Panics
    ///
    /// Panics if `openers.len()` does not match `options.per_grove.len()` —
    /// the schema and the options must declare the same Groves.
    pub fn new(grid: Arc<dyn Grid>, options: ForestOptions, openers: Vec<GroveOpener>) -> ForestResult<Self> {
        assert_eq!(
            openers.len(),
            options.per_grove.len(),
            "one GroveOpener is required per GroveOptions entry"
        );

        if options.node_count == 0 {
            return Err(crate::error::ForestError::NodePoolAllocation);
        }

        let node_pool = Arc::new(NodePool::new(options.node_count));
        let seqno = SequenceNumberCounter::default();

        let mut groves = Vec::with_capacity(openers.len());
        for (index, (opener, grove_options)) in openers.into_iter().zip(options.per_grove).enumerate() {
            let grove = opener(grid.clone(), node_pool.clone(), seqno.clone(), grove_options)
                .map_err(|source| crate::error::ForestError::Grove { index, source })?;
            groves.push(grove);
        }

        check_digest_uniqueness(&groves)?;

        log::info!("forest opened with {} groves", groves.len());

        Ok(Self {
            grid,
            node_pool,
            groves,
            join: Arc::new(Mutex::new(Join::new())),
        })
    }

    /// Advances the grid's logical storage clock (spec.md §4.6: "no trees
    /// are ticked directly").
    pub fn tick(&self) {
        self.grid.tick();
    }

    /// Recovers/opens every Grove, joining their completions into one callback.
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Forest.
    pub fn open(&self, callback: impl FnOnce() + Send + 'static) {
        self.dispatch(ForestPhase::Open, callback, |grove, cb| grove.open_phase(cb));
    }

    /// Runs the I/O-bound half of compaction for operation tag `op` across
    /// every Grove, joining their completions.
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Forest.
    pub fn compact_io(&self, op: u64, callback: impl FnOnce() + Send + 'static) {
        self.dispatch(ForestPhase::CompactIo, callback, move |grove, cb| grove.compact_io_phase(op, cb));
    }

    /// Runs the CPU-bound half of compaction for operation tag `op`,
    /// synchronously and without a join (spec.md §4.6).
    pub fn compact_cpu(&self, op: u64) {
        for grove in &self.groves {
            grove.compact_cpu_phase(op);
        }
    }

    /// Checkpoints every Grove, joining their completions (spec.md §8
    /// scenario 5: a checkpoint across Groves fans out and joins exactly
    /// once per Grove, regardless of how many trees each Grove owns).
    ///
    /// # Panics
    ///
    /// Panics (I4) if a phase is already outstanding on this Forest.
    pub fn checkpoint(&self, callback: impl FnOnce() + Send + 'static) {
        self.dispatch(ForestPhase::Checkpoint, callback, |grove, cb| grove.checkpoint_phase(cb));
    }

    fn dispatch(
        &self,
        op: ForestPhase,
        callback: impl FnOnce() + Send + 'static,
        per_grove: impl Fn(&dyn ForestMember, Box<dyn FnOnce() + Send>),
    ) {
        let pending = self.groves.len();

        self.join.lock().expect("join mutex poisoned").start(op, pending, move |_| callback());

        for grove in &self.groves {
            let join = self.join.clone();
            per_grove(
                grove.as_ref(),
                Box::new(move || {
                    join.lock().expect("join mutex poisoned").child_done(op);
                }),
            );
        }
    }
}

fn check_digest_uniqueness(groves: &[Box<dyn ForestMember>]) -> Result<(), SchemaError> {
    let mut seen: HashMap<u128, String> = HashMap::new();

    for grove in groves {
        for name in grove.tree_names() {
            let digest = schema_digest(&name);
            // Any repeated digest is a collision, including two trees that
            // happen to share the exact same fully-qualified name — that is
            // the worst-case violation of spec.md §6's pairwise-uniqueness
            // requirement, not something to wave through.
            if let Some(existing) = seen.insert(digest, name.clone()) {
                return Err(SchemaError::DigestCollision { first: existing, second: name });
            }
        }
    }

    Ok(())
}

/// Blake3-truncated 128-bit identity digest for a fully-qualified
/// `grove.tree` name (spec.md §9).
fn schema_digest(name: &str) -> u128 {
    let hash = blake3::hash(name.as_bytes());
    u128::from_be_bytes(hash.as_bytes()[0..16].try_into().expect("16 bytes"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grid::InMemoryGrid;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Account {
        timestamp: u64,
        ledger: u32,
    }

    impl Record for Account {
        fn timestamp(&self) -> u64 {
            self.timestamp
        }

        fn encode(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(12);
            buf.extend_from_slice(&self.timestamp.to_be_bytes());
            buf.extend_from_slice(&self.ledger.to_be_bytes());
            buf
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                timestamp: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
                ledger: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            }
        }

        fn tombstone_from_key(timestamp: u64) -> Self {
            Self {
                timestamp: timestamp | crate::object_tree::TOMBSTONE_BIT,
                ledger: 0,
            }
        }
    }

    crate::grove_schema! {
        record = Account,
        indexes = AccountIndexes,
        fields {
            LedgerField => ledger: u32,
        }
        derived {}
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Transfer {
        timestamp: u64,
        amount: u64,
    }

    impl Record for Transfer {
        fn timestamp(&self) -> u64 {
            self.timestamp
        }

        fn encode(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&self.timestamp.to_be_bytes());
            buf.extend_from_slice(&self.amount.to_be_bytes());
            buf
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                timestamp: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
                amount: u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
            }
        }

        fn tombstone_from_key(timestamp: u64) -> Self {
            Self {
                timestamp: timestamp | crate::object_tree::TOMBSTONE_BIT,
                amount: 0,
            }
        }
    }

    crate::grove_schema! {
        record = Transfer,
        indexes = TransferIndexes,
        fields {
            AmountField => amount: u64,
        }
        derived {}
    }

    fn accounts_opener(dir: &Path) -> GroveOpener {
        let dir = dir.join("accounts");
        Box::new(move |grid, pool, seqno, options| {
            Grove::<Account, AccountIndexes>::new("accounts", dir, grid, pool, seqno, options)
                .map(|g| Box::new(g) as Box<dyn ForestMember>)
        })
    }

    fn transfers_opener(dir: &Path) -> GroveOpener {
        let dir = dir.join("transfers");
        Box::new(move |grid, pool, seqno, options| {
            Grove::<Transfer, TransferIndexes>::new("transfers", dir, grid, pool, seqno, options)
                .map(|g| Box::new(g) as Box<dyn ForestMember>)
        })
    }

    fn open_test_forest() -> (tempfile::TempDir, Forest) {
        let dir = tempfile::tempdir().unwrap();
        let grid: Arc<dyn Grid> = Arc::new(InMemoryGrid::new());
        let options = ForestOptions::new(1_000, vec![GroveOptions::new(16, 4), GroveOptions::new(16, 4)]);
        let openers = vec![accounts_opener(dir.path()), transfers_opener(dir.path())];
        let forest = Forest::new(grid, options, openers).unwrap();
        (dir, forest)
    }

    #[test]
    fn opens_every_declared_grove() {
        let (_dir, forest) = open_test_forest();
        assert_eq!(forest.groves.len(), 2);
    }

    #[test]
    fn tick_advances_the_grid() {
        let (_dir, forest) = open_test_forest();
        forest.tick();
        forest.tick();
        assert_eq!(forest.grid.clock(), 2);
    }

    // Scenario 5: a checkpoint across Groves joins exactly once. Logging is
    // captured for this one (as teacher's own fan-out tests do) since a
    // stuck or double-fired join is exactly what `log::trace!` output helps
    // diagnose.
    #[test_log::test]
    fn checkpoint_joins_across_every_grove() {
        let (_dir, forest) = open_test_forest();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        forest.checkpoint(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn double_checkpoint_without_completion_panics() {
        let (_dir, forest) = open_test_forest();

        forest.join.lock().unwrap().start(ForestPhase::Checkpoint, 1, |_| {});
        forest.checkpoint(|| {});
    }

    #[test]
    #[should_panic(expected = "one GroveOpener is required")]
    fn mismatched_opener_and_options_count_panics() {
        let dir = tempfile::tempdir().unwrap();
        let grid: Arc<dyn Grid> = Arc::new(InMemoryGrid::new());
        let options = ForestOptions::new(1_000, vec![GroveOptions::new(16, 4)]);
        let openers = vec![accounts_opener(dir.path()), transfers_opener(dir.path())];

        let _ = Forest::new(grid, options, openers);
    }

    #[test]
    fn digest_collision_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let grid: Arc<dyn Grid> = Arc::new(InMemoryGrid::new());
        let options = ForestOptions::new(1_000, vec![GroveOptions::new(16, 4), GroveOptions::new(16, 4)]);

        // Two Groves declared under the same name collide on every one of
        // their (identically-named) constituent trees.
        let openers = vec![accounts_opener(dir.path()), accounts_opener(dir.path().join("dup").as_path())];

        let err = Forest::new(grid, options, openers).unwrap_err();
        assert!(matches!(err, crate::error::ForestError::Schema(SchemaError::DigestCollision { .. })));
    }
}
