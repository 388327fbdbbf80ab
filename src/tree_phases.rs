// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The async-phase boundary every tree a [`crate::Grove`] owns must expose
//! (spec.md §4.5 "Async phases", §6 "Tree (external)").
//!
//! spec.md models `open`/`compact_io`/`compact_cpu`/`checkpoint` as
//! callback-completed phases dispatched by an external, genuinely async
//! tree/grid. This crate's concrete tree (`lsm-tree`) performs the
//! equivalent work synchronously; implementations of this trait therefore
//! complete the operation and invoke the callback before returning, which
//! still satisfies every ordering guarantee in spec.md §5 (O3/O4 care about
//! *order*, not *latency*). A genuinely async, grid-backed tree can
//! implement this same trait without requiring any change to
//! [`crate::Grove`] or [`crate::Forest`].

/// The phase surface [`crate::join::Join`] fans out over.
pub trait TreePhases: Send + Sync {
    /// Name used in logging (e.g. `"object_tree"`, or an index field's name).
    fn name(&self) -> &'static str;

    /// Recovers/opens this tree, then invokes `callback`.
    fn open_phase(&self, callback: Box<dyn FnOnce() + Send>);

    /// Runs the I/O-bound half of compaction for operation tag `op`, then
    /// invokes `callback`.
    fn compact_io_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>);

    /// Runs the CPU-bound half of compaction for operation tag `op`,
    /// synchronously, no callback (spec.md §4.5: "`compact_cpu` is
    /// synchronous and fans out identically without a join").
    fn compact_cpu_phase(&self, op: u64);

    /// Checkpoints this tree for operation tag `op`, then invokes `callback`.
    fn checkpoint_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>);
}
