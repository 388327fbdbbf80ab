// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The node pool: a fixed-capacity allocator for tree internal nodes.
//!
//! Out of scope per spec.md §1 ("the node pool (fixed-capacity allocator for
//! tree internal nodes)" is an external collaborator) — this module only
//! defines the interface boundary the Forest depends on, plus a reference
//! in-memory accounting implementation so the crate is self-contained for
//! testing. A real implementation backed by the block grid's storage is the
//! surrounding engine's concern.
//!
//! spec.md (I5) requires the pool to outlive every tree drawing nodes from
//! it, and Design Notes "Node pool stable address" requires its address not
//! to move for the Forest's lifetime; the source language enforces this with
//! a raw pointer into a heap allocation. In Rust the equivalent is an
//! `Arc<NodePool>` cloned into every tree at construction — the pool itself
//! never moves once placed behind the `Arc`, and it is kept alive for as
//! long as any tree holds a clone of the handle.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity allocator for LSM-tree internal nodes.
///
/// Acquired once by a [`crate::Forest`] at construction and shared (via
/// [`std::sync::Arc`]) with every object and index tree across every Grove.
pub struct NodePool {
    capacity: usize,
    in_use: AtomicUsize,
}

impl NodePool {
    /// Allocates a node pool with room for `node_count` nodes.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        Self {
            capacity: node_count,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Total node capacity this pool was constructed with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nodes currently checked out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Reserves `count` nodes, returning `false` if the pool is exhausted.
    #[must_use]
    pub fn acquire(&self, count: usize) -> bool {
        loop {
            let current = self.in_use.load(Ordering::Relaxed);
            let Some(next) = current.checked_add(count) else {
                return false;
            };
            if next > self.capacity {
                return false;
            }
            if self
                .in_use
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Returns nodes to the pool, typically after a compaction reclaims them.
    pub fn release(&self, count: usize) {
        let previous = self.in_use.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "released more nodes than were in use");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_respects_capacity() {
        let pool = NodePool::new(4);
        assert!(pool.acquire(3));
        assert!(!pool.acquire(2));
        assert!(pool.acquire(1));
        assert_eq!(pool.in_use(), 4);
        pool.release(4);
        assert_eq!(pool.in_use(), 0);
    }
}
