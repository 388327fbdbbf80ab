// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-Grove and per-Forest construction options (spec.md §4.5/§4.6, §9
//! "`commit_count_max` per Grove").

/// Construction-time options for one [`crate::Grove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroveOptions {
    /// Capacity of the object tree's value cache (spec.md §4.3).
    pub cache_size: usize,

    /// Upper bound on mutations per batch; sizes the object and index
    /// trees' write buffers (spec.md §4.5, Glossary "Commit-count-max").
    ///
    /// spec.md §9 notes this is caller-supplied per Grove and gives as an
    /// example that an `Account` Grove should receive
    /// `2 * 2 * transfers_per_batch` to cover two-account updates times
    /// old/new index churn; this crate leaves the multiplier to the caller
    /// and only validates that the result is non-zero.
    pub commit_count_max: usize,
}

impl GroveOptions {
    /// Creates options, or rejects a degenerate configuration.
    ///
    /// # Panics
    ///
    /// Panics if `commit_count_max` is zero; a Grove that can never commit
    /// a mutation cannot usefully exist.
    #[must_use]
    pub fn new(cache_size: usize, commit_count_max: usize) -> Self {
        assert!(commit_count_max > 0, "commit_count_max must be non-zero");
        Self {
            cache_size,
            commit_count_max,
        }
    }

    /// `prefetch_count_max` for the object tree: `2 * commit_count_max`,
    /// since updates may touch both old and new versions of an object
    /// within one batch (spec.md §4.5).
    #[must_use]
    pub fn object_prefetch_count_max(&self) -> usize {
        self.commit_count_max
            .checked_mul(2)
            .expect("commit_count_max overflowed object prefetch budget")
    }
}

/// Construction-time options for a [`crate::Forest`]: a node-pool budget and
/// one [`GroveOptions`] per schema-declared Grove, in declaration order.
#[derive(Debug, Clone)]
pub struct ForestOptions {
    /// Total node count handed to the shared [`crate::NodePool`].
    pub node_count: usize,

    /// Per-Grove options, indexed in the same order the schema declares Groves.
    pub per_grove: Vec<GroveOptions>,
}

impl ForestOptions {
    /// Creates Forest options.
    #[must_use]
    pub fn new(node_count: usize, per_grove: Vec<GroveOptions>) -> Self {
        Self {
            node_count,
            per_grove,
        }
    }
}
