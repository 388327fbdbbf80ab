// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A Grove/Forest composition layer over a family of [`lsm_tree`] trees that
//! share one record schema.
//!
//! ##### NOTE
//!
//! > This crate does not implement its own LSM-tree — it composes
//! > [`lsm_tree::Tree`]s into the higher-level object/index structure a
//! > deterministic state machine needs: one *object tree* holding whole
//! > records, plus a fixed set of *index trees* kept consistent with it on
//! > every write. You probably want [`lsm_tree`] directly if you just need a
//! > single sorted keyspace.
//!
//! ##### About
//!
//! A [`Grove`] pairs one [`ObjectTree`] (keyed by a 64-bit timestamp) with a
//! compile-time-fixed tuple of index trees, each keyed by a
//! [`CompositeKey`] — a `(projected field value, owning timestamp)` pair.
//! [`Grove::put`] diffs the incoming record against whatever is currently
//! stored and issues only the index mutations the diff actually requires;
//! [`Grove::remove`] requires the caller to present the exact record
//! presently stored, catching stale removes at the assertion boundary
//! rather than letting them corrupt an index silently.
//!
//! A [`Forest`] is the fixed collection of Groves that make up one
//! deterministic state machine's durable state. It owns the node pool and
//! grid handles every tree is constructed with, drives their `open`/
//! `compact_io`/`compact_cpu`/`checkpoint` phases in lockstep across every
//! Grove, and asserts that no two trees in the whole Forest share a
//! Blake3-truncated schema-identity digest.
//!
//! # Example usage
//!
//! ```
//! use grove::{
//!     CompositeKey, Forest, ForestOptions, Grove, GroveOptions, GroveResult, IndexField, Key64,
//!     InMemoryGrid, NodePool, Record, TOMBSTONE_BIT,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! struct Account {
//!     timestamp: u64,
//!     ledger: u32,
//! }
//!
//! impl Record for Account {
//!     fn timestamp(&self) -> u64 {
//!         self.timestamp
//!     }
//!
//!     fn encode(&self) -> Vec<u8> {
//!         let mut buf = self.timestamp.to_be_bytes().to_vec();
//!         buf.extend_from_slice(&self.ledger.to_be_bytes());
//!         buf
//!     }
//!
//!     fn decode(bytes: &[u8]) -> Self {
//!         Self {
//!             timestamp: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
//!             ledger: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
//!         }
//!     }
//!
//!     fn tombstone_from_key(timestamp: u64) -> Self {
//!         Self { timestamp: timestamp | TOMBSTONE_BIT, ledger: 0 }
//!     }
//! }
//!
//! struct LedgerField;
//! impl IndexField<Account> for LedgerField {
//!     type Value = u32;
//!     type Key = Key64;
//!     const NAME: &'static str = "ledger";
//!     fn derive(record: &Account) -> Option<u32> {
//!         Some(record.ledger)
//!     }
//! }
//!
//! # let dir = tempfile::tempdir()?;
//! let grid = Arc::new(InMemoryGrid::new());
//! let pool = Arc::new(NodePool::new(1_000));
//! let seqno = lsm_tree::SequenceNumberCounter::default();
//! let options = GroveOptions::new(/* cache_size */ 1_000, /* commit_count_max */ 8);
//!
//! let grove: Grove<Account, (grove::IndexSlot<Account, LedgerField>,)> =
//!     Grove::new("accounts", dir.path(), grid, pool, seqno, options)?;
//!
//! let account = Account { timestamp: 1, ledger: 7 };
//! grove.put(&account);
//! assert_eq!(grove.get(1)?, Some(account));
//! #
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod composite_key;
mod config;
mod error;
mod forest;
mod grid;
mod grove;
mod index;
mod index_tree;
mod join;
mod node_pool;
mod object_tree;
mod schema;
mod tree_phases;
mod value_cache;

pub use composite_key::{compare_keys, CompositeKey, Key128, Key64};
pub use config::{ForestOptions, GroveOptions};
pub use error::{ForestError, ForestResult, GroveError, GroveResult, SchemaError};
pub use forest::{Forest, ForestMember, ForestPhase, GroveOpener};
pub use grid::{Grid, InMemoryGrid};
pub use grove::{Grove, GrovePhase};
pub use index::{DefaultKey, IndexField, IndexPayload};
pub use join::Join;
pub use node_pool::NodePool;
pub use object_tree::{ObjectTree, Record, TOMBSTONE_BIT};
pub use schema::{IndexSlot, IndexTuple};
pub use tree_phases::TreePhases;
pub use value_cache::ValueCache;
