// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compile-time schema composition: turns a fixed list of [`IndexField`]
//! implementations into a statically-dispatched tuple of index trees
//! (spec.md §4 Design Notes "Compile-time schema → runtime structure",
//! option (c): "a tuple keyed by a compile-time index list").
//!
//! The hot write path (`put_all`/`remove_all`/`diff_update_all`) is fully
//! unrolled per tuple arity by [`impl_index_tuple`] below — no `dyn`
//! dispatch, matching the Design Notes' "avoid dynamic dispatch" guidance
//! since the index set is fixed at build time. The async-phase fan-out
//! (`phases`) does return `&dyn TreePhases`, which is fine: that path is
//! already behind a heap-allocated callback (spec.md §4.5/§4.6), not the hot
//! path the Design Notes are protecting.

use std::marker::PhantomData;
use std::path::Path;

use lsm_tree::SequenceNumberCounter;

use crate::error::{GroveResult, SchemaError};
use crate::index::IndexField;
use crate::index_tree::IndexTree;
use crate::object_tree::Record;
use crate::tree_phases::TreePhases;

/// One index tree plus the marker type (`F`) describing how to project it
/// from a record.
pub struct IndexSlot<R, F: IndexField<R>> {
    tree: IndexTree<F::Key>,
    _marker: PhantomData<(R, F)>,
}

impl<R: Record, F: IndexField<R>> IndexSlot<R, F> {
    /// Opens this index's tree under `dir`.
    pub fn open(dir: impl AsRef<Path>, seqno: SequenceNumberCounter) -> GroveResult<Self> {
        let tree = IndexTree::open(dir, seqno, F::NAME)?;
        Ok(Self {
            tree,
            _marker: PhantomData,
        })
    }

    fn project(record: &R) -> Option<F::Key> {
        F::composite_key(record, record.timestamp())
    }

    /// Applies (I2): projects `record` and inserts its composite key if present.
    pub fn apply_insert(&self, record: &R) {
        if let Some(key) = Self::project(record) {
            self.tree.put(key);
        }
    }

    /// Retracts `record`'s composite key, if it projected one.
    pub fn apply_remove(&self, record: &R) {
        if let Some(key) = Self::project(record) {
            self.tree.remove(key);
        }
    }

    /// Applies spec.md §4.5 `update`'s per-index diff: compares `derive(old)`
    /// vs `derive(new)` as optionals and issues the remove-before-put.
    pub fn apply_diff(&self, old: &R, new: &R) {
        match (Self::project(old), Self::project(new)) {
            (None, None) => {}
            (Some(old_key), None) => self.tree.remove(old_key),
            (None, Some(new_key)) => self.tree.put(new_key),
            (Some(old_key), Some(new_key)) if old_key == new_key => {}
            (Some(old_key), Some(new_key)) => {
                self.tree.remove(old_key);
                self.tree.put(new_key);
            }
        }
    }

    /// Whether `record` currently has a live entry in this index.
    pub fn contains(&self, record: &R) -> GroveResult<bool> {
        match Self::project(record) {
            Some(key) => self.tree.contains(key),
            None => Ok(false),
        }
    }
}

impl<R: Record, F: IndexField<R>> TreePhases for IndexSlot<R, F> {
    fn name(&self) -> &'static str {
        F::NAME
    }

    fn open_phase(&self, callback: Box<dyn FnOnce() + Send>) {
        self.tree.open_phase(callback);
    }

    fn compact_io_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>) {
        self.tree.compact_io_phase(op, callback);
    }

    fn compact_cpu_phase(&self, op: u64) {
        self.tree.compact_cpu_phase(op);
    }

    fn checkpoint_phase(&self, op: u64, callback: Box<dyn FnOnce() + Send>) {
        self.tree.checkpoint_phase(op, callback);
    }
}

/// A fixed, compile-time-sized tuple of [`IndexSlot`]s for record type `R`.
///
/// Implemented for tuples `(IndexSlot<R, F0>,)` through 8-tuples by
/// [`impl_index_tuple`]; a Grove with more than eight indexes is outside
/// this crate's tested arity and should be split or have the macro
/// extended.
pub trait IndexTuple<R: Record>: Sized {
    /// Number of indexes in this tuple.
    const COUNT: usize;

    /// Opens every index tree, each under `dir.join(name)`.
    fn open_all(dir: &Path, seqno: SequenceNumberCounter) -> GroveResult<Self>;

    /// Projects and inserts `record` into every index that yields a value.
    fn put_all(&self, record: &R);

    /// Retracts `record` from every index it was present in.
    fn remove_all(&self, record: &R);

    /// Applies the per-index old/new diff for every index (spec.md §4.5 `update`).
    fn diff_update_all(&self, old: &R, new: &R);

    /// Borrows every index's phase surface, for Grove-level join fan-out.
    fn phases(&self) -> Vec<&dyn TreePhases>;

    /// Validates every index field (spec.md §7 "Configuration errors").
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] encountered, in declaration order.
    fn validate() -> Result<(), SchemaError>;
}

macro_rules! impl_index_tuple {
    ($(($field:ident, $idx:tt)),+ $(,)?) => {
        impl<R: Record, $($field: IndexField<R>),+> IndexTuple<R> for ($(IndexSlot<R, $field>,)+) {
            const COUNT: usize = 0usize $(+ impl_index_tuple!(@one $field))+;

            fn open_all(dir: &Path, seqno: SequenceNumberCounter) -> GroveResult<Self> {
                Ok((
                    $(IndexSlot::<R, $field>::open(dir.join($field::NAME), seqno.clone())?,)+
                ))
            }

            fn put_all(&self, record: &R) {
                $(self.$idx.apply_insert(record);)+
            }

            fn remove_all(&self, record: &R) {
                $(self.$idx.apply_remove(record);)+
            }

            fn diff_update_all(&self, old: &R, new: &R) {
                $(self.$idx.apply_diff(old, new);)+
            }

            fn phases(&self) -> Vec<&dyn TreePhases> {
                vec![$(&self.$idx as &dyn TreePhases),+]
            }

            fn validate() -> Result<(), SchemaError> {
                $($field::validate()?;)+
                Ok(())
            }
        }
    };
    (@one $field:ident) => { 1usize };
}

impl_index_tuple!((F0, 0));
impl_index_tuple!((F0, 0), (F1, 1));
impl_index_tuple!((F0, 0), (F1, 1), (F2, 2));
impl_index_tuple!((F0, 0), (F1, 1), (F2, 2), (F3, 3));
impl_index_tuple!((F0, 0), (F1, 1), (F2, 2), (F3, 3), (F4, 4));
impl_index_tuple!((F0, 0), (F1, 1), (F2, 2), (F3, 3), (F4, 4), (F5, 5));
impl_index_tuple!((F0, 0), (F1, 1), (F2, 2), (F3, 3), (F4, 4), (F5, 5), (F6, 6));
impl_index_tuple!(
    (F0, 0),
    (F1, 1),
    (F2, 2),
    (F3, 3),
    (F4, 4),
    (F5, 5),
    (F6, 6),
    (F7, 7)
);

/// Declares a record's schema and expands to the matching [`IndexTuple`]
/// type alias (spec.md §4 Design Notes "Compile-time schema → runtime
/// structure"; SPEC_FULL.md §6 "schema" module).
///
/// Fields listed in `fields { ... }` become direct indexes automatically —
/// the schema author does not hand-write an [`IndexField`] impl per field.
/// Tag a field `#[ignore]` to exclude it from indexing (spec.md §9's
/// resolution of the `ignored`/`ignore` Open Question: a field not in the
/// `ignore` set, and not the timestamp, is indexed implicitly). A
/// `derived { ... }` entry projects a value that is not itself a struct
/// field, via an arbitrary `Fn(&Record) -> Option<Value>` expression.
///
/// Because `macro_rules!` cannot synthesize identifiers, each entry names
/// its own marker type explicitly (`Marker => field: Type`) rather than
/// having one derived from the field's name; see DESIGN.md for why.
///
/// # Example
///
/// ```
/// use grove::{grove_schema, Record, TOMBSTONE_BIT};
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct Account {
///     timestamp: u64,
///     id: u128,
///     ledger: u32,
///     flags: u16,
/// }
///
/// impl Record for Account {
///     fn timestamp(&self) -> u64 {
///         self.timestamp
///     }
///     fn encode(&self) -> Vec<u8> {
///         let mut buf = self.timestamp.to_be_bytes().to_vec();
///         buf.extend_from_slice(&self.id.to_be_bytes());
///         buf.extend_from_slice(&self.ledger.to_be_bytes());
///         buf.extend_from_slice(&self.flags.to_be_bytes());
///         buf
///     }
///     fn decode(bytes: &[u8]) -> Self {
///         Self {
///             timestamp: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
///             id: u128::from_be_bytes(bytes[8..24].try_into().unwrap()),
///             ledger: u32::from_be_bytes(bytes[24..28].try_into().unwrap()),
///             flags: u16::from_be_bytes(bytes[28..30].try_into().unwrap()),
///         }
///     }
///     fn tombstone_from_key(timestamp: u64) -> Self {
///         Self { timestamp: timestamp | TOMBSTONE_BIT, id: 0, ledger: 0, flags: 0 }
///     }
/// }
///
/// const FLAG_TAGGED: u16 = 1;
///
/// grove_schema! {
///     record = Account,
///     indexes = AccountIndexes,
///     fields {
///         IdField => id: u128,
///         LedgerField => ledger: u32,
///         #[ignore]
///         flags: u16,
///     }
///     derived {
///         CategoryField => category: u32 = |r: &Account| {
///             if r.flags & FLAG_TAGGED == 0 { None } else { Some(5) }
///         },
///     }
/// }
///
/// // `AccountIndexes` is now `(IndexSlot<Account, IdField>,
/// //                           IndexSlot<Account, LedgerField>,
/// //                           IndexSlot<Account, CategoryField>)`.
/// ```
#[macro_export]
macro_rules! grove_schema {
    (
        record = $record:ty,
        indexes = $indexes:ident,
        fields { $($fields:tt)* }
        derived { $($derived:tt)* }
    ) => {
        $crate::__grove_schema_fields! {
            record = $record,
            indexes = $indexes,
            defs = {},
            members = [],
            fields = { $($fields)* },
            derived = { $($derived)* },
        }
    };
}

/// Munches the `fields { ... }` block of [`grove_schema`] one entry at a
/// time, then hands off to [`__grove_schema_derived`]. Not part of the
/// public API.
#[doc(hidden)]
#[macro_export]
macro_rules! __grove_schema_fields {
    (
        record = $record:ty,
        indexes = $indexes:ident,
        defs = { $($defs:tt)* },
        members = [ $($members:ident),* ],
        fields = {},
        derived = { $($derived:tt)* },
    ) => {
        $crate::__grove_schema_derived! {
            record = $record,
            indexes = $indexes,
            defs = { $($defs)* },
            members = [ $($members),* ],
            derived = { $($derived)* },
        }
    };

    (
        record = $record:ty,
        indexes = $indexes:ident,
        defs = { $($defs:tt)* },
        members = [ $($members:ident),* ],
        fields = { #[ignore] $field:ident : $ty:ty , $($rest:tt)* },
        derived = { $($derived:tt)* },
    ) => {
        $crate::__grove_schema_fields! {
            record = $record,
            indexes = $indexes,
            defs = { $($defs)* },
            members = [ $($members),* ],
            fields = { $($rest)* },
            derived = { $($derived)* },
        }
    };

    (
        record = $record:ty,
        indexes = $indexes:ident,
        defs = { $($defs:tt)* },
        members = [ $($members:ident),* ],
        fields = { $marker:ident => $field:ident : $ty:ty , $($rest:tt)* },
        derived = { $($derived:tt)* },
    ) => {
        $crate::__grove_schema_fields! {
            record = $record,
            indexes = $indexes,
            defs = {
                $($defs)*
                #[allow(non_camel_case_types, missing_docs)]
                struct $marker;

                impl $crate::IndexField<$record> for $marker {
                    type Value = $ty;
                    type Key = <$ty as $crate::DefaultKey>::Key;
                    const NAME: &'static str = stringify!($field);

                    fn derive(record: &$record) -> Option<$ty> {
                        Some(record.$field)
                    }
                }
            },
            members = [ $($members,)* $marker ],
            fields = { $($rest)* },
            derived = { $($derived)* },
        }
    };
}

/// Munches the `derived { ... }` block of [`grove_schema`], then emits every
/// generated `struct`/`impl` plus the final `IndexTuple` type alias. Not
/// part of the public API.
#[doc(hidden)]
#[macro_export]
macro_rules! __grove_schema_derived {
    (
        record = $record:ty,
        indexes = $indexes:ident,
        defs = { $($defs:tt)* },
        members = [ $($members:ident),* ],
        derived = {},
    ) => {
        $($defs)*

        #[allow(non_camel_case_types)]
        type $indexes = ( $($crate::IndexSlot<$record, $members>,)* );
    };

    (
        record = $record:ty,
        indexes = $indexes:ident,
        defs = { $($defs:tt)* },
        members = [ $($members:ident),* ],
        derived = { $marker:ident => $name:ident : $ty:ty = $derive_fn:expr , $($rest:tt)* },
    ) => {
        $crate::__grove_schema_derived! {
            record = $record,
            indexes = $indexes,
            defs = {
                $($defs)*
                #[allow(non_camel_case_types, missing_docs)]
                struct $marker;

                impl $crate::IndexField<$record> for $marker {
                    type Value = $ty;
                    type Key = <$ty as $crate::DefaultKey>::Key;
                    const NAME: &'static str = stringify!($name);

                    fn derive(record: &$record) -> Option<$ty> {
                        ($derive_fn)(record)
                    }
                }
            },
            members = [ $($members,)* $marker ],
            derived = { $($rest)* },
        }
    };
}
