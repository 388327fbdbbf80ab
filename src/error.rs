// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Error types for schema composition, Grove construction and Forest construction.

/// Represents a build-time schema composition error (spec.md §7 "Configuration errors").
#[derive(Debug)]
pub enum SchemaError {
    /// An index field's underlying type does not fit the composite-key payload widths.
    ///
    /// Carries the field name and the offending bit width.
    UnsupportedFieldWidth {
        /// The field (or derived field) name.
        field: &'static str,
        /// The bit width that was rejected (> 128, or not an integer/enum tag).
        bits: u32,
    },

    /// The record type's `timestamp` field is missing or not exactly 64 bits wide.
    MissingOrMisSizedTimestamp,

    /// Two trees in the same Forest produced colliding 128-bit identity digests.
    DigestCollision {
        /// The first tree name involved in the collision.
        first: String,
        /// The second tree name involved in the collision.
        second: String,
    },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFieldWidth { field, bits } => {
                write!(f, "index field {field:?} has unsupported width {bits} bits")
            }
            Self::MissingOrMisSizedTimestamp => {
                write!(f, "record is missing a 64-bit `timestamp` field")
            }
            Self::DigestCollision { first, second } => {
                write!(f, "tree identity digest collision between {first:?} and {second:?}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Errors that can occur while constructing a [`crate::Grove`].
#[derive(Debug)]
pub enum GroveError {
    /// The underlying object or index tree failed to open.
    Tree(lsm_tree::Error),

    /// The value cache could not be allocated at the requested capacity.
    CacheAllocation,

    /// A schema composition error surfaced at Grove construction time.
    Schema(SchemaError),
}

impl std::fmt::Display for GroveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroveError: {self:?}")
    }
}

impl std::error::Error for GroveError {}

impl From<lsm_tree::Error> for GroveError {
    fn from(value: lsm_tree::Error) -> Self {
        Self::Tree(value)
    }
}

impl From<SchemaError> for GroveError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Errors that can occur while constructing a [`crate::Forest`].
#[derive(Debug)]
pub enum ForestError {
    /// A Grove failed to construct; its index in the schema-declared order is included.
    Grove {
        /// The zero-based position of the failing Grove in declaration order.
        index: usize,
        /// The underlying construction error.
        source: GroveError,
    },

    /// The node pool could not be allocated with the requested node count.
    NodePoolAllocation,

    /// Two trees across the Forest's Groves share a schema identity digest.
    Schema(SchemaError),
}

impl std::fmt::Display for ForestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ForestError: {self:?}")
    }
}

impl std::error::Error for ForestError {}

impl From<SchemaError> for ForestError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Grove-level result.
pub type GroveResult<T> = std::result::Result<T, GroveError>;

/// Forest-level result.
pub type ForestResult<T> = std::result::Result<T, ForestError>;
