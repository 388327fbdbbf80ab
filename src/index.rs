// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-index field projection (spec.md §4.2).

use crate::composite_key::CompositeKey;
use crate::error::SchemaError;

/// A field value that can be normalized into a composite-key payload.
///
/// Implemented for every unsigned integer width up to 128 bits and for
/// `#[repr(uN)]` enums via their tag (spec.md §3: "Every index field is
/// constrained to be an unsigned integer or an enum with an unsigned tag, of
/// bit-width ≤ 128"). Implementations for signed integers are provided too,
/// purely so [`IndexField::validate`] can reject them with a proper
/// [`SchemaError`] instead of the field simply failing to compile — the
/// rejection is part of the documented composition-time contract, not an
/// accident of the type system.
pub trait IndexPayload: Copy {
    /// Bit width of the field's native representation.
    const BITS: u32;

    /// Whether the native representation is a signed integer.
    const SIGNED: bool;

    /// Widens (or extracts the tag of) the value into a 128-bit payload.
    fn to_key128(self) -> u128;
}

macro_rules! impl_unsigned_payload {
    ($($ty:ty => $bits:expr),* $(,)?) => {
        $(
            impl IndexPayload for $ty {
                const BITS: u32 = $bits;
                const SIGNED: bool = false;

                fn to_key128(self) -> u128 {
                    self as u128
                }
            }
        )*
    };
}

macro_rules! impl_signed_payload {
    ($($ty:ty => $bits:expr),* $(,)?) => {
        $(
            impl IndexPayload for $ty {
                const BITS: u32 = $bits;
                const SIGNED: bool = true;

                fn to_key128(self) -> u128 {
                    self as u128
                }
            }
        )*
    };
}

impl_unsigned_payload!(u8 => 8, u16 => 16, u32 => 32, u64 => 64, u128 => 128);
impl_signed_payload!(i8 => 8, i16 => 16, i32 => 32, i64 => 64, i128 => 128);

/// Maps a field's native Rust integer type to the composite-key width it
/// normalizes to (spec.md §3: "Widths ≤ 64 bits normalize to a 64-bit
/// composite-key payload; widths in (64, 128] normalize to 128 bits").
///
/// Lets [`crate::grove_schema`] pick `Key64`/`Key128` for a direct or
/// derived field without the schema author spelling it out field-by-field.
pub trait DefaultKey: IndexPayload {
    /// The composite-key type this value's width normalizes to.
    type Key: CompositeKey;
}

macro_rules! impl_default_key {
    ($key:ty; $($ty:ty),* $(,)?) => {
        $(impl DefaultKey for $ty { type Key = $key; })*
    };
}

impl_default_key!(crate::composite_key::Key64; u8, u16, u32, u64);
impl_default_key!(crate::composite_key::Key128; u128);

/// Per-index-field projection, built once at schema composition time.
///
/// `R` is the record type; the associated `Key` is the normalized composite
/// key this field's index tree is keyed by ([`crate::Key64`] for widths ≤
/// 64 bits, [`crate::Key128`] for widths in `(64, 128]`, chosen by the
/// schema author per spec.md §3).
pub trait IndexField<R> {
    /// The field's typed value (before widening/tag extraction).
    type Value: IndexPayload;

    /// The normalized composite-key type this field's index tree uses.
    type Key: CompositeKey;

    /// Name used in logging and in the tree-identity digest.
    const NAME: &'static str;

    /// Extracts the field's value from a record.
    ///
    /// For a direct field this is `Some(record.field)`; for a derived field
    /// it is the result of the schema's derivation function, which may
    /// legitimately return `None` (absence is distinct from a zero value,
    /// per spec.md §9 "Absence vs. zero for derived indexes").
    fn derive(record: &R) -> Option<Self::Value>;

    /// Builds this field's composite key for `record`, if the field is present.
    fn composite_key(record: &R, timestamp: u64) -> Option<Self::Key> {
        Self::derive(record).map(|v| {
            let payload = Self::Key::narrow(v.to_key128());
            Self::Key::new(payload, timestamp)
        })
    }

    /// Validates that this field is a legal index field (spec.md §3, §7).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnsupportedFieldWidth`] if the field's native
    /// representation is signed or wider than 128 bits.
    fn validate() -> Result<(), SchemaError> {
        if Self::Value::SIGNED || Self::Value::BITS > 128 {
            return Err(SchemaError::UnsupportedFieldWidth {
                field: Self::NAME,
                bits: Self::Value::BITS,
            });
        }
        Ok(())
    }
}
