//! The [`DynValue`] sum type.
//!
//! # Equality classes
//!
//! Two values are equal only when they belong to the same class:
//!
//! | Class | Variants |
//! |-------|----------|
//! | integer | `SignedInt`, `UnsignedInt` (compared by mathematical value) |
//! | float | `Float` (`-0.0 == 0.0`, all NaNs equal) |
//! | decimal | `Decimal` (scale-insensitive) |
//! | every other variant | itself |
//!
//! `SignedInt(1)` and `Float(1.0)` are therefore different values. Bind
//! deduplication and predicate folding both rely on this, and [`Hash`] is
//! consistent with it.
//!
//! # Exact accessors
//!
//! Numeric accessors never truncate, wrap, or round. A conversion that
//! cannot represent the value exactly returns `None`.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::date::DateComponents;
use crate::object_id::ObjectId;
use crate::scalar::{Regex, Timestamp};

/// Shared `Null` returned by out-of-range reads.
static NULL: DynValue = DynValue::Null;

/// Largest float magnitude that still fits an `i128` exactly.
const I128_FLOAT_BOUND: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

/// A dynamic, backend-neutral value.
#[derive(Debug, Clone, Default)]
pub enum DynValue {
    /// Absent / no value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    String(String),
    /// Regular expression (document stores).
    Regex(Regex),
    /// Signed 64-bit integer.
    SignedInt(i64),
    /// Unsigned 64-bit integer.
    UnsignedInt(u64),
    /// IEEE-754 double.
    Float(f64),
    /// Fixed-point decimal.
    Decimal(Decimal),
    /// An instant in time.
    Date(DateTime<Utc>),
    /// A civil date and/or time.
    DateComponents(DateComponents),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// 12-byte document identifier.
    ObjectId(ObjectId),
    /// Replication timestamp.
    Timestamp(Timestamp),
    /// Ordered list.
    Array(Vec<Self>),
    /// String-keyed map.
    Object(BTreeMap<String, Self>),
}

/// The kind of a [`DynValue`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`DynValue::Null`]
    Null,
    /// [`DynValue::Bool`]
    Bool,
    /// [`DynValue::String`]
    String,
    /// [`DynValue::Regex`]
    Regex,
    /// [`DynValue::SignedInt`]
    SignedInt,
    /// [`DynValue::UnsignedInt`]
    UnsignedInt,
    /// [`DynValue::Float`]
    Float,
    /// [`DynValue::Decimal`]
    Decimal,
    /// [`DynValue::Date`]
    Date,
    /// [`DynValue::DateComponents`]
    DateComponents,
    /// [`DynValue::Binary`]
    Binary,
    /// [`DynValue::Uuid`]
    Uuid,
    /// [`DynValue::ObjectId`]
    ObjectId,
    /// [`DynValue::Timestamp`]
    Timestamp,
    /// [`DynValue::Array`]
    Array,
    /// [`DynValue::Object`]
    Object,
}

impl ValueKind {
    /// Lower-case name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Regex => "regex",
            Self::SignedInt => "signed integer",
            Self::UnsignedInt => "unsigned integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::DateComponents => "date components",
            Self::Binary => "binary",
            Self::Uuid => "uuid",
            Self::ObjectId => "object id",
            Self::Timestamp => "timestamp",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl DynValue {
    /// The kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::String(_) => ValueKind::String,
            Self::Regex(_) => ValueKind::Regex,
            Self::SignedInt(_) => ValueKind::SignedInt,
            Self::UnsignedInt(_) => ValueKind::UnsignedInt,
            Self::Float(_) => ValueKind::Float,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Date(_) => ValueKind::Date,
            Self::DateComponents(_) => ValueKind::DateComponents,
            Self::Binary(_) => ValueKind::Binary,
            Self::Uuid(_) => ValueKind::Uuid,
            Self::ObjectId(_) => ValueKind::ObjectId,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Whether this is [`DynValue::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is a signed or unsigned integer, float, or decimal.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SignedInt(_) | Self::UnsignedInt(_) | Self::Float(_) | Self::Decimal(_)
        )
    }

    // =========================================================================
    // Scalar accessors
    // =========================================================================

    /// Boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Borrowed string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Borrowed bytes of a binary value.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(value) => Some(value),
            _ => None,
        }
    }

    /// Borrowed array elements.
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Borrowed object entries.
    pub const fn as_object(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// UUID value, parsing strings and 16-byte binaries.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(value) => Some(*value),
            Self::String(value) => Uuid::parse_str(value).ok(),
            Self::Binary(bytes) => Uuid::from_slice(bytes).ok(),
            _ => None,
        }
    }

    /// Object identifier, parsing 24-digit hex strings.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Self::ObjectId(value) => Some(*value),
            Self::String(value) => ObjectId::parse_str(value).ok(),
            _ => None,
        }
    }

    /// Instant value; date components convert only when they carry a full
    /// date, time and offset, strings only when they parse as such.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(value) => Some(*value),
            Self::DateComponents(components) => {
                components.instant().map(|value| value.with_timezone(&Utc))
            }
            Self::String(value) => DateComponents::parse(value)
                .ok()?
                .instant()
                .map(|value| value.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Civil date components; strings are parsed.
    pub fn as_date_components(&self) -> Option<DateComponents> {
        match self {
            Self::DateComponents(value) => Some(*value),
            Self::Date(value) => Some(DateComponents::from_fixed(value.fixed_offset())),
            Self::String(value) => DateComponents::parse(value).ok(),
            _ => None,
        }
    }

    // =========================================================================
    // Exact numeric accessors
    // =========================================================================

    /// The value as an exact integer, widened to `i128`.
    ///
    /// Floats and decimals qualify only when integral and in range; strings
    /// are parsed and then subject to the same rule.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Self::SignedInt(value) => Some(i128::from(*value)),
            Self::UnsignedInt(value) => Some(i128::from(*value)),
            Self::Float(value) => float_to_i128(*value),
            Self::Decimal(value) => decimal_to_i128(*value),
            Self::String(text) => parse_integer(text),
            _ => None,
        }
    }

    /// Exact `i8`.
    pub fn as_i8(&self) -> Option<i8> {
        i8::try_from(self.as_integer()?).ok()
    }

    /// Exact `i16`.
    pub fn as_i16(&self) -> Option<i16> {
        i16::try_from(self.as_integer()?).ok()
    }

    /// Exact `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        i32::try_from(self.as_integer()?).ok()
    }

    /// Exact `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        i64::try_from(self.as_integer()?).ok()
    }

    /// Exact `u8`.
    pub fn as_u8(&self) -> Option<u8> {
        u8::try_from(self.as_integer()?).ok()
    }

    /// Exact `u16`.
    pub fn as_u16(&self) -> Option<u16> {
        u16::try_from(self.as_integer()?).ok()
    }

    /// Exact `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        u32::try_from(self.as_integer()?).ok()
    }

    /// Exact `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        u64::try_from(self.as_integer()?).ok()
    }

    /// Exact `f64`.
    ///
    /// Integers qualify when they survive the round trip through `f64`;
    /// decimals when their shortest float representation reads back as the
    /// same decimal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::SignedInt(value) => integer_to_f64(i128::from(*value)),
            Self::UnsignedInt(value) => integer_to_f64(i128::from(*value)),
            Self::Decimal(value) => decimal_to_f64(*value),
            Self::String(text) => {
                if let Some(integer) = parse_integer(text) {
                    integer_to_f64(integer)
                } else if let Some(decimal) = parse_decimal(text) {
                    decimal_to_f64(decimal)
                } else {
                    text.trim().parse::<f64>().ok()
                }
            }
            _ => None,
        }
    }

    /// Exact `f32`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_f32(&self) -> Option<f32> {
        let wide = self.as_f64()?;
        let narrow = wide as f32;
        (f64::from(narrow).to_bits() == wide.to_bits() || wide.is_nan()).then_some(narrow)
    }

    /// Exact decimal.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(value) => Some(*value),
            Self::SignedInt(value) => Some(Decimal::from(*value)),
            Self::UnsignedInt(value) => Some(Decimal::from(*value)),
            Self::Float(value) => float_to_decimal(*value),
            Self::String(text) => parse_decimal(text),
            _ => None,
        }
    }

    // =========================================================================
    // Indexing
    // =========================================================================

    /// Read the entry at `key`; `Null` when absent or not an object.
    pub fn get(&self, key: &str) -> &Self {
        match self {
            Self::Object(map) => map.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Read the element at `index`; `Null` when past the end or not an array.
    pub fn at(&self, index: usize) -> &Self {
        match self {
            Self::Array(values) => values.get(index).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Read a dotted path such as `items.2.price`.
    ///
    /// Numeric segments index arrays; every other segment indexes objects.
    pub fn get_path(&self, path: &str) -> &Self {
        path.split('.').fold(self, |current, segment| match current {
            Self::Array(_) => segment
                .parse::<usize>()
                .map_or(&NULL, |index| current.at(index)),
            _ => current.get(segment),
        })
    }

    /// Write the entry at `key`.
    ///
    /// A non-object value is replaced by a new single-entry object.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Self>) {
        if let Self::Object(map) = self {
            map.insert(key.into(), value.into());
        } else {
            *self = Self::Object(BTreeMap::from([(key.into(), value.into())]));
        }
    }

    /// Write the element at `index`, padding with `Null` past the end.
    ///
    /// A non-array value is replaced by a new array.
    pub fn set_at(&mut self, index: usize, value: impl Into<Self>) {
        if !matches!(self, Self::Array(_)) {
            *self = Self::Array(Vec::new());
        }
        if let Self::Array(values) = self {
            if values.len() <= index {
                values.resize(index.saturating_add(1), Self::Null);
            }
            if let Some(slot) = values.get_mut(index) {
                *slot = value.into();
            }
        }
    }

    /// Number of elements or entries; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Self::Array(values) => values.len(),
            Self::Object(map) => map.len(),
            _ => 0,
        }
    }

    /// Whether [`DynValue::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::ops::Index<&str> for DynValue {
    type Output = Self;

    fn index(&self, key: &str) -> &Self::Output {
        self.get(key)
    }
}

impl std::ops::Index<usize> for DynValue {
    type Output = Self;

    fn index(&self, index: usize) -> &Self::Output {
        self.at(index)
    }
}

// =============================================================================
// Equality and hashing
// =============================================================================

impl DynValue {
    /// Whether both values have the same kind and the same exact payload.
    ///
    /// Stricter than `==`: `SignedInt(5)` and `UnsignedInt(5)` differ here,
    /// as do `0.0` and `-0.0`, and decimals of different scale.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) => a.serialize() == b.serialize(),
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_identical(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.is_identical(vb))
            }
            _ => self.kind() == other.kind() && self == other,
        }
    }
}

impl PartialEq for DynValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a == b,
            (Self::SignedInt(a), Self::SignedInt(b)) => a == b,
            (Self::UnsignedInt(a), Self::UnsignedInt(b)) => a == b,
            (Self::SignedInt(a), Self::UnsignedInt(b))
            | (Self::UnsignedInt(b), Self::SignedInt(a)) => i128::from(*a) == i128::from(*b),
            (Self::Float(a), Self::Float(b)) => float_key(*a) == float_key(*b),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::DateComponents(a), Self::DateComponents(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::ObjectId(a), Self::ObjectId(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DynValue {}

impl Hash for DynValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0_u8.hash(state),
            Self::Bool(value) => {
                1_u8.hash(state);
                value.hash(state);
            }
            Self::String(value) => {
                2_u8.hash(state);
                value.hash(state);
            }
            Self::Regex(value) => {
                3_u8.hash(state);
                value.hash(state);
            }
            // Signed and unsigned share one class.
            Self::SignedInt(value) => {
                4_u8.hash(state);
                i128::from(*value).hash(state);
            }
            Self::UnsignedInt(value) => {
                4_u8.hash(state);
                i128::from(*value).hash(state);
            }
            Self::Float(value) => {
                5_u8.hash(state);
                float_key(*value).hash(state);
            }
            Self::Decimal(value) => {
                6_u8.hash(state);
                value.normalize().hash(state);
            }
            Self::Date(value) => {
                7_u8.hash(state);
                value.hash(state);
            }
            Self::DateComponents(value) => {
                8_u8.hash(state);
                value.hash(state);
            }
            Self::Binary(value) => {
                9_u8.hash(state);
                value.hash(state);
            }
            Self::Uuid(value) => {
                10_u8.hash(state);
                value.hash(state);
            }
            Self::ObjectId(value) => {
                11_u8.hash(state);
                value.hash(state);
            }
            Self::Timestamp(value) => {
                12_u8.hash(state);
                value.hash(state);
            }
            Self::Array(values) => {
                13_u8.hash(state);
                values.hash(state);
            }
            Self::Object(map) => {
                14_u8.hash(state);
                map.hash(state);
            }
        }
    }
}

/// Bit pattern used for float equality: `-0.0` folds into `0.0`, every NaN
/// into the canonical NaN.
fn float_key(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value.abs().to_bits() == 0 {
        0
    } else {
        value.to_bits()
    }
}

// =============================================================================
// Exact conversion helpers
// =============================================================================

#[allow(clippy::cast_possible_truncation)]
fn float_to_i128(value: f64) -> Option<i128> {
    if !value.is_finite() || value.trunc().to_bits() != value.to_bits() {
        return None;
    }
    if value < -I128_FLOAT_BOUND || value >= I128_FLOAT_BOUND {
        return None;
    }
    Some(value as i128)
}

fn decimal_to_i128(value: Decimal) -> Option<i128> {
    if value.fract().is_zero() {
        value.to_i128()
    } else {
        None
    }
}

#[allow(clippy::cast_precision_loss)]
fn integer_to_f64(value: i128) -> Option<f64> {
    let float = value as f64;
    (float_to_i128(float) == Some(value)).then_some(float)
}

fn decimal_to_f64(value: Decimal) -> Option<f64> {
    let float = value.to_f64()?;
    (float_to_decimal(float) == Some(value)).then_some(float)
}

fn float_to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    // `Display` for f64 yields the shortest representation that reads back
    // as the same float, without exponent notation.
    Decimal::from_str_exact(&value.to_string()).ok()
}

fn parse_integer(text: &str) -> Option<i128> {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i128>() {
        return Some(value);
    }
    parse_decimal(trimmed).and_then(decimal_to_i128)
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    // `from_str_exact` refuses inputs that would need rounding.
    Decimal::from_str_exact(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(value: &DynValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn integers_compare_across_signedness() {
        assert_eq!(DynValue::SignedInt(7), DynValue::UnsignedInt(7));
        assert_eq!(
            hash_of(&DynValue::SignedInt(7)),
            hash_of(&DynValue::UnsignedInt(7))
        );
        assert_ne!(DynValue::SignedInt(-1), DynValue::UnsignedInt(u64::MAX));
    }

    #[test]
    fn different_classes_are_never_equal() {
        assert_ne!(DynValue::SignedInt(1), DynValue::Float(1.0));
        assert_ne!(DynValue::SignedInt(1), DynValue::Decimal(Decimal::ONE));
        assert_ne!(DynValue::String("1".to_owned()), DynValue::SignedInt(1));
        assert_ne!(DynValue::Null, DynValue::Bool(false));
    }

    #[test]
    fn float_equality_folds_signed_zero_and_nan() {
        assert_eq!(DynValue::Float(0.0), DynValue::Float(-0.0));
        assert_eq!(DynValue::Float(f64::NAN), DynValue::Float(f64::NAN));
        assert_eq!(
            hash_of(&DynValue::Float(0.0)),
            hash_of(&DynValue::Float(-0.0))
        );
    }

    #[test]
    fn decimals_ignore_scale() {
        let a = DynValue::Decimal(Decimal::new(10, 1));
        let b = DynValue::Decimal(Decimal::new(100, 2));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn identical_values_keep_kind_sign_and_scale() {
        assert!(DynValue::SignedInt(5).is_identical(&DynValue::SignedInt(5)));
        assert!(!DynValue::SignedInt(5).is_identical(&DynValue::UnsignedInt(5)));
        assert!(!DynValue::Float(0.0).is_identical(&DynValue::Float(-0.0)));
        assert!(
            !DynValue::Decimal(Decimal::new(10, 1))
                .is_identical(&DynValue::Decimal(Decimal::new(100, 2)))
        );
        let nested = DynValue::Array(vec![DynValue::SignedInt(1)]);
        assert!(nested.is_identical(&nested.clone()));
        assert!(!nested.is_identical(&DynValue::Array(vec![DynValue::UnsignedInt(1)])));
    }

    #[test]
    fn float_to_integer_is_exact_only() {
        assert_eq!(DynValue::Float(1.5).as_i64(), None);
        assert_eq!(DynValue::Float(2.0).as_i64(), Some(2));
        assert_eq!(DynValue::Float(f64::INFINITY).as_i64(), None);
        assert_eq!(DynValue::Float(1e20).as_i64(), None);
        assert_eq!(DynValue::Float(-1.0).as_u64(), None);
    }

    #[test]
    fn integer_narrowing_never_wraps() {
        assert_eq!(DynValue::UnsignedInt(u64::MAX).as_i64(), None);
        assert_eq!(DynValue::SignedInt(300).as_u8(), None);
        assert_eq!(DynValue::SignedInt(-129).as_i8(), None);
        assert_eq!(DynValue::SignedInt(-128).as_i8(), Some(-128));
        assert_eq!(DynValue::UnsignedInt(255).as_u8(), Some(255));
    }

    #[test]
    fn integer_to_float_requires_round_trip() {
        assert_eq!(DynValue::SignedInt(1 << 53).as_f64(), Some(9_007_199_254_740_992.0));
        assert_eq!(DynValue::SignedInt((1 << 53) + 1).as_f64(), None);
        assert_eq!(DynValue::SignedInt(i64::MAX).as_f64(), None);
    }

    #[test]
    fn decimal_accessors() {
        let exact = DynValue::Decimal(Decimal::new(250, 2));
        assert_eq!(exact.as_i32(), None);
        assert_eq!(exact.as_f64(), Some(2.5));
        assert_eq!(DynValue::Decimal(Decimal::new(300, 2)).as_i32(), Some(3));
        assert_eq!(DynValue::Float(0.1).as_decimal(), Some(Decimal::new(1, 1)));
        assert_eq!(DynValue::Float(f64::NAN).as_decimal(), None);
    }

    #[test]
    fn string_accessors_parse_then_apply_exactness() {
        let text = |s: &str| DynValue::String(s.to_owned());
        assert_eq!(text("42").as_u8(), Some(42));
        assert_eq!(text("4.0").as_i64(), Some(4));
        assert_eq!(text("4.5").as_i64(), None);
        assert_eq!(text("9007199254740993").as_f64(), None);
        assert_eq!(text("0.25").as_f64(), Some(0.25));
        assert_eq!(text("12.50").as_decimal(), Some(Decimal::new(1250, 2)));
        assert_eq!(text("abc").as_i64(), None);
    }

    #[test]
    fn f32_accessor_rejects_precision_loss() {
        assert_eq!(DynValue::Float(0.5).as_f32(), Some(0.5));
        assert_eq!(DynValue::Float(0.1).as_f32(), None);
    }

    #[test]
    fn out_of_range_reads_are_null() {
        let array = DynValue::Array(vec![DynValue::SignedInt(1)]);
        assert!(array.at(5).is_null());
        assert!(array.get("key").is_null());
        assert!(DynValue::Null["missing"].is_null());
    }

    #[test]
    fn set_at_pads_with_null() {
        let mut array = DynValue::Array(vec![DynValue::SignedInt(1)]);
        array.set_at(3, 9_i64);
        assert_eq!(array.len(), 4);
        assert!(array[1].is_null());
        assert!(array[2].is_null());
        assert_eq!(array[3], DynValue::SignedInt(9));
    }

    #[test]
    fn set_rebuilds_non_objects() {
        let mut value = DynValue::SignedInt(3);
        value.set("a", "x");
        assert_eq!(value["a"], DynValue::String("x".to_owned()));
        assert_eq!(value.len(), 1);
    }

    #[test]
    fn get_path_walks_objects_and_arrays() {
        let mut item = DynValue::Null;
        item.set("price", 12_i64);
        let mut root = DynValue::Null;
        root.set("items", DynValue::Array(vec![DynValue::Null, item]));
        assert_eq!(root.get_path("items.1.price"), &DynValue::SignedInt(12));
        assert!(root.get_path("items.7.price").is_null());
        assert!(root.get_path("items.x").is_null());
    }

    #[test]
    fn uuid_accessor_parses_strings() {
        let id = Uuid::now_v7();
        assert_eq!(DynValue::String(id.to_string()).as_uuid(), Some(id));
        assert_eq!(DynValue::Binary(id.as_bytes().to_vec()).as_uuid(), Some(id));
    }
}
