//! Conversions between native Rust values and [`DynValue`].
//!
//! [`ToDynValue`] is the value-builder side: anything that converts into a
//! [`DynValue`] gets it for free. [`FromDynValue`] is the field-reader side
//! used by [`DynValue::decode`]; it walks the tree structurally and applies
//! the exactness rules of the numeric accessors at every leaf.
//!
//! Structured types implement [`FromDynValue`] by reading their fields with
//! [`DynValue::decode_field`]:
//!
//! ```
//! use polystore_value::{DynValue, FromDynValue, ValueError};
//!
//! struct Account {
//!     name: String,
//!     balance: i64,
//!     nickname: Option<String>,
//! }
//!
//! impl FromDynValue for Account {
//!     fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
//!         Ok(Self {
//!             name: value.decode_field("name")?,
//!             balance: value.decode_field("balance")?,
//!             nickname: value.decode_field("nickname")?,
//!         })
//!     }
//! }
//!
//! let mut row = DynValue::Null;
//! row.set("name", "alice");
//! row.set("balance", 10_i64);
//! let account: Account = row.decode().unwrap();
//! assert_eq!(account.balance, 10);
//! assert!(account.nickname.is_none());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::date::DateComponents;
use crate::error::ValueError;
use crate::object_id::ObjectId;
use crate::scalar::{Regex, Timestamp};
use crate::value::DynValue;

/// A value that can be represented as a [`DynValue`].
pub trait ToDynValue {
    /// Build the dynamic representation of `self`.
    fn to_dyn_value(&self) -> DynValue;
}

impl<T: Clone + Into<DynValue>> ToDynValue for T {
    fn to_dyn_value(&self) -> DynValue {
        self.clone().into()
    }
}

/// A value that can be reconstructed from a [`DynValue`].
pub trait FromDynValue: Sized {
    /// Decode `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::ValueNotFound`] for `Null` where a value is
    /// required and [`ValueError::UnsupportedType`] for shape or range
    /// mismatches.
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError>;
}

impl DynValue {
    /// Decode this value into `T`.
    ///
    /// # Errors
    ///
    /// See [`FromDynValue::from_dyn_value`].
    pub fn decode<T: FromDynValue>(&self) -> Result<T, ValueError> {
        T::from_dyn_value(self)
    }

    /// Decode the entry at `key`, reporting errors under that key.
    ///
    /// # Errors
    ///
    /// See [`FromDynValue::from_dyn_value`].
    pub fn decode_field<T: FromDynValue>(&self, key: &str) -> Result<T, ValueError> {
        T::from_dyn_value(self.get(key)).map_err(|e| e.at(key))
    }
}

/// Reject `Null` as missing and any other kind as a type mismatch.
fn mismatch(value: &DynValue, expected: &'static str) -> ValueError {
    if value.is_null() {
        ValueError::ValueNotFound(String::new())
    } else {
        ValueError::unsupported(expected, value.kind().name())
    }
}

// =============================================================================
// Native -> DynValue
// =============================================================================

macro_rules! from_signed {
    ($($ty:ty),*) => {$(
        impl From<$ty> for DynValue {
            fn from(value: $ty) -> Self {
                Self::SignedInt(i64::from(value))
            }
        }
    )*};
}

macro_rules! from_unsigned {
    ($($ty:ty),*) => {$(
        impl From<$ty> for DynValue {
            fn from(value: $ty) -> Self {
                Self::UnsignedInt(u64::from(value))
            }
        }
    )*};
}

from_signed!(i8, i16, i32, i64);
from_unsigned!(u8, u16, u32, u64);

impl From<bool> for DynValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for DynValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for DynValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for DynValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for DynValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Decimal> for DynValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<Uuid> for DynValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<ObjectId> for DynValue {
    fn from(value: ObjectId) -> Self {
        Self::ObjectId(value)
    }
}

impl From<DateTime<Utc>> for DynValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDate> for DynValue {
    fn from(value: NaiveDate) -> Self {
        Self::DateComponents(DateComponents::from_date(value))
    }
}

impl From<NaiveTime> for DynValue {
    fn from(value: NaiveTime) -> Self {
        Self::DateComponents(DateComponents::from_time(value))
    }
}

impl From<NaiveDateTime> for DynValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateComponents(DateComponents::from_date_time(value))
    }
}

impl From<DateComponents> for DynValue {
    fn from(value: DateComponents) -> Self {
        Self::DateComponents(value)
    }
}

impl From<Timestamp> for DynValue {
    fn from(value: Timestamp) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Regex> for DynValue {
    fn from(value: Regex) -> Self {
        Self::Regex(value)
    }
}

impl From<&[u8]> for DynValue {
    fn from(value: &[u8]) -> Self {
        Self::Binary(value.to_vec())
    }
}

impl<T: Into<Self>> From<Option<T>> for DynValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for DynValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<BTreeMap<String, T>> for DynValue {
    fn from(map: BTreeMap<String, T>) -> Self {
        Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Self>, S: BuildHasher> From<HashMap<String, T, S>> for DynValue {
    fn from(map: HashMap<String, T, S>) -> Self {
        Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Self>> FromIterator<(K, V)> for DynValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// DynValue -> Native
// =============================================================================

impl FromDynValue for DynValue {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

macro_rules! decode_via {
    ($($ty:ty => $accessor:ident, $name:literal;)*) => {$(
        impl FromDynValue for $ty {
            fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
                value.$accessor().ok_or_else(|| mismatch(value, $name))
            }
        }
    )*};
}

decode_via! {
    bool => as_bool, "bool";
    i8 => as_i8, "i8";
    i16 => as_i16, "i16";
    i32 => as_i32, "i32";
    i64 => as_i64, "i64";
    u8 => as_u8, "u8";
    u16 => as_u16, "u16";
    u32 => as_u32, "u32";
    u64 => as_u64, "u64";
    f32 => as_f32, "f32";
    f64 => as_f64, "f64";
    Decimal => as_decimal, "decimal";
    Uuid => as_uuid, "uuid";
    ObjectId => as_object_id, "object id";
    DateTime<Utc> => as_date, "date";
    DateComponents => as_date_components, "date components";
}

impl FromDynValue for String {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch(value, "string"))
    }
}

impl FromDynValue for NaiveDate {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        value
            .as_date_components()
            .and_then(|c| c.date())
            .ok_or_else(|| mismatch(value, "date"))
    }
}

impl FromDynValue for NaiveTime {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        value
            .as_date_components()
            .and_then(|c| c.time())
            .ok_or_else(|| mismatch(value, "time"))
    }
}

impl FromDynValue for NaiveDateTime {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        value
            .as_date_components()
            .and_then(|c| c.date_time())
            .ok_or_else(|| mismatch(value, "date time"))
    }
}

impl FromDynValue for Timestamp {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        match value {
            DynValue::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch(other, "timestamp")),
        }
    }
}

impl FromDynValue for Regex {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        match value {
            DynValue::Regex(regex) => Ok(regex.clone()),
            other => Err(mismatch(other, "regex")),
        }
    }
}

impl<T: FromDynValue> FromDynValue for Option<T> {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_dyn_value(value).map(Some)
        }
    }
}

impl<T: FromDynValue> FromDynValue for Vec<T> {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        match value {
            DynValue::Array(values) => values
                .iter()
                .enumerate()
                .map(|(i, v)| T::from_dyn_value(v).map_err(|e| e.at(&i.to_string())))
                .collect(),
            // Binary payloads decode element-wise so `Vec<u8>` reads bytes.
            DynValue::Binary(bytes) => bytes
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    T::from_dyn_value(&DynValue::UnsignedInt(u64::from(*b)))
                        .map_err(|e| e.at(&i.to_string()))
                })
                .collect(),
            other => Err(mismatch(other, "array")),
        }
    }
}

impl<T: FromDynValue> FromDynValue for BTreeMap<String, T> {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        match value {
            DynValue::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_dyn_value(v).map_err(|e| e.at(k))?)))
                .collect(),
            other => Err(mismatch(other, "object")),
        }
    }
}

impl<T: FromDynValue, S: BuildHasher + Default> FromDynValue for HashMap<String, T, S> {
    fn from_dyn_value(value: &DynValue) -> Result<Self, ValueError> {
        match value {
            DynValue::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_dyn_value(v).map_err(|e| e.at(k))?)))
                .collect(),
            other => Err(mismatch(other, "object")),
        }
    }
}
