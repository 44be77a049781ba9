//! JSON bridge for [`DynValue`].
//!
//! Two encodings are provided:
//!
//! - **Extended** ([`DynValue::to_json`]): lossless. Kinds JSON cannot express
//!   natively are wrapped in single-key marker objects (`{"$oid": ...}`,
//!   `{"$decimal": ...}`, ...). [`DynValue::from_json`] recognises the
//!   markers, so the round trip is exact. This is also the `serde` form.
//! - **Plain** ([`DynValue::to_plain_json`]): what a JSON column should hold.
//!   Non-native kinds become strings and the round trip is not exact.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::date::DateComponents;
use crate::object_id::ObjectId;
use crate::scalar::{Regex, Timestamp};
use crate::value::DynValue;

impl DynValue {
    /// Lossless extended-JSON encoding.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::String(value) => Value::String(value.clone()),
            Self::SignedInt(value) => Value::Number(Number::from(*value)),
            Self::UnsignedInt(value) => Value::Number(Number::from(*value)),
            Self::Float(value) => Number::from_f64(*value).map_or_else(
                || marker("$float", Value::String(value.to_string())),
                Value::Number,
            ),
            Self::Decimal(value) => marker("$decimal", Value::String(value.to_string())),
            Self::Date(value) => marker("$date", Value::String(value.to_rfc3339())),
            Self::DateComponents(value) => {
                marker("$dateComponents", Value::String(value.to_string()))
            }
            Self::Binary(bytes) => marker("$binary", Value::String(to_hex(bytes))),
            Self::Uuid(value) => marker("$uuid", Value::String(value.to_string())),
            Self::ObjectId(value) => marker("$oid", Value::String(value.to_hex())),
            Self::Timestamp(value) => {
                let mut inner = Map::new();
                inner.insert("t".to_owned(), Value::from(value.time));
                inner.insert("i".to_owned(), Value::from(value.increment));
                marker("$timestamp", Value::Object(inner))
            }
            Self::Regex(value) => {
                let mut inner = Map::new();
                inner.insert("$regex".to_owned(), Value::String(value.pattern.clone()));
                inner.insert("$options".to_owned(), Value::String(value.options.clone()));
                Value::Object(inner)
            }
            Self::Array(values) => Value::Array(values.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Plain JSON encoding, suitable for JSON columns.
    pub fn to_plain_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::String(value) => Value::String(value.clone()),
            Self::SignedInt(value) => Value::Number(Number::from(*value)),
            Self::UnsignedInt(value) => Value::Number(Number::from(*value)),
            Self::Float(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
            Self::Decimal(value) => Value::String(value.to_string()),
            Self::Date(value) => Value::String(value.to_rfc3339()),
            Self::DateComponents(value) => Value::String(value.to_string()),
            Self::Binary(bytes) => Value::String(to_hex(bytes)),
            Self::Uuid(value) => Value::String(value.to_string()),
            Self::ObjectId(value) => Value::String(value.to_hex()),
            Self::Timestamp(value) => Value::from(
                (u64::from(value.time) << 32) | u64::from(value.increment),
            ),
            Self::Regex(value) => Value::String(value.pattern.clone()),
            Self::Array(values) => {
                Value::Array(values.iter().map(Self::to_plain_json).collect())
            }
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
        }
    }

    /// Decode JSON, recognising extended-JSON markers.
    ///
    /// Numbers become `SignedInt` when they fit `i64`, `UnsignedInt` when
    /// they fit `u64`, and `Float` otherwise. Malformed markers are kept as
    /// ordinary objects.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::String(value) => Self::String(value),
            Value::Number(number) => number
                .as_i64()
                .map(Self::SignedInt)
                .or_else(|| number.as_u64().map(Self::UnsignedInt))
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::Array(values) => Self::Array(values.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => from_marker(&map).unwrap_or_else(|| {
                Self::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Self::from_json(v)))
                        .collect::<BTreeMap<_, _>>(),
                )
            }),
        }
    }
}

impl From<Value> for DynValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

impl Serialize for DynValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DynValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

fn marker(key: &str, inner: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_owned(), inner);
    Value::Object(map)
}

/// Decode a single-key marker object, if `map` is one.
fn from_marker(map: &Map<String, Value>) -> Option<DynValue> {
    if map.len() == 2 {
        let pattern = map.get("$regex")?.as_str()?;
        let options = map.get("$options")?.as_str()?;
        return Some(DynValue::Regex(Regex::new(pattern, options)));
    }
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    let text = inner.as_str();
    match key.as_str() {
        "$float" => text?.parse::<f64>().ok().map(DynValue::Float),
        "$decimal" => Decimal::from_str_exact(text?).ok().map(DynValue::Decimal),
        "$date" => DateTime::parse_from_rfc3339(text?)
            .ok()
            .map(|d| DynValue::Date(d.with_timezone(&Utc))),
        "$dateComponents" => DateComponents::parse(text?).ok().map(DynValue::DateComponents),
        "$binary" => from_hex(text?).map(DynValue::Binary),
        "$uuid" => Uuid::parse_str(text?).ok().map(DynValue::Uuid),
        "$oid" => ObjectId::parse_str(text?).ok().map(DynValue::ObjectId),
        "$timestamp" => {
            let time = u32::try_from(inner.get("t")?.as_u64()?).ok()?;
            let increment = u32::try_from(inner.get("i")?.as_u64()?).ok()?;
            Some(DynValue::Timestamp(Timestamp::new(time, increment)))
        }
        _ => None,
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len().saturating_mul(2)), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> DynValue {
        let mut value = DynValue::Null;
        value.set("name", "widget");
        value.set("count", 3_i64);
        value.set("big", u64::MAX);
        value.set("ratio", 0.5_f64);
        value.set("price", Decimal::new(1050, 2));
        value.set("id", ObjectId::from_bytes([7; 12]));
        value.set("key", Uuid::nil());
        value.set("blob", DynValue::Binary(vec![0, 1, 254]));
        value.set("ts", Timestamp::new(10, 2));
        value.set("pattern", Regex::new("^w", "i"));
        value.set("tags", vec!["a", "b"]);
        value.set("missing", DynValue::Null);
        value
    }

    #[test]
    fn extended_json_is_lossless() {
        let original = sample();
        assert_eq!(DynValue::from_json(original.to_json()), original);
    }

    #[test]
    fn serde_uses_extended_form() {
        let original = sample();
        let text = serde_json::to_string(&original).unwrap_or_default();
        let parsed: Result<DynValue, _> = serde_json::from_str(&text);
        assert_eq!(parsed.ok(), Some(original));
    }

    #[test]
    fn plain_json_uses_strings_for_non_native_kinds() {
        let plain = sample().to_plain_json();
        assert_eq!(plain["price"], json!("10.50"));
        assert_eq!(plain["id"], json!("070707070707070707070707"));
        assert_eq!(plain["tags"], json!(["a", "b"]));
        assert_eq!(plain["missing"], Value::Null);
    }

    #[test]
    fn json_numbers_pick_the_narrowest_class() {
        assert_eq!(DynValue::from(json!(-3)), DynValue::SignedInt(-3));
        assert_eq!(
            DynValue::from(json!(u64::MAX)),
            DynValue::UnsignedInt(u64::MAX)
        );
        assert_eq!(DynValue::from(json!(1.25)), DynValue::Float(1.25));
    }

    #[test]
    fn unknown_markers_stay_objects() {
        let value = DynValue::from(json!({"$oid": "not-hex"}));
        assert!(matches!(value, DynValue::Object(_)));
    }
}
