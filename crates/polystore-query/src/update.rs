//! Field update operations.
//!
//! An update is a map from field name to one [`UpdateOperation`]. SQL
//! dialects turn each entry into a `SET` assignment; document stores turn the
//! whole map into an update document.

use std::collections::BTreeMap;

use polystore_value::DynValue;
use rust_decimal::Decimal;

use crate::error::QueryError;

/// What to do to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    /// Replace the value.
    Set(DynValue),
    /// Add to a numeric value (a missing value counts as zero).
    Increment(DynValue),
    /// Subtract from a numeric value.
    Decrement(DynValue),
    /// Multiply a numeric value.
    Multiply(DynValue),
    /// Divide a numeric value.
    Divide(DynValue),
    /// Keep the smaller of the current value and the operand.
    Min(DynValue),
    /// Keep the larger of the current value and the operand.
    Max(DynValue),
    /// Append the items that are not already present.
    AddToSet(Vec<DynValue>),
    /// Append the items.
    Push(Vec<DynValue>),
    /// Remove every occurrence of the items.
    RemoveAll(Vec<DynValue>),
    /// Remove the first element.
    PopFirst,
    /// Remove the last element.
    PopLast,
}

/// Field name to operation. Field names are unique by construction.
pub type Updates = BTreeMap<String, UpdateOperation>;

impl UpdateOperation {
    /// Short name used in error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Set(_) => "set",
            Self::Increment(_) => "increment",
            Self::Decrement(_) => "decrement",
            Self::Multiply(_) => "multiply",
            Self::Divide(_) => "divide",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::AddToSet(_) => "add to set",
            Self::Push(_) => "push",
            Self::RemoveAll(_) => "remove all",
            Self::PopFirst => "pop first",
            Self::PopLast => "pop last",
        }
    }

    /// Shorthand for `Set`.
    pub fn set(value: impl Into<DynValue>) -> Self {
        Self::Set(value.into())
    }

    /// The operand of a `Set`, if this is one.
    pub const fn as_set(&self) -> Option<&DynValue> {
        match self {
            Self::Set(value) => Some(value),
            _ => None,
        }
    }
}

/// Remove repeated items, keeping the first occurrence.
pub(crate) fn distinct(items: &[DynValue]) -> Vec<DynValue> {
    let mut unique: Vec<DynValue> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    unique
}

/// `-value`, widening an unsigned operand that has no `i64` negation.
pub(crate) fn negation(value: &DynValue) -> Result<DynValue, QueryError> {
    let overflow = || QueryError::unsupported_type(format!("cannot negate {value:?}"));
    match value {
        DynValue::SignedInt(v) => v.checked_neg().map(DynValue::SignedInt).ok_or_else(overflow),
        DynValue::UnsignedInt(v) => Ok(i64::try_from(*v)
            .ok()
            .and_then(i64::checked_neg)
            .map_or_else(|| DynValue::Decimal(-Decimal::from(*v)), DynValue::SignedInt)),
        DynValue::Float(v) => Ok(DynValue::Float(-v)),
        DynValue::Decimal(v) => Ok(DynValue::Decimal(-*v)),
        other => Err(QueryError::unsupported_type(format!(
            "cannot decrement by a {} value",
            other.kind().name()
        ))),
    }
}

/// Zero of the operand's numeric type: what multiplying a missing value
/// yields.
pub(crate) fn zero_like(value: &DynValue) -> Result<DynValue, QueryError> {
    match value {
        DynValue::SignedInt(_) | DynValue::UnsignedInt(_) => Ok(DynValue::SignedInt(0)),
        DynValue::Float(_) => Ok(DynValue::Float(0.0)),
        DynValue::Decimal(_) => Ok(DynValue::Decimal(Decimal::ZERO)),
        other => Err(QueryError::unsupported_type(format!(
            "cannot multiply by a {} value",
            other.kind().name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_shorthand_converts_its_operand() {
        assert_eq!(
            UpdateOperation::set(3_i64),
            UpdateOperation::Set(DynValue::SignedInt(3))
        );
        assert_eq!(UpdateOperation::set(3_i64).as_set(), Some(&DynValue::SignedInt(3)));
    }

    #[test]
    fn negation_widens_unsigned_operands() {
        assert!(matches!(negation(&DynValue::from(5_u64)), Ok(DynValue::SignedInt(-5))));
        assert!(matches!(
            negation(&DynValue::from(u64::MAX)),
            Ok(DynValue::Decimal(value)) if value == -Decimal::from(u64::MAX)
        ));
        assert!(negation(&DynValue::SignedInt(i64::MIN)).is_err());
        assert!(negation(&DynValue::from("x")).is_err());
    }

    #[test]
    fn zero_follows_the_operand_type() {
        assert!(matches!(zero_like(&DynValue::from(3_u64)), Ok(DynValue::SignedInt(0))));
        assert!(matches!(zero_like(&DynValue::Float(2.5)), Ok(DynValue::Float(v)) if v.to_bits() == 0));
        assert!(matches!(
            zero_like(&DynValue::Decimal(Decimal::ONE)),
            Ok(DynValue::Decimal(v)) if v.is_zero()
        ));
        assert!(zero_like(&DynValue::Bool(true)).is_err());
    }

    #[test]
    fn distinct_keeps_first_occurrence() {
        let items = vec![
            DynValue::from(2_i64),
            DynValue::from(1_u64),
            DynValue::from(2_u64),
        ];
        assert_eq!(
            distinct(&items),
            vec![DynValue::from(2_i64), DynValue::from(1_u64)]
        );
    }
}
