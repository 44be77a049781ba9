//! Backend-neutral filter expressions.
//!
//! A [`Predicate`] is a tree of comparisons over [`Operand`]s. It is built
//! with the free functions [`key`], [`object_id`] and [`value`] and the
//! comparison methods on [`Operand`]:
//!
//! ```
//! use polystore_query::predicate::{key, object_id};
//!
//! let filter = key("age")
//!     .between(18, 65)
//!     .and(key("name").starts_with("A"))
//!     .or(object_id().eq("user-1"));
//! # let _ = filter;
//! ```
//!
//! The tree is compiled per target: [`crate::compile`] for SQL dialects and
//! [`crate::document`] for document stores.

use polystore_value::DynValue;

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The record's primary key, whatever its columns are.
    ObjectId,
    /// A named column or field.
    Key(String),
    /// A literal value.
    Value(DynValue),
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Logical negation.
    Not(Box<Predicate>),
    /// All children hold.
    And(Vec<Predicate>),
    /// At least one child holds.
    Or(Vec<Predicate>),
    /// Equality; NULL equals NULL.
    Equal(Operand, Operand),
    /// Inequality; NULL differs from every non-NULL value.
    NotEqual(Operand, Operand),
    /// Strictly less.
    LessThan(Operand, Operand),
    /// Strictly greater.
    GreaterThan(Operand, Operand),
    /// Less or equal.
    LessOrEqual(Operand, Operand),
    /// Greater or equal.
    GreaterOrEqual(Operand, Operand),
    /// Left operand is one of the elements of the right (array) operand.
    ContainsIn(Operand, Operand),
    /// Left operand is none of the elements of the right operand.
    NotContainsIn(Operand, Operand),
    /// `low <= operand <= high`.
    Between(Operand, Operand, Operand),
    /// Not between.
    NotBetween(Operand, Operand, Operand),
    /// Text starts with the literal.
    StartsWith(Operand, String),
    /// Text ends with the literal.
    EndsWith(Operand, String),
    /// Text contains the literal.
    Contains(Operand, String),
}

/// Reference a column or field.
pub fn key(name: impl Into<String>) -> Operand {
    Operand::Key(name.into())
}

/// Reference the primary key.
pub const fn object_id() -> Operand {
    Operand::ObjectId
}

/// A literal operand.
pub fn value(value: impl Into<DynValue>) -> Operand {
    Operand::Value(value.into())
}

impl Operand {
    /// `self == rhs`.
    pub fn eq(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::Equal(self, value(rhs))
    }

    /// `self != rhs`.
    pub fn ne(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::NotEqual(self, value(rhs))
    }

    /// `self < rhs`.
    pub fn lt(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::LessThan(self, value(rhs))
    }

    /// `self > rhs`.
    pub fn gt(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::GreaterThan(self, value(rhs))
    }

    /// `self <= rhs`.
    pub fn le(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::LessOrEqual(self, value(rhs))
    }

    /// `self >= rhs`.
    pub fn ge(self, rhs: impl Into<DynValue>) -> Predicate {
        Predicate::GreaterOrEqual(self, value(rhs))
    }

    /// `low <= self <= high`.
    pub fn between(self, low: impl Into<DynValue>, high: impl Into<DynValue>) -> Predicate {
        Predicate::Between(self, value(low), value(high))
    }

    /// `self < low || self > high`.
    pub fn not_between(self, low: impl Into<DynValue>, high: impl Into<DynValue>) -> Predicate {
        Predicate::NotBetween(self, value(low), value(high))
    }

    /// `self` is one of `items`.
    pub fn contains_in<T: Into<DynValue>>(self, items: impl IntoIterator<Item = T>) -> Predicate {
        Predicate::ContainsIn(self, Self::array(items))
    }

    /// `self` is none of `items`.
    pub fn not_contains_in<T: Into<DynValue>>(
        self,
        items: impl IntoIterator<Item = T>,
    ) -> Predicate {
        Predicate::NotContainsIn(self, Self::array(items))
    }

    /// Text starts with `prefix`.
    pub fn starts_with(self, prefix: impl Into<String>) -> Predicate {
        Predicate::StartsWith(self, prefix.into())
    }

    /// Text ends with `suffix`.
    pub fn ends_with(self, suffix: impl Into<String>) -> Predicate {
        Predicate::EndsWith(self, suffix.into())
    }

    /// Text contains `needle`.
    pub fn contains(self, needle: impl Into<String>) -> Predicate {
        Predicate::Contains(self, needle.into())
    }

    /// `self == other` where `other` is any operand, such as another key.
    pub fn eq_operand(self, other: Self) -> Predicate {
        Predicate::Equal(self, other)
    }

    /// `self != other` where `other` is any operand.
    pub fn ne_operand(self, other: Self) -> Predicate {
        Predicate::NotEqual(self, other)
    }

    fn array<T: Into<DynValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::Value(DynValue::Array(items.into_iter().map(Into::into).collect()))
    }
}

impl Predicate {
    /// Conjunction of `self` and `other`, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`, flattening nested `Or`s.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negation of `self`.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Conjunction of every predicate in `children`.
    pub fn all(children: impl IntoIterator<Item = Self>) -> Self {
        Self::And(children.into_iter().collect())
    }

    /// Disjunction of every predicate in `children`.
    pub fn any(children: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(children.into_iter().collect())
    }
}

impl std::ops::Not for Predicate {
    type Output = Self;

    fn not(self) -> Self {
        self.negate()
    }
}

/// Append `children` to `out`, lifting nested junctions of the same kind so
/// that `And(a, And(b, c))` becomes `[a, b, c]`. Empty junctions are kept so
/// the compilers can reject them.
pub(crate) fn flatten<'a>(
    children: &'a [Predicate],
    conjunction: bool,
    out: &mut Vec<&'a Predicate>,
) {
    for child in children {
        match child {
            Predicate::And(nested) if conjunction && !nested.is_empty() => {
                flatten(nested, conjunction, out);
            }
            Predicate::Or(nested) if !conjunction && !nested.is_empty() => {
                flatten(nested, conjunction, out);
            }
            other => out.push(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn builders_wrap_values() {
        assert_eq!(
            key("a").eq(1_i64),
            Predicate::Equal(Operand::Key("a".to_owned()), Operand::Value(DynValue::SignedInt(1)))
        );
        assert_eq!(
            key("a").contains_in([1_i64, 2]),
            Predicate::ContainsIn(
                key("a"),
                Operand::Value(DynValue::Array(vec![1_i64.into(), 2_i64.into()]))
            )
        );
    }

    #[test]
    fn chained_junctions_stay_flat() {
        let predicate = key("a").eq(1_i64).and(key("b").eq(2_i64)).and(key("c").eq(3_i64));
        let Predicate::And(children) = predicate else {
            panic!("expected a conjunction");
        };
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn flatten_lifts_same_kind_only() {
        let tree = vec![
            Predicate::And(vec![key("a").eq(1_i64), key("b").eq(2_i64)]),
            Predicate::Or(vec![key("c").eq(3_i64), key("d").eq(4_i64)]),
        ];
        let mut out = Vec::new();
        flatten(&tree, true, &mut out);
        assert_eq!(out.len(), 3);
        assert!(matches!(out.last(), Some(Predicate::Or(_))));
    }

    #[test]
    fn not_operator_negates() {
        let predicate = !key("a").eq(1_i64);
        assert!(matches!(predicate, Predicate::Not(_)));
    }
}
