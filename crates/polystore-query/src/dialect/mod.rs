//! SQL dialects.
//!
//! A [`Dialect`] owns every piece of SQL that differs between backends:
//! identifier quoting, placeholder syntax, null-safe comparison, pattern
//! matching, value casts and the update operations it can express
//! atomically. Connections hold one as `Arc<dyn Dialect>`; the compilers only
//! ever see `&dyn Dialect`.
//!
//! # Dialects
//!
//! - [`Postgres`] -- `$n` placeholders, `IS [NOT] DISTINCT FROM`, array and
//!   `jsonb` update operations, data-modifying CTEs
//! - [`MySql`] -- `?` placeholders, `<=>`, arithmetic and JSON push only
//! - [`Sqlite`] -- `?n` placeholders, `IS [NOT]`, scalar `MIN`/`MAX`

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;

use polystore_value::DynValue;

pub use mysql::MySql;
pub use postgres::{Postgres, column_type_from_udt};
pub use sqlite::Sqlite;

use crate::error::QueryError;
use crate::raw::RawQuery;
use crate::table::ColumnType;
use crate::update::UpdateOperation;

/// Where a `LIKE` pattern must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
    /// Substring match.
    Contains,
}

/// A literal text pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// Match position.
    pub kind: PatternKind,
    /// Text to find; matched literally.
    pub text: String,
}

impl Pattern {
    /// Build a pattern.
    pub fn new(kind: PatternKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// The `LIKE` operand: `%`, `_` and `\` escaped with `\`, wildcards added
    /// according to [`PatternKind`].
    pub fn like_pattern(&self) -> String {
        let mut escaped = String::with_capacity(self.text.len().saturating_add(2));
        if matches!(self.kind, PatternKind::EndsWith | PatternKind::Contains) {
            escaped.push('%');
        }
        for ch in self.text.chars() {
            if matches!(ch, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        if matches!(self.kind, PatternKind::StartsWith | PatternKind::Contains) {
            escaped.push('%');
        }
        escaped
    }

    /// Evaluate the pattern against a string in memory.
    pub fn matches(&self, haystack: &str) -> bool {
        match self.kind {
            PatternKind::StartsWith => haystack.starts_with(&self.text),
            PatternKind::EndsWith => haystack.ends_with(&self.text),
            PatternKind::Contains => haystack.contains(&self.text),
        }
    }
}

/// Backend specific SQL generation.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Short dialect name for logs and errors.
    fn name(&self) -> &'static str;

    /// Quote one identifier segment.
    fn quote_identifier(&self, segment: &str) -> String;

    /// Quote a possibly schema-qualified identifier (`schema.table`).
    fn identifier(&self, name: &str) -> String {
        name.split('.')
            .map(|segment| self.quote_identifier(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder for the bind at 1-based `position`.
    fn bind_placeholder(&self, position: usize) -> String;

    /// Whether a placeholder may be referenced more than once.
    fn repeatable_placeholder(&self) -> bool;

    /// Inline boolean literal.
    fn bool_literal(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_owned()
    }

    /// Inline float literal.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedType`] for values the dialect cannot
    /// write inline.
    fn float_literal(&self, value: f64) -> Result<String, QueryError> {
        if value.is_finite() {
            Ok(format!("{value:?}"))
        } else {
            Err(QueryError::unsupported_type(format!(
                "{} cannot represent float {value}",
                self.name()
            )))
        }
    }

    /// `lhs` equals `rhs`, treating two NULLs as equal.
    fn null_safe_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery;

    /// `lhs` differs from `rhs`, treating NULL as an ordinary value.
    fn null_safe_not_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery;

    /// Literal pattern match of `operand` against `pattern`.
    ///
    /// # Errors
    ///
    /// Fails if the dialect cannot match literal text.
    fn matching(&self, operand: RawQuery, pattern: &Pattern) -> Result<RawQuery, QueryError>;

    /// Expression writing `value` into a column of `column_type`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedType`] if the value cannot be stored
    /// in that column.
    fn type_cast(&self, value: &DynValue, column_type: &ColumnType) -> Result<RawQuery, QueryError>;

    /// `SET` assignment performing `operation` on `column`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedOperation`] if the dialect cannot
    /// express the operation atomically for that column type.
    fn update_operation(
        &self,
        column: &str,
        column_type: &ColumnType,
        operation: &UpdateOperation,
    ) -> Result<RawQuery, QueryError>;

    /// Row locking suffix for `SELECT`, if supported.
    fn row_lock(&self) -> Option<&'static str>;

    /// `LIMIT` / `OFFSET` clause; empty when both are absent.
    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> RawQuery {
        let mut clause = RawQuery::new();
        if let Some(limit) = limit {
            clause.push_literal("LIMIT");
            clause.push_value(limit);
        }
        if let Some(offset) = offset {
            clause.push_literal("OFFSET");
            clause.push_value(offset);
        }
        clause
    }

    /// Whether `INSERT`/`UPDATE`/`DELETE ... RETURNING` is available.
    fn supports_returning(&self) -> bool;

    /// Whether data-modifying statements may appear inside `WITH`.
    fn supports_modifying_cte(&self) -> bool {
        false
    }

    /// Hidden per-row identifier usable when a table has no primary key.
    fn row_identifier(&self) -> Option<&'static str> {
        None
    }
}

/// `"column" = expression`.
pub(crate) fn assignment(column: &str, expression: RawQuery) -> RawQuery {
    RawQuery::identifier(column)
        .then_literal("=")
        .then(expression)
}

/// `COALESCE("column", 0) <symbol> operand`; a missing value counts as zero.
pub(crate) fn arithmetic(
    column: &str,
    symbol: &str,
    operand: &DynValue,
) -> Result<RawQuery, QueryError> {
    if !operand.is_numeric() {
        return Err(QueryError::unsupported_type(format!(
            "cannot apply `{symbol}` to `{column}` with a {} operand",
            operand.kind().name()
        )));
    }
    Ok(RawQuery::literal("COALESCE(")
        .then_identifier(column)
        .then_literal(", 0)")
        .then_literal(symbol)
        .then_value(operand.clone()))
}

/// `COALESCE(function("column", operand), operand)`, so that a NULL column
/// takes the operand.
pub(crate) fn null_tolerant_extreme(function: &str, column: &str, operand: RawQuery) -> RawQuery {
    RawQuery::literal(format!("COALESCE({function}("))
        .then_identifier(column)
        .then_literal(",")
        .then(operand.clone())
        .then_literal("),")
        .then(operand)
        .then_literal(")")
}

/// Error for an operation a dialect cannot perform on a column.
pub(crate) fn unsupported(
    dialect: &dyn Dialect,
    column: &str,
    column_type: &ColumnType,
    operation: &UpdateOperation,
) -> QueryError {
    QueryError::unsupported_operation(format!(
        "{} cannot {} on `{column}` ({column_type})",
        dialect.name(),
        operation.name()
    ))
}

/// Plain-JSON text of `value`, as a bound string.
pub(crate) fn json_text(value: &DynValue) -> RawQuery {
    RawQuery::bind(value.to_plain_json().to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        let pattern = Pattern::new(PatternKind::Contains, r"50%_off\");
        assert_eq!(pattern.like_pattern(), r"%50\%\_off\\%");
        assert_eq!(
            Pattern::new(PatternKind::StartsWith, "ab").like_pattern(),
            "ab%"
        );
        assert_eq!(Pattern::new(PatternKind::EndsWith, "ab").like_pattern(), "%ab");
    }

    #[test]
    fn pattern_matches_in_memory() {
        assert!(Pattern::new(PatternKind::StartsWith, "po").matches("polystore"));
        assert!(!Pattern::new(PatternKind::EndsWith, "po").matches("polystore"));
        assert!(Pattern::new(PatternKind::Contains, "lys").matches("polystore"));
    }

    #[test]
    fn arithmetic_rejects_non_numeric_operands() {
        assert!(arithmetic("n", "+", &DynValue::from("x")).is_err());
        let Ok(query) = arithmetic("n", "+", &DynValue::from(2_i64)) else {
            panic!("numeric operand should compile");
        };
        let Ok(rendered) = query.render(&Postgres) else {
            panic!("should render");
        };
        assert_eq!(rendered.sql, r#"COALESCE("n", 0) + 2"#);
    }
}
