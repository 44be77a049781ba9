//! MySQL dialect.

use polystore_value::DynValue;

use super::{
    Dialect, Pattern, arithmetic, assignment, json_text, null_tolerant_extreme, unsupported,
};
use crate::error::QueryError;
use crate::raw::RawQuery;
use crate::table::ColumnType;
use crate::update::UpdateOperation;

/// Largest row count MySQL accepts, used for an `OFFSET` without `LIMIT`.
const UNBOUNDED_LIMIT: u64 = u64::MAX;

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, segment: &str) -> String {
        format!("`{}`", segment.replace('`', "``"))
    }

    fn bind_placeholder(&self, _position: usize) -> String {
        "?".to_owned()
    }

    fn repeatable_placeholder(&self) -> bool {
        false
    }

    fn null_safe_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        lhs.then_literal("<=>").then(rhs)
    }

    fn null_safe_not_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        RawQuery::literal("NOT")
            .then(self.null_safe_equal(lhs, rhs).parenthesized())
    }

    fn matching(&self, operand: RawQuery, pattern: &Pattern) -> Result<RawQuery, QueryError> {
        Ok(operand.then_literal("LIKE").then_bind(pattern.like_pattern()))
    }

    fn type_cast(&self, value: &DynValue, column_type: &ColumnType) -> Result<RawQuery, QueryError> {
        match value {
            DynValue::Null => Ok(RawQuery::value(DynValue::Null)),
            _ if column_type.is_json() => Ok(RawQuery::literal("CAST(")
                .then(json_text(value))
                .then_literal("AS JSON)")),
            DynValue::Array(_) | DynValue::Object(_) => Err(QueryError::unsupported_type(
                format!("cannot store {} in a {column_type} column", value.kind().name()),
            )),
            _ => Ok(RawQuery::bind(value.clone())),
        }
    }

    fn update_operation(
        &self,
        column: &str,
        column_type: &ColumnType,
        operation: &UpdateOperation,
    ) -> Result<RawQuery, QueryError> {
        let expression = match operation {
            UpdateOperation::Set(value) => self.type_cast(value, column_type)?,
            UpdateOperation::Increment(value) => arithmetic(column, "+", value)?,
            UpdateOperation::Decrement(value) => arithmetic(column, "-", value)?,
            UpdateOperation::Multiply(value) => arithmetic(column, "*", value)?,
            UpdateOperation::Divide(value) => arithmetic(column, "/", value)?,
            UpdateOperation::Min(value) => {
                null_tolerant_extreme("LEAST", column, self.type_cast(value, column_type)?)
            }
            UpdateOperation::Max(value) => {
                null_tolerant_extreme("GREATEST", column, self.type_cast(value, column_type)?)
            }
            UpdateOperation::Push(items) if column_type.is_json() => {
                RawQuery::literal("JSON_MERGE_PRESERVE(COALESCE(")
                    .then_identifier(column)
                    .then_literal(", JSON_ARRAY()), CAST(")
                    .then(json_text(&DynValue::Array(items.clone())))
                    .then_literal("AS JSON))")
            }
            _ => return Err(unsupported(self, column, column_type, operation)),
        };
        Ok(assignment(column, expression))
    }

    fn row_lock(&self) -> Option<&'static str> {
        Some("FOR UPDATE")
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> RawQuery {
        let limit = limit.or_else(|| offset.map(|_| UNBOUNDED_LIMIT));
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

    fn supports_returning(&self) -> bool {
        false
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn sql(query: &RawQuery) -> String {
        let Ok(rendered) = query.render(&MySql) else {
            panic!("query should render");
        };
        rendered.sql
    }

    #[test]
    fn null_safe_comparisons_use_spaceship() {
        let lhs = RawQuery::identifier("a");
        let rhs = RawQuery::identifier("b");
        assert_eq!(sql(&MySql.null_safe_equal(lhs.clone(), rhs.clone())), "`a` <=> `b`");
        assert_eq!(sql(&MySql.null_safe_not_equal(lhs, rhs)), "NOT (`a` <=> `b`)");
    }

    #[test]
    fn offset_without_limit_gets_an_unbounded_limit() {
        assert_eq!(
            sql(&MySql.limit_clause(None, Some(5))),
            "LIMIT 18446744073709551615 OFFSET 5"
        );
    }

    #[test]
    fn json_push_is_supported() {
        let Ok(query) = MySql.update_operation(
            "doc",
            &ColumnType::Json,
            &UpdateOperation::Push(vec![1_i64.into()]),
        ) else {
            panic!("push should compile");
        };
        assert_eq!(
            sql(&query),
            "`doc` = JSON_MERGE_PRESERVE(COALESCE(`doc`, JSON_ARRAY()), CAST(? AS JSON))"
        );
    }

    #[test]
    fn array_operations_are_unsupported() {
        assert!(matches!(
            MySql.update_operation("doc", &ColumnType::Json, &UpdateOperation::PopFirst),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }
}
