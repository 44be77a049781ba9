//! SQLite dialect.

use polystore_value::DynValue;

use super::{
    Dialect, Pattern, arithmetic, assignment, json_text, null_tolerant_extreme, unsupported,
};
use crate::error::QueryError;
use crate::raw::RawQuery;
use crate::table::ColumnType;
use crate::update::UpdateOperation;

/// SQLite 3.35 or later.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, segment: &str) -> String {
        format!("\"{}\"", segment.replace('"', "\"\""))
    }

    fn bind_placeholder(&self, position: usize) -> String {
        format!("?{position}")
    }

    fn repeatable_placeholder(&self) -> bool {
        true
    }

    fn bool_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_owned()
    }

    fn null_safe_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        lhs.then_literal("IS").then(rhs)
    }

    fn null_safe_not_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        lhs.then_literal("IS NOT").then(rhs)
    }

    fn matching(&self, operand: RawQuery, pattern: &Pattern) -> Result<RawQuery, QueryError> {
        // SQLite has no default LIKE escape character.
        Ok(operand
            .then_literal("LIKE")
            .then_bind(pattern.like_pattern())
            .then_literal(r"ESCAPE '\'"))
    }

    fn type_cast(&self, value: &DynValue, column_type: &ColumnType) -> Result<RawQuery, QueryError> {
        match value {
            DynValue::Null => Ok(RawQuery::value(DynValue::Null)),
            DynValue::Array(_) | DynValue::Object(_) => Ok(RawQuery::literal("json(")
                .then(json_text(value))
                .then_literal(")")),
            _ if column_type.is_json() => Ok(RawQuery::literal("json(")
                .then(json_text(value))
                .then_literal(")")),
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
                null_tolerant_extreme("MIN", column, self.type_cast(value, column_type)?)
            }
            UpdateOperation::Max(value) => {
                null_tolerant_extreme("MAX", column, self.type_cast(value, column_type)?)
            }
            UpdateOperation::Push(items)
                if matches!(column_type, ColumnType::Json | ColumnType::Unknown) =>
            {
                let mut expression = RawQuery::literal("json_insert(COALESCE(")
                    .then_identifier(column)
                    .then_literal(", json_array())");
                for item in items {
                    expression.push_literal(", '$[#]', json(");
                    expression.append(json_text(item));
                    expression.push_literal(")");
                }
                expression.then_literal(")")
            }
            _ => return Err(unsupported(self, column, column_type, operation)),
        };
        Ok(assignment(column, expression))
    }

    fn row_lock(&self) -> Option<&'static str> {
        None
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> RawQuery {
        let mut clause = RawQuery::new();
        match (limit, offset) {
            (Some(limit), _) => {
                clause.push_literal("LIMIT");
                clause.push_value(limit);
            }
            (None, Some(_)) => clause.push_literal("LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = offset {
            clause.push_literal("OFFSET");
            clause.push_value(offset);
        }
        clause
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn row_identifier(&self) -> Option<&'static str> {
        Some("rowid")
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::dialect::PatternKind;

    fn sql(query: &RawQuery) -> String {
        let Ok(rendered) = query.render(&Sqlite) else {
            panic!("query should render");
        };
        rendered.sql
    }

    #[test]
    fn like_declares_its_escape_character() {
        let Ok(query) = Sqlite.matching(
            RawQuery::identifier("name"),
            &Pattern::new(PatternKind::StartsWith, "a_b"),
        ) else {
            panic!("pattern should compile");
        };
        assert_eq!(sql(&query), r#""name" LIKE ?1 ESCAPE '\'"#);
    }

    #[test]
    fn booleans_are_integers() {
        assert_eq!(sql(&RawQuery::value(true)), "1");
    }

    #[test]
    fn scalar_min_is_null_tolerant() {
        let Ok(query) =
            Sqlite.update_operation("score", &ColumnType::Integer, &UpdateOperation::Min(3_i64.into()))
        else {
            panic!("min should compile");
        };
        assert_eq!(sql(&query), r#""score" = COALESCE(MIN("score", ?1), ?1)"#);
    }

    #[test]
    fn push_appends_each_item() {
        let Ok(query) = Sqlite.update_operation(
            "tags",
            &ColumnType::Json,
            &UpdateOperation::Push(vec!["a".into(), "b".into()]),
        ) else {
            panic!("push should compile");
        };
        assert_eq!(
            sql(&query),
            r#""tags" = json_insert(COALESCE("tags", json_array()), '$[#]', json(?1), '$[#]', json(?2))"#
        );
    }
}
