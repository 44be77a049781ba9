//! PostgreSQL dialect.

use polystore_value::DynValue;

use super::{
    Dialect, Pattern, arithmetic, assignment, json_text, null_tolerant_extreme, unsupported,
};
use crate::error::QueryError;
use crate::raw::RawQuery;
use crate::table::ColumnType;
use crate::update::{UpdateOperation, distinct};

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

/// Map an `information_schema.columns.udt_name` to a [`ColumnType`].
pub fn column_type_from_udt(udt_name: &str) -> ColumnType {
    match udt_name {
        "bool" => ColumnType::Boolean,
        "int2" | "int4" | "int8" => ColumnType::Integer,
        "float4" | "float8" => ColumnType::Float,
        "numeric" => ColumnType::Decimal,
        "text" | "varchar" | "bpchar" | "name" | "citext" => ColumnType::Text,
        "bytea" => ColumnType::Binary,
        "uuid" => ColumnType::Uuid,
        "date" => ColumnType::Date,
        "time" => ColumnType::Time,
        "timestamp" => ColumnType::Timestamp,
        "timestamptz" => ColumnType::TimestampTz,
        "json" => ColumnType::Json,
        "jsonb" => ColumnType::Jsonb,
        other => other.strip_prefix('_').map_or_else(
            || ColumnType::Other(other.to_owned()),
            |element| ColumnType::Array(element.to_owned()),
        ),
    }
}

/// Name usable in a `::type` cast.
fn cast_name(column_type: &ColumnType) -> Option<String> {
    let name = match column_type {
        ColumnType::Boolean => "bool",
        ColumnType::Integer => "int8",
        ColumnType::Float => "float8",
        ColumnType::Decimal => "numeric",
        ColumnType::Text => "text",
        ColumnType::Binary => "bytea",
        ColumnType::Uuid => "uuid",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::Timestamp => "timestamp",
        ColumnType::TimestampTz => "timestamptz",
        ColumnType::Json => "json",
        ColumnType::Jsonb => "jsonb",
        ColumnType::Array(element) => return Some(format!("{element}[]")),
        ColumnType::Other(name) => return Some(name.clone()),
        ColumnType::Unknown => return None,
    };
    Some(name.to_owned())
}

/// `ARRAY[...]::element[]`, or the empty array literal.
fn array_value(items: &[DynValue], element: &str) -> RawQuery {
    if items.is_empty() {
        return RawQuery::literal(format!("'{{}}'::{element}[]"));
    }
    let elements = items.iter().map(|item| {
        if item.is_null() {
            RawQuery::value(DynValue::Null)
        } else {
            RawQuery::bind(item.clone())
        }
    });
    RawQuery::literal("ARRAY[")
        .then(RawQuery::join(elements, ", "))
        .then_literal(format!("]::{element}[]"))
}

/// `COALESCE("column", '{}'::element[])`.
fn array_or_empty(column: &str, element: &str) -> RawQuery {
    RawQuery::literal("COALESCE(")
        .then_identifier(column)
        .then_literal(format!(", '{{}}'::{element}[])"))
}

/// `COALESCE("column", '[]'::jsonb)`.
fn jsonb_or_empty(column: &str) -> RawQuery {
    RawQuery::literal("COALESCE(")
        .then_identifier(column)
        .then_literal(", '[]'::jsonb)")
}

/// Elements of `source` (with ordinality) that satisfy `keep`, re-aggregated
/// in their original order.
fn filtered_array(source: RawQuery, keep: RawQuery) -> RawQuery {
    RawQuery::literal(r#"ARRAY(SELECT "v" FROM unnest("#)
        .then(source)
        .then_literal(r#") WITH ORDINALITY AS "n"("v", "i") WHERE"#)
        .then(keep)
        .then_literal(r#"ORDER BY "i")"#)
}

fn filtered_jsonb(source: RawQuery, keep: RawQuery) -> RawQuery {
    RawQuery::literal(r#"COALESCE((SELECT jsonb_agg("v" ORDER BY "i") FROM jsonb_array_elements("#)
        .then(source)
        .then_literal(r#") WITH ORDINALITY AS "n"("v", "i") WHERE"#)
        .then(keep)
        .then_literal("), '[]'::jsonb)")
}

impl Postgres {
    fn array_operation(
        column: &str,
        element: &str,
        operation: &UpdateOperation,
    ) -> Option<RawQuery> {
        let expression = match operation {
            UpdateOperation::Push(items) => RawQuery::literal("array_cat(")
                .then(array_or_empty(column, element))
                .then_literal(",")
                .then(array_value(items, element))
                .then_literal(")"),
            UpdateOperation::AddToSet(items) => {
                let not_present = RawQuery::literal(r#"NOT COALESCE("v" = ANY("#)
                    .then(array_or_empty(column, element))
                    .then_literal("), FALSE)");
                RawQuery::literal("array_cat(")
                    .then(array_or_empty(column, element))
                    .then_literal(",")
                    .then(filtered_array(array_value(&distinct(items), element), not_present))
                    .then_literal(")")
            }
            UpdateOperation::RemoveAll(items) => {
                let not_removed = RawQuery::literal(r#"NOT COALESCE("v" = ANY("#)
                    .then(array_value(items, element))
                    .then_literal("), FALSE)");
                filtered_array(RawQuery::identifier(column), not_removed)
            }
            UpdateOperation::PopFirst => RawQuery::identifier(column).then_literal("[2:]"),
            UpdateOperation::PopLast => RawQuery::identifier(column)
                .then_literal("[:COALESCE(array_upper(")
                .then_identifier(column)
                .then_literal(", 1), 1) - 1]"),
            _ => return None,
        };
        Some(expression)
    }

    fn jsonb_operation(column: &str, operation: &UpdateOperation) -> Option<RawQuery> {
        let items_json = |items: &[DynValue]| {
            json_text(&DynValue::Array(items.to_vec())).then_literal("::jsonb")
        };
        let expression = match operation {
            UpdateOperation::Push(items) => jsonb_or_empty(column)
                .then_literal("||")
                .then(items_json(items)),
            UpdateOperation::AddToSet(items) => {
                let not_present = RawQuery::literal("NOT")
                    .then(jsonb_or_empty(column))
                    .then_literal(r#"@> jsonb_build_array("v")"#);
                jsonb_or_empty(column)
                    .then_literal("||")
                    .then(filtered_jsonb(items_json(&distinct(items)), not_present))
            }
            UpdateOperation::RemoveAll(items) => {
                let not_removed = RawQuery::literal("NOT")
                    .then(items_json(items))
                    .then_literal(r#"@> jsonb_build_array("v")"#);
                filtered_jsonb(RawQuery::identifier(column), not_removed)
            }
            UpdateOperation::PopFirst => RawQuery::identifier(column).then_literal("- 0"),
            UpdateOperation::PopLast => RawQuery::identifier(column).then_literal("- -1"),
            _ => return None,
        };
        Some(expression)
    }
}

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, segment: &str) -> String {
        format!("\"{}\"", segment.replace('"', "\"\""))
    }

    fn bind_placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn repeatable_placeholder(&self) -> bool {
        true
    }

    fn float_literal(&self, value: f64) -> Result<String, QueryError> {
        Ok(if value.is_nan() {
            "'NaN'::float8".to_owned()
        } else if value.is_infinite() {
            if value.is_sign_positive() {
                "'Infinity'::float8".to_owned()
            } else {
                "'-Infinity'::float8".to_owned()
            }
        } else {
            format!("{value:?}")
        })
    }

    fn null_safe_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        lhs.then_literal("IS NOT DISTINCT FROM").then(rhs)
    }

    fn null_safe_not_equal(&self, lhs: RawQuery, rhs: RawQuery) -> RawQuery {
        lhs.then_literal("IS DISTINCT FROM").then(rhs)
    }

    fn matching(&self, operand: RawQuery, pattern: &Pattern) -> Result<RawQuery, QueryError> {
        // Backslash is the default LIKE escape character.
        Ok(operand.then_literal("LIKE").then_bind(pattern.like_pattern()))
    }

    fn type_cast(&self, value: &DynValue, column_type: &ColumnType) -> Result<RawQuery, QueryError> {
        match (value, column_type) {
            (DynValue::Null, _) => Ok(RawQuery::value(DynValue::Null)),
            (_, ColumnType::Json) => Ok(json_text(value).then_literal("::json")),
            (_, ColumnType::Jsonb) => Ok(json_text(value).then_literal("::jsonb")),
            (DynValue::Array(items), ColumnType::Array(element)) => Ok(array_value(items, element)),
            (DynValue::Array(_) | DynValue::Object(_), ColumnType::Unknown) => {
                Ok(RawQuery::bind(value.clone()))
            }
            (DynValue::Array(_) | DynValue::Object(_), _) => Err(QueryError::unsupported_type(
                format!("cannot store {} in a {column_type} column", value.kind().name()),
            )),
            (
                DynValue::String(_),
                ColumnType::Uuid
                | ColumnType::Decimal
                | ColumnType::Date
                | ColumnType::Time
                | ColumnType::Timestamp
                | ColumnType::TimestampTz
                | ColumnType::Other(_),
            ) => {
                let mut cast = RawQuery::bind(value.clone());
                if let Some(name) = cast_name(column_type) {
                    cast.push_literal(format!("::{name}"));
                }
                Ok(cast)
            }
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
            UpdateOperation::AddToSet(_)
            | UpdateOperation::Push(_)
            | UpdateOperation::RemoveAll(_)
            | UpdateOperation::PopFirst
            | UpdateOperation::PopLast => {
                let expression = match column_type {
                    ColumnType::Array(element) => Self::array_operation(column, element, operation),
                    ColumnType::Jsonb => Self::jsonb_operation(column, operation),
                    _ => None,
                };
                expression.ok_or_else(|| unsupported(self, column, column_type, operation))?
            }
        };
        Ok(assignment(column, expression))
    }

    fn row_lock(&self) -> Option<&'static str> {
        Some("FOR UPDATE")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn supports_modifying_cte(&self) -> bool {
        true
    }

    fn row_identifier(&self) -> Option<&'static str> {
        Some("ctid")
    }
}
