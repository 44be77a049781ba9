//! Statement planning for SQL backends.
//!
//! [`StatementPlanner`] turns requests into complete statements for one table
//! and one dialect. Planning happens before any I/O: a filter that folds to
//! `FALSE` yields `Ok(None)` so callers can skip the round trip.
//!
//! Single-record modifications select their target through the row key (the
//! primary key tuple, or the dialect's hidden row identifier), locked with the
//! dialect's row lock. The upsert is one statement built from data-modifying
//! common table expressions:
//!
//! ```text
//! WITH "updated"    AS (UPDATE ... WHERE key IN (one matching row) RETURNING *),
//!      "duplicated" AS (SELECT * ... WHERE key = new key AND NOT EXISTS updated),
//!      "inserted"   AS (INSERT ... SELECT ... WHERE NOT EXISTS updated
//!                                                AND NOT EXISTS duplicated RETURNING *)
//! SELECT NULL AS "is_duplicated", * FROM "updated"
//! UNION ALL SELECT NULL, * FROM "inserted"
//! UNION ALL SELECT TRUE, * FROM "duplicated"
//! ```
//!
//! A row from `"duplicated"` means the insert would collide with an existing
//! primary key that did not match the filter; the caller reports that as a
//! duplicate key error.

use std::collections::{BTreeMap, BTreeSet};

use polystore_value::DynValue;

use crate::builder::{Projection, SqlBuilder};
use crate::compile::{CompileResult, SqlCompiler};
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::predicate::{Operand, Predicate, flatten, key};
use crate::raw::RawQuery;
use crate::request::{FindOneRequest, FindRequest, ReturnDocument, SortOrder};
use crate::table::TableInfo;
use crate::update::{UpdateOperation, Updates, distinct, negation, zero_like};

/// Column added to upsert results; `TRUE` marks a primary key collision.
pub const DUPLICATE_MARKER: &str = "is_duplicated";

/// Column holding the result of [`StatementPlanner::count`].
pub const COUNT_COLUMN: &str = "count";

const SELECTED: &str = "selected";
const UPDATED: &str = "updated";
const INSERTED: &str = "inserted";
const DUPLICATED: &str = "duplicated";

/// How a single row is addressed.
#[derive(Debug, Clone, Copy)]
enum RowKey<'t> {
    /// Primary key columns.
    Columns(&'t [String]),
    /// Hidden row identifier such as `ctid`.
    Hidden(&'static str),
}

impl RowKey<'_> {
    /// Key columns as a select list.
    fn select_list(self) -> RawQuery {
        match self {
            Self::Columns(columns) => RawQuery::identifiers(columns),
            Self::Hidden(name) => RawQuery::literal(name),
        }
    }

    /// Key as the left side of `IN`.
    fn tuple(self) -> RawQuery {
        match self {
            Self::Columns(columns) if columns.len() > 1 => {
                RawQuery::identifiers(columns).parenthesized()
            }
            other => other.select_list(),
        }
    }
}

/// Plans SQL statements against one table.
#[derive(Debug, Clone, Copy)]
pub struct StatementPlanner<'a> {
    dialect: &'a dyn Dialect,
    table: &'a TableInfo,
}

impl<'a> StatementPlanner<'a> {
    /// A planner for `table` in `dialect`.
    pub const fn new(dialect: &'a dyn Dialect, table: &'a TableInfo) -> Self {
        Self { dialect, table }
    }

    /// Compile `filters` into one condition.
    ///
    /// # Errors
    ///
    /// Propagates compilation errors.
    pub fn condition(&self, filters: &[Predicate]) -> Result<CompileResult, QueryError> {
        SqlCompiler::new(self.dialect, self.table).compile_all(filters)
    }

    /// Columns to return for `includes`, restricted to existing columns.
    ///
    /// When none of the requested fields exist the primary key is returned so
    /// callers still see which records matched.
    pub fn projection(&self, includes: Option<&BTreeSet<String>>) -> Projection {
        let Some(includes) = includes else {
            return Projection::All;
        };
        let mut columns: Vec<String> = includes
            .iter()
            .filter(|column| self.table.has_column(column))
            .cloned()
            .collect();
        if columns.is_empty() {
            columns = self.table.primary_keys().to_vec();
        }
        if columns.is_empty() {
            Projection::All
        } else {
            Projection::Columns(columns)
        }
    }

    /// `SELECT COUNT(*)` over the matching records.
    ///
    /// # Errors
    ///
    /// Propagates compilation errors.
    pub fn count(&self, request: &FindRequest) -> Result<Option<RawQuery>, QueryError> {
        let Some(condition) = self.matching(&request.filters)? else {
            return Ok(None);
        };
        let head = SqlBuilder::new()
            .literal("SELECT COUNT(*) AS")
            .raw(RawQuery::identifier(COUNT_COLUMN));
        let query = if request.skip.is_none() && request.limit.is_none() {
            head.from(self.table.name()).filter(condition)
        } else {
            let window = SqlBuilder::new()
                .literal("SELECT 1")
                .from(self.table.name())
                .filter(condition)
                .order_by(&self.sort(&request.sort))
                .limit(self.dialect, request.limit, request.skip)
                .build();
            head.literal("FROM")
                .raw(window.parenthesized())
                .literal("AS")
                .raw(RawQuery::identifier("counted"))
        };
        Ok(Some(query.build()))
    }

    /// `SELECT` of the matching records.
    ///
    /// # Errors
    ///
    /// Propagates compilation errors.
    pub fn find(&self, request: &FindRequest) -> Result<Option<RawQuery>, QueryError> {
        let Some(condition) = self.matching(&request.filters)? else {
            return Ok(None);
        };
        let query = SqlBuilder::new()
            .select(&self.projection(request.includes.as_ref()))
            .from(self.table.name())
            .filter(condition)
            .order_by(&self.sort(&request.sort))
            .limit(self.dialect, request.limit, request.skip)
            .build();
        Ok(Some(query))
    }

    /// `DELETE` of the matching records.
    ///
    /// Sorting, skipping and limiting select the victims through the row
    /// key first.
    ///
    /// # Errors
    ///
    /// Propagates compilation errors, and returns
    /// [`QueryError::UnsupportedOperation`] for a windowed delete on a table
    /// without a row key.
    pub fn delete(&self, request: &FindRequest) -> Result<Option<RawQuery>, QueryError> {
        let Some(condition) = self.matching(&request.filters)? else {
            return Ok(None);
        };
        let target = if request.is_windowed() {
            CompileResult::Sql(self.selected_rows(
                self.row_key()?,
                condition,
                &request.sort,
                request.limit,
                request.skip,
            ))
        } else {
            condition
        };
        Ok(Some(
            SqlBuilder::new()
                .delete_from(self.table.name())
                .filter(target)
                .build(),
        ))
    }

    /// Update the first matching record and return it.
    ///
    /// Without any assignment this degrades to a plain single-row `SELECT`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ColumnNotExist`] for updates of unknown columns
    /// and [`QueryError::UnsupportedOperation`] when the dialect cannot
    /// return modified rows.
    pub fn find_one_and_update(
        &self,
        request: &FindOneRequest,
        updates: &Updates,
    ) -> Result<Option<RawQuery>, QueryError> {
        let Some(condition) = self.matching(&request.filters)? else {
            return Ok(None);
        };
        let projection = self.projection(request.includes.as_ref());
        let assignments = self.assignments(updates)?;
        if assignments.is_empty() {
            return Ok(Some(
                SqlBuilder::new()
                    .select(&projection)
                    .from(self.table.name())
                    .filter(condition)
                    .order_by(&self.sort(&request.sort))
                    .limit(self.dialect, Some(1), None)
                    .build(),
            ));
        }
        self.require_returning("find_one_and_update")?;

        let query = match request.return_document {
            ReturnDocument::After => SqlBuilder::new()
                .update(self.table.name())
                .set(assignments)
                .filter(CompileResult::Sql(self.selected_rows(
                    self.row_key()?,
                    condition,
                    &request.sort,
                    Some(1),
                    None,
                )))
                .returning(&projection),
            ReturnDocument::Before => {
                self.require_modifying_cte("find_one_and_update returning the previous image")?;
                let key = self.primary_key("find_one_and_update returning the previous image")?;
                SqlBuilder::new()
                    .with(SELECTED, self.locked_first(condition, &request.sort))
                    .with(UPDATED, self.update_selected(key, assignments))
                    .select(&projection)
                    .from(SELECTED)
            }
        };
        Ok(Some(query.build()))
    }

    /// Delete the first matching record and return it.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedOperation`] when the dialect cannot
    /// return deleted rows or the table has no row key.
    pub fn find_one_and_delete(
        &self,
        request: &FindOneRequest,
    ) -> Result<Option<RawQuery>, QueryError> {
        let Some(condition) = self.matching(&request.filters)? else {
            return Ok(None);
        };
        self.require_returning("find_one_and_delete")?;
        let target = self.selected_rows(self.row_key()?, condition, &request.sort, Some(1), None);
        Ok(Some(
            SqlBuilder::new()
                .delete_from(self.table.name())
                .filter(CompileResult::Sql(target))
                .returning(&self.projection(request.includes.as_ref()))
                .build(),
        ))
    }

    /// `INSERT` of one record, returning it where the dialect allows.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ColumnNotExist`] for non-null values of unknown
    /// columns and type errors from the dialect.
    pub fn insert(&self, values: &BTreeMap<String, DynValue>) -> Result<RawQuery, QueryError> {
        let (columns, values): (Vec<String>, Vec<RawQuery>) =
            self.insert_row(values)?.into_iter().unzip();
        let builder = SqlBuilder::new().insert_into(self.table.name(), &columns);
        let builder = if values.is_empty() {
            builder.default_values()
        } else {
            builder.values(values)
        };
        let builder = if self.dialect.supports_returning() {
            builder.returning(&Projection::All)
        } else {
            builder
        };
        Ok(builder.build())
    }

    /// Atomic update-or-insert of the first matching record.
    ///
    /// The inserted record combines the top-level equalities of the filter,
    /// the initial values implied by `updates` and `set_on_insert`. Result
    /// rows carry [`DUPLICATE_MARKER`].
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedOperation`] when the dialect has no
    /// data-modifying common table expressions, and
    /// [`QueryError::InvalidExpression`] when a field is both updated and set
    /// on insert or nothing would be inserted. A `Divide` has no value to
    /// insert and fails with [`QueryError::UnsupportedOperation`].
    pub fn upsert(
        &self,
        request: &FindOneRequest,
        updates: &Updates,
        set_on_insert: &BTreeMap<String, DynValue>,
    ) -> Result<RawQuery, QueryError> {
        self.require_modifying_cte("upsert")?;
        if let Some(field) = updates.keys().find(|field| set_on_insert.contains_key(*field)) {
            return Err(QueryError::invalid(format!(
                "field `{field}` is both updated and set on insert"
            )));
        }

        let condition = self.condition(&request.filters)?;
        let mut row = self.filter_fields(&request.filters);
        for (field, operation) in updates {
            if let Some(initial) = initial_value(field, operation)? {
                row.insert(field.clone(), initial);
            }
        }
        row.extend(set_on_insert.iter().map(|(field, value)| (field.clone(), value.clone())));

        let duplicate = self.duplicate_condition(&row)?;
        let (columns, values): (Vec<String>, Vec<RawQuery>) =
            self.insert_row(&row)?.into_iter().unzip();
        if columns.is_empty() {
            return Err(QueryError::invalid(format!(
                "upsert into `{}` has no field to insert",
                self.table.name()
            )));
        }
        let assignments = self.assignments(updates)?;
        let projection = self.projection(request.includes.as_ref());
        let first_matching = self.locked_first(condition.clone(), &request.sort);

        let (mut builder, existing) = match request.return_document {
            ReturnDocument::After => {
                let updated = if assignments.is_empty() {
                    first_matching
                } else {
                    let target = if condition.is_false() {
                        CompileResult::False
                    } else {
                        CompileResult::Sql(self.selected_rows(
                            self.row_key()?,
                            condition,
                            &request.sort,
                            Some(1),
                            None,
                        ))
                    };
                    SqlBuilder::new()
                        .update(self.table.name())
                        .set(assignments)
                        .filter(target)
                        .returning(&Projection::All)
                        .build()
                };
                (SqlBuilder::new().with(UPDATED, updated), UPDATED)
            }
            ReturnDocument::Before => {
                let builder = SqlBuilder::new().with(SELECTED, first_matching);
                let builder = if assignments.is_empty() {
                    builder
                } else {
                    let key = self.primary_key("upsert returning the previous image")?;
                    builder.with(UPDATED, self.update_selected(key, assignments))
                };
                (builder, SELECTED)
            }
        };

        let mut insert_guard = vec![not_exists(existing)];
        if let Some(duplicate) = duplicate {
            builder = builder.with(
                DUPLICATED,
                SqlBuilder::new()
                    .select(&Projection::All)
                    .from(self.table.name())
                    .filter(CompileResult::Sql(conjunction(vec![
                        duplicate.into_condition(),
                        not_exists(existing),
                    ])))
                    .build(),
            );
            insert_guard.push(not_exists(DUPLICATED));
        }
        let insert = SqlBuilder::new()
            .insert_into(self.table.name(), &columns)
            .literal("SELECT")
            .raw(RawQuery::join(values, ", "))
            .filter(CompileResult::Sql(conjunction(insert_guard)));
        let insert = match request.return_document {
            ReturnDocument::After => insert.returning(&Projection::All),
            ReturnDocument::Before => insert.literal("RETURNING 1"),
        };
        builder = builder.with(INSERTED, insert.build());

        builder = builder
            .literal("SELECT CAST(NULL AS BOOLEAN) AS")
            .raw(RawQuery::identifier(DUPLICATE_MARKER))
            .literal(",")
            .raw(projection.to_sql())
            .from(existing);
        if request.return_document == ReturnDocument::After {
            builder = builder
                .union_all()
                .literal("SELECT CAST(NULL AS BOOLEAN),")
                .raw(projection.to_sql())
                .from(INSERTED);
        }
        if self.has_duplicate_relation(&row) {
            builder = builder
                .union_all()
                .literal("SELECT TRUE,")
                .raw(projection.to_sql())
                .from(DUPLICATED);
        }
        Ok(builder.build())
    }

    /// `SET` assignments for `updates`.
    ///
    /// Setting an unknown column to NULL is a no-op, since absent columns
    /// already read as NULL.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ColumnNotExist`] for any other update of an
    /// unknown column, and dialect errors for unsupported operations.
    pub fn assignments(&self, updates: &Updates) -> Result<Vec<RawQuery>, QueryError> {
        let mut assignments = Vec::with_capacity(updates.len());
        for (column, operation) in updates {
            match self.table.column_type(column) {
                Some(column_type) => {
                    assignments.push(self.dialect.update_operation(column, column_type, operation)?);
                }
                None if operation.as_set().is_some_and(DynValue::is_null) => {}
                None => return Err(self.missing_column(column)),
            }
        }
        Ok(assignments)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Compiled filter, or `None` when it can never match.
    fn matching(&self, filters: &[Predicate]) -> Result<Option<CompileResult>, QueryError> {
        let condition = self.condition(filters)?;
        if condition.is_false() {
            tracing::trace!(
                table = self.table.name(),
                dialect = self.dialect.name(),
                "filter never matches, skipping statement"
            );
            return Ok(None);
        }
        Ok(Some(condition))
    }

    fn sort(&self, sort: &[(String, SortOrder)]) -> Vec<(String, SortOrder)> {
        sort.iter()
            .filter(|(column, _)| self.table.has_column(column))
            .cloned()
            .collect()
    }

    fn row_key(&self) -> Result<RowKey<'a>, QueryError> {
        let primary_keys = self.table.primary_keys();
        if !primary_keys.is_empty() {
            return Ok(RowKey::Columns(primary_keys));
        }
        self.dialect.row_identifier().map(RowKey::Hidden).ok_or_else(|| {
            QueryError::unsupported_operation(format!(
                "table `{}` has no primary key to address single rows",
                self.table.name()
            ))
        })
    }

    fn primary_key(&self, operation: &str) -> Result<RowKey<'a>, QueryError> {
        let primary_keys = self.table.primary_keys();
        if primary_keys.is_empty() {
            return Err(QueryError::unsupported_operation(format!(
                "{operation} requires a primary key on `{}`",
                self.table.name()
            )));
        }
        Ok(RowKey::Columns(primary_keys))
    }

    /// `key IN (SELECT * FROM (SELECT key ... LIMIT n FOR UPDATE) AS "selected")`.
    ///
    /// The derived table lets dialects without `LIMIT` in `IN` subqueries
    /// run the same statement.
    fn selected_rows(
        &self,
        key: RowKey<'_>,
        condition: CompileResult,
        sort: &[(String, SortOrder)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> RawQuery {
        let inner = SqlBuilder::new()
            .literal("SELECT")
            .raw(key.select_list())
            .from(self.table.name())
            .filter(condition)
            .order_by(&self.sort(sort))
            .limit(self.dialect, limit, offset)
            .lock(self.dialect)
            .build();
        key.tuple()
            .then_literal("IN (SELECT * FROM")
            .then(inner.parenthesized())
            .then_literal("AS")
            .then_identifier(SELECTED)
            .then_literal(")")
    }

    /// `SELECT * ... ORDER BY ... LIMIT 1 FOR UPDATE`.
    fn locked_first(&self, condition: CompileResult, sort: &[(String, SortOrder)]) -> RawQuery {
        SqlBuilder::new()
            .select(&Projection::All)
            .from(self.table.name())
            .filter(condition)
            .order_by(&self.sort(sort))
            .limit(self.dialect, Some(1), None)
            .lock(self.dialect)
            .build()
    }

    /// `UPDATE ... WHERE key IN (SELECT key FROM "selected") RETURNING 1`.
    fn update_selected(&self, key: RowKey<'_>, assignments: Vec<RawQuery>) -> RawQuery {
        let target = key
            .tuple()
            .then_literal("IN (SELECT")
            .then(key.select_list())
            .then_literal("FROM")
            .then_identifier(SELECTED)
            .then_literal(")");
        SqlBuilder::new()
            .update(self.table.name())
            .set(assignments)
            .filter(CompileResult::Sql(target))
            .literal("RETURNING 1")
            .build()
    }

    /// Column values implied by the top-level equalities of `filters` on
    /// existing columns.
    fn filter_fields(&self, filters: &[Predicate]) -> BTreeMap<String, DynValue> {
        let mut top_level = Vec::new();
        flatten(filters, true, &mut top_level);
        let mut fields = BTreeMap::new();
        for predicate in top_level {
            let Predicate::Equal(lhs, rhs) = predicate else {
                continue;
            };
            match (lhs, rhs) {
                (Operand::Key(column), Operand::Value(value))
                | (Operand::Value(value), Operand::Key(column))
                    if self.table.has_column(column) =>
                {
                    fields.insert(column.clone(), value.clone());
                }
                (Operand::ObjectId, Operand::Value(value))
                | (Operand::Value(value), Operand::ObjectId) => {
                    self.object_id_fields(value, &mut fields);
                }
                _ => {}
            }
        }
        fields
    }

    fn object_id_fields(&self, value: &DynValue, fields: &mut BTreeMap<String, DynValue>) {
        match self.table.primary_keys() {
            [single] => {
                fields.insert(single.clone(), value.clone());
            }
            composite => {
                if let Some(parts) = value.as_object() {
                    for column in composite {
                        if let Some(part) = parts.get(column) {
                            fields.insert(column.clone(), part.clone());
                        }
                    }
                }
            }
        }
    }

    fn has_duplicate_relation(&self, row: &BTreeMap<String, DynValue>) -> bool {
        let primary_keys = self.table.primary_keys();
        !primary_keys.is_empty() && primary_keys.iter().all(|column| row.contains_key(column))
    }

    /// Condition matching an existing record with the primary key of `row`.
    fn duplicate_condition(
        &self,
        row: &BTreeMap<String, DynValue>,
    ) -> Result<Option<CompileResult>, QueryError> {
        if !self.has_duplicate_relation(row) {
            return Ok(None);
        }
        let equalities: Vec<Predicate> = self
            .table
            .primary_keys()
            .iter()
            .filter_map(|column| {
                row.get(column)
                    .map(|value| key(column.as_str()).eq(value.clone()))
            })
            .collect();
        self.condition(&equalities).map(Some)
    }

    /// `(column, value expression)` pairs for an insert.
    fn insert_row(
        &self,
        values: &BTreeMap<String, DynValue>,
    ) -> Result<Vec<(String, RawQuery)>, QueryError> {
        let mut row = Vec::with_capacity(values.len());
        for (column, value) in values {
            match self.table.column_type(column) {
                Some(column_type) => {
                    row.push((column.clone(), self.dialect.type_cast(value, column_type)?));
                }
                None if value.is_null() => {}
                None => return Err(self.missing_column(column)),
            }
        }
        Ok(row)
    }

    fn missing_column(&self, column: &str) -> QueryError {
        QueryError::ColumnNotExist {
            table: self.table.name().to_owned(),
            column: column.to_owned(),
        }
    }

    fn require_returning(&self, operation: &str) -> Result<(), QueryError> {
        if self.dialect.supports_returning() {
            Ok(())
        } else {
            Err(QueryError::unsupported_operation(format!(
                "{} cannot return modified rows for {operation}",
                self.dialect.name()
            )))
        }
    }

    fn require_modifying_cte(&self, operation: &str) -> Result<(), QueryError> {
        if self.dialect.supports_modifying_cte() {
            Ok(())
        } else {
            Err(QueryError::unsupported_operation(format!(
                "{} cannot run {operation} as a single statement",
                self.dialect.name()
            )))
        }
    }
}

/// Value a field takes when the upsert inserts a new record: the result of
/// applying the operation to a missing value.
fn initial_value(
    field: &str,
    operation: &UpdateOperation,
) -> Result<Option<DynValue>, QueryError> {
    match operation {
        UpdateOperation::Set(value)
        | UpdateOperation::Increment(value)
        | UpdateOperation::Min(value)
        | UpdateOperation::Max(value) => Ok(Some(value.clone())),
        UpdateOperation::Decrement(value) => negation(value).map(Some),
        UpdateOperation::Multiply(value) => zero_like(value).map(Some),
        UpdateOperation::Divide(_) => Err(QueryError::unsupported_operation(format!(
            "upsert cannot divide the missing value of `{field}`"
        ))),
        UpdateOperation::Push(items) => Ok(Some(DynValue::Array(items.clone()))),
        UpdateOperation::AddToSet(items) => Ok(Some(DynValue::Array(distinct(items)))),
        UpdateOperation::RemoveAll(_) | UpdateOperation::PopFirst | UpdateOperation::PopLast => {
            Ok(None)
        }
    }
}

fn not_exists(relation: &str) -> RawQuery {
    RawQuery::literal("NOT EXISTS (SELECT 1 FROM")
        .then_identifier(relation)
        .then_literal(")")
}

fn conjunction(parts: Vec<RawQuery>) -> RawQuery {
    RawQuery::join(parts, " AND ")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres, Sqlite};
    use crate::predicate::object_id;
    use crate::table::ColumnType;

    fn users() -> TableInfo {
        TableInfo::new("users")
            .with_column("id", ColumnType::Integer)
            .with_column("name", ColumnType::Text)
            .with_column("age", ColumnType::Integer)
            .with_primary_key(["id"])
    }

    fn render(query: &RawQuery, dialect: &dyn Dialect) -> String {
        match query.render(dialect) {
            Ok(rendered) => rendered.sql,
            Err(error) => panic!("statement should render: {error}"),
        }
    }

    fn planned(result: Result<Option<RawQuery>, QueryError>, dialect: &dyn Dialect) -> String {
        match result {
            Ok(Some(query)) => render(&query, dialect),
            Ok(None) => panic!("statement should not be skipped"),
            Err(error) => panic!("statement should plan: {error}"),
        }
    }

    fn updates(entries: impl IntoIterator<Item = (&'static str, UpdateOperation)>) -> Updates {
        entries
            .into_iter()
            .map(|(field, operation)| (field.to_owned(), operation))
            .collect()
    }

    #[test]
    fn count_wraps_windowed_requests() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let plain = planned(planner.count(&FindRequest::new("users")), &Postgres);
        assert_eq!(plain, r#"SELECT COUNT(*) AS "count" FROM "users""#);

        let windowed = planned(
            planner.count(&FindRequest::new("users").skip(2).limit(5)),
            &Postgres,
        );
        assert_eq!(
            windowed,
            r#"SELECT COUNT(*) AS "count" FROM (SELECT 1 FROM "users" LIMIT 5 OFFSET 2) AS "counted""#
        );
    }

    #[test]
    fn never_matching_filters_skip_io() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindRequest::new("users").filter(key("missing").eq(1_i64));
        assert!(matches!(planner.find(&request), Ok(None)));
        assert!(matches!(planner.count(&request), Ok(None)));
        assert!(matches!(planner.delete(&request), Ok(None)));
        let one = FindOneRequest::new("users").filter(key("missing").eq(1_i64));
        assert!(matches!(planner.find_one_and_delete(&one), Ok(None)));
    }

    #[test]
    fn find_projects_and_drops_unknown_sort_keys() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindRequest::new("users")
            .include(["name", "nickname"])
            .sort("nickname", SortOrder::Ascending)
            .sort("age", SortOrder::Descending)
            .limit(3);
        assert_eq!(
            planned(planner.find(&request), &Postgres),
            r#"SELECT "name" FROM "users" ORDER BY "age" DESC LIMIT 3"#
        );

        let unknown_only = FindRequest::new("users").include(["nickname"]);
        assert_eq!(
            planned(planner.find(&unknown_only), &Postgres),
            r#"SELECT "id" FROM "users""#
        );
    }

    #[test]
    fn windowed_delete_goes_through_the_row_key() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindRequest::new("users").sort("age", SortOrder::Ascending).limit(2);
        assert_eq!(
            planned(planner.delete(&request), &Postgres),
            r#"DELETE FROM "users" WHERE "id" IN (SELECT * FROM (SELECT "id" FROM "users" ORDER BY "age" ASC LIMIT 2 FOR UPDATE) AS "selected")"#
        );
        assert_eq!(
            planned(planner.delete(&FindRequest::new("users")), &Postgres),
            r#"DELETE FROM "users""#
        );
    }

    #[test]
    fn keyless_tables_fall_back_to_the_row_identifier() {
        let table = TableInfo::new("events").with_column("kind", ColumnType::Text);
        let request = FindRequest::new("events").limit(1);

        let postgres = StatementPlanner::new(&Postgres, &table);
        assert!(planned(postgres.delete(&request), &Postgres).contains("ctid IN (SELECT * FROM (SELECT ctid FROM"));

        let sqlite = StatementPlanner::new(&Sqlite, &table);
        assert!(planned(sqlite.delete(&request), &Sqlite).contains("rowid IN (SELECT * FROM (SELECT rowid FROM"));

        let mysql = StatementPlanner::new(&MySql, &table);
        assert!(matches!(
            mysql.delete(&request),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn composite_keys_compare_as_tuples() {
        let table = TableInfo::new("memberships")
            .with_column("org", ColumnType::Text)
            .with_column("user", ColumnType::Text)
            .with_primary_key(["org", "user"]);
        let planner = StatementPlanner::new(&Postgres, &table);
        let sql = planned(
            planner.find_one_and_delete(&FindOneRequest::new("memberships")),
            &Postgres,
        );
        assert!(sql.starts_with(
            r#"DELETE FROM "memberships" WHERE ("org", "user") IN (SELECT * FROM (SELECT "org", "user" FROM"#
        ));
        assert!(sql.ends_with("RETURNING *"));
    }

    #[test]
    fn find_one_and_update_after_and_before() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let changes = updates([("name", UpdateOperation::set("ann"))]);

        let after = planned(
            planner.find_one_and_update(&FindOneRequest::new("users").include(["name"]), &changes),
            &Postgres,
        );
        assert!(after.starts_with(r#"UPDATE "users" SET "name" = "#));
        assert!(after.contains(r#"WHERE "id" IN (SELECT * FROM (SELECT "id" FROM "users" LIMIT 1 FOR UPDATE) AS "selected")"#));
        assert!(after.ends_with(r#"RETURNING "name""#));

        let before = planned(
            planner.find_one_and_update(
                &FindOneRequest::new("users").returning(ReturnDocument::Before),
                &changes,
            ),
            &Postgres,
        );
        assert!(before.starts_with(
            r#"WITH "selected" AS (SELECT * FROM "users" LIMIT 1 FOR UPDATE), "updated" AS (UPDATE "users" SET "name" = "#
        ));
        assert!(before.ends_with(
            r#"WHERE "id" IN (SELECT "id" FROM "selected") RETURNING 1) SELECT * FROM "selected""#
        ));
    }

    #[test]
    fn find_one_and_update_without_returning_is_unsupported() {
        let table = users();
        let planner = StatementPlanner::new(&MySql, &table);
        let changes = updates([("age", UpdateOperation::Increment(1_i64.into()))]);
        assert!(matches!(
            planner.find_one_and_update(&FindOneRequest::new("users"), &changes),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn unknown_columns_in_updates() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let null_only = updates([("nickname", UpdateOperation::set(DynValue::Null))]);
        assert!(matches!(planner.assignments(&null_only), Ok(parts) if parts.is_empty()));

        let valued = updates([("nickname", UpdateOperation::set("x"))]);
        assert!(matches!(
            planner.assignments(&valued),
            Err(QueryError::ColumnNotExist { column, .. }) if column == "nickname"
        ));
    }

    #[test]
    fn insert_with_and_without_values() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let Ok(empty) = planner.insert(&BTreeMap::new()) else {
            panic!("empty insert should plan");
        };
        assert_eq!(render(&empty, &Postgres), r#"INSERT INTO "users" DEFAULT VALUES RETURNING *"#);

        let row: BTreeMap<String, DynValue> = [
            ("id".to_owned(), DynValue::from(1_i64)),
            ("nickname".to_owned(), DynValue::Null),
        ]
        .into_iter()
        .collect();
        let Ok(insert) = planner.insert(&row) else {
            panic!("insert should plan");
        };
        assert!(render(&insert, &Postgres).starts_with(r#"INSERT INTO "users" ("id") VALUES ("#));

        let mysql = StatementPlanner::new(&MySql, &table);
        let Ok(insert) = mysql.insert(&row) else {
            panic!("insert should plan");
        };
        assert!(!render(&insert, &MySql).contains("RETURNING"));
    }

    #[test]
    fn upsert_after_has_every_branch() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindOneRequest::new("users").filter(key("id").eq(7_i64));
        let changes = updates([("name", UpdateOperation::set("ann"))]);
        let on_insert: BTreeMap<String, DynValue> =
            [("age".to_owned(), DynValue::from(30_i64))].into_iter().collect();
        let Ok(query) = planner.upsert(&request, &changes, &on_insert) else {
            panic!("upsert should plan");
        };
        let sql = render(&query, &Postgres);
        assert!(sql.starts_with(r#"WITH "updated" AS (UPDATE "users" SET "name" = "#));
        assert!(sql.contains(r#"RETURNING *), "duplicated" AS (SELECT * FROM "users" WHERE "id" = "#));
        assert!(sql.contains(r#"AND NOT EXISTS (SELECT 1 FROM "updated")), "inserted" AS (INSERT INTO "users" ("age", "id", "name") SELECT "#));
        assert!(sql.contains(r#"WHERE NOT EXISTS (SELECT 1 FROM "updated") AND NOT EXISTS (SELECT 1 FROM "duplicated") RETURNING *)"#));
        assert!(sql.contains(r#"SELECT CAST(NULL AS BOOLEAN) AS "is_duplicated", * FROM "updated""#));
        assert!(sql.contains(r#"UNION ALL SELECT CAST(NULL AS BOOLEAN), * FROM "inserted""#));
        assert!(sql.ends_with(r#"UNION ALL SELECT TRUE, * FROM "duplicated""#));
    }

    #[test]
    fn upsert_before_returns_only_the_previous_image() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindOneRequest::new("users")
            .filter(object_id().eq(7_i64))
            .returning(ReturnDocument::Before);
        let changes = updates([("age", UpdateOperation::Increment(1_i64.into()))]);
        let Ok(query) = planner.upsert(&request, &changes, &BTreeMap::new()) else {
            panic!("upsert should plan");
        };
        let sql = render(&query, &Postgres);
        assert!(sql.starts_with(r#"WITH "selected" AS (SELECT * FROM "users" WHERE "id" = "#));
        assert!(sql.contains(r#"INSERT INTO "users" ("age", "id") SELECT"#));
        assert!(sql.contains("RETURNING 1)"));
        assert!(!sql.contains(r#"FROM "inserted""#));
        assert!(sql.contains(r#"SELECT CAST(NULL AS BOOLEAN) AS "is_duplicated", * FROM "selected""#));
    }

    #[test]
    fn upsert_without_primary_key_in_row_has_no_duplicate_branch() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindOneRequest::new("users").filter(key("name").eq("ann"));
        let Ok(query) = planner.upsert(&request, &Updates::new(), &BTreeMap::new()) else {
            panic!("upsert should plan");
        };
        let sql = render(&query, &Postgres);
        assert!(!sql.contains("duplicated\" AS"));
        assert!(sql.starts_with(r#"WITH "updated" AS (SELECT * FROM "users" WHERE "name" = "#));
    }

    #[test]
    fn upsert_with_never_matching_filter_still_inserts() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindOneRequest::new("users").filter(key("missing").eq(1_i64));
        let changes = updates([("name", UpdateOperation::set("ann"))]);
        let Ok(query) = planner.upsert(&request, &changes, &BTreeMap::new()) else {
            panic!("upsert should plan");
        };
        let sql = render(&query, &Postgres);
        assert!(sql.contains(r#"UPDATE "users" SET "name" = $1 WHERE FALSE RETURNING *"#));
        assert!(sql.contains(r#"INSERT INTO "users" ("name") SELECT $1"#));
    }

    #[test]
    fn upsert_inserts_the_operation_applied_to_a_missing_value() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindOneRequest::new("users").filter(object_id().eq(7_i64));

        let decrement = updates([("age", UpdateOperation::Decrement(5_i64.into()))]);
        let Ok(query) = planner.upsert(&request, &decrement, &BTreeMap::new()) else {
            panic!("decrementing upsert should plan");
        };
        let Ok(rendered) = query.render(&Postgres) else {
            panic!("decrementing upsert should render");
        };
        assert!(rendered.sql.contains(r#"INSERT INTO "users" ("age", "id") SELECT"#));
        assert!(rendered.binds.contains(&DynValue::from(-5_i64)));

        let multiply = updates([("age", UpdateOperation::Multiply(3_i64.into()))]);
        let Ok(query) = planner.upsert(&request, &multiply, &BTreeMap::new()) else {
            panic!("multiplying upsert should plan");
        };
        let Ok(rendered) = query.render(&Postgres) else {
            panic!("multiplying upsert should render");
        };
        assert!(rendered.sql.contains(r#"INSERT INTO "users" ("age", "id") SELECT"#));
        assert!(rendered.binds.contains(&DynValue::from(0_i64)));

        let divide = updates([("age", UpdateOperation::Divide(2_i64.into()))]);
        assert!(matches!(
            planner.upsert(&request, &divide, &BTreeMap::new()),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn zero_limit_renders_an_empty_window() {
        let table = users();
        let planner = StatementPlanner::new(&Postgres, &table);
        let request = FindRequest::new("users").filter(key("age").gt(1_i64)).limit(0);
        assert!(planned(planner.find(&request), &Postgres).ends_with("LIMIT 0"));
        assert!(planned(planner.count(&request), &Postgres).contains("LIMIT 0) AS \"counted\""));
        assert!(planned(planner.delete(&request), &Postgres).contains("LIMIT 0 FOR UPDATE"));
    }

    #[test]
    fn upsert_rejections() {
        let table = users();
        let request = FindOneRequest::new("users");
        let changes = updates([("name", UpdateOperation::set("ann"))]);
        let on_insert: BTreeMap<String, DynValue> =
            [("name".to_owned(), DynValue::from("bob"))].into_iter().collect();

        let postgres = StatementPlanner::new(&Postgres, &table);
        assert!(matches!(
            postgres.upsert(&request, &changes, &on_insert),
            Err(QueryError::InvalidExpression(_))
        ));
        assert!(matches!(
            postgres.upsert(&request, &Updates::new(), &BTreeMap::new()),
            Err(QueryError::InvalidExpression(_))
        ));
        for dialect in [&MySql as &dyn Dialect, &Sqlite] {
            let planner = StatementPlanner::new(dialect, &table);
            assert!(matches!(
                planner.upsert(&request, &changes, &BTreeMap::new()),
                Err(QueryError::UnsupportedOperation(_))
            ));
        }
    }
}
