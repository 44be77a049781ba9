//! Fluent SQL statement builder.
//!
//! [`SqlBuilder`] appends clauses to a [`RawQuery`] in the order they are
//! called. It does no validation of clause order; the statement planner in
//! [`crate::statement`] is responsible for producing well-formed statements.

use polystore_value::DynValue;

use crate::compile::CompileResult;
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::raw::RawQuery;
use crate::request::SortOrder;

/// Columns produced by a `SELECT` or `RETURNING` clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    /// Every column (`*`).
    #[default]
    All,
    /// Only the named columns.
    Columns(Vec<String>),
}

impl Projection {
    /// The projection as SQL.
    pub fn to_sql(&self) -> RawQuery {
        match self {
            Self::All => RawQuery::literal("*"),
            Self::Columns(columns) => RawQuery::identifiers(columns),
        }
    }
}

/// Column of a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Backend type, written verbatim (`BIGINT`, `jsonb`, `text[]`, ...).
    pub sql_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Literal default value.
    pub default: Option<DynValue>,
}

impl ColumnDefinition {
    /// A nullable column without default.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Disallow NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a literal default.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<DynValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_sql(&self) -> Result<RawQuery, QueryError> {
        let mut sql = RawQuery::identifier(self.name.as_str()).then_literal(self.sql_type.as_str());
        if !self.nullable {
            sql.push_literal("NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_literal("DEFAULT");
            sql.append(ddl_literal(default)?);
        }
        Ok(sql)
    }
}

/// DDL cannot take bind parameters, so defaults are written inline.
fn ddl_literal(value: &DynValue) -> Result<RawQuery, QueryError> {
    match value {
        DynValue::Null
        | DynValue::Bool(_)
        | DynValue::SignedInt(_)
        | DynValue::UnsignedInt(_)
        | DynValue::Float(_)
        | DynValue::Decimal(_) => Ok(RawQuery::value(value.clone())),
        DynValue::String(text) => Ok(RawQuery::literal(format!(
            "'{}'",
            text.replace('\'', "''")
        ))),
        other => Err(QueryError::unsupported_type(format!(
            "a {} value cannot be used as a column default",
            other.kind().name()
        ))),
    }
}

/// Accumulates SQL clauses.
#[derive(Debug, Clone, Default)]
pub struct SqlBuilder {
    query: RawQuery,
    common_tables: usize,
}

impl SqlBuilder {
    /// An empty statement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw SQL.
    #[must_use]
    pub fn raw(mut self, query: RawQuery) -> Self {
        self.query.append(query);
        self
    }

    /// Append literal SQL text.
    #[must_use]
    pub fn literal(mut self, text: &str) -> Self {
        self.query.push_literal(text);
        self
    }

    /// `WITH "name" AS (query)`, or `, "name" AS (query)` after the first.
    #[must_use]
    pub fn with(mut self, name: &str, query: RawQuery) -> Self {
        self.query
            .push_literal(if self.common_tables == 0 { "WITH" } else { "," });
        self.query.push_identifier(name);
        self.query.push_literal("AS");
        self.query.append(query.parenthesized());
        self.common_tables = self.common_tables.saturating_add(1);
        self
    }

    /// `SELECT projection`.
    #[must_use]
    pub fn select(mut self, projection: &Projection) -> Self {
        self.query.push_literal("SELECT");
        self.query.append(projection.to_sql());
        self
    }

    /// `FROM "table"`.
    #[must_use]
    pub fn from(mut self, table: &str) -> Self {
        self.query.push_literal("FROM");
        self.query.push_identifier(table);
        self
    }

    /// `WHERE condition`; nothing when the condition is always true.
    #[must_use]
    pub fn filter(mut self, condition: CompileResult) -> Self {
        if condition != CompileResult::True {
            self.query.push_literal("WHERE");
            self.query.append(condition.into_condition());
        }
        self
    }

    /// `ORDER BY ...`; nothing when `sort` is empty.
    #[must_use]
    pub fn order_by(mut self, sort: &[(String, SortOrder)]) -> Self {
        if sort.is_empty() {
            return self;
        }
        self.query.push_literal("ORDER BY");
        self.query.append(RawQuery::join(
            sort.iter().map(|(column, order)| {
                RawQuery::identifier(column.as_str()).then_literal(order.keyword())
            }),
            ", ",
        ));
        self
    }

    /// `LIMIT` / `OFFSET` in the dialect's syntax.
    #[must_use]
    pub fn limit(mut self, dialect: &dyn Dialect, limit: Option<u64>, offset: Option<u64>) -> Self {
        self.query.append(dialect.limit_clause(limit, offset));
        self
    }

    /// Row lock suffix, if the dialect has one.
    #[must_use]
    pub fn lock(mut self, dialect: &dyn Dialect) -> Self {
        if let Some(lock) = dialect.row_lock() {
            self.query.push_literal(lock);
        }
        self
    }

    /// `DELETE FROM "table"`.
    #[must_use]
    pub fn delete_from(mut self, table: &str) -> Self {
        self.query.push_literal("DELETE FROM");
        self.query.push_identifier(table);
        self
    }

    /// `UPDATE "table"`.
    #[must_use]
    pub fn update(mut self, table: &str) -> Self {
        self.query.push_literal("UPDATE");
        self.query.push_identifier(table);
        self
    }

    /// `SET a, b, ...`.
    #[must_use]
    pub fn set(mut self, assignments: Vec<RawQuery>) -> Self {
        self.query.push_literal("SET");
        self.query.append(RawQuery::join(assignments, ", "));
        self
    }

    /// `INSERT INTO "table" ("a", "b")`; the column list is omitted when
    /// empty.
    #[must_use]
    pub fn insert_into<S: AsRef<str>>(mut self, table: &str, columns: &[S]) -> Self {
        self.query.push_literal("INSERT INTO");
        self.query.push_identifier(table);
        if !columns.is_empty() {
            self.query.append(RawQuery::identifiers(columns).parenthesized());
        }
        self
    }

    /// `VALUES (a, b, ...)`.
    #[must_use]
    pub fn values(mut self, values: Vec<RawQuery>) -> Self {
        self.query.push_literal("VALUES");
        self.query.append(RawQuery::join(values, ", ").parenthesized());
        self
    }

    /// `DEFAULT VALUES`.
    #[must_use]
    pub fn default_values(mut self) -> Self {
        self.query.push_literal("DEFAULT VALUES");
        self
    }

    /// `RETURNING projection`.
    #[must_use]
    pub fn returning(mut self, projection: &Projection) -> Self {
        self.query.push_literal("RETURNING");
        self.query.append(projection.to_sql());
        self
    }

    /// `UNION ALL`.
    #[must_use]
    pub fn union_all(mut self) -> Self {
        self.query.push_literal("UNION ALL");
        self
    }

    /// `CREATE TABLE [IF NOT EXISTS] "table" (columns..., PRIMARY KEY (...))`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedType`] if a column default cannot be
    /// written inline.
    pub fn create_table(
        mut self,
        table: &str,
        if_not_exists: bool,
        columns: &[ColumnDefinition],
        primary_key: &[String],
    ) -> Result<Self, QueryError> {
        self.query.push_literal(if if_not_exists {
            "CREATE TABLE IF NOT EXISTS"
        } else {
            "CREATE TABLE"
        });
        self.query.push_identifier(table);
        let mut definitions = columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<Result<Vec<_>, _>>()?;
        if !primary_key.is_empty() {
            definitions.push(
                RawQuery::literal("PRIMARY KEY")
                    .then(RawQuery::identifiers(primary_key).parenthesized()),
            );
        }
        self.query
            .append(RawQuery::join(definitions, ", ").parenthesized());
        Ok(self)
    }

    /// `DROP TABLE [IF EXISTS] "table"`.
    #[must_use]
    pub fn drop_table(mut self, table: &str, if_exists: bool) -> Self {
        self.query.push_literal(if if_exists {
            "DROP TABLE IF EXISTS"
        } else {
            "DROP TABLE"
        });
        self.query.push_identifier(table);
        self
    }

    /// The accumulated statement.
    pub fn build(self) -> RawQuery {
        self.query
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres};

    fn sql(builder: SqlBuilder, dialect: &dyn Dialect) -> String {
        match builder.build().render(dialect) {
            Ok(rendered) => rendered.sql,
            Err(error) => panic!("statement should render: {error}"),
        }
    }

    #[test]
    fn select_with_every_clause() {
        let builder = SqlBuilder::new()
            .select(&Projection::Columns(vec!["id".to_owned(), "name".to_owned()]))
            .from("users")
            .filter(CompileResult::Sql(RawQuery::identifier("age").then_literal(">").then_bind(18_i64)))
            .order_by(&[("name".to_owned(), SortOrder::Ascending), ("id".to_owned(), SortOrder::Descending)])
            .limit(&Postgres, Some(10), Some(20))
            .lock(&Postgres);
        assert_eq!(
            sql(builder, &Postgres),
            r#"SELECT "id", "name" FROM "users" WHERE "age" > $1 ORDER BY "name" ASC, "id" DESC LIMIT 10 OFFSET 20 FOR UPDATE"#
        );
    }

    #[test]
    fn always_true_filter_is_omitted() {
        let builder = SqlBuilder::new()
            .select(&Projection::All)
            .from("users")
            .filter(CompileResult::True);
        assert_eq!(sql(builder, &Postgres), r#"SELECT * FROM "users""#);
    }

    #[test]
    fn insert_update_delete() {
        let insert = SqlBuilder::new()
            .insert_into("users", &["id", "name"])
            .values(vec![RawQuery::value(1_i64), RawQuery::bind("ann")])
            .returning(&Projection::All);
        assert_eq!(
            sql(insert, &Postgres),
            r#"INSERT INTO "users" ("id", "name") VALUES (1, $1) RETURNING *"#
        );

        let update = SqlBuilder::new()
            .update("users")
            .set(vec![RawQuery::identifier("name").then_literal("=").then_bind("bob")])
            .filter(CompileResult::False);
        assert_eq!(sql(update, &MySql), "UPDATE `users` SET `name` = ? WHERE FALSE");

        let delete = SqlBuilder::new().delete_from("users");
        assert_eq!(sql(delete, &Postgres), r#"DELETE FROM "users""#);
    }

    #[test]
    fn common_table_expressions_chain() {
        let builder = SqlBuilder::new()
            .with("a", RawQuery::literal("SELECT 1"))
            .with("b", RawQuery::literal("SELECT 2"))
            .select(&Projection::All)
            .from("a")
            .union_all()
            .select(&Projection::All)
            .from("b");
        assert_eq!(
            sql(builder, &Postgres),
            r#"WITH "a" AS (SELECT 1), "b" AS (SELECT 2) SELECT * FROM "a" UNION ALL SELECT * FROM "b""#
        );
    }

    #[test]
    fn create_and_drop_table() {
        let columns = [
            ColumnDefinition::new("id", "BIGINT").not_null(),
            ColumnDefinition::new("name", "TEXT").default_value("it's"),
            ColumnDefinition::new("active", "BOOLEAN").default_value(true),
        ];
        let Ok(create) =
            SqlBuilder::new().create_table("users", true, &columns, &["id".to_owned()])
        else {
            panic!("create table should build");
        };
        assert_eq!(
            sql(create, &Postgres),
            r#"CREATE TABLE IF NOT EXISTS "users" ("id" BIGINT NOT NULL, "name" TEXT DEFAULT 'it''s', "active" BOOLEAN DEFAULT TRUE, PRIMARY KEY ("id"))"#
        );
        assert_eq!(
            sql(SqlBuilder::new().drop_table("users", true), &Postgres),
            r#"DROP TABLE IF EXISTS "users""#
        );
    }

    #[test]
    fn non_literal_defaults_are_rejected() {
        let columns = [ColumnDefinition::new("id", "uuid").default_value(uuid::Uuid::nil())];
        assert!(SqlBuilder::new().create_table("t", false, &columns, &[]).is_err());
    }
}
