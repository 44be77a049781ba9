//! `PostgreSQL` query launcher.
//!
//! [`PostgresPool`] owns the connection pool; [`PgSession`] is one logical
//! connection that launches queries and runs transactions. Statements are
//! planned by [`StatementPlanner`] with the `PostgreSQL` dialect and executed
//! with [`sqlx`] runtime queries (not compile-time checked) so no live
//! database is needed at build time. Every value reaches the server as a bind
//! parameter.
//!
//! Table metadata is read from `information_schema` on first use and cached
//! per session.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt as _};
use polystore_query::dialect::{Postgres as PostgresDialect, column_type_from_udt};
use polystore_query::statement::COUNT_COLUMN;
use polystore_query::{
    DUPLICATE_MARKER, Dialect, FindOneRequest, FindRequest, RawQuery, RenderedQuery,
    StatementPlanner, TableInfo, Updates,
};
use polystore_value::{DateComponents, DynValue, ValueError};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::query::Query;
use sqlx::{Column as _, PgPool, Row as _, TypeInfo as _};

use crate::config::PostgresConfig;
use crate::error::DbError;
use crate::launcher::{DbObject, QueryLauncher};
use crate::transaction::{self, IsolationLevel, TransactionOptions, TransactionState, Transactional};

/// Attempts of an upsert that lost an insert race to a concurrent caller.
const UPSERT_ATTEMPTS: u32 = 3;

/// Savepoint isolating an upsert inside an open transaction.
const UPSERT_SAVEPOINT: &str = "polystore_upsert";

const TABLE_COLUMNS_SQL: &str = "\
SELECT c.column_name::text, c.udt_name::text \
FROM information_schema.columns c \
WHERE c.table_schema = COALESCE($1, current_schema()) AND c.table_name = $2 \
ORDER BY c.ordinal_position";

const PRIMARY_KEY_SQL: &str = "\
SELECT k.column_name::text, t.constraint_name::text \
FROM information_schema.table_constraints t \
JOIN information_schema.key_column_usage k \
  ON k.constraint_schema = t.constraint_schema \
 AND k.constraint_name = t.constraint_name \
 AND k.table_name = t.table_name \
WHERE t.constraint_type = 'PRIMARY KEY' \
  AND t.table_schema = COALESCE($1, current_schema()) AND t.table_name = $2 \
ORDER BY k.ordinal_position";

/// Types decoded as plain strings.
const TEXT_TYPES: [&str; 6] = ["TEXT", "VARCHAR", "BPCHAR", "NAME", "CHAR", "CITEXT"];

type PgQuery<'q> = Query<'q, sqlx::Postgres, PgArguments>;

/// Connection pool handle to `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Connect to `PostgreSQL` using the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the connection fails.
    /// Returns [`DbError::InvalidConfiguration`] if the URL cannot be parsed.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DbError> {
        let connect_options: PgConnectOptions = config.url.parse().map_err(|e: sqlx::Error| {
            DbError::InvalidConfiguration(format!("Invalid database URL: {e}"))
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(connect_options)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Connect using a database URL string with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, DbError> {
        Self::connect(&PostgresConfig::new(url)).await
    }

    /// Open a session on this pool.
    pub fn session(&self) -> PgSession {
        PgSession::new(self.pool.clone())
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

/// One logical `PostgreSQL` connection.
///
/// Outside a transaction each statement runs on any pooled connection; inside
/// one, every statement runs on the transaction's connection.
pub struct PgSession {
    pool: PgPool,
    transaction: Option<sqlx::Transaction<'static, sqlx::Postgres>>,
    state: TransactionState,
    dialect: Arc<dyn Dialect>,
    tables: HashMap<String, Arc<TableInfo>>,
}

impl PgSession {
    /// A session drawing connections from `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction: None,
            state: TransactionState::Idle,
            dialect: Arc::new(PostgresDialect),
            tables: HashMap::new(),
        }
    }

    /// The SQL dialect statements are rendered in.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Metadata for `name` (`table` or `schema.table`), cached after the
    /// first lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] if the table has no columns, or
    /// the backend error.
    pub async fn table(&mut self, name: &str) -> Result<Arc<TableInfo>, DbError> {
        if let Some(table) = self.tables.get(name) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(self.introspect(name).await?);
        self.tables.insert(name.to_owned(), Arc::clone(&table));
        Ok(table)
    }

    /// Drop cached metadata for `name`, e.g. after altering the table.
    pub fn forget_table(&mut self, name: &str) {
        self.tables.remove(name);
    }

    /// Execute a statement built by hand, such as DDL from
    /// [`SqlBuilder`](polystore_query::SqlBuilder). Returns the number of
    /// affected rows.
    ///
    /// # Errors
    ///
    /// Returns rendering or backend errors.
    pub async fn execute(&mut self, query: &RawQuery) -> Result<u64, DbError> {
        let rendered = query.render(self.dialect.as_ref())?;
        self.execute_rendered(&rendered).await
    }

    /// Run a statement built by hand and decode its rows.
    ///
    /// # Errors
    ///
    /// Returns rendering, backend or decoding errors.
    pub async fn fetch(&mut self, query: &RawQuery) -> Result<Vec<DbObject>, DbError> {
        let rendered = query.render(self.dialect.as_ref())?;
        self.fetch_all(&rendered)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }

    /// Plan and render the `SELECT` for `request`, for use with
    /// [`PgSession::stream`]. `None` when the filter can never match.
    ///
    /// # Errors
    ///
    /// Returns compilation errors.
    pub async fn prepare_find(
        &mut self,
        request: &FindRequest,
    ) -> Result<Option<RenderedQuery>, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        StatementPlanner::new(dialect.as_ref(), &table)
            .find(request)?
            .map(|query| query.render(dialect.as_ref()))
            .transpose()
            .map_err(DbError::from)
    }

    /// Stream the rows of a rendered query without buffering them.
    pub fn stream<'a>(
        &'a mut self,
        rendered: &'a RenderedQuery,
    ) -> BoxStream<'a, Result<DbObject, DbError>> {
        let query = match prepare(rendered) {
            Ok(query) => query,
            Err(error) => return stream::once(async move { Err(error) }).boxed(),
        };
        let rows = match self.transaction.as_deref_mut() {
            Some(connection) => query.fetch(connection),
            None => query.fetch(&self.pool),
        };
        rows.map(|row| decode_row(&row?)).boxed()
    }

    /// Run `body` in a transaction on this session.
    ///
    /// # Errors
    ///
    /// See [`transaction::with_transaction`].
    pub async fn with_transaction<T, F>(
        &mut self,
        options: &TransactionOptions,
        body: F,
    ) -> Result<T, DbError>
    where
        F: for<'c> FnMut(&'c mut Self) -> BoxFuture<'c, Result<T, DbError>>,
    {
        transaction::with_transaction(self, options, body).await
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn introspect(&mut self, name: &str) -> Result<TableInfo, DbError> {
        let (schema, table_name) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, name),
        };
        let columns_query = sqlx::query_as::<_, (String, String)>(TABLE_COLUMNS_SQL)
            .bind(schema)
            .bind(table_name);
        let key_query = sqlx::query_as::<_, (String, String)>(PRIMARY_KEY_SQL)
            .bind(schema)
            .bind(table_name);
        let (columns, primary_keys) = match self.transaction.as_deref_mut() {
            Some(connection) => {
                let columns = columns_query.fetch_all(&mut *connection).await?;
                (columns, key_query.fetch_all(&mut *connection).await?)
            }
            None => (
                columns_query.fetch_all(&self.pool).await?,
                key_query.fetch_all(&self.pool).await?,
            ),
        };
        if columns.is_empty() {
            return Err(DbError::TableNotFound(name.to_owned()));
        }

        tracing::debug!(
            table = name,
            columns = columns.len(),
            primary_keys = primary_keys.len(),
            "Loaded table metadata"
        );
        let mut table = columns
            .into_iter()
            .fold(TableInfo::new(name), |table, (column, udt)| {
                table.with_column(column, column_type_from_udt(&udt))
            });
        if let Some((_, constraint)) = primary_keys.first() {
            table = table.with_primary_key_constraint(constraint.clone());
        }
        Ok(table.with_primary_key(primary_keys.into_iter().map(|(column, _)| column)))
    }

    async fn fetch_all(&mut self, rendered: &RenderedQuery) -> Result<Vec<PgRow>, DbError> {
        let query = prepare(rendered)?;
        let rows = match self.transaction.as_deref_mut() {
            Some(connection) => query.fetch_all(connection).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        Ok(rows)
    }

    async fn fetch_optional(
        &mut self,
        rendered: &RenderedQuery,
    ) -> Result<Option<PgRow>, DbError> {
        let query = prepare(rendered)?;
        let row = match self.transaction.as_deref_mut() {
            Some(connection) => query.fetch_optional(connection).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(row)
    }

    async fn execute_rendered(&mut self, rendered: &RenderedQuery) -> Result<u64, DbError> {
        let query = prepare(rendered)?;
        let result = match self.transaction.as_deref_mut() {
            Some(connection) => query.execute(connection).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn execute_sql(&mut self, sql: &str) -> Result<(), DbError> {
        tracing::debug!(sql, "Executing statement");
        match self.transaction.as_deref_mut() {
            Some(connection) => sqlx::query(sql).execute(connection).await?,
            None => sqlx::query(sql).execute(&self.pool).await?,
        };
        Ok(())
    }

    /// Run the upsert statement, rolling back to a savepoint if it loses an
    /// insert race inside an open transaction.
    async fn run_upsert(&mut self, rendered: &RenderedQuery) -> Result<Vec<PgRow>, DbError> {
        if self.transaction.is_none() {
            return self.fetch_all(rendered).await;
        }
        self.execute_sql(&format!("SAVEPOINT {UPSERT_SAVEPOINT}")).await?;
        match self.fetch_all(rendered).await {
            Ok(rows) => {
                self.execute_sql(&format!("RELEASE SAVEPOINT {UPSERT_SAVEPOINT}"))
                    .await?;
                Ok(rows)
            }
            Err(error) => {
                if error.is_unique_violation() {
                    self.execute_sql(&format!("ROLLBACK TO SAVEPOINT {UPSERT_SAVEPOINT}"))
                        .await?;
                }
                Err(error)
            }
        }
    }
}

impl QueryLauncher for PgSession {
    async fn count(&mut self, request: &FindRequest) -> Result<u64, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let Some(query) = StatementPlanner::new(dialect.as_ref(), &table).count(request)? else {
            return Ok(0);
        };
        let rendered = query.render(dialect.as_ref())?;
        let count = match self.fetch_optional(&rendered).await? {
            Some(row) => row.try_get::<i64, _>(COUNT_COLUMN)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find(&mut self, request: &FindRequest) -> Result<Vec<DbObject>, DbError> {
        let Some(rendered) = self.prepare_find(request).await? else {
            return Ok(Vec::new());
        };
        self.fetch_all(&rendered).await?.iter().map(decode_row).collect()
    }

    async fn find_and_delete(&mut self, request: &FindRequest) -> Result<Option<u64>, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let Some(query) = StatementPlanner::new(dialect.as_ref(), &table).delete(request)? else {
            return Ok(None);
        };
        let deleted = self.execute_rendered(&query.render(dialect.as_ref())?).await?;
        Ok((deleted > 0).then_some(deleted))
    }

    async fn find_one_and_update(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
    ) -> Result<Option<DbObject>, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let Some(query) =
            StatementPlanner::new(dialect.as_ref(), &table).find_one_and_update(request, updates)?
        else {
            return Ok(None);
        };
        let row = self.fetch_optional(&query.render(dialect.as_ref())?).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn find_one_and_delete(
        &mut self,
        request: &FindOneRequest,
    ) -> Result<Option<DbObject>, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let Some(query) =
            StatementPlanner::new(dialect.as_ref(), &table).find_one_and_delete(request)?
        else {
            return Ok(None);
        };
        let row = self.fetch_optional(&query.render(dialect.as_ref())?).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn find_one_and_upsert(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
        set_on_insert: &DbObject,
    ) -> Result<Option<DbObject>, DbError> {
        let table = self.table(&request.collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let rendered = StatementPlanner::new(dialect.as_ref(), &table)
            .upsert(request, updates, set_on_insert)?
            .render(dialect.as_ref())?;

        let mut attempt: u32 = 1;
        loop {
            match self.run_upsert(&rendered).await {
                Ok(rows) => return upsert_result(&rows),
                Err(error) if error.is_unique_violation() && attempt < UPSERT_ATTEMPTS => {
                    tracing::debug!(
                        table = request.collection.as_str(),
                        attempt,
                        "Upsert lost an insert race, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn insert(
        &mut self,
        collection: &str,
        fields: &DbObject,
    ) -> Result<Option<DbObject>, DbError> {
        let table = self.table(collection).await?;
        let dialect = Arc::clone(&self.dialect);
        let rendered = StatementPlanner::new(dialect.as_ref(), &table)
            .insert(fields)?
            .render(dialect.as_ref())?;
        match self.fetch_optional(&rendered).await {
            Ok(row) => row.as_ref().map(decode_row).transpose(),
            Err(error) if is_primary_key_violation(&error, &table) => {
                Err(DbError::DuplicatedPrimaryKey)
            }
            Err(error) => Err(error),
        }
    }
}

impl Transactional for PgSession {
    fn transaction_state(&self) -> TransactionState {
        self.state
    }

    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<(), DbError> {
        if self.transaction.is_some() {
            return Err(DbError::TransactionDeadlocks);
        }
        let mut transaction = self.pool.begin().await?;
        if let Some(level) = isolation.sql() {
            sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))
                .execute(&mut *transaction)
                .await?;
        }
        self.transaction = Some(transaction);
        self.state = TransactionState::InTransaction;
        tracing::debug!(?isolation, "PostgreSQL transaction started");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), DbError> {
        let Some(transaction) = self.transaction.take() else {
            return Ok(());
        };
        if let Err(error) = transaction.commit().await {
            self.state = TransactionState::Aborted;
            return Err(error.into());
        }
        self.state = TransactionState::Committed;
        tracing::debug!("PostgreSQL transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), DbError> {
        self.state = TransactionState::Aborted;
        if let Some(transaction) = self.transaction.take() {
            transaction.rollback().await?;
            tracing::debug!("PostgreSQL transaction rolled back");
        }
        Ok(())
    }

    fn discard_transaction(&mut self) {
        // Dropping an open sqlx transaction queues its rollback.
        self.transaction = None;
        self.state = TransactionState::Aborted;
    }
}

// =============================================================================
// Binding and decoding
// =============================================================================

fn prepare(rendered: &RenderedQuery) -> Result<PgQuery<'_>, DbError> {
    tracing::debug!(
        sql = rendered.sql.as_str(),
        binds = rendered.binds.len(),
        "Executing statement"
    );
    rendered
        .binds
        .iter()
        .try_fold(sqlx::query(&rendered.sql), bind)
}

fn bind<'q>(query: PgQuery<'q>, value: &DynValue) -> Result<PgQuery<'q>, DbError> {
    let query = match value {
        DynValue::Null => query.bind(None::<String>),
        DynValue::Bool(value) => query.bind(*value),
        DynValue::String(value) => query.bind(value.clone()),
        DynValue::SignedInt(value) => query.bind(*value),
        DynValue::UnsignedInt(value) => match i64::try_from(*value) {
            Ok(signed) => query.bind(signed),
            Err(_) => query.bind(Decimal::from(*value)),
        },
        DynValue::Float(value) => query.bind(*value),
        DynValue::Decimal(value) => query.bind(*value),
        DynValue::Date(value) => query.bind(*value),
        DynValue::DateComponents(components) => bind_components(query, components)?,
        DynValue::Binary(value) => query.bind(value.clone()),
        DynValue::Uuid(value) => query.bind(*value),
        DynValue::ObjectId(value) => query.bind(value.to_hex()),
        DynValue::Array(_) | DynValue::Object(_) => {
            query.bind(sqlx::types::Json(value.to_plain_json()))
        }
        DynValue::Regex(_) | DynValue::Timestamp(_) => {
            return Err(ValueError::unsupported("PostgreSQL parameter", value.kind().name()).into());
        }
    };
    Ok(query)
}

fn bind_components<'q>(
    query: PgQuery<'q>,
    components: &DateComponents,
) -> Result<PgQuery<'q>, DbError> {
    if let Some(instant) = components.instant() {
        return Ok(query.bind(instant));
    }
    if let Some(date_time) = components.date_time() {
        return Ok(query.bind(date_time));
    }
    if let Some(date) = components.date() {
        return Ok(query.bind(date));
    }
    if let Some(time) = components.time() {
        return Ok(query.bind(time));
    }
    Err(ValueError::unsupported("complete date or time", "partial date components").into())
}

fn decode_row(row: &PgRow) -> Result<DbObject, DbError> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_column(row, column.ordinal(), column.type_info())
                .map_err(|error| match error {
                    DbError::Value(error) => DbError::Value(error.at(column.name())),
                    other => other,
                })?;
            Ok((column.name().to_owned(), value))
        })
        .collect()
}

fn decode_column(row: &PgRow, index: usize, type_info: &PgTypeInfo) -> Result<DynValue, DbError> {
    let type_name = type_info.name();
    let value = match type_name {
        "BOOL" => nullable(row.try_get::<Option<bool>, _>(index)?),
        "INT2" => nullable(row.try_get::<Option<i16>, _>(index)?),
        "INT4" => nullable(row.try_get::<Option<i32>, _>(index)?),
        "INT8" => nullable(row.try_get::<Option<i64>, _>(index)?),
        "FLOAT4" => nullable(row.try_get::<Option<f32>, _>(index)?),
        "FLOAT8" => nullable(row.try_get::<Option<f64>, _>(index)?),
        "NUMERIC" => nullable(row.try_get::<Option<Decimal>, _>(index)?),
        name if TEXT_TYPES.contains(&name) => {
            nullable(row.try_get::<Option<String>, _>(index)?)
        }
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map_or(DynValue::Null, DynValue::Binary),
        "UUID" => nullable(row.try_get::<Option<uuid::Uuid>, _>(index)?),
        "TIMESTAMPTZ" => nullable(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?),
        "TIMESTAMP" => nullable(row.try_get::<Option<chrono::NaiveDateTime>, _>(index)?),
        "DATE" => nullable(row.try_get::<Option<chrono::NaiveDate>, _>(index)?),
        "TIME" => nullable(row.try_get::<Option<chrono::NaiveTime>, _>(index)?),
        "JSON" | "JSONB" => nullable(row.try_get::<Option<serde_json::Value>, _>(index)?),
        "VOID" => DynValue::Null,
        "BOOL[]" => array::<bool>(row, index)?,
        "INT2[]" => array::<i16>(row, index)?,
        "INT4[]" => array::<i32>(row, index)?,
        "INT8[]" => array::<i64>(row, index)?,
        "FLOAT4[]" => array::<f32>(row, index)?,
        "FLOAT8[]" => array::<f64>(row, index)?,
        "NUMERIC[]" => array::<Decimal>(row, index)?,
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => array::<String>(row, index)?,
        "UUID[]" => array::<uuid::Uuid>(row, index)?,
        "TIMESTAMPTZ[]" => array::<chrono::DateTime<chrono::Utc>>(row, index)?,
        "DATE[]" => array::<chrono::NaiveDate>(row, index)?,
        "JSONB[]" | "JSON[]" => array::<serde_json::Value>(row, index)?,
        _ if reads_as_text(type_info.kind()) => {
            nullable(row.try_get_unchecked::<Option<String>, _>(index)?)
        }
        _ => {
            tracing::debug!(type_name, "No decoder for PostgreSQL column type");
            return Err(
                ValueError::unsupported("PostgreSQL column type", "unrecognized type").into(),
            );
        }
    };
    Ok(value)
}

/// Whether a column of a type with no dedicated decoder has a text wire
/// form: enums and domains over text.
fn reads_as_text(kind: &PgTypeKind) -> bool {
    match kind {
        PgTypeKind::Enum(_) => true,
        PgTypeKind::Domain(base) => TEXT_TYPES
            .iter()
            .any(|text| base.name().eq_ignore_ascii_case(text)),
        _ => false,
    }
}

fn nullable<T: Into<DynValue>>(value: Option<T>) -> DynValue {
    value.map_or(DynValue::Null, Into::into)
}

fn array<T>(row: &PgRow, index: usize) -> Result<DynValue, DbError>
where
    T: Into<DynValue>,
    Vec<Option<T>>: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    let items: Option<Vec<Option<T>>> = row.try_get(index)?;
    Ok(items.map_or(DynValue::Null, |items| {
        DynValue::Array(items.into_iter().map(nullable).collect())
    }))
}

fn upsert_result(rows: &[PgRow]) -> Result<Option<DbObject>, DbError> {
    let mut result = None;
    for row in rows {
        let mut object = decode_row(row)?;
        let duplicated = object
            .remove(DUPLICATE_MARKER)
            .and_then(|marker| marker.as_bool())
            .unwrap_or(false);
        if duplicated {
            return Err(DbError::DuplicatedPrimaryKey);
        }
        result.get_or_insert(object);
    }
    Ok(result)
}

fn is_primary_key_violation(error: &DbError, table: &TableInfo) -> bool {
    match error {
        DbError::Postgres(sqlx::Error::Database(database)) => {
            error.is_unique_violation() && names_primary_key(database.constraint(), table)
        }
        _ => false,
    }
}

/// Whether `constraint` is the primary key constraint of `table`. The name
/// comes from introspection, so renamed constraints are recognised.
fn names_primary_key(constraint: Option<&str>, table: &TableInfo) -> bool {
    constraint.is_some_and(|constraint| table.primary_key_constraint() == Some(constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enums_and_text_domains_read_as_text() {
        let labels: Arc<[String]> = Arc::from(vec!["happy".to_owned(), "sad".to_owned()]);
        assert!(reads_as_text(&PgTypeKind::Enum(labels)));
        assert!(reads_as_text(&PgTypeKind::Domain(PgTypeInfo::with_name("text"))));
        assert!(reads_as_text(&PgTypeKind::Domain(PgTypeInfo::with_name("VARCHAR"))));
        assert!(!reads_as_text(&PgTypeKind::Domain(PgTypeInfo::with_name("int4"))));
        assert!(!reads_as_text(&PgTypeKind::Simple));
        assert!(!reads_as_text(&PgTypeKind::Pseudo));
    }

    #[test]
    fn primary_key_is_matched_by_its_introspected_name() {
        let table = TableInfo::new("accounts")
            .with_primary_key(["id"])
            .with_primary_key_constraint("accounts_identity");
        assert!(names_primary_key(Some("accounts_identity"), &table));
        assert!(!names_primary_key(Some("accounts_pkey"), &table));
        assert!(!names_primary_key(Some("accounts_email_key"), &table));
        assert!(!names_primary_key(None, &table));

        let keyless = TableInfo::new("events");
        assert!(!names_primary_key(Some("events_pkey"), &keyless));
    }
}
