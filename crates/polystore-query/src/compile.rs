//! Predicate compilation for SQL dialects.
//!
//! [`SqlCompiler`] turns a [`Predicate`] into a [`CompileResult`]: either a
//! constant (`True`/`False`) or a [`RawQuery`] condition. Constants let
//! callers skip I/O when a filter can never match.
//!
//! A column the table does not have behaves exactly like a column holding
//! NULL. NULL equals NULL, differs from every other value, and never
//! satisfies an ordering or pattern test. Negation keeps that two-valued
//! reading by coalescing the SQL `UNKNOWN` to `FALSE` before negating.

use polystore_value::DynValue;

use crate::dialect::{Dialect, Pattern, PatternKind};
use crate::error::QueryError;
use crate::predicate::{Operand, Predicate, flatten};
use crate::raw::RawQuery;
use crate::table::TableInfo;

/// Outcome of compiling a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileResult {
    /// Matches every row.
    True,
    /// Matches no row.
    False,
    /// Matches the rows satisfying the condition.
    Sql(RawQuery),
}

impl CompileResult {
    /// Constant result for `value`.
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    /// Whether the result can never match.
    pub const fn is_false(&self) -> bool {
        matches!(self, Self::False)
    }

    /// Logical negation.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Sql(condition) => Self::Sql(
                RawQuery::literal("NOT COALESCE(")
                    .then(condition)
                    .then_literal(", FALSE)"),
            ),
        }
    }

    /// The condition as SQL, with constants spelled `TRUE` / `FALSE`.
    pub fn into_condition(self) -> RawQuery {
        match self {
            Self::True => RawQuery::literal("TRUE"),
            Self::False => RawQuery::literal("FALSE"),
            Self::Sql(condition) => condition,
        }
    }
}

/// A comparison operand after column lookup.
#[derive(Debug, Clone)]
enum Resolved {
    /// A column the table does not have.
    Absent,
    /// A column expression.
    Column(RawQuery),
    /// A literal.
    Value(DynValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    Ordering(&'static str),
}

/// Compiles predicates against one table for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler<'a> {
    dialect: &'a dyn Dialect,
    table: &'a TableInfo,
}

impl<'a> SqlCompiler<'a> {
    /// A compiler for `table` rendered by `dialect`.
    pub const fn new(dialect: &'a dyn Dialect, table: &'a TableInfo) -> Self {
        Self { dialect, table }
    }

    /// Compile the conjunction of `filters`; an empty list matches every row.
    ///
    /// # Errors
    ///
    /// See [`SqlCompiler::compile`].
    pub fn compile_all(&self, filters: &[Predicate]) -> Result<CompileResult, QueryError> {
        if filters.is_empty() {
            return Ok(CompileResult::True);
        }
        self.junction(filters, true)
    }

    /// Compile one predicate.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidExpression`] for malformed trees (empty
    /// junctions, membership against a non-array, unusable object-id
    /// comparisons), and propagates dialect failures. Every child of a
    /// junction is compiled, so an error is reported even when an earlier
    /// sibling already decided the result.
    pub fn compile(&self, predicate: &Predicate) -> Result<CompileResult, QueryError> {
        match predicate {
            Predicate::Not(inner) => Ok(self.compile(inner)?.negate()),
            Predicate::And(children) => self.junction(children, true),
            Predicate::Or(children) => self.junction(children, false),
            Predicate::Equal(lhs, rhs) => self.compare(Comparison::Equal, lhs, rhs),
            Predicate::NotEqual(lhs, rhs) => self.compare(Comparison::NotEqual, lhs, rhs),
            Predicate::LessThan(lhs, rhs) => self.compare(Comparison::Ordering("<"), lhs, rhs),
            Predicate::GreaterThan(lhs, rhs) => self.compare(Comparison::Ordering(">"), lhs, rhs),
            Predicate::LessOrEqual(lhs, rhs) => self.compare(Comparison::Ordering("<="), lhs, rhs),
            Predicate::GreaterOrEqual(lhs, rhs) => {
                self.compare(Comparison::Ordering(">="), lhs, rhs)
            }
            Predicate::ContainsIn(lhs, rhs) => self.membership(lhs, rhs, false),
            Predicate::NotContainsIn(lhs, rhs) => self.membership(lhs, rhs, true),
            Predicate::Between(operand, low, high) => self.between(operand, low, high, false),
            Predicate::NotBetween(operand, low, high) => self.between(operand, low, high, true),
            Predicate::StartsWith(operand, text) => {
                self.pattern(operand, &Pattern::new(PatternKind::StartsWith, text.clone()))
            }
            Predicate::EndsWith(operand, text) => {
                self.pattern(operand, &Pattern::new(PatternKind::EndsWith, text.clone()))
            }
            Predicate::Contains(operand, text) => {
                self.pattern(operand, &Pattern::new(PatternKind::Contains, text.clone()))
            }
        }
    }

    fn junction(&self, children: &[Predicate], conjunction: bool) -> Result<CompileResult, QueryError> {
        if children.is_empty() {
            return Err(QueryError::invalid(if conjunction {
                "empty And"
            } else {
                "empty Or"
            }));
        }
        let mut flat = Vec::with_capacity(children.len());
        flatten(children, conjunction, &mut flat);

        let mut decided = false;
        let mut conditions = Vec::with_capacity(flat.len());
        for child in flat {
            match self.compile(child)? {
                CompileResult::True if !conjunction => decided = true,
                CompileResult::False if conjunction => decided = true,
                CompileResult::True | CompileResult::False => {}
                CompileResult::Sql(condition) => conditions.push(condition),
            }
        }
        if decided {
            return Ok(CompileResult::from_bool(!conjunction));
        }
        if conditions.len() <= 1 {
            return Ok(conditions
                .pop()
                .map_or(CompileResult::from_bool(conjunction), CompileResult::Sql));
        }
        let separator = if conjunction { " AND " } else { " OR " };
        Ok(CompileResult::Sql(
            RawQuery::join(conditions, separator).parenthesized(),
        ))
    }

    fn has_composite_key(&self) -> bool {
        self.table.primary_keys().len() > 1
    }

    fn resolve(&self, operand: &Operand) -> Result<Resolved, QueryError> {
        match operand {
            Operand::ObjectId => match self.table.primary_keys() {
                [column] => Ok(Resolved::Column(RawQuery::identifier(column.as_str()))),
                [] => Err(QueryError::invalid(format!(
                    "`{}` has no primary key to compare an object id against",
                    self.table.name()
                ))),
                _ => Err(QueryError::invalid(format!(
                    "the composite key of `{}` only supports equality and membership",
                    self.table.name()
                ))),
            },
            Operand::Key(name) if self.table.has_column(name) => {
                Ok(Resolved::Column(RawQuery::identifier(name.as_str())))
            }
            Operand::Key(_) => Ok(Resolved::Absent),
            Operand::Value(value) => Ok(Resolved::Value(value.clone())),
        }
    }

    /// Equality of every key column against the matching field of `key`.
    fn composite_equality(&self, key: &DynValue) -> Result<Vec<Predicate>, QueryError> {
        let DynValue::Object(fields) = key else {
            return Err(QueryError::invalid(format!(
                "the composite key of `{}` must be compared against an object, not {}",
                self.table.name(),
                key.kind().name()
            )));
        };
        Ok(self
            .table
            .primary_keys()
            .iter()
            .map(|column| {
                Predicate::Equal(
                    Operand::Key(column.clone()),
                    Operand::Value(fields.get(column).cloned().unwrap_or_default()),
                )
            })
            .collect())
    }

    fn compare(
        &self,
        comparison: Comparison,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<CompileResult, QueryError> {
        if matches!((lhs, rhs), (Operand::ObjectId, Operand::ObjectId)) {
            match comparison {
                Comparison::Equal => return Ok(CompileResult::True),
                Comparison::NotEqual => return Ok(CompileResult::False),
                Comparison::Ordering(_) => {}
            }
        }
        if self.has_composite_key() {
            let key = match (lhs, rhs) {
                (Operand::ObjectId, Operand::Value(key)) | (Operand::Value(key), Operand::ObjectId) => {
                    Some(key)
                }
                _ => None,
            };
            if let Some(key) = key {
                let equalities = self.composite_equality(key)?;
                return match comparison {
                    Comparison::Equal => self.compile(&Predicate::And(equalities)),
                    Comparison::NotEqual => self.compile(&Predicate::Or(
                        equalities
                            .into_iter()
                            .map(|equality| match equality {
                                Predicate::Equal(column, value) => Predicate::NotEqual(column, value),
                                other => other.negate(),
                            })
                            .collect(),
                    )),
                    Comparison::Ordering(symbol) => Err(QueryError::invalid(format!(
                        "composite keys cannot be compared with `{symbol}`"
                    ))),
                };
            }
        }

        let lhs = self.resolve(lhs)?;
        let rhs = self.resolve(rhs)?;
        Ok(match comparison {
            Comparison::Equal => self.equality(lhs, rhs, false),
            Comparison::NotEqual => self.equality(lhs, rhs, true),
            Comparison::Ordering(symbol) => Self::ordering(symbol, lhs, rhs),
        })
    }

    fn equality(&self, lhs: Resolved, rhs: Resolved, negated: bool) -> CompileResult {
        let null_test = if negated { "IS NOT NULL" } else { "IS NULL" };
        match (lhs, rhs) {
            (Resolved::Absent, Resolved::Absent) => CompileResult::from_bool(!negated),
            (Resolved::Value(a), Resolved::Value(b)) => CompileResult::from_bool((a == b) != negated),
            (Resolved::Absent, Resolved::Value(value)) | (Resolved::Value(value), Resolved::Absent) => {
                CompileResult::from_bool(value.is_null() != negated)
            }
            (Resolved::Absent, Resolved::Column(column))
            | (Resolved::Column(column), Resolved::Absent) => {
                CompileResult::Sql(column.then_literal(null_test))
            }
            (Resolved::Column(column), Resolved::Value(value))
            | (Resolved::Value(value), Resolved::Column(column)) => {
                if value.is_null() {
                    CompileResult::Sql(column.then_literal(null_test))
                } else if negated {
                    CompileResult::Sql(
                        self.dialect
                            .null_safe_not_equal(column, RawQuery::bind(value)),
                    )
                } else {
                    CompileResult::Sql(column.then_literal("=").then_bind(value))
                }
            }
            (Resolved::Column(a), Resolved::Column(b)) => CompileResult::Sql(if negated {
                self.dialect.null_safe_not_equal(a, b)
            } else {
                self.dialect.null_safe_equal(a, b)
            }),
        }
    }

    fn ordering(symbol: &str, lhs: Resolved, rhs: Resolved) -> CompileResult {
        match (operand_sql(lhs), operand_sql(rhs)) {
            (Some(lhs), Some(rhs)) => {
                CompileResult::Sql(lhs.then_literal(symbol).then(rhs))
            }
            _ => CompileResult::False,
        }
    }

    fn membership(
        &self,
        lhs: &Operand,
        rhs: &Operand,
        negated: bool,
    ) -> Result<CompileResult, QueryError> {
        let Operand::Value(DynValue::Array(items)) = rhs else {
            return Err(QueryError::invalid(
                "membership tests need an array of values on the right",
            ));
        };

        if matches!(lhs, Operand::ObjectId) && self.has_composite_key() {
            let alternatives = items
                .iter()
                .map(|item| self.composite_equality(item).map(Predicate::And))
                .collect::<Result<Vec<_>, _>>()?;
            if alternatives.is_empty() {
                return Ok(CompileResult::from_bool(negated));
            }
            let any = Predicate::Or(alternatives);
            return self.compile(&if negated { any.negate() } else { any });
        }

        let column = match self.resolve(lhs)? {
            Resolved::Absent => {
                return Ok(CompileResult::from_bool(
                    items.contains(&DynValue::Null) != negated,
                ));
            }
            Resolved::Value(value) => {
                return Ok(CompileResult::from_bool(items.contains(&value) != negated));
            }
            Resolved::Column(column) => column,
        };

        let has_null = items.iter().any(DynValue::is_null);
        let values: Vec<RawQuery> = items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| RawQuery::bind(item.clone()))
            .collect();
        if values.is_empty() {
            return Ok(match (has_null, negated) {
                (false, _) => CompileResult::from_bool(negated),
                (true, false) => CompileResult::Sql(column.then_literal("IS NULL")),
                (true, true) => CompileResult::Sql(column.then_literal("IS NOT NULL")),
            });
        }

        let list = RawQuery::join(values, ", ").parenthesized();
        let condition = match (has_null, negated) {
            (false, false) => column.then_literal("IN").then(list),
            (true, false) => column
                .clone()
                .then_literal("IS NULL OR")
                .then(column)
                .then_literal("IN")
                .then(list)
                .parenthesized(),
            (false, true) => column
                .clone()
                .then_literal("IS NULL OR")
                .then(column)
                .then_literal("NOT IN")
                .then(list)
                .parenthesized(),
            (true, true) => column
                .clone()
                .then_literal("IS NOT NULL AND")
                .then(column)
                .then_literal("NOT IN")
                .then(list)
                .parenthesized(),
        };
        Ok(CompileResult::Sql(condition))
    }

    fn between(
        &self,
        operand: &Operand,
        low: &Operand,
        high: &Operand,
        negated: bool,
    ) -> Result<CompileResult, QueryError> {
        let operand = operand_sql(self.resolve(operand)?);
        let low = operand_sql(self.resolve(low)?);
        let high = operand_sql(self.resolve(high)?);
        let (Some(operand), Some(low), Some(high)) = (operand, low, high) else {
            return Ok(CompileResult::False);
        };
        Ok(CompileResult::Sql(
            operand
                .then_literal(if negated { "NOT BETWEEN" } else { "BETWEEN" })
                .then(low)
                .then_literal("AND")
                .then(high),
        ))
    }

    fn pattern(&self, operand: &Operand, pattern: &Pattern) -> Result<CompileResult, QueryError> {
        match self.resolve(operand)? {
            Resolved::Absent | Resolved::Value(DynValue::Null) => Ok(CompileResult::False),
            Resolved::Value(DynValue::String(text)) => {
                Ok(CompileResult::from_bool(pattern.matches(&text)))
            }
            Resolved::Value(other) => Err(QueryError::invalid(format!(
                "cannot match text against a {} value",
                other.kind().name()
            ))),
            Resolved::Column(column) => {
                Ok(CompileResult::Sql(self.dialect.matching(column, pattern)?))
            }
        }
    }
}

/// SQL for an ordering operand; `None` when the comparison can never hold.
fn operand_sql(resolved: Resolved) -> Option<RawQuery> {
    match resolved {
        Resolved::Absent | Resolved::Value(DynValue::Null) => None,
        Resolved::Column(column) => Some(column),
        Resolved::Value(value) => Some(RawQuery::bind(value)),
    }
}

impl Predicate {
    /// Compile this predicate for `dialect` against `table`.
    ///
    /// # Errors
    ///
    /// See [`SqlCompiler::compile`].
    pub fn to_sql(&self, dialect: &dyn Dialect, table: &TableInfo) -> Result<CompileResult, QueryError> {
        SqlCompiler::new(dialect, table).compile(self)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres};
    use crate::predicate::{key, object_id, value};
    use crate::table::ColumnType;

    fn table() -> TableInfo {
        TableInfo::new("items")
            .with_column("id", ColumnType::Integer)
            .with_column("x", ColumnType::Integer)
            .with_column("y", ColumnType::Integer)
            .with_column("name", ColumnType::Text)
            .with_primary_key(["id"])
    }

    fn composite() -> TableInfo {
        TableInfo::new("pairs")
            .with_column("a", ColumnType::Integer)
            .with_column("b", ColumnType::Integer)
            .with_primary_key(["a", "b"])
    }

    fn compile_with(dialect: &dyn Dialect, table: &TableInfo, predicate: &Predicate) -> CompileResult {
        match predicate.to_sql(dialect, table) {
            Ok(result) => result,
            Err(error) => panic!("predicate should compile: {error}"),
        }
    }

    fn sql_with(dialect: &dyn Dialect, table: &TableInfo, predicate: &Predicate) -> (String, Vec<DynValue>) {
        let CompileResult::Sql(query) = compile_with(dialect, table, predicate) else {
            panic!("expected a SQL condition");
        };
        let Ok(rendered) = query.render(dialect) else {
            panic!("condition should render");
        };
        (rendered.sql, rendered.binds)
    }

    fn sql(predicate: &Predicate) -> (String, Vec<DynValue>) {
        sql_with(&Postgres, &table(), predicate)
    }

    #[test]
    fn between_binds_both_bounds() {
        let (sql, binds) = sql(&key("x").between(1_i64, 10_i64));
        assert_eq!(sql, r#""x" BETWEEN $1 AND $2"#);
        assert_eq!(binds, vec![DynValue::from(1_i64), DynValue::from(10_i64)]);
    }

    #[test]
    fn repeated_values_share_placeholders_only_where_allowed() {
        let predicate = key("x").contains_in([5_i64, 5]);
        let (pg, pg_binds) = sql(&predicate);
        assert_eq!(pg, r#""x" IN ($1, $1)"#);
        assert_eq!(pg_binds, vec![DynValue::from(5_i64)]);

        let (mysql, mysql_binds) = sql_with(&MySql, &table(), &predicate);
        assert_eq!(mysql, "`x` IN (?, ?)");
        assert_eq!(mysql_binds, vec![DynValue::from(5_i64), DynValue::from(5_i64)]);
    }

    #[test]
    fn null_equality_uses_is_null() {
        assert_eq!(sql(&key("x").eq(DynValue::Null)).0, r#""x" IS NULL"#);
        assert_eq!(sql(&key("x").ne(DynValue::Null)).0, r#""x" IS NOT NULL"#);
        assert_eq!(sql(&key("x").ne(3_i64)).0, r#""x" IS DISTINCT FROM $1"#);
        assert_eq!(
            sql(&key("x").eq_operand(key("y"))).0,
            r#""x" IS NOT DISTINCT FROM "y""#
        );
    }

    #[test]
    fn absent_columns_behave_as_null() {
        let table = table();
        let check = |predicate: Predicate, expected: CompileResult| {
            assert_eq!(compile_with(&Postgres, &table, &predicate), expected, "{predicate:?}");
        };
        check(key("ghost").eq(DynValue::Null), CompileResult::True);
        check(key("ghost").eq(1_i64), CompileResult::False);
        check(key("ghost").ne(1_i64), CompileResult::True);
        check(key("ghost").gt(1_i64), CompileResult::False);
        check(key("ghost").between(1_i64, 2_i64), CompileResult::False);
        check(key("ghost").starts_with("a"), CompileResult::False);
        check(key("ghost").contains_in([1_i64]), CompileResult::False);
        check(key("ghost").not_contains_in([1_i64]), CompileResult::True);
        check(key("ghost").eq_operand(key("phantom")), CompileResult::True);
        check(key("ghost").ne_operand(key("phantom")), CompileResult::False);
        assert_eq!(sql(&key("ghost").eq_operand(key("x"))).0, r#""x" IS NULL"#);
    }

    #[test]
    fn literal_comparisons_fold() {
        let table = table();
        assert_eq!(
            compile_with(&Postgres, &table, &value(1_i64).eq_operand(value(1_u64))),
            CompileResult::True
        );
        assert_eq!(
            compile_with(&Postgres, &table, &value("a").contains_in(["b", "c"])),
            CompileResult::False
        );
        assert_eq!(
            compile_with(&Postgres, &table, &value("abc").starts_with("ab")),
            CompileResult::True
        );
    }

    #[test]
    fn junctions_short_circuit_on_constants() {
        let table = table();
        let and = key("ghost").eq(1_i64).and(key("x").eq(2_i64));
        assert_eq!(compile_with(&Postgres, &table, &and), CompileResult::False);

        let or = key("ghost").eq(DynValue::Null).or(key("x").eq(2_i64));
        assert_eq!(compile_with(&Postgres, &table, &or), CompileResult::True);

        let dropped = key("ghost").ne(1_i64).and(key("x").eq(2_i64));
        assert_eq!(sql(&dropped).0, r#""x" = $1"#);
    }

    #[test]
    fn junction_errors_surface_after_short_circuit() {
        let predicate = key("ghost")
            .eq(1_i64)
            .and(Predicate::ContainsIn(key("x"), value(1_i64)));
        assert!(matches!(
            predicate.to_sql(&Postgres, &table()),
            Err(QueryError::InvalidExpression(_))
        ));
    }

    #[test]
    fn empty_junctions_are_invalid() {
        assert!(Predicate::And(Vec::new()).to_sql(&Postgres, &table()).is_err());
        assert!(
            Predicate::Or(vec![Predicate::Or(Vec::new())])
                .to_sql(&Postgres, &table())
                .is_err()
        );
    }

    #[test]
    fn nested_junctions_are_associative() {
        let a = || key("x").eq(1_i64);
        let b = || key("y").eq(2_i64);
        let c = || key("name").eq("c");
        let left = Predicate::And(vec![Predicate::And(vec![a(), b()]), c()]);
        let right = Predicate::And(vec![a(), Predicate::And(vec![b(), c()])]);
        assert_eq!(sql(&left), sql(&right));
        assert_eq!(sql(&left).0, r#"("x" = $1 AND "y" = $2 AND "name" = $3)"#);
    }

    #[test]
    fn negation_is_two_valued() {
        assert_eq!(
            sql(&!key("x").eq(1_i64)).0,
            r#"NOT COALESCE("x" = $1, FALSE)"#
        );
        assert_eq!(
            compile_with(&Postgres, &table(), &!key("ghost").eq(1_i64)),
            CompileResult::True
        );
    }

    #[test]
    fn membership_with_null_items() {
        assert_eq!(
            sql(&key("x").contains_in([DynValue::from(1_i64), DynValue::Null])).0,
            r#"("x" IS NULL OR "x" IN ($1))"#
        );
        assert_eq!(
            sql(&key("x").not_contains_in([1_i64])).0,
            r#"("x" IS NULL OR "x" NOT IN ($1))"#
        );
        assert_eq!(
            compile_with(&Postgres, &table(), &key("x").contains_in(Vec::<DynValue>::new())),
            CompileResult::False
        );
    }

    #[test]
    fn patterns_are_escaped_and_bound() {
        let (sql, binds) = sql(&key("name").starts_with("a_b"));
        assert_eq!(sql, r#""name" LIKE $1"#);
        assert_eq!(binds, vec![DynValue::from(r"a\_b%")]);
    }

    #[test]
    fn object_id_uses_the_primary_key() {
        assert_eq!(sql(&object_id().eq(7_i64)).0, r#""id" = $1"#);
        assert_eq!(sql(&object_id().gt(7_i64)).0, r#""id" > $1"#);
    }

    #[test]
    fn composite_object_id_expands_per_column() {
        let table = composite();
        let key_value: DynValue = [("a", 1_i64), ("b", 2_i64)].into_iter().collect();

        let (equal, binds) = sql_with(&Postgres, &table, &object_id().eq(key_value.clone()));
        assert_eq!(equal, r#"("a" = $1 AND "b" = $2)"#);
        assert_eq!(binds, vec![DynValue::from(1_i64), DynValue::from(2_i64)]);

        let (not_equal, _) = sql_with(&Postgres, &table, &object_id().ne(key_value.clone()));
        assert_eq!(
            not_equal,
            r#"("a" IS DISTINCT FROM $1 OR "b" IS DISTINCT FROM $2)"#
        );

        let (membership, _) = sql_with(&Postgres, &table, &object_id().contains_in([key_value.clone()]));
        assert_eq!(membership, r#"("a" = $1 AND "b" = $2)"#);

        assert!(matches!(
            object_id().lt(key_value).to_sql(&Postgres, &table),
            Err(QueryError::InvalidExpression(_))
        ));
    }

    #[test]
    fn object_id_without_primary_key_is_invalid() {
        let table = TableInfo::new("log").with_column("line", ColumnType::Text);
        assert!(matches!(
            object_id().eq(1_i64).to_sql(&Postgres, &table),
            Err(QueryError::InvalidExpression(_))
        ));
    }
}
