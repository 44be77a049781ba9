//! Predicate and update compilation for document stores.
//!
//! The output is a [`DynValue::Object`] in MongoDB query syntax. Drivers
//! convert it to their native document type. Semantics match
//! [`crate::compile`]: a missing field is NULL, NULL equals NULL, and NULL
//! never satisfies an ordering or pattern test.

use std::collections::BTreeMap;

use polystore_value::DynValue;

use crate::dialect::{Pattern, PatternKind};
use crate::error::QueryError;
use crate::predicate::{Operand, Predicate, flatten};
use crate::table::TableInfo;
use crate::update::{UpdateOperation, Updates, distinct, negation};

/// Outcome of compiling a predicate for a document store.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFilter {
    /// Matches every document.
    True,
    /// Matches no document.
    False,
    /// Matches the documents selected by the query document.
    Filter(DynValue),
}

impl DocumentFilter {
    /// Constant result for `value`.
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    /// Logical negation.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Filter(filter) => Self::Filter(single("$nor", DynValue::Array(vec![filter]))),
        }
    }

    /// The query document, or `None` when nothing can match.
    pub fn into_document(self) -> Option<DynValue> {
        match self {
            Self::True => Some(DynValue::Object(BTreeMap::new())),
            Self::False => None,
            Self::Filter(filter) => Some(filter),
        }
    }
}

/// `{ key: value }`.
fn single(key: &str, value: DynValue) -> DynValue {
    DynValue::Object(BTreeMap::from([(key.to_owned(), value)]))
}

/// `{ field: { operator: value } }`.
fn field_test(field: &str, operator: &str, value: DynValue) -> DynValue {
    single(field, single(operator, value))
}

/// Aggregation expression for a field, with missing normalised to null.
fn field_expression(field: &str) -> DynValue {
    single(
        "$ifNull",
        DynValue::Array(vec![DynValue::String(format!("${field}")), DynValue::Null]),
    )
}

fn literal_expression(value: DynValue) -> DynValue {
    single("$literal", value)
}

fn mirrored(operator: &'static str) -> &'static str {
    match operator {
        "$lt" => "$gt",
        "$gt" => "$lt",
        "$lte" => "$gte",
        "$gte" => "$lte",
        other => other,
    }
}

/// Escape regular expression metacharacters.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if "\\^$.|?*+()[]{}".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn regex_source(pattern: &Pattern) -> String {
    let text = escape_regex(&pattern.text);
    match pattern.kind {
        PatternKind::StartsWith => format!("^{text}"),
        PatternKind::EndsWith => format!("{text}$"),
        PatternKind::Contains => text,
    }
}

/// Compiles predicates against one collection.
#[derive(Debug, Clone, Copy)]
pub struct DocumentCompiler<'a> {
    table: &'a TableInfo,
}

impl<'a> DocumentCompiler<'a> {
    /// A compiler for `table`; its primary key names the object-id field.
    pub const fn new(table: &'a TableInfo) -> Self {
        Self { table }
    }

    /// Compile the conjunction of `filters`; an empty list matches everything.
    ///
    /// # Errors
    ///
    /// See [`DocumentCompiler::compile`].
    pub fn compile_all(&self, filters: &[Predicate]) -> Result<DocumentFilter, QueryError> {
        if filters.is_empty() {
            return Ok(DocumentFilter::True);
        }
        self.junction(filters, true)
    }

    /// Compile one predicate.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidExpression`] for malformed trees, as the
    /// SQL compiler does, and for `Between` bounds that are not literals.
    pub fn compile(&self, predicate: &Predicate) -> Result<DocumentFilter, QueryError> {
        match predicate {
            Predicate::Not(inner) => Ok(self.compile(inner)?.negate()),
            Predicate::And(children) => self.junction(children, true),
            Predicate::Or(children) => self.junction(children, false),
            Predicate::Equal(lhs, rhs) => self.equality(lhs, rhs, false),
            Predicate::NotEqual(lhs, rhs) => self.equality(lhs, rhs, true),
            Predicate::LessThan(lhs, rhs) => self.ordering("$lt", lhs, rhs),
            Predicate::GreaterThan(lhs, rhs) => self.ordering("$gt", lhs, rhs),
            Predicate::LessOrEqual(lhs, rhs) => self.ordering("$lte", lhs, rhs),
            Predicate::GreaterOrEqual(lhs, rhs) => self.ordering("$gte", lhs, rhs),
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

    fn junction(&self, children: &[Predicate], conjunction: bool) -> Result<DocumentFilter, QueryError> {
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
        let mut filters = Vec::with_capacity(flat.len());
        for child in flat {
            match self.compile(child)? {
                DocumentFilter::True if !conjunction => decided = true,
                DocumentFilter::False if conjunction => decided = true,
                DocumentFilter::True | DocumentFilter::False => {}
                DocumentFilter::Filter(filter) => filters.push(filter),
            }
        }
        if decided {
            return Ok(DocumentFilter::from_bool(!conjunction));
        }
        if filters.len() <= 1 {
            return Ok(filters
                .pop()
                .map_or(DocumentFilter::from_bool(conjunction), DocumentFilter::Filter));
        }
        let operator = if conjunction { "$and" } else { "$or" };
        Ok(DocumentFilter::Filter(single(operator, DynValue::Array(filters))))
    }

    /// Field name behind an operand; `None` for literals.
    fn field<'o>(&'o self, operand: &'o Operand) -> Result<Option<&'o str>, QueryError> {
        match operand {
            Operand::Key(name) => Ok(Some(name)),
            Operand::Value(_) => Ok(None),
            Operand::ObjectId => match self.table.primary_keys() {
                [field] => Ok(Some(field)),
                [] => Err(QueryError::invalid(format!(
                    "`{}` has no primary key to compare an object id against",
                    self.table.name()
                ))),
                _ => Err(QueryError::invalid(format!(
                    "the composite key of `{}` only supports equality and membership",
                    self.table.name()
                ))),
            },
        }
    }

    fn composite_key<'p>(&self, lhs: &'p Operand, rhs: &'p Operand) -> Option<&'p DynValue> {
        if self.table.primary_keys().len() <= 1 {
            return None;
        }
        match (lhs, rhs) {
            (Operand::ObjectId, Operand::Value(key)) | (Operand::Value(key), Operand::ObjectId) => {
                Some(key)
            }
            _ => None,
        }
    }

    fn composite_equality(&self, key: &DynValue, negated: bool) -> Result<Predicate, QueryError> {
        let DynValue::Object(fields) = key else {
            return Err(QueryError::invalid(format!(
                "the composite key of `{}` must be compared against an object, not {}",
                self.table.name(),
                key.kind().name()
            )));
        };
        let tests = self.table.primary_keys().iter().map(|field| {
            let lhs = Operand::Key(field.clone());
            let rhs = Operand::Value(fields.get(field).cloned().unwrap_or_default());
            if negated {
                Predicate::NotEqual(lhs, rhs)
            } else {
                Predicate::Equal(lhs, rhs)
            }
        });
        Ok(if negated {
            Predicate::Or(tests.collect())
        } else {
            Predicate::And(tests.collect())
        })
    }

    fn equality<'p>(&self, lhs: &'p Operand, rhs: &'p Operand, negated: bool) -> Result<DocumentFilter, QueryError> {
        if matches!((lhs, rhs), (Operand::ObjectId, Operand::ObjectId)) {
            return Ok(DocumentFilter::from_bool(!negated));
        }
        if let Some(key) = self.composite_key(lhs, rhs) {
            return self.compile(&self.composite_equality(key, negated)?);
        }
        let operator = if negated { "$ne" } else { "$eq" };
        Ok(match (self.field(lhs)?, self.field(rhs)?, lhs, rhs) {
            (Some(a), Some(b), _, _) => DocumentFilter::Filter(single(
                "$expr",
                single(
                    operator,
                    DynValue::Array(vec![field_expression(a), field_expression(b)]),
                ),
            )),
            (Some(field), None, _, Operand::Value(value))
            | (None, Some(field), Operand::Value(value), _) => {
                DocumentFilter::Filter(field_test(field, operator, value.clone()))
            }
            (None, None, Operand::Value(a), Operand::Value(b)) => {
                DocumentFilter::from_bool((a == b) != negated)
            }
            _ => return Err(QueryError::invalid("unresolvable equality operands")),
        })
    }

    fn ordering<'p>(
        &self,
        operator: &'static str,
        lhs: &'p Operand,
        rhs: &'p Operand,
    ) -> Result<DocumentFilter, QueryError> {
        let is_null = |operand: &Operand| matches!(operand, Operand::Value(DynValue::Null));
        if is_null(lhs) || is_null(rhs) {
            return Ok(DocumentFilter::False);
        }
        Ok(match (self.field(lhs)?, self.field(rhs)?, lhs, rhs) {
            (Some(a), Some(b), _, _) => DocumentFilter::Filter(single(
                "$and",
                DynValue::Array(vec![
                    field_test(a, "$ne", DynValue::Null),
                    field_test(b, "$ne", DynValue::Null),
                    single(
                        "$expr",
                        single(
                            operator,
                            DynValue::Array(vec![field_expression(a), field_expression(b)]),
                        ),
                    ),
                ]),
            )),
            (Some(field), None, _, Operand::Value(value)) => {
                DocumentFilter::Filter(field_test(field, operator, value.clone()))
            }
            (None, Some(field), Operand::Value(value), _) => {
                DocumentFilter::Filter(field_test(field, mirrored(operator), value.clone()))
            }
            (None, None, Operand::Value(a), Operand::Value(b)) => DocumentFilter::Filter(single(
                "$expr",
                single(
                    operator,
                    DynValue::Array(vec![literal_expression(a.clone()), literal_expression(b.clone())]),
                ),
            )),
            _ => return Err(QueryError::invalid("unresolvable ordering operands")),
        })
    }

    fn membership<'p>(
        &self,
        lhs: &'p Operand,
        rhs: &'p Operand,
        negated: bool,
    ) -> Result<DocumentFilter, QueryError> {
        let Operand::Value(DynValue::Array(items)) = rhs else {
            return Err(QueryError::invalid(
                "membership tests need an array of values on the right",
            ));
        };
        if matches!(lhs, Operand::ObjectId) && self.table.primary_keys().len() > 1 {
            let alternatives = items
                .iter()
                .map(|item| self.composite_equality(item, false))
                .collect::<Result<Vec<_>, _>>()?;
            if alternatives.is_empty() {
                return Ok(DocumentFilter::from_bool(negated));
            }
            let any = Predicate::Or(alternatives);
            return self.compile(&if negated { any.negate() } else { any });
        }
        match (self.field(lhs)?, lhs) {
            (Some(_), _) if items.is_empty() => Ok(DocumentFilter::from_bool(negated)),
            (Some(field), _) => Ok(DocumentFilter::Filter(field_test(
                field,
                if negated { "$nin" } else { "$in" },
                DynValue::Array(items.clone()),
            ))),
            (None, Operand::Value(value)) => {
                Ok(DocumentFilter::from_bool(items.contains(value) != negated))
            }
            (None, _) => Err(QueryError::invalid("unresolvable membership operand")),
        }
    }

    fn between<'p>(
        &self,
        operand: &'p Operand,
        low: &'p Operand,
        high: &'p Operand,
        negated: bool,
    ) -> Result<DocumentFilter, QueryError> {
        let (Operand::Value(low), Operand::Value(high)) = (low, high) else {
            return Err(QueryError::invalid(
                "document stores need literal bounds for Between",
            ));
        };
        if low.is_null() || high.is_null() || matches!(operand, Operand::Value(DynValue::Null)) {
            return Ok(DocumentFilter::False);
        }
        let filter = match (self.field(operand)?, operand) {
            (Some(field), _) if negated => single(
                "$or",
                DynValue::Array(vec![
                    field_test(field, "$lt", low.clone()),
                    field_test(field, "$gt", high.clone()),
                ]),
            ),
            (Some(field), _) => single(
                field,
                [("$gte", low.clone()), ("$lte", high.clone())]
                    .into_iter()
                    .collect(),
            ),
            (None, Operand::Value(value)) => {
                let literal = || literal_expression(value.clone());
                let (lower, upper, junction) = if negated {
                    ("$lt", "$gt", "$or")
                } else {
                    ("$gte", "$lte", "$and")
                };
                single(
                    "$expr",
                    single(
                        junction,
                        DynValue::Array(vec![
                            single(lower, DynValue::Array(vec![literal(), literal_expression(low.clone())])),
                            single(upper, DynValue::Array(vec![literal(), literal_expression(high.clone())])),
                        ]),
                    ),
                )
            }
            (None, _) => return Err(QueryError::invalid("unresolvable Between operand")),
        };
        Ok(DocumentFilter::Filter(filter))
    }

    fn pattern<'p>(&self, operand: &'p Operand, pattern: &Pattern) -> Result<DocumentFilter, QueryError> {
        match (self.field(operand)?, operand) {
            (Some(field), _) => Ok(DocumentFilter::Filter(field_test(
                field,
                "$regex",
                DynValue::String(regex_source(pattern)),
            ))),
            (None, Operand::Value(DynValue::Null)) => Ok(DocumentFilter::False),
            (None, Operand::Value(DynValue::String(text))) => {
                Ok(DocumentFilter::from_bool(pattern.matches(text)))
            }
            (None, Operand::Value(other)) => Err(QueryError::invalid(format!(
                "cannot match text against a {} value",
                other.kind().name()
            ))),
            (None, _) => Err(QueryError::invalid("unresolvable pattern operand")),
        }
    }
}

impl Predicate {
    /// Compile this predicate into a document filter for `table`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCompiler::compile`].
    pub fn to_document(&self, table: &TableInfo) -> Result<DocumentFilter, QueryError> {
        DocumentCompiler::new(table).compile(self)
    }
}

fn numeric(field: &str, value: &DynValue) -> Result<DynValue, QueryError> {
    if value.is_numeric() {
        Ok(value.clone())
    } else {
        Err(QueryError::unsupported_type(format!(
            "`{field}` needs a numeric operand, got {}",
            value.kind().name()
        )))
    }
}

/// Build a MongoDB update document (`$set`, `$inc`, ...) from `updates`.
///
/// # Errors
///
/// Returns [`QueryError::UnsupportedType`] for non-numeric arithmetic
/// operands and [`QueryError::UnsupportedOperation`] for `Divide`, which has
/// no atomic update operator.
pub fn update_document(updates: &Updates) -> Result<DynValue, QueryError> {
    let mut groups: BTreeMap<&'static str, BTreeMap<String, DynValue>> = BTreeMap::new();
    for (field, operation) in updates {
        let (operator, operand) = match operation {
            UpdateOperation::Set(value) => ("$set", value.clone()),
            UpdateOperation::Increment(value) => ("$inc", numeric(field, value)?),
            UpdateOperation::Decrement(value) => ("$inc", negation(value)?),
            UpdateOperation::Multiply(value) => ("$mul", numeric(field, value)?),
            UpdateOperation::Divide(_) => {
                return Err(QueryError::unsupported_operation(format!(
                    "document stores cannot divide `{field}` atomically"
                )));
            }
            UpdateOperation::Min(value) => ("$min", value.clone()),
            UpdateOperation::Max(value) => ("$max", value.clone()),
            UpdateOperation::AddToSet(items) => (
                "$addToSet",
                single("$each", DynValue::Array(distinct(items))),
            ),
            UpdateOperation::Push(items) => ("$push", single("$each", DynValue::Array(items.clone()))),
            UpdateOperation::RemoveAll(items) => ("$pullAll", DynValue::Array(items.clone())),
            UpdateOperation::PopFirst => ("$pop", DynValue::SignedInt(-1)),
            UpdateOperation::PopLast => ("$pop", DynValue::SignedInt(1)),
        };
        groups.entry(operator).or_default().insert(field.clone(), operand);
    }
    Ok(groups
        .into_iter()
        .map(|(operator, fields)| (operator, DynValue::Object(fields)))
        .collect())
}

/// Build an upsert update document: [`update_document`] plus
/// `$setOnInsert` for `set_on_insert`.
///
/// # Errors
///
/// Fails like [`update_document`], and with
/// [`QueryError::InvalidExpression`] when a field is both updated and set on
/// insert.
pub fn upsert_document(
    updates: &Updates,
    set_on_insert: &BTreeMap<String, DynValue>,
) -> Result<DynValue, QueryError> {
    if let Some(field) = set_on_insert.keys().find(|field| updates.contains_key(*field)) {
        return Err(QueryError::invalid(format!(
            "`{field}` is both updated and set on insert"
        )));
    }
    let mut document = update_document(updates)?;
    if !set_on_insert.is_empty() {
        document.set("$setOnInsert", DynValue::Object(set_on_insert.clone()));
    }
    Ok(document)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::predicate::{key, object_id, value};

    fn table() -> TableInfo {
        TableInfo::schemaless("events")
    }

    fn filter(predicate: &Predicate) -> DynValue {
        match predicate.to_document(&table()) {
            Ok(DocumentFilter::Filter(filter)) => filter,
            other => panic!("expected a filter document, got {other:?}"),
        }
    }

    #[test]
    fn equality_uses_eq_and_ne() {
        assert_eq!(
            filter(&key("a").eq(1_i64)),
            field_test("a", "$eq", DynValue::from(1_i64))
        );
        assert_eq!(
            filter(&object_id().ne("x")),
            field_test("_id", "$ne", DynValue::from("x"))
        );
    }

    #[test]
    fn reversed_ordering_mirrors_the_operator() {
        assert_eq!(
            filter(&Predicate::LessThan(value(5_i64), key("n"))),
            field_test("n", "$gt", DynValue::from(5_i64))
        );
    }

    #[test]
    fn null_never_orders() {
        assert_eq!(
            key("n").lt(DynValue::Null).to_document(&table()),
            Ok(DocumentFilter::False)
        );
    }

    #[test]
    fn membership_folds_empty_lists() {
        assert_eq!(
            key("n").contains_in(Vec::<DynValue>::new()).to_document(&table()),
            Ok(DocumentFilter::False)
        );
        assert_eq!(
            key("n").not_contains_in(Vec::<DynValue>::new()).to_document(&table()),
            Ok(DocumentFilter::True)
        );
        assert_eq!(
            filter(&key("n").contains_in([1_i64, 2])),
            field_test("n", "$in", DynValue::from(vec![1_i64, 2]))
        );
    }

    #[test]
    fn between_and_its_negation() {
        let Some(range) = filter(&key("n").between(1_i64, 9_i64)).as_object().cloned() else {
            panic!("expected an object");
        };
        assert_eq!(range.get("n").map(|r| r.get("$gte").clone()), Some(DynValue::from(1_i64)));
        let outside = filter(&key("n").not_between(1_i64, 9_i64));
        assert_eq!(outside.get("$or").len(), 2);
    }

    #[test]
    fn patterns_become_anchored_regexes() {
        assert_eq!(
            filter(&key("name").starts_with("a.b")),
            field_test("name", "$regex", DynValue::from(r"^a\.b"))
        );
        assert_eq!(
            filter(&key("name").ends_with("z")),
            field_test("name", "$regex", DynValue::from("z$"))
        );
    }

    #[test]
    fn junctions_flatten_and_short_circuit() {
        let predicate = key("a").eq(1_i64).and(key("b").eq(2_i64)).and(value(1_i64).ne(1_i64));
        assert_eq!(predicate.to_document(&table()), Ok(DocumentFilter::False));

        let combined = filter(&key("a").eq(1_i64).or(key("b").eq(2_i64)));
        assert_eq!(combined.get("$or").len(), 2);
    }

    #[test]
    fn negation_uses_nor() {
        let negated = filter(&!key("a").eq(1_i64));
        assert_eq!(negated.get("$nor").len(), 1);
    }

    #[test]
    fn composite_keys_expand() {
        let table = TableInfo::new("pairs")
            .with_column("a", crate::table::ColumnType::Integer)
            .with_column("b", crate::table::ColumnType::Integer)
            .with_primary_key(["a", "b"]);
        let key_value: DynValue = [("a", 1_i64), ("b", 2_i64)].into_iter().collect();
        let Ok(DocumentFilter::Filter(document)) = object_id().eq(key_value).to_document(&table) else {
            panic!("composite equality should compile");
        };
        assert_eq!(document.get("$and").len(), 2);
    }

    #[test]
    fn updates_group_by_operator() {
        let updates = Updates::from([
            ("name".to_owned(), UpdateOperation::set("x")),
            ("count".to_owned(), UpdateOperation::Decrement(DynValue::from(2_u64))),
            ("tags".to_owned(), UpdateOperation::AddToSet(vec!["a".into(), "a".into()])),
            ("queue".to_owned(), UpdateOperation::PopFirst),
        ]);
        let Ok(document) = update_document(&updates) else {
            panic!("updates should compile");
        };
        assert_eq!(document.get("$set").get("name"), &DynValue::from("x"));
        assert_eq!(document.get("$inc").get("count"), &DynValue::from(-2_i64));
        assert_eq!(document.get("$addToSet").get("tags").get("$each").len(), 1);
        assert_eq!(document.get("$pop").get("queue"), &DynValue::from(-1_i64));
    }

    #[test]
    fn divide_is_unsupported() {
        let updates = Updates::from([("n".to_owned(), UpdateOperation::Divide(DynValue::from(2_i64)))]);
        assert!(matches!(
            update_document(&updates),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn upsert_rejects_overlapping_fields() {
        let updates = Updates::from([("n".to_owned(), UpdateOperation::set(1_i64))]);
        let on_insert = BTreeMap::from([("n".to_owned(), DynValue::from(2_i64))]);
        assert!(upsert_document(&updates, &on_insert).is_err());

        let on_insert = BTreeMap::from([("created".to_owned(), DynValue::from(true))]);
        let Ok(document) = upsert_document(&updates, &on_insert) else {
            panic!("disjoint fields should compile");
        };
        assert_eq!(document.get("$setOnInsert").get("created"), &DynValue::from(true));
    }
}
