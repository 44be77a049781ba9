//! Dialect-neutral SQL token stream.
//!
//! A [`RawQuery`] is an ordered list of [`Token`]s: literal SQL text,
//! identifiers, inline scalars and bound values. Nothing is quoted or numbered
//! until [`RawQuery::render`] is called with a [`Dialect`], which is what lets
//! the same compiled predicate run against any SQL backend.

use polystore_value::DynValue;
use rust_decimal::Decimal;

use crate::dialect::Dialect;
use crate::error::QueryError;

/// One element of a [`RawQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// SQL text emitted verbatim.
    Literal(String),
    /// An identifier, quoted by the dialect at render time.
    Identifier(String),
    /// Inline `NULL`.
    Null,
    /// Inline boolean.
    Bool(bool),
    /// Inline signed integer.
    SignedInt(i64),
    /// Inline unsigned integer.
    UnsignedInt(u64),
    /// Inline float.
    Float(f64),
    /// Inline decimal.
    Decimal(Decimal),
    /// A bound parameter.
    Bind(DynValue),
}

/// SQL text and its positional bind values, ready for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    /// Statement text with dialect placeholders.
    pub sql: String,
    /// Values for the placeholders, in placeholder order.
    pub binds: Vec<DynValue>,
}

/// An ordered sequence of SQL tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuery {
    tokens: Vec<Token>,
}

impl RawQuery {
    /// An empty query.
    pub const fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    /// A query holding a single literal.
    pub fn literal(text: impl Into<String>) -> Self {
        let mut query = Self::new();
        query.push_literal(text);
        query
    }

    /// A query holding a single identifier.
    pub fn identifier(name: impl Into<String>) -> Self {
        Self {
            tokens: vec![Token::Identifier(name.into())],
        }
    }

    /// A query holding a single bound value.
    pub fn bind(value: impl Into<DynValue>) -> Self {
        Self {
            tokens: vec![Token::Bind(value.into())],
        }
    }

    /// A query holding a single value, inlined when it is a small scalar.
    pub fn value(value: impl Into<DynValue>) -> Self {
        let mut query = Self::new();
        query.push_value(value);
        query
    }

    /// Append literal SQL text. Adjacent literals are merged into one token.
    pub fn push_literal(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if let Some(Token::Literal(last)) = self.tokens.last_mut() {
            join_text(last, &text);
        } else {
            self.tokens.push(Token::Literal(text));
        }
    }

    /// Append an identifier.
    pub fn push_identifier(&mut self, name: impl Into<String>) {
        self.tokens.push(Token::Identifier(name.into()));
    }

    /// Append a bound value.
    pub fn push_bind(&mut self, value: impl Into<DynValue>) {
        self.tokens.push(Token::Bind(value.into()));
    }

    /// Append a value: `NULL`, booleans and numbers are inlined, everything
    /// else is bound.
    pub fn push_value(&mut self, value: impl Into<DynValue>) {
        let token = match value.into() {
            DynValue::Null => Token::Null,
            DynValue::Bool(value) => Token::Bool(value),
            DynValue::SignedInt(value) => Token::SignedInt(value),
            DynValue::UnsignedInt(value) => Token::UnsignedInt(value),
            DynValue::Float(value) => Token::Float(value),
            DynValue::Decimal(value) => Token::Decimal(value),
            other => Token::Bind(other),
        };
        self.tokens.push(token);
    }

    /// Append another query, merging a leading literal into ours.
    pub fn append(&mut self, other: Self) {
        for token in other.tokens {
            match token {
                Token::Literal(text) => self.push_literal(text),
                token => self.tokens.push(token),
            }
        }
    }

    /// Builder form of [`RawQuery::push_literal`].
    #[must_use]
    pub fn then_literal(mut self, text: impl Into<String>) -> Self {
        self.push_literal(text);
        self
    }

    /// Builder form of [`RawQuery::push_identifier`].
    #[must_use]
    pub fn then_identifier(mut self, name: impl Into<String>) -> Self {
        self.push_identifier(name);
        self
    }

    /// Builder form of [`RawQuery::push_bind`].
    #[must_use]
    pub fn then_bind(mut self, value: impl Into<DynValue>) -> Self {
        self.push_bind(value);
        self
    }

    /// Builder form of [`RawQuery::push_value`].
    #[must_use]
    pub fn then_value(mut self, value: impl Into<DynValue>) -> Self {
        self.push_value(value);
        self
    }

    /// Builder form of [`RawQuery::append`].
    #[must_use]
    pub fn then(mut self, other: Self) -> Self {
        self.append(other);
        self
    }

    /// Wrap the query in parentheses.
    #[must_use]
    pub fn parenthesized(self) -> Self {
        Self::literal("(").then(self).then_literal(")")
    }

    /// Join queries with a literal separator.
    pub fn join(parts: impl IntoIterator<Item = Self>, separator: &str) -> Self {
        let mut joined = Self::new();
        for (index, part) in parts.into_iter().enumerate() {
            if index > 0 {
                joined.push_literal(separator);
            }
            joined.append(part);
        }
        joined
    }

    /// A comma separated list of quoted identifiers.
    pub fn identifiers<S: AsRef<str>>(names: &[S]) -> Self {
        Self::join(
            names.iter().map(|name| Self::identifier(name.as_ref())),
            ", ",
        )
    }

    /// The tokens in order.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Whether the query holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Render the query for `dialect`.
    ///
    /// Identifiers are quoted, inline scalars formatted, and bound values
    /// replaced by placeholders. When the dialect's placeholders can be
    /// referenced more than once, identical values (same kind, same exact
    /// payload) share one placeholder and one bind slot.
    ///
    /// # Errors
    ///
    /// Propagates any failure of a dialect hook, for example a non-finite
    /// float the dialect cannot write inline.
    pub fn render(&self, dialect: &dyn Dialect) -> Result<RenderedQuery, QueryError> {
        let mut sql = String::new();
        let mut binds: Vec<DynValue> = Vec::new();
        let mut placeholders: Vec<(&DynValue, String)> = Vec::new();
        let repeatable = dialect.repeatable_placeholder();

        for token in &self.tokens {
            let piece = match token {
                Token::Literal(text) => text.clone(),
                Token::Identifier(name) => dialect.identifier(name),
                Token::Null => "NULL".to_owned(),
                Token::Bool(value) => dialect.bool_literal(*value),
                Token::SignedInt(value) => value.to_string(),
                Token::UnsignedInt(value) => value.to_string(),
                Token::Float(value) => dialect.float_literal(*value)?,
                Token::Decimal(value) => value.to_string(),
                Token::Bind(value) => {
                    let existing = placeholders
                        .iter()
                        .find(|(bound, _)| repeatable && bound.is_identical(value));
                    if let Some((_, placeholder)) = existing {
                        placeholder.clone()
                    } else {
                        binds.push(value.clone());
                        let placeholder = dialect.bind_placeholder(binds.len());
                        if repeatable {
                            placeholders.push((value, placeholder.clone()));
                        }
                        placeholder
                    }
                }
            };
            join_text(&mut sql, &piece);
        }

        Ok(RenderedQuery { sql, binds })
    }
}

/// Append `piece` to `out`, inserting a space where two tokens would
/// otherwise run together.
fn join_text(out: &mut String, piece: &str) {
    let (Some(last), Some(first)) = (out.chars().last(), piece.chars().next()) else {
        out.push_str(piece);
        return;
    };
    let glued = last.is_whitespace()
        || first.is_whitespace()
        || matches!(last, '(' | '[' | '.')
        || matches!(first, ')' | ']' | ',' | '.' | ':' | '[' | ';');
    if !glued {
        out.push(' ');
    }
    out.push_str(piece);
}

impl From<&str> for RawQuery {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres, Sqlite};

    fn sql(query: &RawQuery) -> RenderedQuery {
        let Ok(rendered) = query.render(&Postgres) else {
            panic!("query should render");
        };
        rendered
    }

    #[test]
    fn literals_merge_with_a_single_space() {
        let query = RawQuery::literal("SELECT").then_literal("*").then_literal(" FROM");
        assert_eq!(query.tokens().len(), 1);
        assert_eq!(sql(&query).sql, "SELECT * FROM");
    }

    #[test]
    fn identifiers_are_quoted_per_dialect() {
        let query = RawQuery::literal("SELECT")
            .then_identifier("public.users")
            .then_literal(",")
            .then_identifier("na\"me");
        assert_eq!(sql(&query).sql, r#"SELECT "public"."users", "na""me""#);
        let Ok(mysql) = query.render(&MySql) else {
            panic!("mysql should render");
        };
        assert_eq!(mysql.sql, "SELECT `public`.`users`, `na\"me`");
    }

    #[test]
    fn small_scalars_are_inlined() {
        let query = RawQuery::literal("LIMIT")
            .then_value(10_u64)
            .then_literal("AND")
            .then_value(true)
            .then_literal("AND")
            .then_value(DynValue::Null)
            .then_literal("AND")
            .then_value("text");
        let rendered = sql(&query);
        assert_eq!(rendered.sql, "LIMIT 10 AND TRUE AND NULL AND $1");
        assert_eq!(rendered.binds, vec![DynValue::from("text")]);
    }

    #[test]
    fn equal_binds_share_a_placeholder_when_repeatable() {
        let query = RawQuery::bind(5_i64)
            .then_literal(",")
            .then_bind(5_i64)
            .then_literal(",")
            .then_bind(6_i64);
        let rendered = sql(&query);
        assert_eq!(rendered.sql, "$1, $1, $2");
        assert_eq!(rendered.binds, vec![DynValue::from(5_i64), DynValue::from(6_i64)]);

        let Ok(sqlite) = query.render(&Sqlite) else {
            panic!("sqlite should render");
        };
        assert_eq!(sqlite.sql, "?1, ?1, ?2");
    }

    #[test]
    fn equal_but_distinct_binds_keep_their_own_placeholder() {
        let query = RawQuery::bind(5_i64)
            .then_literal(",")
            .then_bind(5_u64)
            .then_literal(",")
            .then_bind(Decimal::new(10, 1))
            .then_literal(",")
            .then_bind(Decimal::new(100, 2))
            .then_literal(",")
            .then_bind(-0.0_f64)
            .then_literal(",")
            .then_bind(0.0_f64);
        let rendered = sql(&query);
        assert_eq!(rendered.sql, "$1, $2, $3, $4, $5, $6");
        assert!(matches!(rendered.binds.get(1), Some(DynValue::UnsignedInt(5))));
        assert!(matches!(
            rendered.binds.get(3),
            Some(DynValue::Decimal(value)) if value.scale() == 2
        ));
        assert!(matches!(
            rendered.binds.get(4),
            Some(DynValue::Float(value)) if value.is_sign_negative()
        ));
    }

    #[test]
    fn positional_dialect_binds_every_occurrence() {
        let query = RawQuery::bind(5_i64).then_literal(",").then_bind(5_i64);
        let Ok(rendered) = query.render(&MySql) else {
            panic!("mysql should render");
        };
        assert_eq!(rendered.sql, "?, ?");
        assert_eq!(rendered.binds, vec![DynValue::from(5_i64), DynValue::from(5_i64)]);
    }

    #[test]
    fn parentheses_and_casts_hug_their_neighbours() {
        let query = RawQuery::identifier("a")
            .then_literal("IN")
            .then(RawQuery::join([RawQuery::bind(1_i64), RawQuery::bind(2_i64)], ", ").parenthesized())
            .then_literal("AND")
            .then_bind("x")
            .then_literal("::jsonb");
        assert_eq!(sql(&query).sql, r#""a" IN ($1, $2) AND $3::jsonb"#);
    }

    #[test]
    fn non_finite_float_fails_on_strict_dialects() {
        let query = RawQuery::value(f64::NAN);
        assert!(query.render(&MySql).is_err());
        assert_eq!(sql(&query).sql, "'NaN'::float8");
    }
}
