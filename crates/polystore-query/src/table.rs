//! Table metadata used by the compilers.

use std::collections::BTreeMap;
use std::fmt;

/// Storage class of a column, as far as the compilers care.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean.
    Boolean,
    /// Any integer width.
    Integer,
    /// Binary floating point.
    Float,
    /// Exact numeric.
    Decimal,
    /// Character data.
    Text,
    /// Byte string.
    Binary,
    /// UUID.
    Uuid,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time without zone.
    Timestamp,
    /// Date and time with zone.
    TimestampTz,
    /// Textual JSON.
    Json,
    /// Binary JSON.
    Jsonb,
    /// Native array; holds the backend name of the element type.
    Array(String),
    /// Any other backend type, by name (enums, domains, ranges, ...).
    Other(String),
    /// Type not known.
    Unknown,
}

impl ColumnType {
    /// Whether the column stores JSON.
    pub const fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::Jsonb)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::Decimal => f.write_str("decimal"),
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
            Self::Uuid => f.write_str("uuid"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::TimestampTz => f.write_str("timestamptz"),
            Self::Json => f.write_str("json"),
            Self::Jsonb => f.write_str("jsonb"),
            Self::Array(element) => write!(f, "{element}[]"),
            Self::Other(name) => f.write_str(name),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Columns and primary key of one table or collection.
///
/// A schemaless table (a document collection) reports every column as
/// present with [`ColumnType::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    name: String,
    columns: BTreeMap<String, ColumnType>,
    primary_keys: Vec<String>,
    primary_key_constraint: Option<String>,
    schemaless: bool,
}

impl TableInfo {
    /// A table with no columns yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            primary_keys: Vec::new(),
            primary_key_constraint: None,
            schemaless: false,
        }
    }

    /// A schemaless collection keyed by `_id`.
    pub fn schemaless(name: impl Into<String>) -> Self {
        Self {
            primary_keys: vec!["_id".to_owned()],
            schemaless: true,
            ..Self::new(name)
        }
    }

    /// Add a column.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Replace the primary key columns, in key order.
    #[must_use]
    pub fn with_primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_keys = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Record the name of the primary key constraint.
    #[must_use]
    pub fn with_primary_key_constraint(mut self, name: impl Into<String>) -> Self {
        self.primary_key_constraint = Some(name.into());
        self
    }

    /// Table name, possibly schema qualified.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether rows can carry arbitrary fields.
    pub const fn is_schemaless(&self) -> bool {
        self.schemaless
    }

    /// Primary key columns in key order.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Name of the primary key constraint, when known.
    pub fn primary_key_constraint(&self) -> Option<&str> {
        self.primary_key_constraint.as_deref()
    }

    /// Whether `column` exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.schemaless || self.columns.contains_key(column)
    }

    /// Type of `column`; `Unknown` for schemaless tables.
    pub fn column_type(&self, column: &str) -> Option<&ColumnType> {
        const UNKNOWN: &ColumnType = &ColumnType::Unknown;
        self.columns
            .get(column)
            .or_else(|| self.schemaless.then_some(UNKNOWN))
    }

    /// Declared columns in name order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnType)> {
        self.columns.iter().map(|(name, kind)| (name.as_str(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_columns_are_known() {
        let table = TableInfo::new("users")
            .with_column("id", ColumnType::Integer)
            .with_primary_key(["id"]);
        assert!(table.has_column("id"));
        assert!(!table.has_column("email"));
        assert_eq!(table.column_type("email"), None);
        assert_eq!(table.primary_keys(), ["id".to_owned()]);
    }

    #[test]
    fn schemaless_tables_accept_any_field() {
        let table = TableInfo::schemaless("events");
        assert!(table.has_column("anything"));
        assert_eq!(table.column_type("anything"), Some(&ColumnType::Unknown));
        assert_eq!(table.primary_keys(), ["_id".to_owned()]);
    }
}
