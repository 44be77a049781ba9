//! Error types for query compilation.
//!
//! Every variant is raised synchronously while a statement or filter is
//! being built, before anything is sent to a backend.

use polystore_value::ValueError;

/// Errors that can occur while compiling predicates, updates or statements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The predicate tree is malformed for the target (for example an empty
    /// `And`, a membership test against a non-array, or an object-id
    /// comparison against a table without primary key).
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// The dialect cannot express the requested operation atomically.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A value cannot be represented by the dialect or column type.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// An insert or update names a column the table does not have.
    #[error("column `{column}` does not exist in `{table}`")]
    ColumnNotExist {
        /// Target table.
        table: String,
        /// Offending column.
        column: String,
    },

    /// A value conversion failed.
    #[error(transparent)]
    Value(#[from] ValueError),
}

impl QueryError {
    /// Shorthand for [`QueryError::InvalidExpression`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidExpression(message.into())
    }

    /// Shorthand for [`QueryError::UnsupportedOperation`].
    pub fn unsupported_operation(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    /// Shorthand for [`QueryError::UnsupportedType`].
    pub fn unsupported_type(message: impl Into<String>) -> Self {
        Self::UnsupportedType(message.into())
    }
}
