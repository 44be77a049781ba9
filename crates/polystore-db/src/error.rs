//! Error types for the launchers and the transaction coordinator.
//!
//! All errors are propagated via [`DbError`], which wraps the driver errors
//! of [`sqlx`], [`mongodb`] and [`fred`] together with the compilation errors
//! of the query layer. Compilation errors are always raised before any I/O.

use polystore_query::QueryError;
use polystore_value::ValueError;

/// SQLSTATE for a serialization failure.
const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE for a detected deadlock.
const DEADLOCK_DETECTED: &str = "40P01";

/// SQLSTATE for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// MongoDB `WriteConflict` server error code.
const MONGO_WRITE_CONFLICT: i32 = 112;

/// MongoDB duplicate key server error code.
const MONGO_DUPLICATE_KEY: i32 = 11000;

/// Error label MongoDB attaches to errors that abort a whole transaction.
const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `MongoDB` operation failed.
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A request could not be compiled for the backend.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A value could not be converted to or from the wire format.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// An insert collided with an existing primary key.
    #[error("duplicated primary key")]
    DuplicatedPrimaryKey,

    /// A transaction was started on a session that already runs one.
    #[error("transaction already in progress on this session")]
    TransactionDeadlocks,

    /// An optimistic transaction was aborted because watched data changed.
    #[error("transaction aborted by a concurrent write")]
    TransactionConflict,

    /// The named table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A key was not found in Redis.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DbError {
    /// Whether retrying the whole transaction may succeed.
    ///
    /// Covers `PostgreSQL` serialization failures and deadlocks, `MongoDB`
    /// write conflicts and transient transaction errors, and aborted Redis
    /// `EXEC`s.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Postgres(error) => {
                matches!(sqlstate(error).as_deref(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED))
            }
            Self::Mongo(error) => {
                error.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    || mongo_code(error) == Some(MONGO_WRITE_CONFLICT)
            }
            Self::TransactionConflict => true,
            _ => false,
        }
    }

    /// Whether the backend rejected a write for violating a unique key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Postgres(error) => sqlstate(error).as_deref() == Some(UNIQUE_VIOLATION),
            Self::Mongo(error) => mongo_code(error) == Some(MONGO_DUPLICATE_KEY),
            Self::DuplicatedPrimaryKey => true,
            _ => false,
        }
    }
}

fn sqlstate(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(database) => database.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn mongo_code(error: &mongodb::error::Error) -> Option<i32> {
    use mongodb::error::{ErrorKind, WriteFailure};

    match error.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        _ => None,
    }
}
