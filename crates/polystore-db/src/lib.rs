//! Backend launchers for the Polystore data layer (`PostgreSQL`, `MongoDB`,
//! Redis).
//!
//! Each backend has a pool type that owns the driver connection and hands
//! out sessions. A session is one logical connection: it launches the
//! backend-neutral requests of [`polystore_query`] and runs transactions
//! through the shared coordinator.
//!
//! # Architecture
//!
//! ```text
//! FindRequest / Updates
//!     |
//!     +-- PgSession ----> StatementPlanner --> sqlx  --> PostgreSQL
//!     +-- MongoSession -> DocumentCompiler --> bson  --> MongoDB
//!     +-- RedisSession -> extended JSON    --> fred  --> Redis
//!
//! with_transaction(options, body)
//!     begin -> body -> commit, abort on error, retry on conflict
//! ```
//!
//! # Modules
//!
//! - [`launcher`] -- The [`QueryLauncher`] protocol shared by record stores
//! - [`transaction`] -- Isolation levels, session state and the retry loop
//! - [`postgres`] -- `PostgreSQL` pool, session, binds and row decoding
//! - [`mongo`] -- `MongoDB` client, session and BSON conversion
//! - [`redis`] -- Redis connection, documents and optimistic transactions
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Shared error types

pub mod config;
pub mod error;
pub mod launcher;
pub mod mongo;
pub mod postgres;
pub mod redis;
pub mod transaction;

// Re-export primary types for convenience.
pub use config::{DatabaseConfig, MongoConfig, PostgresConfig, RedisConfig};
pub use error::DbError;
pub use launcher::{DbObject, QueryLauncher};
pub use mongo::{MongoPool, MongoSession};
pub use postgres::{PgSession, PostgresPool};
pub use redis::{RedisPool, RedisSession};
pub use transaction::{
    IsolationLevel, TransactionOptions, TransactionState, Transactional, with_transaction,
};
