//! Query layer for the Polystore data layer.
//!
//! Filters are written once as backend-neutral [`Predicate`] trees and
//! compiled per target: SQL conditions through a [`Dialect`], or filter
//! documents for document stores. Constant sub-expressions fold away before
//! anything reaches a backend, so a filter that can never match costs no
//! round trip.
//!
//! ```text
//! Predicate ──► SqlCompiler ──► RawQuery ──► render(dialect) ──► SQL + binds
//!     │
//!     └──────► DocumentCompiler ──► filter document
//! ```
//!
//! # Modules
//!
//! - [`predicate`] -- Filter expression tree and its builders
//! - [`compile`] -- Predicate to SQL condition compiler with constant folding
//! - [`document`] -- Predicate and update compiler for document stores
//! - [`dialect`] -- `PostgreSQL`, `MySQL` and `SQLite` SQL generation
//! - [`raw`] -- Dialect-neutral token stream and placeholder rendering
//! - [`builder`] -- Fluent SQL statement builder
//! - [`statement`] -- Complete statements for find, count, delete, insert,
//!   find-one-and-modify and upsert
//! - [`request`] -- Find requests, sorting and returned image
//! - [`update`] -- Field update operations
//! - [`table`] -- Table metadata used during compilation
//! - [`error`] -- Shared error types

pub mod builder;
pub mod compile;
pub mod dialect;
pub mod document;
pub mod error;
pub mod predicate;
pub mod raw;
pub mod request;
pub mod statement;
pub mod table;
pub mod update;

// Re-export primary types for convenience.
pub use builder::{ColumnDefinition, Projection, SqlBuilder};
pub use compile::{CompileResult, SqlCompiler};
pub use dialect::{Dialect, MySql, Postgres, Sqlite};
pub use document::{DocumentCompiler, DocumentFilter, update_document, upsert_document};
pub use error::QueryError;
pub use predicate::{Operand, Predicate, key, object_id, value};
pub use raw::{RawQuery, RenderedQuery};
pub use request::{FindOneRequest, FindRequest, ReturnDocument, SortOrder};
pub use statement::{DUPLICATE_MARKER, StatementPlanner};
pub use table::{ColumnType, TableInfo};
pub use update::{UpdateOperation, Updates};
