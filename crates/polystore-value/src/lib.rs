//! Backend-neutral dynamic value model for the Polystore data layer.
//!
//! Every value exchanged with a backend (PostgreSQL rows, MongoDB documents,
//! Redis replies) and every literal inside a filter or update crosses this
//! crate as a [`DynValue`]. Drivers decode wire values into it and encode it
//! back; client code decodes it into typed values through [`FromDynValue`].
//!
//! # Modules
//!
//! - [`value`] -- The [`DynValue`] sum type, equality classes, exact accessors
//!   and indexing
//! - [`convert`] -- [`ToDynValue`] / [`FromDynValue`] and the `From` impls
//! - [`json`] -- Lossless extended-JSON bridge and `serde` support
//! - [`object_id`] -- 12-byte document identifiers
//! - [`date`] -- Civil date/time components
//! - [`scalar`] -- Regex and BSON-style timestamp scalars
//! - [`error`] -- Shared error types

pub mod convert;
pub mod date;
pub mod error;
pub mod json;
pub mod object_id;
pub mod scalar;
pub mod value;

// Re-export primary types for convenience.
pub use convert::{FromDynValue, ToDynValue};
pub use date::DateComponents;
pub use error::ValueError;
pub use object_id::ObjectId;
pub use scalar::{Regex, Timestamp};
pub use value::{DynValue, ValueKind};
