//! The uniform query protocol implemented by every record backend.
//!
//! A [`QueryLauncher`] receives backend-neutral requests, compiles them for
//! its backend, runs them and maps the results back to [`DbObject`]s.
//! Compilation happens first: a request that cannot be compiled fails before
//! any I/O, and a filter that can never match returns an empty result
//! without a round trip.

use std::collections::BTreeMap;

use polystore_query::{FindOneRequest, FindRequest, Updates};
use polystore_value::DynValue;

use crate::error::DbError;

/// A record as returned by a launcher: field name to value.
pub type DbObject = BTreeMap<String, DynValue>;

/// Find, modify, upsert and delete records.
#[allow(async_fn_in_trait)]
pub trait QueryLauncher {
    /// Number of records matching the request, honouring skip and limit.
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn count(&mut self, request: &FindRequest) -> Result<u64, DbError>;

    /// Records matching the request.
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn find(&mut self, request: &FindRequest) -> Result<Vec<DbObject>, DbError>;

    /// Delete the records matching the request. Returns the number deleted,
    /// or `None` when nothing was.
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn find_and_delete(&mut self, request: &FindRequest) -> Result<Option<u64>, DbError>;

    /// Apply `updates` to the first matching record and return the image
    /// selected by [`FindOneRequest::return_document`].
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn find_one_and_update(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
    ) -> Result<Option<DbObject>, DbError>;

    /// Delete the first matching record and return it.
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn find_one_and_delete(
        &mut self,
        request: &FindOneRequest,
    ) -> Result<Option<DbObject>, DbError>;

    /// Update the first matching record, or insert one built from the
    /// filter's equalities, `updates` and `set_on_insert`.
    ///
    /// Returns the updated or inserted record for the after image; for the
    /// before image, the previous record, or `None` when one was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DuplicatedPrimaryKey`] when the record to insert
    /// collides with an existing primary key that the filter did not match.
    async fn find_one_and_upsert(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
        set_on_insert: &DbObject,
    ) -> Result<Option<DbObject>, DbError>;

    /// Insert one record and return it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DuplicatedPrimaryKey`] on a primary key collision,
    /// otherwise compilation or backend errors.
    async fn insert(
        &mut self,
        collection: &str,
        fields: &DbObject,
    ) -> Result<Option<DbObject>, DbError>;

    /// First record matching the request.
    ///
    /// # Errors
    ///
    /// Returns compilation or backend errors.
    async fn find_one(&mut self, request: &FindRequest) -> Result<Option<DbObject>, DbError> {
        let mut request = request.clone();
        request.limit = Some(1);
        Ok(self.find(&request).await?.into_iter().next())
    }
}
