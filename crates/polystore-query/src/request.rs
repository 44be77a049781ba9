//! Query requests shared by every backend.

use std::collections::BTreeSet;

use crate::predicate::Predicate;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortOrder {
    /// SQL keyword.
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    /// MongoDB sort direction.
    pub const fn direction(self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Which image of a modified record a find-one-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The record as it was before the modification.
    Before,
    /// The record as it is after the modification.
    #[default]
    After,
}

/// A multi-record query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    /// Table or collection name.
    pub collection: String,
    /// Predicates, all of which must hold.
    pub filters: Vec<Predicate>,
    /// Sort keys in priority order.
    pub sort: Vec<(String, SortOrder)>,
    /// Records to skip.
    pub skip: Option<u64>,
    /// Maximum records to return.
    pub limit: Option<u64>,
    /// Fields to return; all when `None`.
    pub includes: Option<BTreeSet<String>>,
}

impl FindRequest {
    /// A request over every record of `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Add a sort key.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Skip the first `skip` records.
    #[must_use]
    pub const fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Return at most `limit` records.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return only `fields`.
    #[must_use]
    pub fn include<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.includes
            .get_or_insert_with(BTreeSet::new)
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Whether the request restricts or orders the matched set.
    pub fn is_windowed(&self) -> bool {
        !self.sort.is_empty() || self.skip.is_some() || self.limit.is_some()
    }
}

/// A single-record query used by the find-one-and-modify operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneRequest {
    /// Table or collection name.
    pub collection: String,
    /// Predicates, all of which must hold.
    pub filters: Vec<Predicate>,
    /// Sort keys deciding which record is picked.
    pub sort: Vec<(String, SortOrder)>,
    /// Fields to return; all when `None`.
    pub includes: Option<BTreeSet<String>>,
    /// Image to return.
    pub return_document: ReturnDocument,
}

impl FindOneRequest {
    /// A request for the first record of `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Add a sort key.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Return only `fields`.
    #[must_use]
    pub fn include<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.includes
            .get_or_insert_with(BTreeSet::new)
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Choose the returned image.
    #[must_use]
    pub const fn returning(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = return_document;
        self
    }
}
