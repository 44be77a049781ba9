//! Small scalar types carried by [`DynValue`](crate::DynValue) that have no
//! direct standard-library equivalent.

use std::fmt;

/// A regular expression as stored by document databases.
///
/// The pattern is kept verbatim; it is never compiled on this side of the
/// wire. `options` holds the single-letter flags (`i`, `m`, `s`, `x`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Regex {
    /// The regular expression source.
    pub pattern: String,
    /// Option flags, sorted alphabetically.
    pub options: String,
}

impl Regex {
    /// Create a regex, normalizing the option flags into sorted order.
    pub fn new(pattern: impl Into<String>, options: &str) -> Self {
        let mut flags: Vec<char> = options.chars().collect();
        flags.sort_unstable();
        flags.dedup();
        Self {
            pattern: pattern.into(),
            options: flags.into_iter().collect(),
        }
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.options)
    }
}

/// An internal replication timestamp: seconds since the epoch plus an
/// ordinal within that second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// Ordinal of the operation within the second.
    pub increment: u32,
}

impl Timestamp {
    /// Create a timestamp from its two components.
    pub const fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }
}
