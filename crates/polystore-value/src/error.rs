//! Error types for the value model.
//!
//! All decoding failures are reported through [`ValueError`]. Decoding is a
//! pure transformation, so these errors never wrap I/O failures.

/// Errors that can occur while converting or decoding a [`DynValue`].
///
/// [`DynValue`]: crate::DynValue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// A required value was absent (missing key, index past the end, or
    /// `Null` where a non-optional value was expected).
    #[error("value not found at `{0}`")]
    ValueNotFound(String),

    /// The value had the wrong shape or did not fit the target type exactly.
    #[error("unsupported type at `{path}`: expected {expected}, found {found}")]
    UnsupportedType {
        /// Location of the offending value (empty for the root).
        path: String,
        /// Name of the expected type.
        expected: &'static str,
        /// Kind of the value actually found.
        found: &'static str,
    },

    /// A string could not be parsed as a date or time.
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),
}

impl ValueError {
    /// Build an [`ValueError::UnsupportedType`] at the root path.
    pub const fn unsupported(expected: &'static str, found: &'static str) -> Self {
        Self::UnsupportedType {
            path: String::new(),
            expected,
            found,
        }
    }

    /// Prefix the error location with `segment`.
    ///
    /// Used while decoding nested containers so the final message names the
    /// full path (`items.2.price`).
    #[must_use]
    pub fn at(self, segment: &str) -> Self {
        match self {
            Self::ValueNotFound(path) => Self::ValueNotFound(join_path(segment, &path)),
            Self::UnsupportedType {
                path,
                expected,
                found,
            } => Self::UnsupportedType {
                path: join_path(segment, &path),
                expected,
                found,
            },
            other @ Self::InvalidDateFormat(_) => other,
        }
    }
}

fn join_path(segment: &str, rest: &str) -> String {
    if rest.is_empty() {
        segment.to_owned()
    } else {
        format!("{segment}.{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_builds_dotted_paths() {
        let err = ValueError::ValueNotFound(String::new()).at("price").at("items");
        assert_eq!(err, ValueError::ValueNotFound("items.price".to_owned()));
    }

    #[test]
    fn date_errors_keep_their_message() {
        let err = ValueError::InvalidDateFormat("nope".to_owned()).at("created");
        assert_eq!(err, ValueError::InvalidDateFormat("nope".to_owned()));
    }
}
