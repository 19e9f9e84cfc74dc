// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Error types
//
// Defines all failure modes of the persistence layer: record decode
// failures, I/O failures, driver failures, and invalid configuration.
// Absence of a record is never an error here: lookups return Option
// and removals return bool.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur across the persistence layer.
#[derive(Debug, Error)]
pub enum StowageError {
    /// An I/O error from a file-based backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record's bytes could not be parsed as JSON, or a record could
    /// not be rendered to JSON.
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    /// An element payload failed to decode into its registered type.
    #[error("element '{tag}' could not be decoded: {source}")]
    ElementDecode {
        /// The wire tag of the offending element.
        tag: String,
        /// The underlying serde failure.
        #[source]
        source: serde_json::Error,
    },

    /// A wire tag matched no registration, no alias, and no resolver
    /// in the chain.
    #[error("no registered element type for tag '{0}'")]
    UnknownTag(String),

    /// A live element does not match the concrete type registered under
    /// its tag.
    #[error("element tagged '{0}' does not match its registered type")]
    TypeMismatch(String),

    /// Invalid backend or store configuration, reported at construction
    /// time rather than first use.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The active backend cannot enumerate stored record ids, so it
    /// cannot serve as a migration source.
    #[error("backend '{0}' cannot enumerate stored record ids")]
    NotEnumerable(String),

    /// A holder or element back-reference was used after the store (or
    /// the holder itself) was dropped.
    #[error("holder {0} is no longer attached to a live store")]
    Detached(Uuid),

    /// An error reported by the SQLite driver.
    #[cfg(feature = "sqlite-backend")]
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The connection pool could not hand out a connection.
    #[cfg(feature = "sqlite-backend")]
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Convenience type alias for persistence results.
pub type StowageResult<T> = Result<T, StowageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let err = StowageError::Io(io_err);
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file gone"));
    }

    #[test]
    fn test_unknown_tag_display() {
        let err = StowageError::UnknownTag("legacy.Counter".to_string());
        assert_eq!(
            err.to_string(),
            "no registered element type for tag 'legacy.Counter'"
        );
    }

    #[test]
    fn test_element_decode_display() {
        let source = serde_json::from_str::<u32>("\"not a number\"").unwrap_err();
        let err = StowageError::ElementDecode {
            tag: "counter".to_string(),
            source,
        };
        assert!(err.to_string().contains("counter"));
    }

    #[test]
    fn test_not_enumerable_display() {
        let err = StowageError::NotEnumerable("flat-file".to_string());
        assert!(err.to_string().contains("flat-file"));
        assert!(err.to_string().contains("enumerate"));
    }
}
