//! Storage engine error types
//!
//! Defines all errors that can occur in the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum TsdbError {
    /// Path does not exist; recoverable (treated as an empty shard or
    /// empty index by callers that can)
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// Underlying read/write/mkdir/remove/list failure
    #[error("I/O fault at {path}: {source}")]
    Io {
        /// Path the operation targeted
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON, truncated envelope, or checksum mismatch
    #[error("parse error in {path}: {reason}")]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Description of what was invalid
        reason: String,
    },

    /// Timestamp outside the representable UTC calendar range
    #[error("invalid timestamp: {0} ms")]
    InvalidTimestamp(i64),

    /// Destructive operation called without the literal consent string
    #[error("consent string must be \"YES\"")]
    InvalidConsent,
}

impl TsdbError {
    /// Map an I/O error onto the typed failure for `path`, folding
    /// `ErrorKind::NotFound` into the recoverable variant.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            TsdbError::NotFound(path)
        } else {
            TsdbError::Io { path, source }
        }
    }

    /// Whether this error is the recoverable not-found case
    pub fn is_not_found(&self) -> bool {
        matches!(self, TsdbError::NotFound(_))
    }
}

/// Result type alias for storage operations
pub type TsdbResult<T> = Result<T, TsdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TsdbError::NotFound(PathBuf::from("/data/2024_03_15_12.json"));
        assert_eq!(err.to_string(), "not found: /data/2024_03_15_12.json");

        let err = TsdbError::InvalidConsent;
        assert_eq!(err.to_string(), "consent string must be \"YES\"");
    }

    #[test]
    fn test_from_io_folds_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = TsdbError::from_io("/data/x.json", io_err);
        assert!(err.is_not_found());

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = TsdbError::from_io("/data/x.json", io_err);
        assert!(matches!(err, TsdbError::Io { .. }));
    }
}
