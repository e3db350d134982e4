//! Async pipeline error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the streaming write pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Underlying file operation failed
    #[error("I/O fault at {path}: {source}")]
    Io {
        /// Path the job was working on
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A record line or a legacy blob failed to parse
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Streamed documents must be JSON objects
    #[error("document is not a JSON object")]
    NotAnObject,

    /// The file held no records at all
    #[error("document is empty")]
    EmptyDocument,
}

impl PipelineError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<crate::storage::TsdbError> for PipelineError {
    fn from(error: crate::storage::TsdbError) -> Self {
        use crate::storage::TsdbError;
        match error {
            TsdbError::NotFound(path) => PipelineError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            },
            TsdbError::Io { path, source } => PipelineError::Io { path, source },
            other => PipelineError::Io {
                path: PathBuf::new(),
                source: std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            },
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
