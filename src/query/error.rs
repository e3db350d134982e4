//! Query error types

use thiserror::Error;

/// Errors that can occur during query planning and execution
#[derive(Error, Debug)]
pub enum QueryError {
    /// Unknown aggregation key
    #[error("unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    /// Storage layer error
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::TsdbError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
