//! Query engine
//!
//! Range queries over the shard space:
//!
//! - **aggregate**: the reducer library and the parsed
//!   [`Aggregation`] dispatch enum
//! - **executor**: scan planning ([`BucketScan`]) and the query cache
//! - **error**: query error types
//!
//! # Execution Pipeline
//!
//! ```text
//! query(start, end, key)
//!     → fingerprint → cache hit? → result
//!     → BucketScan (start − 1 day … end, one bucket per step)
//!     → index filter → shard load per present bucket
//!     → Aggregation::apply → memoize → result
//! ```
//!
//! Scans are bucket-inclusive: any shard whose bucket touches the
//! range is loaded in full and no per-point timestamp filtering is
//! applied. Callers that need strict point-wise bounds retrieve the
//! raw series and filter themselves.

mod aggregate;
mod error;
mod executor;

pub use aggregate::{AggregateValue, Aggregation, CustomReducer};
pub use error::{QueryError, QueryResult};
pub use executor::{fingerprint, iso_utc, BucketScan, QueryCache};
