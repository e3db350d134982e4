//! Core storage engine
//!
//! This module provides the time-series storage functionality:
//!
//! - **types**: core data structures ([`Point`], [`Frame`])
//! - **fs**: the blocking filesystem adapter
//! - **router**: timestamp → shard-file bucket mapping
//! - **shard**: shard file reading and truncating rewrites
//! - **buffer**: the bounded RAM buffer
//! - **engine**: the [`Tsdb`] facade orchestrating all components
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   write_point → router → RAM buffer → (ceiling / autosave) → shard file → index
//!
//! Read Path:
//!   query → bucket scan → index filter → shard files → aggregation → cache
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tidemark::{Tsdb, TsdbConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Tsdb::open(TsdbConfig::new("./data")).await?;
//!
//!     db.write_point("temperature", 21.5, None).await?;
//!     db.flush().await?;
//!
//!     let now = chrono::Utc::now().timestamp_millis();
//!     let series = db.retrieve_data_series(now - 3_600_000, now).await?;
//!     println!("{} points in the last hour", series.len());
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
pub mod fs;
pub mod router;
pub mod shard;
pub mod types;

// Re-export commonly used types
pub use buffer::{PendingShard, RamBuffer};
pub use engine::{BackupDocument, Tsdb, TsdbStats};
pub use error::{TsdbError, TsdbResult};
pub use fs::FileStat;
pub use router::{parse_shard_name, route, ShardLocation};
pub use types::{Frame, Point};
