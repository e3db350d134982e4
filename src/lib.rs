//! # Tidemark
//!
//! An embedded time-series storage engine for constrained devices:
//! single digits of MB of RAM, slow flash, short bursts of CPU.
//!
//! ## Features
//!
//! - **Wall-clock sharding**: points land in small per-hour (or
//!   per-minute) JSON files, named after their UTC bucket
//! - **Bounded RAM buffer**: writes accumulate in memory and flush on a
//!   byte ceiling or a debounced autosave timer
//! - **Checksummed index**: a date → hour → minute directory tree with a
//!   primary + backup envelope and a rebuild-from-disk recovery ladder
//! - **Built-in aggregations**: sum, average, percentiles, IQR, trend
//!   and friends, plus a caller-supplied reducer escape hatch
//! - **Cooperative write pipeline**: large JSON documents stream to disk
//!   in millisecond slices so the host's event loop is never starved
//!
//! ## Modules
//!
//! - [`storage`]: shard files, RAM buffer, and the [`Tsdb`] facade
//! - [`index`]: the shard directory index with checksum recovery
//! - [`query`]: aggregations, scan planning, and the query cache
//! - [`pipeline`]: the cooperative job queue and streaming JSON codec
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark::{Tsdb, TsdbConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open (or create) a database directory
//!     let db = Arc::new(Tsdb::open(TsdbConfig::new("./sensor_data")).await?);
//!     db.start_autosave();
//!
//!     // Ingest tagged samples
//!     db.write_point("temperature", 21.5, None).await?;
//!     db.write_point("humidity", 40.0, None).await?;
//!     db.flush().await?;
//!
//!     // Aggregate over a time range
//!     let now = chrono::Utc::now().timestamp_millis();
//!     let avg = db.query(now - 3_600_000, now, "average").await?;
//!     println!("last hour average: {avg:?}");
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod pipeline;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    FileStat, Frame, Point, RamBuffer, ShardLocation, Tsdb, TsdbError, TsdbResult, TsdbStats,
};

pub use index::{HourEntry, IndexEnvelope, IndexManager, IndexTree};

pub use query::{AggregateValue, Aggregation, BucketScan, QueryCache, QueryError, QueryResult};

pub use pipeline::{
    DocumentReadJob, DocumentWriteJob, FileCopyJob, JobQueue, JobTick, PipelineError,
    PipelineResult, StreamJob,
};

pub use config::{Config, ConfigError, QueueConfig, TsdbConfig};
