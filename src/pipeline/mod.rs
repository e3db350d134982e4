//! Asynchronous write pipeline
//!
//! Streams large JSON documents to and from disk in small cooperative
//! slices so the host's UI loop is not starved:
//!
//! - **queue**: the FIFO executor ([`JobQueue`]) with backpressure
//!   between slices
//! - **jobs**: the document write/read state machines
//! - **codec**: the line-delimited, token-compressed record format
//! - **error**: pipeline error types
//!
//! # Data Flow
//!
//! ```text
//! caller → JobQueue::write_document → [pending]
//!        → worker slice: encode ≤1ms, chunk ~512B → file
//!        → oneshot continuation resolves
//! ```
//!
//! The queue is an owned resource, not a process-wide global; create
//! one per engine (or share one explicitly) and `shutdown` it before
//! closing the engine its jobs write into.

mod codec;
mod error;
mod jobs;
mod queue;

pub use codec::{decode_document, encode_document, DocumentDecoder};
pub use error::{PipelineError, PipelineResult};
pub use jobs::{DocumentReadJob, DocumentWriteJob, FileCopyJob};
pub use queue::{JobQueue, JobTick, StreamJob};
