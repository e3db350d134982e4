//! Cooperative job queue
//!
//! A single logical executor for the async write pipeline: strict FIFO,
//! one job at a time, one bounded time-slice per tick. Between slices
//! the worker sleeps a backpressure delay that grows with the queue
//! depth, so a burst of writes cannot starve the host's event loop.
//!
//! ```text
//! enqueue → [ pending … ] → worker: tick(≤1ms) → sleep(backpressure) → tick …
//!                                      └─ JobTick::Complete → next job
//! ```
//!
//! There is no preemption inside a slice and no cancellation of a job
//! already in one: `reset` drops pending work, `emergency_stop`
//! additionally abandons the active job at its next yield. A job may
//! enqueue further work; it lands at the tail.

use crate::config::QueueConfig;
use crate::pipeline::jobs::{DocumentReadJob, DocumentWriteJob};
use crate::pipeline::error::PipelineResult;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

/// Base backpressure delay between slices, in milliseconds
const BACKPRESSURE_BASE_MS: u64 = 100;
/// Additional delay per queued job, in milliseconds
const BACKPRESSURE_PER_JOB_MS: u64 = 25;
/// Backpressure ceiling, in milliseconds
const BACKPRESSURE_MAX_MS: u64 = 300;
/// Queue depth at which `is_busy` reports backpressure
const BUSY_QUEUE_DEPTH: usize = 4;

/// What a job's slice reported back to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTick {
    /// Out of budget; call again later
    Yielded,
    /// Finished (successfully or not); the job delivered its result
    Complete,
}

/// A unit of streamable work
///
/// `tick` advances the job until it either completes or voluntarily
/// yields at `deadline`. Results travel over the job's own
/// continuation channel, so the worker never inspects them.
pub trait StreamJob: Send {
    fn tick(&mut self, deadline: Instant) -> JobTick;
}

struct QueueShared {
    pending: Mutex<VecDeque<Box<dyn StreamJob>>>,
    /// A job is inside its slice loop
    active: AtomicBool,
    /// Drop the active job at its next yield
    abandon: AtomicBool,
    /// Cleared by shutdown; the worker drains and exits
    running: AtomicBool,
    notify: Notify,
    config: QueueConfig,
}

/// Handle to the cooperative executor
///
/// Owns its worker task. Tear down with [`shutdown`](Self::shutdown)
/// before closing the engine that the queued jobs write into; dropping
/// the handle instead aborts the worker at its next await point.
pub struct JobQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Spawn the executor (requires a tokio runtime)
    pub fn new(config: QueueConfig) -> Self {
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(false),
            abandon: AtomicBool::new(false),
            running: AtomicBool::new(true),
            notify: Notify::new(),
            config,
        });

        let worker = tokio::spawn(Self::run_worker(Arc::clone(&shared)));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run_worker(shared: Arc<QueueShared>) {
        let slice_budget = Duration::from_micros(shared.config.slice_budget_us);

        loop {
            let job = shared.pending.lock().unwrap().pop_front();
            let Some(mut job) = job else {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                shared.notify.notified().await;
                continue;
            };

            shared.active.store(true, Ordering::SeqCst);
            // A stop issued while the queue was idle must not leak into
            // this job
            shared.abandon.store(false, Ordering::SeqCst);

            loop {
                if shared.abandon.swap(false, Ordering::SeqCst) {
                    tracing::warn!("active job abandoned by emergency stop");
                    break;
                }

                let deadline = Instant::now() + slice_budget;
                match job.tick(deadline) {
                    JobTick::Complete => break,
                    JobTick::Yielded => {
                        let queued = shared.pending.lock().unwrap().len();
                        tokio::time::sleep(backpressure_delay(queued)).await;
                    }
                }
            }

            shared.active.store(false, Ordering::SeqCst);
        }
    }

    /// Append a job to the tail of the queue
    pub fn enqueue(&self, job: Box<dyn StreamJob>) {
        self.shared.pending.lock().unwrap().push_back(job);
        self.shared.notify.notify_one();
    }

    /// Enqueue a closure as a job: it is called once per slice with
    /// the deadline and reports back with [`JobTick`]
    pub fn enqueue_fn<F>(&self, body: F)
    where
        F: FnMut(Instant) -> JobTick + Send + 'static,
    {
        self.enqueue(Box::new(FnJob(body)));
    }

    /// Enqueue a streaming document write; the receiver resolves when
    /// the file is fully on disk
    pub fn write_document(
        &self,
        path: impl Into<PathBuf>,
        document: Value,
    ) -> oneshot::Receiver<PipelineResult<()>> {
        let (job, rx) = DocumentWriteJob::new(path, document, &self.shared.config);
        self.enqueue(Box::new(job));
        rx
    }

    /// Enqueue a streaming document read
    pub fn read_document(
        &self,
        path: impl Into<PathBuf>,
    ) -> oneshot::Receiver<PipelineResult<Value>> {
        let (job, rx) = DocumentReadJob::new(path, &self.shared.config);
        self.enqueue(Box::new(job));
        rx
    }

    /// Number of jobs waiting behind the active one
    pub fn queued(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    /// Backpressure signal: the executor is running and either deep in
    /// queued work or mid-job. Not an error — callers poll it.
    pub fn is_busy(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
            && (self.queued() >= BUSY_QUEUE_DEPTH || self.shared.active.load(Ordering::SeqCst))
    }

    /// Drop all queued work. A job already in a slice runs on.
    pub fn reset(&self) {
        let dropped = {
            let mut pending = self.shared.pending.lock().unwrap();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            tracing::info!(dropped, "job queue reset");
        }
    }

    /// Drop all queued work and abandon the active job at its next
    /// yield; the slice it is in runs to that yield
    pub fn emergency_stop(&self) {
        self.reset();
        if self.shared.active.load(Ordering::SeqCst) {
            self.shared.abandon.store(true, Ordering::SeqCst);
        }
        tracing::warn!("job queue emergency stop");
    }

    /// Drain remaining work, then stop the worker
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        // A handle dropped without shutdown: stop the worker outright
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.abort();
        }
    }
}

/// Adapter turning a closure into a job; the closure is the slice body
struct FnJob<F: FnMut(Instant) -> JobTick + Send>(F);

impl<F: FnMut(Instant) -> JobTick + Send> StreamJob for FnJob<F> {
    fn tick(&mut self, deadline: Instant) -> JobTick {
        (self.0)(deadline)
    }
}

/// Delay before the next slice: `min(100 + 25·queued, 300)` ms
fn backpressure_delay(queued: usize) -> Duration {
    let ms = BACKPRESSURE_BASE_MS + BACKPRESSURE_PER_JOB_MS * queued as u64;
    Duration::from_millis(ms.min(BACKPRESSURE_MAX_MS))
}
