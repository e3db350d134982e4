//! Streaming document jobs
//!
//! The two job kinds the queue runs: a chunked document write and an
//! incremental document read. Each is an explicit state machine that
//! one `tick` advances until completion or the slice deadline; partial
//! progress (the write buffer, the read cursor) survives across
//! slices. Completion is delivered over a oneshot channel — dropping a
//! pending job drops its sender, which the receiver observes as
//! cancellation.

use crate::config::QueueConfig;
use crate::pipeline::codec::{
    is_meta_line, item_line, split_document, DocumentDecoder, SplitDocument,
};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::queue::{JobTick, StreamJob};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::oneshot;

enum WriteState {
    /// Nothing emitted yet; the document is still whole
    Meta { document: Value },
    /// Emitting item records for `arrays[field_idx][elem_idx..]`
    Items {
        split: SplitDocument,
        field_idx: usize,
        elem_idx: usize,
    },
    Done,
}

/// Streams one JSON document to a file in the line-delimited format
pub struct DocumentWriteJob {
    path: PathBuf,
    state: WriteState,
    out: Option<File>,
    /// Pending lines not yet handed to the file
    buf: String,
    chunk_bytes: usize,
    done: Option<oneshot::Sender<PipelineResult<()>>>,
}

impl DocumentWriteJob {
    /// Build the job and the receiver its completion arrives on
    pub fn new(
        path: impl Into<PathBuf>,
        document: Value,
        config: &QueueConfig,
    ) -> (Self, oneshot::Receiver<PipelineResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                path: path.into(),
                state: WriteState::Meta { document },
                out: None,
                buf: String::new(),
                chunk_bytes: config.write_chunk_bytes,
                done: Some(tx),
            },
            rx,
        )
    }

    /// Advance one unit of work; `Ok(true)` means the file is complete
    fn step(&mut self) -> PipelineResult<bool> {
        match std::mem::replace(&mut self.state, WriteState::Done) {
            WriteState::Meta { document } => {
                let Value::Object(doc) = document else {
                    return Err(PipelineError::NotAnObject);
                };
                let split = split_document(&doc)?;
                let file = File::create(&self.path)
                    .map_err(|e| PipelineError::from_io(&self.path, e))?;
                self.buf.push_str(&split.meta_line);
                self.buf.push('\n');
                self.out = Some(file);
                self.state = WriteState::Items {
                    split,
                    field_idx: 0,
                    elem_idx: 0,
                };
                Ok(false)
            }
            WriteState::Items {
                split,
                mut field_idx,
                mut elem_idx,
            } => {
                if field_idx >= split.arrays.len() {
                    // Flush the tail and release the handle
                    if let Some(mut file) = self.out.take() {
                        if !self.buf.is_empty() {
                            file.write_all(self.buf.as_bytes())
                                .map_err(|e| PipelineError::from_io(&self.path, e))?;
                            self.buf.clear();
                        }
                        file.flush()
                            .map_err(|e| PipelineError::from_io(&self.path, e))?;
                    }
                    return Ok(true);
                }

                let (field, items) = &split.arrays[field_idx];
                if elem_idx >= items.len() {
                    field_idx += 1;
                    elem_idx = 0;
                } else {
                    let line = item_line(field, &items[elem_idx])?;
                    self.buf.push_str(&line);
                    self.buf.push('\n');
                    elem_idx += 1;

                    if self.buf.len() >= self.chunk_bytes {
                        if let Some(file) = self.out.as_mut() {
                            file.write_all(self.buf.as_bytes())
                                .map_err(|e| PipelineError::from_io(&self.path, e))?;
                        }
                        self.buf.clear();
                    }
                }
                self.state = WriteState::Items {
                    split,
                    field_idx,
                    elem_idx,
                };
                Ok(false)
            }
            WriteState::Done => Ok(true),
        }
    }

    fn finish(&mut self, result: PipelineResult<()>) -> JobTick {
        // The handle is released on every exit path, error included
        self.out = None;
        self.state = WriteState::Done;
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
        JobTick::Complete
    }
}

impl StreamJob for DocumentWriteJob {
    fn tick(&mut self, deadline: Instant) -> JobTick {
        loop {
            match self.step() {
                Ok(true) => return self.finish(Ok(())),
                Ok(false) => {}
                Err(e) => return self.finish(Err(e)),
            }
            if Instant::now() >= deadline {
                return JobTick::Yielded;
            }
        }
    }
}

enum ReadState {
    Open,
    Streaming {
        lines: Lines<BufReader<File>>,
        decoder: DocumentDecoder,
    },
    Done,
}

/// Reads a streamed (or legacy single-blob) document back off disk
pub struct DocumentReadJob {
    path: PathBuf,
    state: ReadState,
    /// Records parsed per slice before yielding
    stride: usize,
    done: Option<oneshot::Sender<PipelineResult<Value>>>,
}

impl DocumentReadJob {
    /// Build the job and the receiver the document arrives on
    pub fn new(
        path: impl Into<PathBuf>,
        config: &QueueConfig,
    ) -> (Self, oneshot::Receiver<PipelineResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                path: path.into(),
                state: ReadState::Open,
                stride: config.read_yield_stride.max(1),
                done: Some(tx),
            },
            rx,
        )
    }

    /// Open the file and classify its format. Returns the streaming
    /// cursor, or `None` when the legacy path already completed the
    /// job in place.
    fn open(&mut self) -> PipelineResult<Option<(Lines<BufReader<File>>, DocumentDecoder)>> {
        let file = File::open(&self.path).map_err(|e| PipelineError::from_io(&self.path, e))?;
        let mut lines = BufReader::new(file).lines();

        let first = loop {
            match lines.next() {
                Some(Ok(line)) => {
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                Some(Err(e)) => return Err(PipelineError::from_io(&self.path, e)),
                None => return Err(PipelineError::EmptyDocument),
            }
        };

        if is_meta_line(&first) {
            let mut decoder = DocumentDecoder::new();
            decoder.feed_line(&first)?;
            return Ok(Some((lines, decoder)));
        }

        // Legacy single-object blob (the save-and-quit fallback): it
        // may span lines, so slurp the remainder and parse it whole
        let mut text = first;
        for line in lines {
            let line = line.map_err(|e| PipelineError::from_io(&self.path, e))?;
            text.push('\n');
            text.push_str(&line);
        }
        let value: Value = serde_json::from_str(&text)?;
        if !value.is_object() {
            return Err(PipelineError::NotAnObject);
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(value));
        }
        Ok(None)
    }

    fn fail(&mut self, error: PipelineError) -> JobTick {
        self.state = ReadState::Done;
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(error));
        }
        JobTick::Complete
    }
}

impl StreamJob for DocumentReadJob {
    fn tick(&mut self, deadline: Instant) -> JobTick {
        loop {
            match std::mem::replace(&mut self.state, ReadState::Done) {
                ReadState::Open => match self.open() {
                    Ok(Some((lines, decoder))) => {
                        self.state = ReadState::Streaming { lines, decoder };
                    }
                    Ok(None) => return JobTick::Complete,
                    Err(e) => return self.fail(e),
                },
                ReadState::Streaming {
                    mut lines,
                    mut decoder,
                } => {
                    let mut parsed = 0usize;
                    loop {
                        if parsed >= self.stride || Instant::now() >= deadline {
                            self.state = ReadState::Streaming { lines, decoder };
                            return JobTick::Yielded;
                        }
                        match lines.next() {
                            Some(Ok(line)) => {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                if let Err(e) = decoder.feed_line(&line) {
                                    return self.fail(e);
                                }
                                parsed += 1;
                            }
                            Some(Err(e)) => {
                                return self.fail(PipelineError::from_io(&self.path, e));
                            }
                            None => {
                                self.state = ReadState::Done;
                                if let Some(done) = self.done.take() {
                                    let _ = done.send(Ok(decoder.finish()));
                                }
                                return JobTick::Complete;
                            }
                        }
                    }
                }
                ReadState::Done => return JobTick::Complete,
            }
            if Instant::now() >= deadline {
                return JobTick::Yielded;
            }
        }
    }
}

/// Files copied per slice before yielding
const COPIES_PER_SLICE: usize = 3;

/// Copies a batch of small metadata files, at most three per slice,
/// so even a long list cannot hog the executor
pub struct FileCopyJob {
    copies: Vec<(PathBuf, PathBuf)>,
    next: usize,
    done: Option<oneshot::Sender<PipelineResult<usize>>>,
}

impl FileCopyJob {
    /// Build the job from `(source, destination)` pairs; the receiver
    /// resolves with the number of files copied
    pub fn new(
        copies: Vec<(PathBuf, PathBuf)>,
    ) -> (Self, oneshot::Receiver<PipelineResult<usize>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                copies,
                next: 0,
                done: Some(tx),
            },
            rx,
        )
    }

    fn finish(&mut self, result: PipelineResult<usize>) -> JobTick {
        self.next = self.copies.len();
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
        JobTick::Complete
    }
}

impl StreamJob for FileCopyJob {
    fn tick(&mut self, deadline: Instant) -> JobTick {
        let mut copied_this_slice = 0;
        loop {
            if self.next >= self.copies.len() {
                let total = self.next;
                return self.finish(Ok(total));
            }
            if copied_this_slice >= COPIES_PER_SLICE || Instant::now() >= deadline {
                return JobTick::Yielded;
            }

            let (src, dst) = self.copies[self.next].clone();
            if let Err(e) = crate::storage::fs::copy_file(&src, &dst) {
                return self.finish(Err(e.into()));
            }
            self.next += 1;
            copied_this_slice += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Drive a job to completion outside the queue
    fn run(job: &mut dyn StreamJob) -> usize {
        let mut slices = 0;
        loop {
            slices += 1;
            let deadline = Instant::now() + Duration::from_millis(1);
            if let JobTick::Complete = job.tick(deadline) {
                return slices;
            }
            assert!(slices < 100_000, "job never completed");
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = json!({
            "device": "probe-1",
            "samples": (0..200).collect::<Vec<i64>>()
        });

        let config = QueueConfig::default();
        let (mut write, mut write_rx) = DocumentWriteJob::new(&path, doc.clone(), &config);
        run(&mut write);
        write_rx.try_recv().unwrap().unwrap();

        // First line is a meta record declaring the array and its length
        let text = std::fs::read_to_string(&path).unwrap();
        let meta: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(meta["T"], "meta");
        assert_eq!(meta["A"], json!(["samples"]));
        assert_eq!(meta["samples"], 200);
        assert_eq!(text.lines().count(), 201);

        let (mut read, mut read_rx) = DocumentReadJob::new(&path, &config);
        run(&mut read);
        assert_eq!(read_rx.try_recv().unwrap().unwrap(), doc);
    }

    #[test]
    fn test_reader_yields_between_strides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = json!({"xs": (0..50).collect::<Vec<i64>>()});

        let config = QueueConfig::default();
        let (mut write, _rx) = DocumentWriteJob::new(&path, doc.clone(), &config);
        run(&mut write);

        // A generous deadline: the stride alone must force yields
        let (mut read, mut read_rx) = DocumentReadJob::new(&path, &config);
        let mut slices = 0;
        loop {
            slices += 1;
            let deadline = Instant::now() + Duration::from_secs(5);
            if let JobTick::Complete = read.tick(deadline) {
                break;
            }
        }
        // 51 records at 5 per slice
        assert!(slices >= 10, "read completed in {slices} slices");
        assert_eq!(read_rx.try_recv().unwrap().unwrap(), doc);
    }

    #[test]
    fn test_reader_accepts_legacy_blob() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{\n  \"a\": 1,\n  \"xs\": [1, 2, 3]\n}\n").unwrap();

        let (mut read, mut rx) = DocumentReadJob::new(&path, &QueueConfig::default());
        run(&mut read);
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            json!({"a": 1, "xs": [1, 2, 3]})
        );
    }

    #[test]
    fn test_write_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let (mut write, mut rx) =
            DocumentWriteJob::new(&path, json!([1, 2]), &QueueConfig::default());
        run(&mut write);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(PipelineError::NotAnObject)
        ));
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let (mut read, mut rx) =
            DocumentReadJob::new(dir.path().join("absent.json"), &QueueConfig::default());
        run(&mut read);
        assert!(matches!(rx.try_recv().unwrap(), Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_file_copy_yields_every_three() {
        let dir = tempdir().unwrap();
        let copies: Vec<(PathBuf, PathBuf)> = (0..7)
            .map(|i| {
                let src = dir.path().join(format!("src_{i}.json"));
                std::fs::write(&src, format!("{{\"n\":{i}}}")).unwrap();
                (src, dir.path().join(format!("dst_{i}.json")))
            })
            .collect();

        let (mut job, mut rx) = FileCopyJob::new(copies);

        // 7 files at 3 per slice: two yields, then completion
        let far = || Instant::now() + Duration::from_secs(5);
        assert_eq!(job.tick(far()), JobTick::Yielded);
        assert_eq!(job.tick(far()), JobTick::Yielded);
        assert_eq!(job.tick(far()), JobTick::Complete);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 7);

        for i in 0..7 {
            let copied =
                std::fs::read_to_string(dir.path().join(format!("dst_{i}.json"))).unwrap();
            assert_eq!(copied, format!("{{\"n\":{i}}}"));
        }
    }

    #[test]
    fn test_file_copy_missing_source_fails() {
        let dir = tempdir().unwrap();
        let (mut job, mut rx) = FileCopyJob::new(vec![(
            dir.path().join("absent.json"),
            dir.path().join("dst.json"),
        )]);
        run(&mut job);
        assert!(matches!(rx.try_recv().unwrap(), Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_write_survives_tiny_deadline_slices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = json!({"xs": (0..100).collect::<Vec<i64>>()});

        let (mut write, mut rx) = DocumentWriteJob::new(&path, doc.clone(), &QueueConfig::default());
        // Already-expired deadlines: one unit of progress per tick
        let mut slices = 0;
        loop {
            slices += 1;
            if let JobTick::Complete = write.tick(Instant::now()) {
                break;
            }
            assert!(slices < 100_000);
        }
        rx.try_recv().unwrap().unwrap();
        assert!(slices > 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            crate::pipeline::codec::decode_document(&text).unwrap(),
            doc
        );
    }
}
