//! Time-series engine facade
//!
//! The main engine orchestrates all components:
//! - Write path: point → router → RAM buffer → (ceiling/timer) → shard file → index
//! - Read path: query → bucket scan → index filter → shard files → aggregation → cache
//!
//! Thread-safe via Tokio's async RwLock; every operation runs to
//! completion before the caller resumes. The debounced autosave task
//! is the only background collaborator and is disarmed by `clear` and
//! stopped by `close`.

use crate::config::TsdbConfig;
use crate::index::{HourEntry, IndexManager, IndexTree};
use crate::query::{
    fingerprint, iso_utc, AggregateValue, Aggregation, BucketScan, QueryCache, QueryError,
    QueryResult,
};
use crate::storage::buffer::{PendingShard, RamBuffer};
use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::router::route;
use crate::storage::types::Point;
use crate::storage::{fs, shard};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::{sleep_until, Instant};

const INDEX_FILE: &str = "index.json";
const INDEX_BACKUP_FILE: &str = "index_backup.json";

/// The consent literal required by destructive operations
const CONSENT: &str = "YES";

/// Mutable lifecycle flags
#[derive(Debug, Default)]
struct EngineState {
    /// Buffered points exist that have not reached disk
    dirty: bool,
    /// The database was cleared; the next flush skips shard writes but
    /// still persists the (empty) index
    cleared: bool,
}

/// On-disk backup document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    /// The data directory the backup was taken from (and restores to)
    pub database_directory: PathBuf,
    /// Shard file name → its parsed points
    pub data_points: BTreeMap<String, Vec<Point>>,
    /// The index tree, when the backup included it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexTree>,
}

/// The embedded time-series engine
pub struct Tsdb {
    /// Configuration; the directory is adopted from a backup on restore
    config: RwLock<TsdbConfig>,
    /// Pending points per shard
    buffer: RwLock<RamBuffer>,
    /// Which buckets have shard files
    index: RwLock<IndexManager>,
    /// Memoized query results
    cache: RwLock<QueryCache>,
    /// Lifecycle flags
    state: RwLock<EngineState>,
    /// Trailing-edge autosave deadline; `None` while disarmed
    autosave_deadline: RwLock<Option<Instant>>,
    /// Wakes the autosave task after a re-arm, disarm, or shutdown
    autosave_notify: Notify,
    /// Set by `close`; the autosave task exits
    shutdown: RwLock<bool>,
}

impl Tsdb {
    /// Open (or create) the database directory and load the index,
    /// recovering it if either envelope is damaged
    pub async fn open(config: TsdbConfig) -> TsdbResult<Self> {
        fs::mkdir_idempotent(&config.directory)?;

        let mut index = IndexManager::new(&config.directory);
        index.load_or_recover();

        tracing::info!(
            directory = %config.directory.display(),
            frame = %config.frame,
            "time-series engine opened"
        );

        Ok(Self {
            config: RwLock::new(config),
            buffer: RwLock::new(RamBuffer::new()),
            index: RwLock::new(index),
            cache: RwLock::new(QueryCache::new()),
            state: RwLock::new(EngineState::default()),
            autosave_deadline: RwLock::new(None),
            autosave_notify: Notify::new(),
            shutdown: RwLock::new(false),
        })
    }

    /// Start the debounced autosave task
    ///
    /// Every write re-arms the deadline; when it elapses untouched the
    /// task flushes and differentially persists the index. The task
    /// exits on `close`.
    pub fn start_autosave(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                if *engine.shutdown.read().await {
                    break;
                }

                let deadline = *engine.autosave_deadline.read().await;
                match deadline {
                    None => engine.autosave_notify.notified().await,
                    Some(at) => {
                        tokio::select! {
                            _ = engine.autosave_notify.notified() => {}
                            _ = sleep_until(at) => {
                                *engine.autosave_deadline.write().await = None;
                                tracing::debug!("autosave deadline elapsed");
                                if let Err(e) = engine.flush().await {
                                    tracing::error!(error = %e, "autosave flush failed");
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Push the autosave deadline out by the configured interval
    async fn arm_autosave(&self) {
        let interval = self.config.read().await.autosave_interval_s;
        *self.autosave_deadline.write().await =
            Some(Instant::now() + Duration::from_secs(interval));
        self.autosave_notify.notify_one();
    }

    async fn disarm_autosave(&self) {
        *self.autosave_deadline.write().await = None;
        self.autosave_notify.notify_one();
    }

    // ==================== Write Path ====================

    /// Ingest one sample; `timestamp` defaults to now
    ///
    /// The point is buffered in RAM, the autosave timer is re-armed,
    /// and a buffer past its byte ceiling flushes synchronously.
    pub async fn write_point(
        &self,
        measurement: impl Into<String>,
        value: f64,
        timestamp: Option<i64>,
    ) -> TsdbResult<()> {
        let (directory, frame, ceiling) = {
            let config = self.config.read().await;
            (
                config.directory.clone(),
                config.frame,
                config.ram_ceiling_bytes,
            )
        };

        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        let location = route(timestamp, frame, &directory)?;
        let point = Point::with_timestamp(measurement, value, timestamp);

        let should_flush = {
            let mut buffer = self.buffer.write().await;
            buffer.append(location, point);
            buffer.estimated_bytes() >= ceiling
        };

        self.state.write().await.dirty = true;
        self.arm_autosave().await;

        if should_flush {
            tracing::debug!("RAM ceiling reached, flushing");
            self.flush().await?;
        }

        Ok(())
    }

    /// Ingest a batch of pre-built points
    ///
    /// All points are routed before any is buffered, so a bad
    /// timestamp rejects the whole batch.
    pub async fn write_points(&self, points: Vec<Point>) -> TsdbResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let (directory, frame, ceiling) = {
            let config = self.config.read().await;
            (
                config.directory.clone(),
                config.frame,
                config.ram_ceiling_bytes,
            )
        };

        let mut routed = Vec::with_capacity(points.len());
        for point in points {
            let location = route(point.timestamp, frame, &directory)?;
            routed.push((location, point));
        }

        let should_flush = {
            let mut buffer = self.buffer.write().await;
            for (location, point) in routed {
                buffer.append(location, point);
            }
            buffer.estimated_bytes() >= ceiling
        };

        self.state.write().await.dirty = true;
        self.arm_autosave().await;

        if should_flush {
            tracing::debug!("RAM ceiling reached, flushing");
            self.flush().await?;
        }

        Ok(())
    }

    /// Write buffered points to their shard files and persist the
    /// index if it changed
    ///
    /// Each shard is rewritten as one truncating write of the old
    /// points followed by the new, so order within a shard is
    /// preserved and partial concatenation is never observed.
    /// Idempotent when neither dirty nor just-cleared.
    pub async fn flush(&self) -> TsdbResult<()> {
        // After a clear there is nothing to write, but the now-empty
        // index still has to reach disk
        {
            let mut state = self.state.write().await;
            if state.cleared {
                state.cleared = false;
                state.dirty = false;
                drop(state);

                self.buffer.write().await.clear();
                if let Err(e) = self.index.write().await.persist() {
                    tracing::warn!(error = %e, "index persist after clear failed");
                }
                self.cache.write().await.invalidate_all();
                return Ok(());
            }
        }

        let dirty = self.state.read().await.dirty;
        let pending = self.buffer.write().await.drain();
        if pending.is_empty() && !dirty {
            return Ok(());
        }

        tracing::debug!(shards = pending.len(), "flushing buffered points");

        {
            let mut index = self.index.write().await;
            for PendingShard { location, points } in pending {
                let existing = match shard::read(&location.path) {
                    Ok(points) => points,
                    Err(e) => {
                        tracing::warn!(
                            path = %location.path.display(),
                            error = %e,
                            "unreadable shard, rewriting with buffered points only"
                        );
                        Vec::new()
                    }
                };

                let mut union = existing;
                union.extend(points);
                if let Err(e) = shard::write(&location.path, &union) {
                    tracing::error!(
                        path = %location.path.display(),
                        error = %e,
                        "shard write failed, buffered points lost"
                    );
                    continue;
                }
                index.mark_present(&location);
            }

            if let Err(e) = index.persist_if_changed() {
                tracing::warn!(error = %e, "index persist failed");
            }
        }

        self.state.write().await.dirty = false;
        self.cache.write().await.invalidate_all();
        Ok(())
    }

    // ==================== Read Path ====================

    /// Run an aggregation over a time range
    ///
    /// The scan is bucket-inclusive: every shard whose bucket touches
    /// `[start_ms, end_ms]` contributes all of its points, with no
    /// per-point timestamp filtering. Results are memoized until the
    /// next mutation.
    pub async fn query(
        &self,
        start_ms: i64,
        end_ms: i64,
        aggregation: &str,
    ) -> QueryResult<AggregateValue> {
        let aggregation = Aggregation::parse(aggregation)?;
        self.query_with(start_ms, end_ms, aggregation).await
    }

    /// Like [`query`](Self::query) with a pre-parsed (possibly
    /// [`Aggregation::Custom`]) aggregation
    ///
    /// Custom reducers are cached under the `"custom"` key; callers
    /// alternating different reducers over identical bounds should
    /// interpose a mutation (or distinct bounds) between them.
    pub async fn query_with(
        &self,
        start_ms: i64,
        end_ms: i64,
        aggregation: Aggregation,
    ) -> QueryResult<AggregateValue> {
        let start_iso = iso_utc(start_ms)
            .ok_or(TsdbError::InvalidTimestamp(start_ms))
            .map_err(QueryError::from)?;
        let end_iso = iso_utc(end_ms)
            .ok_or(TsdbError::InvalidTimestamp(end_ms))
            .map_err(QueryError::from)?;

        let fingerprint = fingerprint(&start_iso, &end_iso, &aggregation.key());
        if let Some(hit) = self.cache.read().await.get(&fingerprint) {
            tracing::debug!(%fingerprint, "query cache hit");
            return Ok(hit.clone());
        }

        let points = self.scan_range(start_ms, end_ms).await?;
        let result = aggregation.apply(&points);
        self.cache
            .write()
            .await
            .insert(fingerprint, result.clone());
        Ok(result)
    }

    /// The concatenated point sequence of a range scan, unaggregated
    /// and unmemoized
    ///
    /// Bounds are bucket-inclusive like [`query`](Self::query);
    /// callers needing strict point-wise bounds filter the result.
    pub async fn retrieve_data_series(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> TsdbResult<Vec<Point>> {
        self.scan_range(start_ms, end_ms).await
    }

    async fn scan_range(&self, start_ms: i64, end_ms: i64) -> TsdbResult<Vec<Point>> {
        let (directory, frame) = {
            let config = self.config.read().await;
            (config.directory.clone(), config.frame)
        };

        let index = self.index.read().await;
        let mut points = Vec::new();

        for bucket_ms in BucketScan::new(start_ms, end_ms, frame) {
            let Ok(location) = route(bucket_ms, frame, &directory) else {
                continue;
            };
            if !index.contains(
                &location.date_key,
                &location.hour_key,
                location.minute_key.as_deref(),
            ) {
                continue;
            }
            match shard::read(&location.path) {
                Ok(shard_points) => points.extend(shard_points),
                Err(e) => {
                    tracing::warn!(
                        path = %location.path.display(),
                        error = %e,
                        "skipping unreadable shard"
                    );
                }
            }
        }

        Ok(points)
    }

    // ==================== Maintenance ====================

    /// Remove every shard of every date strictly before the
    /// threshold's UTC calendar date, returning how many dates were
    /// dropped
    pub async fn purge(&self, older_than_ms: i64) -> TsdbResult<usize> {
        let threshold = Utc
            .timestamp_millis_opt(older_than_ms)
            .single()
            .ok_or(TsdbError::InvalidTimestamp(older_than_ms))?
            .date_naive();
        let directory = self.config.read().await.directory.clone();

        let mut index = self.index.write().await;
        let stale: Vec<String> = index
            .date_keys()
            .into_iter()
            .filter(|key| {
                NaiveDate::parse_from_str(key, "%Y_%m_%d")
                    .map(|date| date < threshold)
                    .unwrap_or(false)
            })
            .collect();

        for date_key in &stale {
            let Some(hours) = index.drop_date(date_key) else {
                continue;
            };
            for (hour_key, entry) in hours {
                let names: Vec<String> = match entry {
                    HourEntry::Present(_) => {
                        vec![format!("{date_key}_{hour_key}.json")]
                    }
                    HourEntry::Minutes(minutes) => minutes
                        .keys()
                        .map(|minute| format!("{date_key}_{hour_key}_{minute}.json"))
                        .collect(),
                };
                for name in names {
                    let path = directory.join(&name);
                    if let Err(e) = fs::remove(&path) {
                        if !e.is_not_found() {
                            tracing::warn!(path = %path.display(), error = %e, "purge remove failed");
                        }
                    }
                }
            }
        }

        if !stale.is_empty() {
            if let Err(e) = index.persist() {
                tracing::warn!(error = %e, "index persist after purge failed");
            }
            drop(index);
            self.cache.write().await.invalidate_all();
            tracing::info!(dates = stale.len(), "purged");
        }

        Ok(stale.len())
    }

    /// Delete every file in the data directory and reset all state
    ///
    /// Requires the literal consent string `"YES"`; anything else is a
    /// logged no-op error. The autosave timer is disarmed and the next
    /// `flush` skips shard writes but still persists the empty index.
    pub async fn clear(&self, consent: &str) -> TsdbResult<()> {
        if consent != CONSENT {
            tracing::warn!("clear refused: consent string mismatch");
            return Err(TsdbError::InvalidConsent);
        }

        self.disarm_autosave().await;
        let directory = self.config.read().await.directory.clone();

        match fs::list(&directory) {
            Ok(names) => {
                for name in names {
                    let path = directory.join(&name);
                    if let Ok(st) = fs::stat(&path) {
                        if st.is_dir {
                            tracing::warn!(path = %path.display(), "skipping subdirectory during clear");
                            continue;
                        }
                    }
                    if let Err(e) = fs::remove(&path) {
                        if !e.is_not_found() {
                            tracing::warn!(path = %path.display(), error = %e, "clear remove failed");
                        }
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(error = %e, "clear could not list data directory");
            }
        }

        self.buffer.write().await.clear();
        self.index.write().await.reset();
        self.cache.write().await.invalidate_all();
        {
            let mut state = self.state.write().await;
            state.dirty = false;
            state.cleared = true;
        }

        tracing::info!(directory = %directory.display(), "database cleared");
        Ok(())
    }

    /// Flush outstanding work, stop the autosave task, and persist the
    /// index if it changed
    pub async fn close(&self) -> TsdbResult<()> {
        let (dirty, cleared) = {
            let state = self.state.read().await;
            (state.dirty, state.cleared)
        };
        if dirty || cleared {
            self.flush().await?;
        }

        *self.shutdown.write().await = true;
        self.disarm_autosave().await;

        if let Err(e) = self.index.write().await.persist_if_changed() {
            tracing::warn!(error = %e, "index persist on close failed");
        }

        tracing::info!("engine closed");
        Ok(())
    }

    // ==================== Backup & Restore ====================

    /// Write a pretty-printed backup of every shard (never the index
    /// envelopes) to `easy_tsdb_backups/<name>.json`, optionally with
    /// the index tree. Returns the written path.
    ///
    /// Only what is on disk is captured; flush first to include
    /// buffered points.
    pub async fn backup(&self, name: &str, include_index: bool) -> TsdbResult<PathBuf> {
        let config = self.config.read().await;
        let directory = config.directory.clone();
        let backup_dir = config.backup_dir();
        drop(config);

        let mut data_points = BTreeMap::new();
        let names = match fs::list(&directory) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        for file_name in names {
            if file_name == INDEX_FILE || file_name == INDEX_BACKUP_FILE {
                continue;
            }
            let path = directory.join(&file_name);
            match shard::read(&path) {
                Ok(points) => {
                    data_points.insert(file_name, points);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "backup skipping unreadable file");
                }
            }
        }

        let index = if include_index {
            Some(self.index.read().await.tree().clone())
        } else {
            None
        };

        let document = BackupDocument {
            database_directory: directory,
            data_points,
            index,
        };

        fs::mkdir_idempotent(&backup_dir)?;
        let path = backup_dir.join(format!("{name}.json"));
        let text = serde_json::to_string_pretty(&document).map_err(|e| TsdbError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write_text_truncating(&path, &text)?;

        tracing::info!(
            path = %path.display(),
            shards = document.data_points.len(),
            include_index,
            "backup written"
        );
        Ok(path)
    }

    /// Replace the database with a backup's contents
    ///
    /// Adopts the backup's data directory, clears it, rewrites every
    /// shard, then either adopts the backed-up index verbatim or
    /// rebuilds it from the restored files when `recalculate_index`
    /// is set (or the backup carried no index).
    pub async fn restore(
        &self,
        consent: &str,
        backup_path: impl AsRef<std::path::Path>,
        recalculate_index: bool,
    ) -> TsdbResult<()> {
        if consent != CONSENT {
            tracing::warn!("restore refused: consent string mismatch");
            return Err(TsdbError::InvalidConsent);
        }

        let backup_path = backup_path.as_ref();
        let text = fs::read_text(backup_path)?;
        let document: BackupDocument =
            serde_json::from_str(&text).map_err(|e| TsdbError::Parse {
                path: backup_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let directory = document.database_directory.clone();
        self.config.write().await.directory = directory.clone();

        self.clear(CONSENT).await?;
        fs::mkdir_idempotent(&directory)?;

        for (name, points) in &document.data_points {
            let path = directory.join(name);
            if let Err(e) = shard::write(&path, points) {
                tracing::warn!(path = %path.display(), error = %e, "restore shard write failed");
            }
        }

        {
            let mut index = self.index.write().await;
            *index = IndexManager::new(&directory);
            match (document.index, recalculate_index) {
                (Some(tree), false) => index.adopt(tree),
                _ => {
                    if let Err(e) = index.rebuild_from_disk() {
                        tracing::warn!(error = %e, "restore index rebuild failed");
                    }
                }
            }
            if let Err(e) = index.persist() {
                tracing::warn!(error = %e, "index persist after restore failed");
            }
        }

        {
            let mut state = self.state.write().await;
            state.dirty = false;
            state.cleared = false;
        }

        tracing::info!(
            directory = %directory.display(),
            shards = document.data_points.len(),
            "restore complete"
        );
        Ok(())
    }

    // ==================== Introspection ====================

    /// Engine statistics
    pub async fn stats(&self) -> TsdbStats {
        let buffer = self.buffer.read().await;
        let index = self.index.read().await;
        let state = self.state.read().await;

        TsdbStats {
            buffered_points: buffer.point_count(),
            buffered_bytes: buffer.estimated_bytes(),
            indexed_dates: index.date_count(),
            indexed_shards: index.shard_count(),
            dirty: state.dirty,
        }
    }

    /// The current data directory
    pub async fn directory(&self) -> PathBuf {
        self.config.read().await.directory.clone()
    }
}

/// Engine statistics
#[derive(Debug, Clone)]
pub struct TsdbStats {
    pub buffered_points: usize,
    pub buffered_bytes: usize,
    pub indexed_dates: usize,
    pub indexed_shards: usize,
    pub dirty: bool,
}

impl std::fmt::Display for TsdbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Buffered: {} points ({} B), Indexed: {} dates / {} shards, Dirty: {}",
            self.buffered_points,
            self.buffered_bytes,
            self.indexed_dates,
            self.indexed_shards,
            self.dirty
        )
    }
}
