//! Configuration System
//!
//! Engine and pipeline options, deserializable from a TOML config file
//! with per-field defaults so partial configs work.

use crate::storage::Frame;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {error}")]
    Io {
        /// Path that was attempted
        path: PathBuf,
        /// Description of the I/O failure
        error: String,
    },

    /// Config file is not valid TOML
    #[error("failed to parse config {path}: {error}")]
    Parse {
        /// Path that was attempted
        path: PathBuf,
        /// Description of the parse failure
        error: String,
    },
}

/// Top-level configuration: the engine plus the async pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tsdb: TsdbConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }
}

/// Directory that backup files are written into, next to the data
/// directory.
pub const BACKUP_DIR: &str = "easy_tsdb_backups";

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TsdbConfig {
    /// Root directory for shard files and the index envelopes
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Shard granularity: one file per hour or per minute
    #[serde(default)]
    pub frame: Frame,

    /// RAM buffer overflow threshold in bytes; exceeding it triggers a
    /// synchronous flush
    #[serde(default = "default_ram_ceiling")]
    pub ram_ceiling_bytes: usize,

    /// Trailing-edge debounce for the autosave flush, in seconds
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_s: u64,
}

fn default_directory() -> PathBuf {
    PathBuf::from("easy_timeseries_db")
}

fn default_ram_ceiling() -> usize {
    200 * 1024 // 200 KiB
}

fn default_autosave_interval() -> u64 {
    600 // 10 minutes
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            frame: Frame::default(),
            ram_ceiling_bytes: default_ram_ceiling(),
            autosave_interval_s: default_autosave_interval(),
        }
    }
}

impl TsdbConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Builder: set the shard frame
    pub fn frame(mut self, frame: Frame) -> Self {
        self.frame = frame;
        self
    }

    /// Builder: set the RAM buffer ceiling
    pub fn ram_ceiling_bytes(mut self, bytes: usize) -> Self {
        self.ram_ceiling_bytes = bytes;
        self
    }

    /// Builder: set the autosave debounce interval
    pub fn autosave_interval_s(mut self, seconds: u64) -> Self {
        self.autosave_interval_s = seconds;
        self
    }

    /// Path of the primary index envelope
    pub fn index_path(&self) -> PathBuf {
        self.directory.join("index.json")
    }

    /// Path of the backup index envelope
    pub fn index_backup_path(&self) -> PathBuf {
        self.directory.join("index_backup.json")
    }

    /// Directory backup files are written into: `easy_tsdb_backups`
    /// next to the data directory
    pub fn backup_dir(&self) -> PathBuf {
        match self.directory.parent() {
            Some(parent) => parent.join(BACKUP_DIR),
            None => PathBuf::from(BACKUP_DIR),
        }
    }
}

/// Cooperative job queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Time budget for one job slice, in microseconds
    #[serde(default = "default_slice_budget_us")]
    pub slice_budget_us: u64,

    /// Write buffer threshold per chunked file write, in bytes
    #[serde(default = "default_write_chunk_bytes")]
    pub write_chunk_bytes: usize,

    /// Records parsed per read slice before yielding
    #[serde(default = "default_read_yield_stride")]
    pub read_yield_stride: usize,
}

fn default_slice_budget_us() -> u64 {
    1_000 // ~1ms per slice
}

fn default_write_chunk_bytes() -> usize {
    512
}

fn default_read_yield_stride() -> usize {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            slice_budget_us: default_slice_budget_us(),
            write_chunk_bytes: default_write_chunk_bytes(),
            read_yield_stride: default_read_yield_stride(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TsdbConfig::default();
        assert_eq!(config.directory, PathBuf::from("easy_timeseries_db"));
        assert_eq!(config.frame, Frame::Hour);
        assert_eq!(config.ram_ceiling_bytes, 204_800);
        assert_eq!(config.autosave_interval_s, 600);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: TsdbConfig =
            serde_json::from_str(r#"{"directory": "/tmp/ts", "frame": "minute"}"#).unwrap();
        assert_eq!(config.directory, PathBuf::from("/tmp/ts"));
        assert_eq!(config.frame, Frame::Minute);
        // Unspecified fields fall back to defaults
        assert_eq!(config.ram_ceiling_bytes, 204_800);
    }

    #[test]
    fn test_index_paths() {
        let config = TsdbConfig::new("/data/ts");
        assert_eq!(config.index_path(), PathBuf::from("/data/ts/index.json"));
        assert_eq!(
            config.index_backup_path(),
            PathBuf::from("/data/ts/index_backup.json")
        );
    }

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.slice_budget_us, 1_000);
        assert_eq!(config.write_chunk_bytes, 512);
        assert_eq!(config.read_yield_stride, 5);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[tsdb]\ndirectory = \"/tmp/ts\"\nframe = \"minute\"\n\n[queue]\nwrite_chunk_bytes = 1024\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.tsdb.directory, PathBuf::from("/tmp/ts"));
        assert_eq!(config.tsdb.frame, Frame::Minute);
        assert_eq!(config.queue.write_chunk_bytes, 1024);
        // Unlisted sections and fields fall back to defaults
        assert_eq!(config.tsdb.autosave_interval_s, 600);
        assert_eq!(config.queue.read_yield_stride, 5);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tsdb\nbroken").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
