//! Shard router
//!
//! Pure mapping between timestamps and shard files. A point's UTC
//! wall-clock bucket selects the file it lands in:
//!
//! ```text
//! hour frame:   {directory}/YYYY_MM_DD_HH.json
//! minute frame: {directory}/YYYY_MM_DD_HH_MM.json
//! ```
//!
//! The measurement is not part of the path; multiple measurements
//! coexist in a shard and are disambiguated by the point's `m` field.
//! Separators are underscores throughout — shard names never contain
//! `-`.

use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::types::Frame;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use std::path::{Path, PathBuf};

/// A routed bucket: its keys and the shard file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    /// `YYYY_MM_DD`
    pub date_key: String,
    /// `HH`, zero-padded
    pub hour_key: String,
    /// `MM`, zero-padded; present only under the minute frame
    pub minute_key: Option<String>,
    /// Full path of the shard file
    pub path: PathBuf,
}

impl ShardLocation {
    /// The shard's file name (last path component)
    pub fn file_name(&self) -> String {
        match &self.minute_key {
            Some(minute) => format!("{}_{}_{}.json", self.date_key, self.hour_key, minute),
            None => format!("{}_{}.json", self.date_key, self.hour_key),
        }
    }
}

/// Map a timestamp onto its wall-clock bucket under `frame`
pub fn route(timestamp_ms: i64, frame: Frame, directory: &Path) -> TsdbResult<ShardLocation> {
    let dt = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(TsdbError::InvalidTimestamp(timestamp_ms))?;

    let date_key = format!("{:04}_{:02}_{:02}", dt.year(), dt.month(), dt.day());
    let hour_key = format!("{:02}", dt.hour());
    let minute_key = match frame {
        Frame::Hour => None,
        Frame::Minute => Some(format!("{:02}", dt.minute())),
    };

    let file_name = match &minute_key {
        Some(minute) => format!("{}_{}_{}.json", date_key, hour_key, minute),
        None => format!("{}_{}.json", date_key, hour_key),
    };

    Ok(ShardLocation {
        date_key,
        hour_key,
        minute_key,
        path: directory.join(file_name),
    })
}

/// Parse a shard file name back into its bucket keys
///
/// Accepts `YYYY_MM_DD_HH.json` and `YYYY_MM_DD_HH_MM.json`; anything
/// else (including the index envelopes) returns `None`.
pub fn parse_shard_name(name: &str) -> Option<(String, String, Option<String>)> {
    let stem = name.strip_suffix(".json")?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 4 && parts.len() != 5 {
        return None;
    }

    let widths = [4usize, 2, 2, 2, 2];
    for (part, width) in parts.iter().zip(widths.iter()) {
        if part.len() != *width || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let date_key = format!("{}_{}_{}", parts[0], parts[1], parts[2]);
    let hour_key = parts[3].to_string();
    let minute_key = parts.get(4).map(|m| m.to_string());
    Some((date_key, hour_key, minute_key))
}
