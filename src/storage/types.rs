//! Core data types for the time-series storage engine
//!
//! This module defines the fundamental types used throughout the
//! storage layer:
//! - `Point`: a single tagged measurement
//! - `Frame`: the shard granularity (hourly or minutely files)

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single time-series data point
///
/// Stored on disk with the compact field names `{m, v, t}`; decoding
/// also accepts the long spellings so exported data reads back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// What was measured (e.g. "temperature")
    #[serde(rename = "m", alias = "measurement")]
    pub measurement: String,
    /// The measured value
    #[serde(rename = "v", alias = "value")]
    pub value: f64,
    /// Unix timestamp in milliseconds
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: i64,
}

impl Point {
    /// Create a new point with the current timestamp
    pub fn new(measurement: impl Into<String>, value: f64) -> Self {
        Self {
            measurement: measurement.into(),
            value,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a point with a specific timestamp
    pub fn with_timestamp(measurement: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            value,
            timestamp,
        }
    }

    /// Serialized size estimate in bytes (1 byte per JSON character),
    /// used for RAM buffer accounting
    pub fn estimated_size(&self) -> usize {
        // {"m":"..","v":..,"t":..} — measurement plus numeric renderings
        // plus the fixed punctuation
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// Shard granularity: one file per wall-clock hour or per minute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// One shard file per UTC hour (default)
    #[default]
    Hour,
    /// One shard file per UTC minute
    Minute,
}

impl Frame {
    /// Width of one bucket in milliseconds
    pub fn step_millis(&self) -> i64 {
        match self {
            Frame::Hour => 3_600_000,
            Frame::Minute => 60_000,
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Hour => write!(f, "hour"),
            Frame::Minute => write!(f, "minute"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_creation() {
        let point = Point::with_timestamp("temperature", 21.5, 1_700_000_000_000);
        assert_eq!(point.measurement, "temperature");
        assert_eq!(point.value, 21.5);
        assert_eq!(point.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_point_serializes_compact() {
        let point = Point::with_timestamp("mood", 7.0, 1000);
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, r#"{"m":"mood","v":7.0,"t":1000}"#);
    }

    #[test]
    fn test_point_decodes_both_spellings() {
        let compact: Point = serde_json::from_str(r#"{"m":"mood","v":7.0,"t":1000}"#).unwrap();
        let long: Point =
            serde_json::from_str(r#"{"measurement":"mood","value":7.0,"timestamp":1000}"#)
                .unwrap();
        assert_eq!(compact, long);
    }

    #[test]
    fn test_estimated_size_tracks_json_length() {
        let point = Point::with_timestamp("t", 1.0, 1);
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(point.estimated_size(), json.len());
    }

    #[test]
    fn test_frame_step() {
        assert_eq!(Frame::Hour.step_millis(), 3_600_000);
        assert_eq!(Frame::Minute.step_millis(), 60_000);
    }

    #[test]
    fn test_frame_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Frame::Minute).unwrap(), "\"minute\"");
        let frame: Frame = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(frame, Frame::Hour);
    }
}
