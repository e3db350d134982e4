//! Query planning and memoization
//!
//! Planning is pure: [`BucketScan`] enumerates the bucket timestamps a
//! range touches and the engine drives the shard loads. Results are
//! memoized in [`QueryCache`] under a fingerprint of the ISO bounds
//! and the aggregation key; the cache lives for the process lifetime
//! and is dropped wholesale by every mutating operation.

use crate::query::aggregate::AggregateValue;
use crate::storage::Frame;
use chrono::{SecondsFormat, TimeZone, Utc};
use std::collections::HashMap;

/// The scan starts one day before the requested range so buckets at
/// the range boundary are never missed; scans are bucket-inclusive and
/// apply no per-point filtering.
const SCAN_REWIND_MS: i64 = 86_400_000;

/// Iterator over the bucket timestamps of a range scan
#[derive(Debug, Clone)]
pub struct BucketScan {
    cursor: i64,
    end: i64,
    step: i64,
}

impl BucketScan {
    /// Plan a scan of `[start_ms, end_ms]` under `frame`
    pub fn new(start_ms: i64, end_ms: i64, frame: Frame) -> Self {
        Self {
            cursor: start_ms - SCAN_REWIND_MS,
            end: end_ms,
            step: frame.step_millis(),
        }
    }
}

impl Iterator for BucketScan {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.cursor > self.end {
            return None;
        }
        let current = self.cursor;
        self.cursor += self.step;
        Some(current)
    }
}

/// Render a timestamp as an ISO-8601 UTC string for fingerprinting
pub fn iso_utc(timestamp_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Deterministic cache key for a query
pub fn fingerprint(start_iso: &str, end_iso: &str, aggregation_key: &str) -> String {
    format!("{start_iso}|{end_iso}|{aggregation_key}")
}

/// Process-lifetime memo of query results
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, AggregateValue>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&AggregateValue> {
        self.entries.get(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: String, result: AggregateValue) {
        self.entries.insert(fingerprint, result);
    }

    /// Drop every entry; called at each mutation boundary
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
