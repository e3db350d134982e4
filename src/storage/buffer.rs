//! RAM buffer
//!
//! Per-shard accumulator of freshly written points. Every point
//! accepted by the engine is either in here or on disk; the buffer is
//! drained wholesale by `flush` and its running serialized-size
//! estimate drives the overflow trigger.

use crate::storage::router::ShardLocation;
use crate::storage::types::Point;
use std::collections::HashMap;
use std::path::PathBuf;

/// Points pending for one shard file
#[derive(Debug, Clone)]
pub struct PendingShard {
    /// The bucket the points route to
    pub location: ShardLocation,
    /// Pending points in insertion order
    pub points: Vec<Point>,
}

/// In-memory accumulator keyed by shard path
#[derive(Debug, Default)]
pub struct RamBuffer {
    shards: HashMap<PathBuf, PendingShard>,
    estimated_bytes: usize,
}

impl RamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point to its shard's pending list
    pub fn append(&mut self, location: ShardLocation, point: Point) {
        self.estimated_bytes += point.estimated_size();
        self.shards
            .entry(location.path.clone())
            .or_insert_with(|| PendingShard {
                location,
                points: Vec::new(),
            })
            .points
            .push(point);
    }

    /// Serialized-size estimate over all pending lists, in bytes
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Total pending point count
    pub fn point_count(&self) -> usize {
        self.shards.values().map(|s| s.points.len()).sum()
    }

    /// Number of distinct shards with pending points
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Take all pending shards, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<PendingShard> {
        self.estimated_bytes = 0;
        self.shards.drain().map(|(_, pending)| pending).collect()
    }

    /// Discard all pending points
    pub fn clear(&mut self) {
        self.shards.clear();
        self.estimated_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::router::route;
    use crate::storage::types::Frame;
    use std::path::Path;

    fn loc(ts: i64) -> ShardLocation {
        route(ts, Frame::Hour, Path::new("/data")).unwrap()
    }

    #[test]
    fn test_append_groups_by_shard() {
        let mut buffer = RamBuffer::new();
        // Same hour bucket
        buffer.append(loc(1000), Point::with_timestamp("a", 1.0, 1000));
        buffer.append(loc(2000), Point::with_timestamp("a", 2.0, 2000));
        // A different hour
        buffer.append(
            loc(4_600_000),
            Point::with_timestamp("a", 3.0, 4_600_000),
        );

        assert_eq!(buffer.shard_count(), 2);
        assert_eq!(buffer.point_count(), 3);
    }

    #[test]
    fn test_estimate_accumulates() {
        let mut buffer = RamBuffer::new();
        assert_eq!(buffer.estimated_bytes(), 0);

        let point = Point::with_timestamp("temperature", 21.5, 1000);
        let size = point.estimated_size();
        buffer.append(loc(1000), point);
        assert_eq!(buffer.estimated_bytes(), size);

        let point = Point::with_timestamp("humidity", 40.0, 2000);
        let size2 = point.estimated_size();
        buffer.append(loc(2000), point);
        assert_eq!(buffer.estimated_bytes(), size + size2);
    }

    #[test]
    fn test_drain_empties_and_resets() {
        let mut buffer = RamBuffer::new();
        buffer.append(loc(1000), Point::with_timestamp("a", 1.0, 1000));
        buffer.append(loc(1000), Point::with_timestamp("a", 2.0, 1500));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].points.len(), 2);
        // Insertion order survives the drain
        assert_eq!(drained[0].points[0].value, 1.0);
        assert_eq!(drained[0].points[1].value, 2.0);

        assert!(buffer.is_empty());
        assert_eq!(buffer.estimated_bytes(), 0);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RamBuffer::new();
        buffer.append(loc(1000), Point::with_timestamp("a", 1.0, 1000));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.estimated_bytes(), 0);
    }
}
