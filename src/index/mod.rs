//! Shard directory index
//!
//! Tracks which wall-clock buckets have a shard file on disk, so range
//! scans can skip absent buckets without touching the filesystem:
//!
//! ```text
//! date (YYYY_MM_DD) → hour (HH) → present marker        (hour frame)
//!                               → minute map (MM → ✓)   (minute frame)
//! ```
//!
//! The persisted form is a checksummed envelope written twice (primary
//! then backup) so a crash between the two writes always leaves one
//! valid copy. The checksum is a 16-bit modular byte sum kept for
//! on-disk compatibility; it is a corruption probe, not an
//! authenticator, and does not detect reordering.

mod manager;

pub use manager::IndexManager;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Leaf of an hour entry: either the whole hour is present (hour
/// frame) or individual minutes are tracked (minute frame). The two
/// shapes never mix within one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HourEntry {
    /// Hour-frame marker, serialized as a bare `true`
    Present(bool),
    /// Minute-frame map, serialized as `{"MM": true, ...}`
    Minutes(BTreeMap<String, bool>),
}

impl HourEntry {
    /// The hour-frame present marker
    pub fn present() -> Self {
        HourEntry::Present(true)
    }

    /// Number of shard files this entry accounts for
    pub fn shard_count(&self) -> usize {
        match self {
            HourEntry::Present(_) => 1,
            HourEntry::Minutes(map) => map.len(),
        }
    }
}

/// The in-memory index: date key → hour key → leaf
pub type IndexTree = BTreeMap<String, BTreeMap<String, HourEntry>>;

/// Persisted form: the serialized index plus its checksum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEnvelope {
    /// The serialized [`IndexTree`]
    pub index_data: String,
    /// Decimal rendering of `checksum(index_data)`
    pub index_checksum: String,
}

/// 16-bit modular byte sum over a serialized payload
pub fn checksum(payload: &str) -> u16 {
    payload
        .bytes()
        .fold(0u32, |acc, b| (acc + u32::from(b)) % 65_535) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_order_sensitive_sum() {
        assert_eq!(checksum(""), 0);
        assert_eq!(checksum("a"), 97);
        assert_eq!(checksum("ab"), 97 + 98);
        // A weak probe: transpositions are invisible
        assert_eq!(checksum("ab"), checksum("ba"));
    }

    #[test]
    fn test_checksum_wraps_at_65535() {
        let big = "z".repeat(65_535 / 122 + 10);
        assert!(checksum(&big) < 65_535);
    }

    #[test]
    fn test_hour_entry_serde_shapes() {
        let present = HourEntry::present();
        assert_eq!(serde_json::to_string(&present).unwrap(), "true");

        let mut minutes = BTreeMap::new();
        minutes.insert("05".to_string(), true);
        let entry = HourEntry::Minutes(minutes);
        assert_eq!(serde_json::to_string(&entry).unwrap(), r#"{"05":true}"#);

        let parsed: HourEntry = serde_json::from_str("true").unwrap();
        assert_eq!(parsed, HourEntry::present());
        let parsed: HourEntry = serde_json::from_str(r#"{"05":true}"#).unwrap();
        assert_eq!(parsed.shard_count(), 1);
    }
}
