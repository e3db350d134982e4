//! Index manager
//!
//! Owns the in-memory directory tree and its two on-disk envelopes.
//!
//! Persist protocol: serialize the tree, checksum it, write the
//! envelope to `index.json` and then `index_backup.json`, both
//! truncating. The loader prefers the primary; a corrupt primary falls
//! back to the backup (re-persisting the primary), and if both fail
//! the index is rebuilt from a directory scan. A corrupted index never
//! prevents reopen.

use crate::index::{checksum, HourEntry, IndexEnvelope, IndexTree};
use crate::storage::error::TsdbResult;
use crate::storage::fs;
use crate::storage::router::{parse_shard_name, ShardLocation};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.json";
const BACKUP_FILE: &str = "index_backup.json";

/// Maintains the bucket directory tree and its persistence
#[derive(Debug)]
pub struct IndexManager {
    /// Data directory holding shards and both envelopes
    directory: PathBuf,
    /// date → hour → leaf
    tree: IndexTree,
    /// Checksum at the time of the last successful persist; routine
    /// lifecycle moments skip rewriting when it is unchanged
    last_persisted: Option<u16>,
}

impl IndexManager {
    /// Create an empty manager rooted at `directory` (nothing is
    /// loaded until [`load_or_recover`](Self::load_or_recover))
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            tree: IndexTree::new(),
            last_persisted: None,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.directory.join(INDEX_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.directory.join(BACKUP_FILE)
    }

    // ==================== Tree Access ====================

    /// Record that the shard at `location` exists on disk
    pub fn mark_present(&mut self, location: &ShardLocation) {
        let hours = self.tree.entry(location.date_key.clone()).or_default();
        match &location.minute_key {
            None => {
                hours.insert(location.hour_key.clone(), HourEntry::present());
            }
            Some(minute) => {
                let entry = hours
                    .entry(location.hour_key.clone())
                    .or_insert_with(|| HourEntry::Minutes(BTreeMap::new()));
                // A frame change between runs can leave an hour marker
                // where a minute map belongs; the new frame wins.
                if let HourEntry::Present(_) = entry {
                    *entry = HourEntry::Minutes(BTreeMap::new());
                }
                if let HourEntry::Minutes(map) = entry {
                    map.insert(minute.clone(), true);
                }
            }
        }
    }

    /// Whether a bucket is marked present
    pub fn contains(&self, date_key: &str, hour_key: &str, minute_key: Option<&str>) -> bool {
        let Some(entry) = self.tree.get(date_key).and_then(|h| h.get(hour_key)) else {
            return false;
        };
        match (entry, minute_key) {
            (HourEntry::Present(present), None) => *present,
            (HourEntry::Minutes(map), Some(minute)) => map.get(minute).copied().unwrap_or(false),
            // Frame mismatch between the query and the stored leaf
            _ => false,
        }
    }

    /// All date keys, ascending
    pub fn date_keys(&self) -> Vec<String> {
        self.tree.keys().cloned().collect()
    }

    /// The hour entries of one date
    pub fn hours(&self, date_key: &str) -> Option<&BTreeMap<String, HourEntry>> {
        self.tree.get(date_key)
    }

    /// Remove a date's whole subtree, returning it so the caller can
    /// delete the shard files it implies
    pub fn drop_date(&mut self, date_key: &str) -> Option<BTreeMap<String, HourEntry>> {
        self.tree.remove(date_key)
    }

    /// Replace the tree wholesale (used by restore)
    pub fn adopt(&mut self, tree: IndexTree) {
        self.tree = tree;
    }

    /// Forget everything, including the differential-persist watermark
    pub fn reset(&mut self) {
        self.tree.clear();
        self.last_persisted = None;
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    /// Number of indexed dates
    pub fn date_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of shard files the index accounts for
    pub fn shard_count(&self) -> usize {
        self.tree
            .values()
            .flat_map(|hours| hours.values())
            .map(|entry| entry.shard_count())
            .sum()
    }

    // ==================== Persistence ====================

    fn serialize_payload(&self) -> String {
        // BTreeMap keys serialize in order, so the payload (and its
        // checksum) is deterministic for a given tree
        serde_json::to_string(&self.tree).unwrap_or_else(|_| "{}".to_string())
    }

    /// Checksum of the live tree
    pub fn live_checksum(&self) -> u16 {
        checksum(&self.serialize_payload())
    }

    /// Write both envelopes, primary then backup
    pub fn persist(&mut self) -> TsdbResult<()> {
        let payload = self.serialize_payload();
        let sum = checksum(&payload);
        let envelope = IndexEnvelope {
            index_data: payload,
            index_checksum: sum.to_string(),
        };
        let text = serde_json::to_string(&envelope).unwrap_or_default();

        // Leader then follower: a crash between the two leaves a valid
        // backup for the loader's fallback step
        fs::write_text_truncating(&self.index_path(), &text)?;
        fs::write_text_truncating(&self.backup_path(), &text)?;

        self.last_persisted = Some(sum);
        tracing::debug!(checksum = sum, "index persisted");
        Ok(())
    }

    /// Persist only if the tree changed since the last persist.
    /// Returns whether a write happened.
    pub fn persist_if_changed(&mut self) -> TsdbResult<bool> {
        let live = self.live_checksum();
        if self.last_persisted == Some(live) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Load the index at open, recovering as needed
    ///
    /// Ladder: primary envelope → backup envelope (re-persisting the
    /// primary) → rebuild from a directory scan (persisting both).
    /// Corruption is logged, never propagated.
    pub fn load_or_recover(&mut self) {
        if let Some(tree) = Self::try_load(&self.index_path()) {
            self.last_persisted = Some(checksum_of(&tree));
            self.tree = tree;
            tracing::debug!(dates = self.tree.len(), "index loaded");
            return;
        }

        if let Some(tree) = Self::try_load(&self.backup_path()) {
            tracing::info!("primary index unreadable, recovered from backup");
            self.tree = tree;
            self.last_persisted = Some(self.live_checksum());
            // Heal the primary right away
            if let Err(e) = self.persist_primary_only() {
                tracing::warn!(error = %e, "failed to re-persist primary index");
            }
            return;
        }

        tracing::warn!("both index envelopes unreadable, rebuilding from disk");
        if let Err(e) = self.rebuild_from_disk() {
            tracing::warn!(error = %e, "index rebuild scan failed, starting empty");
            self.tree.clear();
        }
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "failed to persist rebuilt index");
        }
    }

    fn persist_primary_only(&mut self) -> TsdbResult<()> {
        let payload = self.serialize_payload();
        let sum = checksum(&payload);
        let envelope = IndexEnvelope {
            index_data: payload,
            index_checksum: sum.to_string(),
        };
        fs::write_text_truncating(
            &self.index_path(),
            &serde_json::to_string(&envelope).unwrap_or_default(),
        )?;
        self.last_persisted = Some(sum);
        Ok(())
    }

    /// Parse and verify one envelope; any failure returns `None`
    fn try_load(path: &Path) -> Option<IndexTree> {
        let text = match fs::read_text(path) {
            Ok(text) => text,
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(path = %path.display(), error = %e, "index read failed");
                }
                return None;
            }
        };

        let envelope: IndexEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "index envelope malformed");
                return None;
            }
        };

        let computed = checksum(&envelope.index_data);
        if envelope.index_checksum != computed.to_string() {
            tracing::warn!(
                path = %path.display(),
                stored = %envelope.index_checksum,
                computed,
                "index checksum mismatch"
            );
            return None;
        }

        match serde_json::from_str(&envelope.index_data) {
            Ok(tree) => Some(tree),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "index payload malformed");
                None
            }
        }
    }

    /// Reconstruct the tree by scanning the data directory
    ///
    /// Every file whose name matches the shard grammar contributes a
    /// marker; the two envelope files and anything else are ignored.
    pub fn rebuild_from_disk(&mut self) -> TsdbResult<()> {
        self.tree.clear();

        let names = match fs::list(&self.directory) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut rebuilt = 0usize;
        for name in names {
            if name == INDEX_FILE || name == BACKUP_FILE {
                continue;
            }
            let Some((date_key, hour_key, minute_key)) = parse_shard_name(&name) else {
                continue;
            };
            let hours = self.tree.entry(date_key).or_default();
            match minute_key {
                None => {
                    hours.insert(hour_key, HourEntry::present());
                }
                Some(minute) => {
                    let entry = hours
                        .entry(hour_key)
                        .or_insert_with(|| HourEntry::Minutes(BTreeMap::new()));
                    if let HourEntry::Present(_) = entry {
                        *entry = HourEntry::Minutes(BTreeMap::new());
                    }
                    if let HourEntry::Minutes(map) = entry {
                        map.insert(minute, true);
                    }
                }
            }
            rebuilt += 1;
        }

        tracing::info!(shards = rebuilt, "index rebuilt from directory scan");
        Ok(())
    }
}

fn checksum_of(tree: &IndexTree) -> u16 {
    checksum(&serde_json::to_string(tree).unwrap_or_else(|_| "{}".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::router::route;
    use crate::storage::types::Frame;
    use tempfile::tempdir;

    // 2024-03-15T12:34:56Z
    const TS: i64 = 1_710_506_096_000;

    fn hour_loc(dir: &Path, ts: i64) -> ShardLocation {
        route(ts, Frame::Hour, dir).unwrap()
    }

    #[test]
    fn test_mark_and_contains_hour_frame() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());

        manager.mark_present(&hour_loc(dir.path(), TS));

        assert!(manager.contains("2024_03_15", "12", None));
        assert!(!manager.contains("2024_03_15", "13", None));
        assert!(!manager.contains("2024_03_16", "12", None));
        // Minute lookup against an hour marker is a frame mismatch
        assert!(!manager.contains("2024_03_15", "12", Some("34")));
    }

    #[test]
    fn test_mark_and_contains_minute_frame() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());

        manager.mark_present(&route(TS, Frame::Minute, dir.path()).unwrap());

        assert!(manager.contains("2024_03_15", "12", Some("34")));
        assert!(!manager.contains("2024_03_15", "12", Some("35")));
        assert!(!manager.contains("2024_03_15", "12", None));
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempdir().unwrap();

        {
            let mut manager = IndexManager::new(dir.path());
            manager.mark_present(&hour_loc(dir.path(), TS));
            manager.persist().unwrap();
        }

        let mut manager = IndexManager::new(dir.path());
        manager.load_or_recover();
        assert!(manager.contains("2024_03_15", "12", None));
        assert_eq!(manager.date_count(), 1);
        assert_eq!(manager.shard_count(), 1);
    }

    #[test]
    fn test_corrupt_primary_recovers_from_backup() {
        let dir = tempdir().unwrap();

        {
            let mut manager = IndexManager::new(dir.path());
            manager.mark_present(&hour_loc(dir.path(), TS));
            manager.persist().unwrap();
        }

        // Append garbage to the primary so its checksum no longer holds
        let primary = dir.path().join("index.json");
        let mut text = std::fs::read_to_string(&primary).unwrap();
        text.push_str("corruption!");
        std::fs::write(&primary, text).unwrap();

        let mut manager = IndexManager::new(dir.path());
        manager.load_or_recover();
        assert!(manager.contains("2024_03_15", "12", None));

        // The primary was healed
        let healed = std::fs::read_to_string(&primary).unwrap();
        let envelope: IndexEnvelope = serde_json::from_str(&healed).unwrap();
        assert_eq!(
            envelope.index_checksum,
            checksum(&envelope.index_data).to_string()
        );
    }

    #[test]
    fn test_both_corrupt_rebuilds_from_scan() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.json"), "not json").unwrap();
        std::fs::write(dir.path().join("index_backup.json"), "{\"half\":").unwrap();
        // A shard file on disk that the rebuild should pick up
        std::fs::write(dir.path().join("2024_03_15_12.json"), "[]").unwrap();
        // Distractors the grammar must ignore
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut manager = IndexManager::new(dir.path());
        manager.load_or_recover();

        assert!(manager.contains("2024_03_15", "12", None));
        assert_eq!(manager.shard_count(), 1);
    }

    #[test]
    fn test_missing_envelopes_yield_empty_index() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());
        manager.load_or_recover();

        assert_eq!(manager.date_count(), 0);
        // Step three persists both copies
        assert!(dir.path().join("index.json").exists());
        assert!(dir.path().join("index_backup.json").exists());
    }

    #[test]
    fn test_differential_persist_skips_unchanged() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());
        manager.mark_present(&hour_loc(dir.path(), TS));

        assert!(manager.persist_if_changed().unwrap());
        assert!(!manager.persist_if_changed().unwrap());

        manager.mark_present(&hour_loc(dir.path(), TS + 3_600_000));
        assert!(manager.persist_if_changed().unwrap());
    }

    #[test]
    fn test_drop_date_returns_subtree() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());
        manager.mark_present(&hour_loc(dir.path(), TS));
        manager.mark_present(&hour_loc(dir.path(), TS + 3_600_000));

        let dropped = manager.drop_date("2024_03_15").unwrap();
        assert_eq!(dropped.len(), 2);
        assert_eq!(manager.date_count(), 0);
        assert!(manager.drop_date("2024_03_15").is_none());
    }

    #[test]
    fn test_rebuild_minute_frame_names() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("2024_03_15_12_34.json"), "[]").unwrap();
        std::fs::write(dir.path().join("2024_03_15_12_35.json"), "[]").unwrap();

        let mut manager = IndexManager::new(dir.path());
        manager.rebuild_from_disk().unwrap();

        assert!(manager.contains("2024_03_15", "12", Some("34")));
        assert!(manager.contains("2024_03_15", "12", Some("35")));
        assert_eq!(manager.shard_count(), 2);
    }

    #[test]
    fn test_envelope_on_disk_shape() {
        let dir = tempdir().unwrap();
        let mut manager = IndexManager::new(dir.path());
        manager.mark_present(&hour_loc(dir.path(), TS));
        manager.persist().unwrap();

        let text = std::fs::read_to_string(dir.path().join("index.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("index_data").unwrap().is_string());
        assert!(value.get("index_checksum").unwrap().is_string());

        let payload = value["index_data"].as_str().unwrap();
        assert_eq!(payload, r#"{"2024_03_15":{"12":true}}"#);
    }
}
