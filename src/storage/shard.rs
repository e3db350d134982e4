//! Shard file I/O
//!
//! A shard is a JSON array of `{m, v, t}` records, rewritten as a
//! single truncating write so a partial concatenation is never
//! observed. A zero-byte file is legal and means "empty shard".

use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::fs;
use crate::storage::types::Point;
use std::path::Path;

/// Read a shard file into its point list
///
/// Absent and zero-byte files both decode to an empty list; malformed
/// JSON surfaces as a parse error for the caller to log and skip.
pub fn read(path: &Path) -> TsdbResult<Vec<Point>> {
    let text = match fs::read_text(path) {
        Ok(text) => text,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&text).map_err(|e| TsdbError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write a point list to a shard file, truncating
pub fn write(path: &Path, points: &[Point]) -> TsdbResult<()> {
    let text = serde_json::to_string(points).map_err(|e| TsdbError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write_text_truncating(path, &text)
}
