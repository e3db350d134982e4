//! Filesystem adapter
//!
//! Thin wrapper over the host's blocking file primitives. Every
//! operation either succeeds or returns a typed failure; `NotFound` is
//! kept separate from real I/O faults so callers can treat missing
//! files as empty shards or an empty index.
//!
//! Edge policies:
//! - `read_text` on a zero-byte file returns empty text, not `NotFound`
//! - `mkdir_idempotent` on an existing directory is success

use crate::storage::error::{TsdbError, TsdbResult};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Metadata snapshot for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes
    pub size: u64,
    /// Modification time, milliseconds since epoch
    pub mtime_ms: i64,
    /// Whether the path is a regular file
    pub is_file: bool,
    /// Whether the path is a directory
    pub is_dir: bool,
}

/// Check whether a path exists
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Read a file into a string
pub fn read_text(path: &Path) -> TsdbResult<String> {
    std::fs::read_to_string(path).map_err(|e| TsdbError::from_io(path, e))
}

/// Write a string to a file, truncating any previous contents
pub fn write_text_truncating(path: &Path, text: &str) -> TsdbResult<()> {
    std::fs::write(path, text).map_err(|e| TsdbError::from_io(path, e))
}

/// Remove a file
pub fn remove(path: &Path) -> TsdbResult<()> {
    std::fs::remove_file(path).map_err(|e| TsdbError::from_io(path, e))
}

/// Create a directory; an already-existing directory is success
pub fn mkdir_idempotent(path: &Path) -> TsdbResult<()> {
    std::fs::create_dir_all(path).map_err(|e| TsdbError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// List the entry names (not full paths) of a directory
pub fn list(path: &Path) -> TsdbResult<Vec<String>> {
    let entries = std::fs::read_dir(path).map_err(|e| TsdbError::from_io(path, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TsdbError::from_io(path, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Stat a path
pub fn stat(path: &Path) -> TsdbResult<FileStat> {
    let meta = std::fs::metadata(path).map_err(|e| TsdbError::from_io(path, e))?;
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(FileStat {
        size: meta.len(),
        mtime_ms,
        is_file: meta.is_file(),
        is_dir: meta.is_dir(),
    })
}

/// Open a file for writing from scratch, truncating any previous
/// contents. The caller owns the handle and must drop it on every
/// exit path.
pub fn open_write_truncating(path: &Path) -> TsdbResult<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| TsdbError::from_io(path, e))
}

/// Open a file for reading
pub fn open_read(path: &Path) -> TsdbResult<File> {
    File::open(path).map_err(|e| TsdbError::from_io(path, e))
}

/// Copy `src` to `dst` (truncating) in fixed-size chunks, never
/// holding more than one chunk in memory. Returns whether the source
/// was empty.
pub fn copy_file(src: &Path, dst: &Path) -> TsdbResult<bool> {
    use std::io::Read;

    let mut reader = open_read(src)?;
    let mut writer = open_write_truncating(dst)?;
    let mut chunk = [0u8; 8 * 1024];
    let mut total = 0u64;

    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| TsdbError::from_io(src, e))?;
        if n == 0 {
            break;
        }
        std::io::Write::write_all(&mut writer, &chunk[..n])
            .map_err(|e| TsdbError::from_io(dst, e))?;
        total += n as u64;
    }

    Ok(total == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_text_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_text(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_text_zero_byte_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::File::create(&path).unwrap();

        assert_eq!(read_text(&path).unwrap(), "");
    }

    #[test]
    fn test_write_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.json");

        write_text_truncating(&path, "first write, longer").unwrap();
        write_text_truncating(&path, "short").unwrap();

        assert_eq!(read_text(&path).unwrap(), "short");
    }

    #[test]
    fn test_mkdir_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        mkdir_idempotent(&path).unwrap();
        mkdir_idempotent(&path).unwrap(); // second call is still success
        assert!(exists(&path));
    }

    #[test]
    fn test_list_returns_names() {
        let dir = tempdir().unwrap();
        write_text_truncating(&dir.path().join("b.json"), "[]").unwrap();
        write_text_truncating(&dir.path().join("a.json"), "[]").unwrap();

        let names = list(dir.path()).unwrap();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_stat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        write_text_truncating(&path, "12345").unwrap();

        let st = stat(&path).unwrap();
        assert_eq!(st.size, 5);
        assert!(st.is_file);
        assert!(!st.is_dir);
        assert!(st.mtime_ms > 0);

        let st = stat(dir.path()).unwrap();
        assert!(st.is_dir);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let err = remove(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_copy_file_chunked() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dst = dir.path().join("dst.json");

        // Larger than one chunk so the loop runs more than once
        let payload = "x".repeat(20 * 1024);
        write_text_truncating(&src, &payload).unwrap();

        let empty = copy_file(&src, &dst).unwrap();
        assert!(!empty);
        assert_eq!(read_text(&dst).unwrap(), payload);
    }

    #[test]
    fn test_copy_file_reports_empty_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dst = dir.path().join("dst.json");
        std::fs::File::create(&src).unwrap();

        assert!(copy_file(&src, &dst).unwrap());
        assert_eq!(read_text(&dst).unwrap(), "");
    }
}
