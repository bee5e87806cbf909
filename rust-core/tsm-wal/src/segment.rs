// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Segment naming and discovery
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Each WAL segment is a single append-only file named `_{id:016}.wal`. The
// zero padding makes lexicographic order equal numeric order. All directory
// scanning goes through `discover`, which the WAL calls once on open.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WalError, WalResult};

/// Default rotation threshold in bytes (10 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// The file extension used for WAL segment files.
pub const SEGMENT_EXTENSION: &str = "wal";

/// The prefix used for WAL segment file names.
pub const SEGMENT_PREFIX: &str = "_";

/// Metadata about a single WAL segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// The full path to the segment file on disk.
    pub path: PathBuf,

    /// The segment sequence number encoded in the file name.
    pub id: u64,

    /// File size in bytes when the descriptor was taken.
    pub file_size: u64,
}

impl SegmentInfo {
    /// Returns `true` if the segment has reached the rotation threshold.
    pub fn is_full(&self, max_size: u64) -> bool {
        self.file_size >= max_size
    }

    /// The file name component of the path, for log fields and errors.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| segment_filename(self.id))
    }
}

impl PartialOrd for SegmentInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Build the canonical file name for a segment.
///
/// Format: `_0000000000000001.wal`
pub fn segment_filename(id: u64) -> String {
    format!("{SEGMENT_PREFIX}{id:016}.{SEGMENT_EXTENSION}")
}

/// Build the full path for a segment file in the given WAL directory.
pub fn segment_path(wal_dir: &Path, id: u64) -> PathBuf {
    wal_dir.join(segment_filename(id))
}

/// Parse the segment id from a segment file name.
///
/// Returns `None` if the name does not match the expected pattern.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let stripped = name.strip_prefix(SEGMENT_PREFIX)?;
    let num_str = stripped.strip_suffix(&format!(".{SEGMENT_EXTENSION}"))?;
    if num_str.is_empty() || !num_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num_str.parse::<u64>().ok()
}

/// Scan a WAL directory and return descriptors for all segment files,
/// sorted by id (ascending).
///
/// Non-segment files in the directory are silently ignored.
pub fn discover(wal_dir: &Path) -> WalResult<Vec<SegmentInfo>> {
    let directory_error = |source| WalError::Directory {
        path: wal_dir.to_path_buf(),
        source,
    };

    let mut segments = Vec::new();

    for dir_entry in fs::read_dir(wal_dir).map_err(directory_error)? {
        let dir_entry = dir_entry.map_err(directory_error)?;
        let file_name = dir_entry.file_name();
        let name = file_name.to_string_lossy();

        if let Some(id) = parse_segment_filename(&name) {
            let metadata = dir_entry.metadata().map_err(directory_error)?;
            if !metadata.is_file() {
                continue;
            }
            segments.push(SegmentInfo {
                path: dir_entry.path(),
                id,
                file_size: metadata.len(),
            });
        }
    }

    segments.sort();

    debug!(
        count = segments.len(),
        dir = %wal_dir.display(),
        "Discovered WAL segments"
    );

    Ok(segments)
}

/// Flush the directory entry itself so newly created or removed segment
/// files survive a power failure.
#[cfg(unix)]
pub(crate) fn sync_dir(wal_dir: &Path) -> WalResult<()> {
    fs::File::open(wal_dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_wal_dir: &Path) -> WalResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    struct TestDir {
        _inner: TempDir,
        path: PathBuf,
    }

    impl TestDir {
        fn new() -> Self {
            let inner = TempDir::new().unwrap();
            let path = inner.path().to_path_buf();
            Self {
                _inner: inner,
                path,
            }
        }

        fn create_segment(&self, id: u64, size_bytes: usize) {
            let file_path = segment_path(&self.path, id);
            let mut file = File::create(file_path).unwrap();
            file.write_all(&vec![0u8; size_bytes]).unwrap();
        }
    }

    #[test]
    fn test_segment_filename_format() {
        assert_eq!(segment_filename(1), "_0000000000000001.wal");
        assert_eq!(segment_filename(42), "_0000000000000042.wal");
        assert_eq!(
            segment_filename(9_999_999_999_999_999),
            "_9999999999999999.wal"
        );
    }

    #[test]
    fn test_filename_order_matches_numeric_order() {
        let mut names: Vec<String> = [100, 9, 10, 1].iter().map(|&id| segment_filename(id)).collect();
        names.sort();
        let ids: Vec<u64> = names
            .iter()
            .map(|n| parse_segment_filename(n).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 9, 10, 100]);
    }

    #[test]
    fn test_parse_segment_filename_valid() {
        assert_eq!(parse_segment_filename("_0000000000000042.wal"), Some(42));
        assert_eq!(parse_segment_filename("_0000000000000001.wal"), Some(1));
    }

    #[test]
    fn test_parse_segment_filename_invalid() {
        assert_eq!(parse_segment_filename("not-a-segment.txt"), None);
        assert_eq!(parse_segment_filename("_.wal"), None);
        assert_eq!(parse_segment_filename("_abc.wal"), None);
        assert_eq!(parse_segment_filename("_+12.wal"), None);
        assert_eq!(parse_segment_filename("_0000000000000001.wal.tmp"), None);
        assert_eq!(parse_segment_filename(""), None);
    }

    #[test]
    fn test_discover_sorted() {
        let dir = TestDir::new();
        dir.create_segment(100, 1024);
        dir.create_segment(1, 512);
        dir.create_segment(50, 2048);

        // Create a non-segment file that should be ignored.
        File::create(dir.path.join("readme.txt")).unwrap();

        let segments = discover(&dir.path).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].id, 1);
        assert_eq!(segments[0].file_size, 512);
        assert_eq!(segments[1].id, 50);
        assert_eq!(segments[2].id, 100);
    }

    #[test]
    fn test_discover_empty_dir() {
        let dir = TestDir::new();
        let segments = discover(&dir.path).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        let result = discover(Path::new("/nonexistent/wal/dir"));
        assert!(matches!(result, Err(WalError::Directory { .. })));
    }

    #[test]
    fn test_segment_info_is_full() {
        let info = SegmentInfo {
            path: PathBuf::from("_0000000000000001.wal"),
            id: 1,
            file_size: DEFAULT_SEGMENT_SIZE,
        };
        assert!(info.is_full(DEFAULT_SEGMENT_SIZE));
        assert!(!info.is_full(DEFAULT_SEGMENT_SIZE + 1));
        assert_eq!(info.name(), "_0000000000000001.wal");
    }
}
