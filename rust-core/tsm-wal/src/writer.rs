// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Segment writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `SegmentWriter` appends frames to a single open segment file and
// controls fsync behavior according to the configured `SyncMode`. It owns
// the file's write cursor; exclusive access is expressed by `&mut self`, so
// the WAL's lock around the writer is the only path to it.
//
// Frames are written with a single unbuffered `write_all`, so the bytes are
// in the OS page cache by the time `write` returns even when fsync is
// deferred.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::Compression;
use crate::entry::WalEntry;
use crate::error::WalResult;
use crate::frame::encode_frame;
use crate::segment::SegmentInfo;

// ---------------------------------------------------------------------------
// SyncMode
// ---------------------------------------------------------------------------

/// Controls how aggressively the segment writer calls `fsync` to flush data
/// to stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Call `fsync` after every single write. Acknowledged writes survive
    /// OS crash and power loss, at the cost of latency.
    #[default]
    Fsync,

    /// Call `fsync` at most once per the specified duration. Writes between
    /// syncs survive a process crash but may be lost on power failure.
    Periodic(Duration),

    /// Never explicitly call `fsync`; rely on the OS page cache. Writes
    /// survive a process crash only.
    Async,
}

// ---------------------------------------------------------------------------
// SegmentWriter
// ---------------------------------------------------------------------------

/// An append-only writer for one WAL segment file.
#[derive(Debug)]
pub struct SegmentWriter {
    /// The open segment file handle.
    file: File,

    /// Path of the segment file.
    path: PathBuf,

    /// Segment id from the file name.
    id: u64,

    /// Bytes of committed frames in the file.
    size: u64,

    /// Number of frames appended through this writer.
    frames_written: u64,

    sync_mode: SyncMode,

    compression: Compression,

    /// Timestamp of the last fsync call (for `SyncMode::Periodic`).
    last_sync: Instant,
}

impl SegmentWriter {
    /// Create a brand-new, empty segment file. Fails if the file exists.
    pub fn create(
        path: impl AsRef<Path>,
        id: u64,
        sync_mode: SyncMode,
        compression: Compression,
    ) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self::from_parts(file, path, id, 0, sync_mode, compression))
    }

    /// Reopen an existing segment for appending, positioned after its
    /// current `file_size` bytes.
    ///
    /// The caller is responsible for having validated that the segment ends
    /// on a frame boundary.
    pub fn reopen(
        segment: &SegmentInfo,
        sync_mode: SyncMode,
        compression: Compression,
    ) -> WalResult<Self> {
        let file = OpenOptions::new().append(true).open(&segment.path)?;
        Ok(Self::from_parts(
            file,
            segment.path.clone(),
            segment.id,
            segment.file_size,
            sync_mode,
            compression,
        ))
    }

    fn from_parts(
        file: File,
        path: PathBuf,
        id: u64,
        size: u64,
        sync_mode: SyncMode,
        compression: Compression,
    ) -> Self {
        Self {
            file,
            path,
            id,
            size,
            frames_written: 0,
            sync_mode,
            compression,
            last_sync: Instant::now(),
        }
    }

    /// Encode `entry`, frame it and append the frame to the segment.
    ///
    /// Returns the byte offset at which the frame begins. On any error the
    /// entry is not committed, and the file is cut back to the previous
    /// frame boundary so no partial frame precedes later writes.
    pub fn write(&mut self, entry: &WalEntry) -> WalResult<u64> {
        let frame = encode_frame(entry, self.compression)?;
        let offset = self.size;

        if let Err(err) = self.file.write_all(&frame) {
            self.rollback();
            return Err(err.into());
        }
        if let Err(err) = self.maybe_sync() {
            self.rollback();
            return Err(err);
        }

        self.size += frame.len() as u64;
        self.frames_written += 1;

        debug!(
            segment = self.id,
            offset,
            bytes = frame.len(),
            kind = ?entry.kind(),
            "Appended WAL frame"
        );

        Ok(offset)
    }

    /// Force an immediate `fsync` of the segment file, regardless of the
    /// configured `SyncMode`.
    pub fn sync(&mut self) -> WalResult<()> {
        self.file.sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Flush, fsync and close the segment file.
    pub fn close(mut self) -> WalResult<SegmentInfo> {
        self.file.flush()?;
        self.sync()?;
        Ok(self.info())
    }

    /// Descriptor for the segment as currently written.
    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            path: self.path.clone(),
            id: self.id,
            file_size: self.size,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes of committed frames in the segment.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Conditionally call fsync based on the configured sync mode.
    fn maybe_sync(&mut self) -> WalResult<()> {
        match self.sync_mode {
            SyncMode::Fsync => self.sync()?,
            SyncMode::Periodic(interval) => {
                if self.last_sync.elapsed() >= interval {
                    self.sync()?;
                }
            }
            SyncMode::Async => {
                // No-op: rely on OS page cache.
            }
        }
        Ok(())
    }

    /// Best-effort truncation back to the last committed frame.
    fn rollback(&mut self) {
        if let Err(err) = self.file.set_len(self.size) {
            warn!(
                segment = self.id,
                size = self.size,
                error = %err,
                "Failed to truncate partial WAL frame"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{DeleteEntry, WriteEntry};
    use crate::frame::HEADER_SIZE;
    use crate::segment::segment_path;
    use crate::value::Value;
    use tempfile::TempDir;

    fn test_entry() -> WalEntry {
        let mut entry = WriteEntry::default();
        entry
            .values
            .insert("cpu,host=A#!~#value".to_string(), vec![Value::new(1, 1.1)]);
        WalEntry::Write(entry)
    }

    fn create(dir: &TempDir, sync_mode: SyncMode) -> SegmentWriter {
        SegmentWriter::create(segment_path(dir.path(), 1), 1, sync_mode, Compression::Lz4).unwrap()
    }

    #[test]
    fn test_write_returns_frame_offsets() {
        let dir = TempDir::new().unwrap();
        let mut writer = create(&dir, SyncMode::Async);

        let first = writer.write(&test_entry()).unwrap();
        let second = writer
            .write(&WalEntry::Delete(DeleteEntry::new(vec!["cpu".to_string()])))
            .unwrap();

        assert_eq!(first, 0);
        assert!(second > HEADER_SIZE as u64);
        assert_eq!(writer.frames_written(), 2);
        assert_eq!(
            std::fs::metadata(writer.path()).unwrap().len(),
            writer.size()
        );
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let _writer = create(&dir, SyncMode::Async);
        let again = SegmentWriter::create(
            segment_path(dir.path(), 1),
            1,
            SyncMode::Async,
            Compression::Lz4,
        );
        assert!(again.is_err());
    }

    #[test]
    fn test_reopen_appends_after_existing_frames() {
        let dir = TempDir::new().unwrap();
        let info = {
            let mut writer = create(&dir, SyncMode::Fsync);
            writer.write(&test_entry()).unwrap();
            writer.close().unwrap()
        };

        let mut writer = SegmentWriter::reopen(&info, SyncMode::Fsync, Compression::Lz4).unwrap();
        let offset = writer.write(&test_entry()).unwrap();
        assert_eq!(offset, info.file_size);
        assert_eq!(writer.size(), info.file_size * 2);
    }

    #[test]
    fn test_invalid_entry_is_not_written() {
        let dir = TempDir::new().unwrap();
        let mut writer = create(&dir, SyncMode::Async);

        let mut entry = WriteEntry::default();
        entry.values.insert(
            "k".to_string(),
            vec![Value::new(1, 1.0), Value::new(2, false)],
        );
        assert!(writer.write(&WalEntry::Write(entry)).is_err());
        assert_eq!(writer.size(), 0);
        assert_eq!(std::fs::metadata(writer.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_periodic_sync_mode() {
        let dir = TempDir::new().unwrap();
        let mut writer = create(&dir, SyncMode::Periodic(Duration::from_millis(10)));

        for _ in 0..5 {
            writer.write(&test_entry()).unwrap();
        }

        // Explicit sync should always work.
        writer.sync().unwrap();
    }

    #[test]
    fn test_close_reports_final_size() {
        let dir = TempDir::new().unwrap();
        let mut writer = create(&dir, SyncMode::Async);
        writer.write(&test_entry()).unwrap();
        let size = writer.size();

        let info = writer.close().unwrap();
        assert_eq!(info.id, 1);
        assert_eq!(info.file_size, size);
    }
}
