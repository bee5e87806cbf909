// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Segment manager
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `Wal` owns a directory of segments. Exactly one segment is open for
// appends at a time; every other segment is closed and immutable. A single
// mutex covers encode + append + maybe-rotate, so frames never interleave
// and every caller sees a rotation as atomic.
//
// Segment lifecycle: Open -> Closed. A segment closes when a successor is
// created (rotation) or when the WAL is closed. Closing a segment that holds
// data also creates its empty successor, so the next `open()` sees the
// previous segment as history and the open segment stays the highest id.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WalConfig;
use crate::entry::{DeleteEntry, WalEntry, WriteEntry};
use crate::error::{WalError, WalResult};
use crate::replay::{replay, scan_segment, Replay};
use crate::segment::{discover, segment_path, sync_dir, SegmentInfo};
use crate::value::Value;
use crate::writer::SegmentWriter;

/// Where a committed entry landed: its segment and the byte offset at which
/// its frame begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalPosition {
    pub segment_id: u64,
    pub offset: u64,
}

/// Mutable state behind the WAL lock.
struct WalState {
    /// Writer for the open segment; `None` once the WAL is closed.
    active: Option<SegmentWriter>,

    /// Closed segments, ascending by id.
    closed: Vec<SegmentInfo>,

    /// Id the next created segment will get.
    next_id: u64,
}

/// The write-ahead log: append API for writers, closed-segment API for
/// replay and compaction.
pub struct Wal {
    config: WalConfig,
    state: Mutex<WalState>,
}

impl Wal {
    /// Open the WAL directory described by `config`, creating it if needed.
    ///
    /// With no segments on disk, segment 1 is created. Otherwise the highest
    /// segment becomes the open segment and all lower ones are closed. If the
    /// highest segment ends in a torn or corrupt frame it is closed as well
    /// and a fresh segment is started, so new frames are never appended after
    /// unreadable bytes.
    pub fn open(config: WalConfig) -> WalResult<Self> {
        fs::create_dir_all(&config.dir).map_err(|source| WalError::Directory {
            path: config.dir.clone(),
            source,
        })?;

        let mut closed = discover(&config.dir)?;

        let active = match closed.pop() {
            None => {
                info!(dir = %config.dir.display(), "Initialized fresh WAL");
                Self::create_segment(&config, 1)?
            }
            Some(last) => {
                let scan = scan_segment(&last.path)?;
                if scan.is_clean() {
                    SegmentWriter::reopen(&last, config.sync_mode, config.compression)?
                } else {
                    warn!(
                        segment = %last.name(),
                        valid_len = scan.valid_len,
                        file_len = scan.file_len,
                        "Last WAL segment has an unreadable tail, starting a new segment"
                    );
                    let next_id = last.id + 1;
                    closed.push(last);
                    Self::create_segment(&config, next_id)?
                }
            }
        };

        info!(
            dir = %config.dir.display(),
            open_segment = active.id(),
            closed_segments = closed.len(),
            "Opened WAL"
        );

        Ok(Self {
            state: Mutex::new(WalState {
                next_id: active.id() + 1,
                active: Some(active),
                closed,
            }),
            config,
        })
    }

    /// Append an entry, rotating afterwards if the open segment crossed the
    /// size threshold.
    ///
    /// The returned position always names the segment that was open when
    /// the entry was written. An error means the entry was not committed.
    pub fn append(&self, entry: impl Into<WalEntry>) -> WalResult<WalPosition> {
        let entry = entry.into();
        let mut state = self.lock()?;

        let writer = state.active.as_mut().ok_or(WalError::Closed)?;
        let offset = writer.write(&entry)?;
        let position = WalPosition {
            segment_id: writer.id(),
            offset,
        };

        if writer.size() >= self.config.segment_size {
            // The entry is already committed. A failed rotation is retried on
            // the next append rather than reported as a failed write.
            if let Err(err) = self.rotate(&mut state) {
                warn!(
                    segment = position.segment_id,
                    error = %err,
                    "WAL segment rotation failed"
                );
            }
        }

        Ok(position)
    }

    /// Append a write entry built from `(series key, values)` pairs. Values
    /// for a key that appears more than once are concatenated in order.
    pub fn write_points(
        &self,
        values: impl IntoIterator<Item = (String, Vec<Value>)>,
    ) -> WalResult<WalPosition> {
        let mut entry = WriteEntry::default();
        for (key, series) in values {
            entry.values.entry(key).or_default().extend(series);
        }
        self.append(entry)
    }

    /// Append a tombstone for all time of `keys`. Repeated keys are
    /// recorded once.
    ///
    /// This only records the delete; applying it is up to whoever replays
    /// the log.
    pub fn delete<K: Into<String>>(&self, keys: impl IntoIterator<Item = K>) -> WalResult<WalPosition> {
        self.append(DeleteEntry::new(unique_keys(keys)))
    }

    /// Append a tombstone for values of `keys` with timestamps in
    /// `[min, max]`.
    pub fn delete_range<K: Into<String>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        min: i64,
        max: i64,
    ) -> WalResult<WalPosition> {
        self.append(DeleteEntry::with_range(unique_keys(keys), min, max))
    }

    /// Force an fsync of the open segment.
    pub fn sync(&self) -> WalResult<()> {
        let mut state = self.lock()?;
        state.active.as_mut().ok_or(WalError::Closed)?.sync()
    }

    /// Closed segments, ascending by id: those found on open plus those
    /// closed since.
    pub fn closed_segments(&self) -> WalResult<Vec<SegmentInfo>> {
        Ok(self.lock()?.closed.clone())
    }

    /// Descriptor of the open segment, or `None` after `close()`.
    pub fn open_segment(&self) -> WalResult<Option<SegmentInfo>> {
        Ok(self.lock()?.active.as_ref().map(SegmentWriter::info))
    }

    /// Lazily replay every closed segment, oldest first, under the
    /// configured recovery mode. The open segment is never read.
    pub fn replay_closed_segments(&self) -> WalResult<Replay> {
        Ok(replay(self.closed_segments()?, self.config.recovery_mode))
    }

    /// Delete closed segment files, typically once their data is durable in
    /// compacted storage. Unknown ids are ignored; the open segment is
    /// refused. Returns the number of files removed.
    pub fn remove_segments(&self, ids: &[u64]) -> WalResult<usize> {
        let mut state = self.lock()?;

        if let Some(active) = state.active.as_ref() {
            if let Some(&id) = ids.iter().find(|&&id| id == active.id()) {
                return Err(WalError::SegmentActive(id));
            }
        }

        let mut removed = 0;
        let mut result = Ok(());
        state.closed.retain(|segment| {
            if result.is_err() || !ids.contains(&segment.id) {
                return true;
            }
            match fs::remove_file(&segment.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    result = Err(err);
                    return true;
                }
            }
            debug!(segment = %segment.name(), "Removed WAL segment");
            removed += 1;
            false
        });
        result?;

        if removed > 0 {
            sync_dir(&self.config.dir)?;
        }
        Ok(removed)
    }

    /// Flush and close the open segment and reject further appends.
    ///
    /// Blocks until in-flight appends finish. Calling it again is a no-op.
    pub fn close(&self) -> WalResult<()> {
        let mut state = self.lock()?;
        let Some(writer) = state.active.take() else {
            return Ok(());
        };

        // An empty segment stays the open segment for the next `open()`. A
        // segment with data only counts as closed once its successor exists,
        // so this process and the next `open()` agree on the history.
        let info = writer.info();
        let had_data = info.file_size > 0;
        let closed = writer.close().map(|_| ());

        if had_data {
            let next_id = Self::reserve_id(&mut state);
            Self::create_segment(&self.config, next_id)?;
            state.closed.push(info.clone());
        }
        closed?;

        info!(
            dir = %self.config.dir.display(),
            segment = info.id,
            "Closed WAL"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.active.is_none()).unwrap_or(true)
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> WalResult<MutexGuard<'_, WalState>> {
        self.state.lock().map_err(|_| WalError::LockPoisoned)
    }

    /// Hand out the next segment id. Ids are never reused, even when the
    /// segment they were reserved for could not be created.
    fn reserve_id(state: &mut WalState) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn create_segment(config: &WalConfig, id: u64) -> WalResult<SegmentWriter> {
        let path = segment_path(&config.dir, id);
        let writer = SegmentWriter::create(&path, id, config.sync_mode, config.compression)?;

        if let Err(err) = sync_dir(&config.dir) {
            drop(writer);
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!(
                    segment = id,
                    error = %remove_err,
                    "Failed to remove WAL segment after directory sync failure"
                );
            }
            return Err(err);
        }
        Ok(writer)
    }

    /// Swap in a new segment and close the old one. The new file is created
    /// first, so a failure leaves the current segment open and untouched.
    fn rotate(&self, state: &mut WalState) -> WalResult<()> {
        let next_id = Self::reserve_id(state);
        let new_writer = Self::create_segment(&self.config, next_id)?;

        let Some(old) = state.active.replace(new_writer) else {
            return Ok(());
        };
        let info = old.info();
        let result = old.close();
        state.closed.push(info.clone());

        info!(
            old_segment = %info.name(),
            size = info.file_size,
            new_segment = next_id,
            "Rotated WAL segment"
        );

        result.map(|_| ())
    }
}

/// Collect `keys` in order, dropping repeats.
fn unique_keys<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    keys.into_iter()
        .map(Into::into)
        .filter(|key: &String| seen.insert(key.clone()))
        .collect()
}
