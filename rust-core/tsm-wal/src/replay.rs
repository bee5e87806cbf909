// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Replay and recovery policy
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `Replay` turns a list of segments into a lazy, forward-only stream of
// entries. It owns the decision the segment reader leaves open: when a
// reader stops on a bad frame, the rest of the segment is searched for a
// later valid frame. If none exists the bad frame was a torn tail and replay
// moves on; if one exists the segment is corrupt in the middle, and the
// `RecoveryMode` decides between stopping with an error and skipping ahead.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entry::WalEntry;
use crate::error::{WalError, WalResult};
use crate::frame::find_next_frame;
use crate::reader::{SegmentReader, StopReason};
use crate::segment::SegmentInfo;

// ---------------------------------------------------------------------------
// RecoveryMode
// ---------------------------------------------------------------------------

/// What replay does with damage it cannot explain as a torn tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMode {
    /// Stop at the first corrupt frame or malformed entry and report it.
    #[default]
    Strict,

    /// Log and skip corrupt frames and malformed entries, resuming at the
    /// next frame that validates.
    SkipCorrupt,
}

// ---------------------------------------------------------------------------
// ReplayStats
// ---------------------------------------------------------------------------

/// Counters describing a replay so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    /// Segments read to their end.
    pub segments: u64,
    /// Entries yielded.
    pub entries: u64,
    /// Corrupt frames or malformed entries skipped (`SkipCorrupt` only).
    pub skipped_frames: u64,
    /// Segments that ended in a torn or unreadable final frame.
    pub torn_tails: u64,
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

type BoxedReader = SegmentReader<Box<dyn Read + Send>>;

struct OpenSegment {
    info: SegmentInfo,
    reader: BoxedReader,
}

/// Lazy iterator over the entries of a sequence of segments, in order.
///
/// Segments are opened one at a time as the previous one is exhausted.
/// After yielding an error the iterator is finished. It cannot be rewound;
/// start a new replay to read the segments again.
pub struct Replay {
    pending: VecDeque<SegmentInfo>,
    current: Option<OpenSegment>,
    mode: RecoveryMode,
    stats: ReplayStats,
    finished: bool,
}

/// Replay `segments` in the order given.
pub fn replay(segments: impl IntoIterator<Item = SegmentInfo>, mode: RecoveryMode) -> Replay {
    Replay {
        pending: segments.into_iter().collect(),
        current: None,
        mode,
        stats: ReplayStats::default(),
        finished: false,
    }
}

impl Replay {
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// The segment currently being read, if any.
    pub fn current_segment(&self) -> Option<&SegmentInfo> {
        self.current.as_ref().map(|c| &c.info)
    }

    fn open_next(&mut self) -> Option<WalResult<()>> {
        let info = self.pending.pop_front()?;
        let file = match File::open(&info.path) {
            Ok(file) => file,
            Err(err) => return Some(Err(err.into())),
        };
        debug!(segment = %info.name(), "Replaying WAL segment");
        let source: Box<dyn Read + Send> = Box::new(BufReader::new(file));
        self.current = Some(OpenSegment {
            info,
            reader: SegmentReader::new(source),
        });
        Some(Ok(()))
    }

    /// Resolve a reader stop. `Ok(())` means replay continues, either with
    /// the next segment or further into this one.
    fn handle_stop(&mut self) -> WalResult<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        let segment = current.info.name();

        // A short payload may be a torn tail, or a length field damaged in
        // the middle of the segment. Both are told apart by searching for a
        // later valid frame, same as a checksum failure.
        let torn = match current.reader.stop_reason() {
            None | Some(StopReason::EndOfSegment) => {
                self.stats.segments += 1;
                return Ok(());
            }
            Some(StopReason::Io(err)) => {
                return Err(WalError::Io(io::Error::new(err.kind(), err.to_string())));
            }
            Some(StopReason::TornFrame { .. }) => true,
            Some(StopReason::ChecksumMismatch { .. } | StopReason::OversizedFrame { .. }) => false,
        };

        let bad_offset = current.reader.frame_offset();
        let (mut rest, start) = current.reader.take_remaining()?;

        let Some(next) = find_next_frame(&rest) else {
            if torn {
                warn!(
                    segment = %segment,
                    offset = bad_offset,
                    "Truncated frame at end of segment (expected after crash)"
                );
            } else {
                warn!(
                    segment = %segment,
                    offset = bad_offset,
                    "Unreadable final frame in segment, treating as torn write"
                );
            }
            self.stats.segments += 1;
            self.stats.torn_tails += 1;
            return Ok(());
        };

        let resume_at = start + next as u64;
        match self.mode {
            RecoveryMode::Strict => {
                warn!(
                    segment = %segment,
                    offset = bad_offset,
                    next_valid = resume_at,
                    "Corrupt frame followed by valid frames"
                );
                Err(WalError::Corruption {
                    segment: current.info.path.display().to_string(),
                    offset: bad_offset,
                })
            }
            RecoveryMode::SkipCorrupt => {
                warn!(
                    segment = %segment,
                    offset = bad_offset,
                    resume_at,
                    "Skipping corrupt WAL data"
                );
                self.stats.skipped_frames += 1;
                let tail = rest.split_off(next);
                let source: Box<dyn Read + Send> = Box::new(Cursor::new(tail));
                self.current = Some(OpenSegment {
                    info: current.info,
                    reader: SegmentReader::with_offset(source, resume_at),
                });
                Ok(())
            }
        }
    }

    fn fail(&mut self, err: WalError) -> Option<WalResult<WalEntry>> {
        self.finished = true;
        self.current = None;
        self.pending.clear();
        Some(Err(err))
    }
}

impl Iterator for Replay {
    type Item = WalResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if self.current.is_none() {
                match self.open_next() {
                    None => {
                        self.finished = true;
                        return None;
                    }
                    Some(Err(err)) => return self.fail(err),
                    Some(Ok(())) => {}
                }
            }

            let current = self.current.as_mut()?;
            if current.reader.advance() {
                match current.reader.read() {
                    Ok(entry) => {
                        self.stats.entries += 1;
                        return Some(Ok(entry));
                    }
                    Err(err) if err.is_malformed() && self.mode == RecoveryMode::SkipCorrupt => {
                        warn!(
                            segment = %current.info.name(),
                            offset = current.reader.frame_offset(),
                            error = %err,
                            "Skipping malformed WAL entry"
                        );
                        self.stats.skipped_frames += 1;
                    }
                    Err(err) => return self.fail(err),
                }
                continue;
            }

            if let Err(err) = self.handle_stop() {
                return self.fail(err);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tail validation
// ---------------------------------------------------------------------------

/// Result of checking a segment's frames without decoding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentScan {
    /// Frames whose checksum verified.
    pub frames: u64,
    /// Length of the prefix made of verified frames.
    pub valid_len: u64,
    /// Size of the file.
    pub file_len: u64,
    /// Offset of the first valid frame after the valid prefix, if any. Set
    /// only when the segment is damaged in the middle rather than torn.
    pub next_valid: Option<u64>,
}

impl SegmentScan {
    /// Returns `true` if the segment ends exactly after its last valid frame.
    pub fn is_clean(&self) -> bool {
        self.valid_len == self.file_len
    }

    /// Returns `true` if valid frames follow the first bad one.
    pub fn is_corrupt(&self) -> bool {
        self.next_valid.is_some()
    }
}

/// Walk every frame of a segment, verifying checksums only.
pub fn scan_segment(path: &Path) -> WalResult<SegmentScan> {
    let file_len = std::fs::metadata(path)?.len();
    let mut reader = SegmentReader::open(path)?;
    let mut frames = 0;
    while reader.advance() {
        frames += 1;
    }

    let next_valid = match reader.stop_reason() {
        Some(StopReason::Io(err)) => {
            return Err(WalError::Io(io::Error::new(err.kind(), err.to_string())));
        }
        None | Some(StopReason::EndOfSegment) => None,
        Some(_) => {
            let (rest, start) = reader.take_remaining()?;
            find_next_frame(&rest).map(|next| start + next as u64)
        }
    };

    Ok(SegmentScan {
        frames,
        valid_len: reader.offset(),
        file_len,
        next_valid,
    })
}
