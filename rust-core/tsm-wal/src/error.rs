// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines all error conditions that can arise during WAL operations: I/O
// failures, structurally invalid entries, mid-segment corruption, use after
// shutdown, and directory problems at startup.
//
// A torn frame at the tail of a segment is deliberately absent from this
// list. It is reported by the segment reader as a `StopReason` and treated
// as the normal end of replay.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An I/O error occurred while reading or writing a WAL segment file.
    /// An append that fails with this error is not committed.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A checksum-valid frame decoded to a structurally invalid entry
    /// (declared lengths running past the buffer, bad UTF-8, trailing bytes).
    #[error("Malformed WAL entry: {reason}")]
    MalformedEntry {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// A bad frame was found in a segment with valid frames after it, so it
    /// cannot be explained by a torn write.
    #[error("Corrupt frame at offset {offset} in segment {segment}")]
    Corruption {
        /// The segment file path.
        segment: String,
        /// The byte offset of the bad frame.
        offset: u64,
    },

    /// An append or sync was attempted after the WAL was closed.
    #[error("WAL is closed")]
    Closed,

    /// The WAL directory could not be created or enumerated.
    #[error("WAL directory {path} is not usable: {source}")]
    Directory {
        /// The directory that failed.
        path: PathBuf,
        /// The underlying file-system error.
        #[source]
        source: std::io::Error,
    },

    /// A series key exceeds the 16-bit length prefix of the write format.
    #[error("Series key is {length} bytes, exceeding maximum {max_length}")]
    KeyTooLong {
        /// The key length in bytes.
        length: usize,
        /// The maximum encodable key length.
        max_length: usize,
    },

    /// A single series key carried values of more than one kind.
    #[error("Series key {key} mixes value kinds")]
    MixedValueKinds {
        /// The offending series key.
        key: String,
    },

    /// The encoded frame payload exceeds the maximum frame size.
    #[error("Encoded entry is {length} bytes, exceeding maximum {max_length}")]
    EntryTooLarge {
        /// The encoded payload length.
        length: usize,
        /// The maximum allowed payload length.
        max_length: u32,
    },

    /// An unknown entry kind byte was found in a frame header.
    #[error("Invalid entry kind byte: {0:#04x}")]
    InvalidEntryKind(u8),

    /// An unknown value kind byte was found in a write entry payload.
    #[error("Invalid value kind byte: {0}")]
    InvalidValueKind(u8),

    /// Removal of the currently open segment was requested.
    #[error("Segment {0} is the open segment and cannot be removed")]
    SegmentActive(u64),

    /// A thread panicked while holding the WAL lock.
    #[error("Lock poisoned: internal concurrency error")]
    LockPoisoned,
}

impl WalError {
    /// Shorthand for building a `MalformedEntry` error.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEntry {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that describe a bad entry rather than a
    /// failure of the log itself.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedEntry { .. } | Self::InvalidEntryKind(_) | Self::InvalidValueKind(_)
        )
    }
}

/// Convenience type alias for WAL results.
pub type WalResult<T> = Result<T, WalError>;
