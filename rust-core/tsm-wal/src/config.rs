// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Configuration
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// None of these settings affect correctness; they trade throughput, latency
// and disk space against each other.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::Compression;
use crate::replay::RecoveryMode;
use crate::segment::DEFAULT_SEGMENT_SIZE;
use crate::writer::SyncMode;

/// Settings for one WAL instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Directory holding the segment files. Created on open if missing.
    pub dir: PathBuf,

    /// Size in bytes at which the open segment is rotated (default 10 MiB).
    /// Checked after each append, so a segment may exceed it by one frame.
    pub segment_size: u64,

    /// Fsync policy for appends (default `Fsync`).
    pub sync_mode: SyncMode,

    /// Payload compression for new frames (default `Lz4`). Existing frames
    /// are always readable whatever this is set to.
    pub compression: Compression,

    /// How replay treats mid-segment corruption (default `Strict`).
    pub recovery_mode: RecoveryMode,
}

impl WalConfig {
    /// Defaults for a WAL rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_mode: SyncMode::default(),
            compression: Compression::default(),
            recovery_mode: RecoveryMode::default(),
        }
    }

    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_recovery_mode(mut self, recovery_mode: RecoveryMode) -> Self {
        self.recovery_mode = recovery_mode;
        self
    }
}
