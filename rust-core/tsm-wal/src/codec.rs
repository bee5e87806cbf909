// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Entry codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Turns a `WalEntry` into the (optionally compressed) payload stored inside a
// frame, and back. Pure and deterministic: the same entry and codec always
// produce the same bytes.
//
// LZ4 payloads carry a 4-byte little-endian uncompressed-size prefix
// followed by a raw LZ4 block.

use serde::{Deserialize, Serialize};

use crate::entry::{EntryKind, WalEntry};
use crate::error::{WalError, WalResult};

/// Upper bound on the declared uncompressed size of an LZ4 payload (256 MiB).
/// Anything larger is treated as a malformed entry rather than allocated.
pub const MAX_DECOMPRESSED_SIZE: usize = 256 * 1024 * 1024;

/// Block compressor applied to entry payloads before framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// LZ4 block compression (pure Rust, `lz4_flex`).
    #[default]
    Lz4,
    /// Store the encoded payload as-is.
    Uncompressed,
}

/// Encode `entry` and compress the result with `compression`.
///
/// Entries whose uncompressed payload exceeds `MAX_DECOMPRESSED_SIZE` are
/// refused here, since `decode` would refuse them on replay.
pub fn encode(entry: &WalEntry, compression: Compression) -> WalResult<Vec<u8>> {
    let raw = entry.encode()?;
    check_raw_len(raw.len())?;
    Ok(match compression {
        Compression::Lz4 => lz4_flex::compress_prepend_size(&raw),
        Compression::Uncompressed => raw,
    })
}

/// Decompress `data` with `compression` and decode it as an entry of `kind`.
pub fn decode(kind: EntryKind, compression: Compression, data: &[u8]) -> WalResult<WalEntry> {
    match compression {
        Compression::Lz4 => {
            let raw = decompress_lz4(data)?;
            WalEntry::decode(kind, &raw)
        }
        Compression::Uncompressed => WalEntry::decode(kind, data),
    }
}

fn check_raw_len(length: usize) -> WalResult<()> {
    if length > MAX_DECOMPRESSED_SIZE {
        return Err(WalError::EntryTooLarge {
            length,
            max_length: MAX_DECOMPRESSED_SIZE as u32,
        });
    }
    Ok(())
}

fn decompress_lz4(data: &[u8]) -> WalResult<Vec<u8>> {
    if data.len() < 4 {
        return Err(WalError::malformed("LZ4 payload shorter than its size prefix"));
    }
    let size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if size > MAX_DECOMPRESSED_SIZE {
        return Err(WalError::malformed(format!(
            "LZ4 payload declares {size} uncompressed bytes"
        )));
    }

    let raw = lz4_flex::decompress(&data[4..], size)
        .map_err(|e| WalError::malformed(format!("LZ4 decompression failed: {e}")))?;
    if raw.len() != size {
        return Err(WalError::malformed(format!(
            "LZ4 payload decoded to {} bytes, expected {size}",
            raw.len()
        )));
    }
    Ok(raw)
}
