// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Frame format
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A frame is the on-disk unit of a segment. One frame holds exactly one
// encoded entry.
//
// On-disk frame format (all integers little-endian):
//   [1 byte:  kind]       -- 1=Write, 2=Delete; bit 0x80 set = uncompressed
//   [4 bytes: crc32]      -- CRC32 of kind ++ length ++ payload
//   [4 bytes: length]     -- payload length in bytes
//   [N bytes: payload]    -- codec output (see `codec`)

use crc32fast::Hasher as Crc32Hasher;

use crate::codec::{self, Compression};
use crate::entry::{EntryKind, WalEntry};
use crate::error::{WalError, WalResult};

/// Size of the fixed frame header (kind + crc32 + length).
pub const HEADER_SIZE: usize = 1 + 4 + 4;

/// Maximum allowed payload size: 64 MiB. Any frame declaring a larger
/// payload is treated as corrupted.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Kind-byte flag marking a payload stored without compression.
pub const UNCOMPRESSED_FLAG: u8 = 0x80;

// ---------------------------------------------------------------------------
// FrameKind
// ---------------------------------------------------------------------------

/// The decoded kind byte: which entry the payload holds and how it is
/// compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKind {
    pub entry: EntryKind,
    pub compression: Compression,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> WalResult<Self> {
        let compression = if byte & UNCOMPRESSED_FLAG != 0 {
            Compression::Uncompressed
        } else {
            Compression::Lz4
        };
        let entry = EntryKind::from_byte(byte & !UNCOMPRESSED_FLAG)
            .map_err(|_| WalError::InvalidEntryKind(byte))?;
        Ok(Self { entry, compression })
    }

    pub fn to_byte(self) -> u8 {
        match self.compression {
            Compression::Lz4 => self.entry.to_byte(),
            Compression::Uncompressed => self.entry.to_byte() | UNCOMPRESSED_FLAG,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameHeader
// ---------------------------------------------------------------------------

/// The fixed-size prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw kind byte, validated lazily so a checksum failure is reported
    /// before an unknown kind.
    pub kind: u8,
    pub checksum: u32,
    pub length: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            kind: bytes[0],
            checksum: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            length: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.kind;
        out[1..5].copy_from_slice(&self.checksum.to_le_bytes());
        out[5..9].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Total frame size on disk, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    /// Returns `true` if `payload` matches the stored checksum.
    pub fn verify(&self, payload: &[u8]) -> bool {
        checksum(self.kind, self.length, payload) == self.checksum
    }
}

/// CRC32 (IEEE) over the kind byte, the length field and the payload.
pub fn checksum(kind: u8, length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encode `entry` into a complete frame, header included.
pub fn encode_frame(entry: &WalEntry, compression: Compression) -> WalResult<Vec<u8>> {
    let payload = codec::encode(entry, compression)?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(WalError::EntryTooLarge {
            length: payload.len(),
            max_length: MAX_FRAME_SIZE,
        });
    }

    let kind = FrameKind {
        entry: entry.kind(),
        compression,
    }
    .to_byte();
    let length = payload.len() as u32;
    let header = FrameHeader {
        kind,
        checksum: checksum(kind, length, &payload),
        length,
    };

    let mut frame = Vec::with_capacity(header.frame_len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode the payload of a checksum-verified frame.
pub fn decode_payload(kind: u8, payload: &[u8]) -> WalResult<WalEntry> {
    let kind = FrameKind::from_byte(kind)?;
    codec::decode(kind.entry, kind.compression, payload)
}

/// Find the offset of the first position in `data` that holds a complete
/// frame with a known kind and a matching checksum.
///
/// Used by recovery to tell a torn tail (nothing valid follows) from
/// corruption in the middle of a segment.
pub fn find_next_frame(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(HEADER_SIZE - 1)).find(|&offset| {
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&data[offset..offset + HEADER_SIZE]);
        let header = FrameHeader::parse(&header_bytes);

        if header.length > MAX_FRAME_SIZE || FrameKind::from_byte(header.kind).is_err() {
            return false;
        }
        let end = offset + header.frame_len();
        end <= data.len() && header.verify(&data[offset + HEADER_SIZE..end])
    })
}
