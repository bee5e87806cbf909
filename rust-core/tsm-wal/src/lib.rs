// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durability layer of a time-series storage engine. Every point write and
// series delete is appended here and acknowledged only once its frame is in
// the log. Closed segments are later replayed into the in-memory cache and
// removed once compaction has made their data durable elsewhere.
//
// # Architecture
//
// The WAL is a directory of numbered **segment files** (`_0000000000000001.wal`,
// ...). The highest-numbered segment is open for appends; all others are
// closed and immutable. The open segment is rotated once it reaches the
// configured size (default 10 MiB).
//
// ## On-disk frame format (all integers little-endian)
//
// ```text
// [1 byte:  kind]                 -- 1=Write, 2=Delete; bit 0x80 = uncompressed
// [4 bytes: crc32]                -- CRC32 over kind, length and payload
// [4 bytes: length (u32)]         -- payload length
// [N bytes: payload]              -- LZ4 block (size-prefixed) or raw entry
// ```
//
// Entry payloads are described in `entry`. A frame that fails validation at
// the very end of a segment is a torn write and ends replay of that segment
// cleanly; one followed by valid frames is corruption, handled per
// `RecoveryMode`.
//
// ## Usage
//
// ```no_run
// use tsm_wal::{Value, Wal, WalConfig};
//
// let wal = Wal::open(WalConfig::new("/tmp/tsm-wal")).unwrap();
//
// wal.write_points([(
//     "cpu,host=A#!~#value".to_string(),
//     vec![Value::new(1, 1.1), Value::new(2, 1.2)],
// )])
// .unwrap();
// wal.delete(["mem,host=B#!~#used"]).unwrap();
// wal.close().unwrap();
//
// let wal = Wal::open(WalConfig::new("/tmp/tsm-wal")).unwrap();
// for entry in wal.replay_closed_segments().unwrap() {
//     println!("{:?}", entry.unwrap());
// }
// ```

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod reader;
pub mod replay;
pub mod segment;
pub mod value;
pub mod wal;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use codec::Compression;
pub use config::WalConfig;
pub use entry::{DeleteEntry, EntryKind, TimeRange, WalEntry, WriteEntry};
pub use error::{WalError, WalResult};
pub use reader::{SegmentReader, StopReason};
pub use replay::{replay, RecoveryMode, Replay, ReplayStats};
pub use segment::{SegmentInfo, DEFAULT_SEGMENT_SIZE};
pub use value::{FieldValue, Value, ValueKind};
pub use wal::{Wal, WalPosition};
pub use writer::{SyncMode, SegmentWriter};
