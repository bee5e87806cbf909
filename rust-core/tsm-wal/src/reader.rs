// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Segment reader
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `SegmentReader` walks the frames of one segment in file order. It
// verifies each frame's checksum and stops at the first frame it cannot
// accept. A short header, a short payload, a checksum mismatch and an
// absurd length all look the same to the caller (`advance()` returns
// false); the precise cause is kept in `stop_reason()` so the replay policy
// can tell a torn tail from corruption further up the file.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::entry::WalEntry;
use crate::error::{WalError, WalResult};
use crate::frame::{decode_payload, FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE};

// ---------------------------------------------------------------------------
// StopReason
// ---------------------------------------------------------------------------

/// Why a reader stopped producing frames.
#[derive(Debug)]
pub enum StopReason {
    /// The segment ended exactly on a frame boundary.
    EndOfSegment,

    /// The segment ended inside a frame header or payload (torn write).
    TornFrame {
        /// Offset of the incomplete frame.
        offset: u64,
    },

    /// A complete frame whose checksum does not match its contents.
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A complete header declaring a payload larger than `MAX_FRAME_SIZE`.
    OversizedFrame { offset: u64, length: u32 },

    /// The underlying reader failed.
    Io(io::Error),
}

impl StopReason {
    /// Returns `true` when the stop is the expected end of a segment, clean
    /// or torn, rather than a bad frame or an I/O failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::EndOfSegment | Self::TornFrame { .. })
    }

    /// Returns `true` when the stop was caused by a complete but invalid
    /// frame, which may or may not have valid frames after it.
    pub fn is_bad_frame(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::OversizedFrame { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// SegmentReader
// ---------------------------------------------------------------------------

/// Sequential, forward-only frame reader over one segment.
///
/// ```no_run
/// use tsm_wal::SegmentReader;
///
/// let mut reader = SegmentReader::open("/var/lib/tsm/wal/_0000000000000001.wal").unwrap();
/// while reader.advance() {
///     let entry = reader.read().unwrap();
///     println!("{:?}", entry.kind());
/// }
/// ```
pub struct SegmentReader<R> {
    inner: R,

    /// Header of the current frame.
    header: Option<FrameHeader>,

    /// Header and payload bytes of the current frame.
    frame: Vec<u8>,

    /// Offset of the current frame.
    frame_offset: u64,

    /// Offset one past the last accepted frame.
    offset: u64,

    stop: Option<StopReason>,
}

impl SegmentReader<BufReader<File>> {
    /// Open a segment file for reading from its first frame.
    pub fn open(path: impl AsRef<Path>) -> WalResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> SegmentReader<R> {
    /// Read frames from `inner`, which must be positioned on a frame
    /// boundary.
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Like `new`, for a source that starts `base_offset` bytes into the
    /// segment. Offsets reported by the reader are relative to the segment.
    pub fn with_offset(inner: R, base_offset: u64) -> Self {
        Self {
            inner,
            header: None,
            frame: Vec::new(),
            frame_offset: base_offset,
            offset: base_offset,
            stop: None,
        }
    }

    /// Advance to the next frame whose checksum verifies.
    ///
    /// Returns `false` at the end of the segment or at the first frame that
    /// cannot be accepted; `stop_reason()` then says which. Once `false` is
    /// returned, every later call returns `false`.
    pub fn advance(&mut self) -> bool {
        if self.stop.is_some() {
            return false;
        }

        self.header = None;
        self.frame.clear();
        self.frame_offset = self.offset;

        match self.next_frame() {
            Ok(header) => {
                self.offset += header.frame_len() as u64;
                self.header = Some(header);
                true
            }
            Err(reason) => {
                self.stop = Some(reason);
                false
            }
        }
    }

    /// Decode the current frame. Valid only after `advance()` returned
    /// `true`.
    pub fn read(&self) -> WalResult<WalEntry> {
        let header = self
            .header
            .ok_or_else(|| WalError::malformed("read called without a current frame"))?;
        decode_payload(header.kind, &self.frame[HEADER_SIZE..])
    }

    /// Offset one past the last accepted frame: the length of the valid
    /// prefix of the segment read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset of the frame most recently examined.
    pub fn frame_offset(&self) -> u64 {
        self.frame_offset
    }

    /// Why the reader stopped, once `advance()` has returned `false`.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop.as_ref()
    }

    /// After a bad-frame stop, collect every byte from one past the start of
    /// the rejected frame to the end of the source.
    ///
    /// Returns the bytes and the segment offset of their first byte, for the
    /// replay policy to search for the next valid frame.
    pub fn take_remaining(&mut self) -> io::Result<(Vec<u8>, u64)> {
        let mut rest = if self.frame.is_empty() {
            Vec::new()
        } else {
            self.frame[1..].to_vec()
        };
        self.inner.read_to_end(&mut rest)?;
        self.frame.clear();
        let start = if rest.is_empty() {
            self.frame_offset
        } else {
            self.frame_offset + 1
        };
        Ok((rest, start))
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_frame(&mut self) -> Result<FrameHeader, StopReason> {
        let offset = self.frame_offset;

        let mut header_bytes = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header_bytes).map_err(StopReason::Io)?;
        if got == 0 {
            return Err(StopReason::EndOfSegment);
        }
        if got < HEADER_SIZE {
            return Err(StopReason::TornFrame { offset });
        }

        let header = FrameHeader::parse(&header_bytes);
        self.frame.extend_from_slice(&header_bytes);

        if header.length > MAX_FRAME_SIZE {
            return Err(StopReason::OversizedFrame {
                offset,
                length: header.length,
            });
        }

        let length = header.length as usize;
        self.frame.resize(HEADER_SIZE + length, 0);
        let got = read_full(&mut self.inner, &mut self.frame[HEADER_SIZE..])
            .map_err(StopReason::Io)?;
        if got < length {
            self.frame.truncate(HEADER_SIZE + got);
            return Err(StopReason::TornFrame { offset });
        }

        let actual = crate::frame::checksum(header.kind, header.length, &self.frame[HEADER_SIZE..]);
        if actual != header.checksum {
            return Err(StopReason::ChecksumMismatch {
                offset,
                expected: header.checksum,
                actual,
            });
        }

        Ok(header)
    }
}

impl<R: Read> IntoIterator for SegmentReader<R> {
    type Item = WalResult<WalEntry>;
    type IntoIter = SegmentEntries<R>;

    fn into_iter(self) -> Self::IntoIter {
        SegmentEntries { reader: self }
    }
}

/// Iterator adapter over a [`SegmentReader`] that yields decoded entries
/// until the reader stops. It does not distinguish stop causes; use
/// [`crate::replay`] for policy-aware replay.
pub struct SegmentEntries<R> {
    reader: SegmentReader<R>,
}

impl<R: Read> SegmentEntries<R> {
    /// The wrapped reader, for inspecting `stop_reason()` afterwards.
    pub fn reader(&self) -> &SegmentReader<R> {
        &self.reader
    }
}

impl<R: Read> Iterator for SegmentEntries<R> {
    type Item = WalResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.advance() {
            Some(self.reader.read())
        } else {
            None
        }
    }
}

/// Fill `buf` as far as the source allows, returning the number of bytes
/// read. Unlike `read_exact`, a short source is not an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::entry::{DeleteEntry, WriteEntry};
    use crate::frame::encode_frame;
    use crate::value::Value;
    use std::io::Cursor;

    fn write_entry(key: &str, value: Value) -> WalEntry {
        let mut entry = WriteEntry::default();
        entry.values.insert(key.to_string(), vec![value]);
        WalEntry::Write(entry)
    }

    fn segment_bytes(entries: &[WalEntry]) -> Vec<u8> {
        entries
            .iter()
            .flat_map(|e| encode_frame(e, Compression::Lz4).unwrap())
            .collect()
    }

    #[test]
    fn test_reads_frames_in_order() {
        let entries = vec![
            write_entry("cpu,host=A#!~#value", Value::new(1_000_000_000, 1.1)),
            WalEntry::Delete(DeleteEntry::new(vec!["cpu".to_string()])),
            write_entry("cpu,host=B#!~#value", Value::new(1_000_000_000, 2i64)),
        ];
        let data = segment_bytes(&entries);

        let mut reader = SegmentReader::new(Cursor::new(data.clone()));
        let mut decoded = Vec::new();
        while reader.advance() {
            decoded.push(reader.read().unwrap());
        }

        assert_eq!(decoded, entries);
        assert!(matches!(reader.stop_reason(), Some(StopReason::EndOfSegment)));
        assert_eq!(reader.offset(), data.len() as u64);
    }

    #[test]
    fn test_empty_segment() {
        let mut reader = SegmentReader::new(Cursor::new(Vec::new()));
        assert!(!reader.advance());
        assert!(reader.stop_reason().unwrap().is_clean());
        assert!(!reader.advance());
    }

    #[test]
    fn test_torn_header_is_clean_end() {
        let first = write_entry("a", Value::new(1, 1.0));
        let mut data = segment_bytes(&[first.clone(), first.clone()]);
        let first_len = encode_frame(&first, Compression::Lz4).unwrap().len();
        data.truncate(first_len + 4);

        let mut reader = SegmentReader::new(Cursor::new(data));
        assert!(reader.advance());
        assert_eq!(reader.read().unwrap(), first);
        assert!(!reader.advance());
        match reader.stop_reason() {
            Some(StopReason::TornFrame { offset }) => assert_eq!(*offset, first_len as u64),
            other => panic!("Expected TornFrame, got: {other:?}"),
        }
        assert_eq!(reader.offset(), first_len as u64);
    }

    #[test]
    fn test_torn_payload_is_clean_end() {
        let entry = write_entry("a", Value::new(1, "text value"));
        let mut data = segment_bytes(&[entry]);
        data.pop();

        let mut reader = SegmentReader::new(Cursor::new(data));
        assert!(!reader.advance());
        assert!(matches!(
            reader.stop_reason(),
            Some(StopReason::TornFrame { offset: 0 })
        ));
    }

    #[test]
    fn test_checksum_mismatch_stops() {
        let entry = write_entry("a", Value::new(1, true));
        let mut data = segment_bytes(&[entry]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let mut reader = SegmentReader::new(Cursor::new(data));
        assert!(!reader.advance());
        let reason = reader.stop_reason().unwrap();
        assert!(reason.is_bad_frame());
        assert!(!reason.is_clean());
    }

    #[test]
    fn test_oversized_length_stops() {
        let mut data = vec![1u8];
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_le_bytes());

        let mut reader = SegmentReader::new(Cursor::new(data));
        assert!(!reader.advance());
        assert!(matches!(
            reader.stop_reason(),
            Some(StopReason::OversizedFrame { offset: 0, .. })
        ));
    }

    #[test]
    fn test_take_remaining_after_bad_frame() {
        let a = write_entry("a", Value::new(1, 1.0));
        let b = write_entry("b", Value::new(2, 2.0));
        let frame_a = encode_frame(&a, Compression::Lz4).unwrap();
        let mut data = segment_bytes(&[a, b]);
        data[1] ^= 0xFF;

        let mut reader = SegmentReader::new(Cursor::new(data.clone()));
        assert!(!reader.advance());
        let (rest, start) = reader.take_remaining().unwrap();
        assert_eq!(start, 1);
        assert_eq!(rest, data[1..].to_vec());
        assert_eq!(
            crate::frame::find_next_frame(&rest).map(|o| o as u64 + start),
            Some(frame_a.len() as u64)
        );
    }

    #[test]
    fn test_read_without_frame_is_error() {
        let reader = SegmentReader::new(Cursor::new(Vec::new()));
        assert!(reader.read().is_err());
    }

    #[test]
    fn test_into_iter_yields_entries() {
        let entries = vec![
            write_entry("a", Value::new(1, 1.0)),
            write_entry("b", Value::new(2, 2.0)),
        ];
        let data = segment_bytes(&entries);
        let decoded: Vec<WalEntry> = SegmentReader::new(Cursor::new(data))
            .into_iter()
            .collect::<WalResult<_>>()
            .unwrap();
        assert_eq!(decoded, entries);
    }
}
