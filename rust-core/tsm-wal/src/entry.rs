// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Entry types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines the two logical entry kinds (write and delete) and their binary
// payload encoding. This layer is pure: no I/O, no compression, no framing.
//
// Write-entry payload (all integers little-endian), repeated per key in
// ascending key order:
//   [2 bytes: key_len (u16)]
//   [N bytes: key]
//   [4 bytes: value_count (u32)]
//   repeated value_count times:
//     [8 bytes: timestamp (i64, ns)]
//     [1 byte:  value_kind]          -- 1=Float, 2=Integer, 3=Boolean, 4=Text
//     [value bytes]                  -- 8 / 8 / 1 / (u32 len + UTF-8)
//
// Delete-entry payload:
//   [4 bytes: key_count (u32)]
//   repeated key_count times: [2 bytes: key_len (u16)][N bytes: key]
//   optional: [1 byte: has_range][8 bytes: min (i64)][8 bytes: max (i64)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{WalError, WalResult};
use crate::value::{FieldValue, Value, ValueKind};

/// Longest series key the write and delete formats can carry.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// EntryKind
// ---------------------------------------------------------------------------

/// Which kind of entry a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A batch of typed values keyed by series.
    Write = 1,
    /// A tombstone over a set of series keys.
    Delete = 2,
}

impl EntryKind {
    /// Decode a single byte into an `EntryKind`.
    pub fn from_byte(byte: u8) -> WalResult<Self> {
        match byte {
            1 => Ok(Self::Write),
            2 => Ok(Self::Delete),
            other => Err(WalError::InvalidEntryKind(other)),
        }
    }

    /// Encode this kind as a single byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// WriteEntry
// ---------------------------------------------------------------------------

/// A batch of values grouped by series key.
///
/// Key order carries no meaning. The order of values under one key is
/// preserved exactly through encode and decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEntry {
    pub values: BTreeMap<String, Vec<Value>>,
}

impl WriteEntry {
    pub fn new(values: BTreeMap<String, Vec<Value>>) -> Self {
        Self { values }
    }

    /// Total number of values across all keys.
    pub fn value_count(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    fn encode(&self) -> WalResult<Vec<u8>> {
        let size: usize = self
            .values
            .iter()
            .map(|(key, values)| {
                2 + key.len() + 4 + values.iter().map(|v| 9 + v.field.encoded_len()).sum::<usize>()
            })
            .sum();
        let mut buf = Vec::with_capacity(size);

        for (key, values) in &self.values {
            if let Some(first) = values.first() {
                let kind = first.kind();
                if values.iter().any(|v| v.kind() != kind) {
                    return Err(WalError::MixedValueKinds { key: key.clone() });
                }
            }

            put_key(&mut buf, key)?;
            put_len_u32(&mut buf, values.len())?;

            for value in values {
                buf.extend_from_slice(&value.timestamp.to_le_bytes());
                buf.push(value.kind().to_byte());
                match &value.field {
                    FieldValue::Float(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
                    FieldValue::Integer(v) => buf.extend_from_slice(&v.to_le_bytes()),
                    FieldValue::Boolean(v) => buf.push(u8::from(*v)),
                    FieldValue::Text(v) => {
                        put_len_u32(&mut buf, v.len())?;
                        buf.extend_from_slice(v.as_bytes());
                    }
                }
            }
        }

        Ok(buf)
    }

    fn decode(data: &[u8]) -> WalResult<Self> {
        let mut cursor = Cursor::new(data);
        let mut values = BTreeMap::new();

        while !cursor.is_empty() {
            let key = cursor.key()?;
            let count = cursor.u32()? as usize;

            // Each value needs at least 10 bytes; cap the allocation by what
            // the buffer could possibly hold.
            let mut series: Vec<Value> = Vec::with_capacity(count.min(cursor.remaining() / 10));
            for _ in 0..count {
                let timestamp = cursor.i64()?;
                let field = match ValueKind::from_byte(cursor.u8()?)? {
                    ValueKind::Float => FieldValue::Float(f64::from_bits(cursor.u64()?)),
                    ValueKind::Integer => FieldValue::Integer(cursor.i64()?),
                    ValueKind::Boolean => match cursor.u8()? {
                        0 => FieldValue::Boolean(false),
                        1 => FieldValue::Boolean(true),
                        other => {
                            return Err(WalError::malformed(format!(
                                "boolean byte {other} for key {key}"
                            )))
                        }
                    },
                    ValueKind::Text => {
                        let len = cursor.u32()? as usize;
                        FieldValue::Text(cursor.string(len)?)
                    }
                };
                if let Some(first) = series.first() {
                    if first.kind() != field.kind() {
                        return Err(WalError::malformed(format!(
                            "mixed value kinds for key {key}"
                        )));
                    }
                }
                series.push(Value { timestamp, field });
            }

            if values.insert(key.clone(), series).is_some() {
                return Err(WalError::malformed(format!("duplicate series key {key}")));
            }
        }

        Ok(Self { values })
    }
}

// ---------------------------------------------------------------------------
// DeleteEntry
// ---------------------------------------------------------------------------

/// Inclusive timestamp bounds of a ranged delete, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: i64,
    pub max: i64,
}

impl TimeRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Returns `true` if `timestamp` falls within the bounds.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.min <= timestamp && timestamp <= self.max
    }
}

/// A tombstone for a set of series keys.
///
/// Without a `range` every value of the listed keys is removed as of this
/// entry's position in the log; with one, only values inside the bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntry {
    pub keys: Vec<String>,
    pub range: Option<TimeRange>,
}

impl DeleteEntry {
    /// Delete all time for `keys`.
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, range: None }
    }

    /// Delete values of `keys` whose timestamps fall in `[min, max]`.
    pub fn with_range(keys: Vec<String>, min: i64, max: i64) -> Self {
        Self {
            keys,
            range: Some(TimeRange::new(min, max)),
        }
    }

    fn encode(&self) -> WalResult<Vec<u8>> {
        let size = 4 + self.keys.iter().map(|k| 2 + k.len()).sum::<usize>() + 17;
        let mut buf = Vec::with_capacity(size);

        put_len_u32(&mut buf, self.keys.len())?;
        for key in &self.keys {
            put_key(&mut buf, key)?;
        }

        if let Some(range) = self.range {
            buf.push(1);
            buf.extend_from_slice(&range.min.to_le_bytes());
            buf.extend_from_slice(&range.max.to_le_bytes());
        }

        Ok(buf)
    }

    fn decode(data: &[u8]) -> WalResult<Self> {
        let mut cursor = Cursor::new(data);
        let count = cursor.u32()? as usize;

        let mut keys = Vec::with_capacity(count.min(cursor.remaining() / 2));
        for _ in 0..count {
            keys.push(cursor.key()?);
        }

        let range = if cursor.is_empty() {
            None
        } else {
            match cursor.u8()? {
                0 => None,
                1 => Some(TimeRange::new(cursor.i64()?, cursor.i64()?)),
                other => {
                    return Err(WalError::malformed(format!("invalid range marker {other}")))
                }
            }
        };

        if !cursor.is_empty() {
            return Err(WalError::malformed(format!(
                "{} trailing bytes after delete entry",
                cursor.remaining()
            )));
        }

        Ok(Self { keys, range })
    }
}

// ---------------------------------------------------------------------------
// WalEntry
// ---------------------------------------------------------------------------

/// One logical change recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WalEntry {
    Write(WriteEntry),
    Delete(DeleteEntry),
}

impl WalEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Write(_) => EntryKind::Write,
            Self::Delete(_) => EntryKind::Delete,
        }
    }

    /// Encode the entry to its uncompressed payload bytes.
    pub fn encode(&self) -> WalResult<Vec<u8>> {
        match self {
            Self::Write(entry) => entry.encode(),
            Self::Delete(entry) => entry.encode(),
        }
    }

    /// Decode an uncompressed payload of the given kind.
    ///
    /// Any declared length that runs past the end of `data` is rejected with
    /// `MalformedEntry`.
    pub fn decode(kind: EntryKind, data: &[u8]) -> WalResult<Self> {
        match kind {
            EntryKind::Write => WriteEntry::decode(data).map(Self::Write),
            EntryKind::Delete => DeleteEntry::decode(data).map(Self::Delete),
        }
    }
}

impl From<WriteEntry> for WalEntry {
    fn from(entry: WriteEntry) -> Self {
        Self::Write(entry)
    }
}

impl From<DeleteEntry> for WalEntry {
    fn from(entry: DeleteEntry) -> Self {
        Self::Delete(entry)
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn put_key(buf: &mut Vec<u8>, key: &str) -> WalResult<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(WalError::KeyTooLong {
            length: key.len(),
            max_length: MAX_KEY_LEN,
        });
    }
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    Ok(())
}

fn put_len_u32(buf: &mut Vec<u8>, len: usize) -> WalResult<()> {
    let len = u32::try_from(len).map_err(|_| WalError::EntryTooLarge {
        length: len,
        max_length: u32::MAX,
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Bounds-checked reader over a payload slice.
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> WalResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WalError::malformed(format!(
                "need {len} bytes at offset {}, only {} remain",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> WalResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> WalResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> WalResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> WalResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> WalResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> WalResult<i64> {
        self.array().map(i64::from_le_bytes)
    }

    fn string(&mut self, len: usize) -> WalResult<String> {
        let offset = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| WalError::malformed(format!("invalid UTF-8 at offset {offset}")))
    }

    fn key(&mut self) -> WalResult<String> {
        let len = self.u16()? as usize;
        self.string(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry(pairs: &[(&str, Vec<Value>)]) -> WalEntry {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        WalEntry::Write(WriteEntry::new(values))
    }

    fn roundtrip(entry: &WalEntry) -> WalEntry {
        let bytes = entry.encode().unwrap();
        WalEntry::decode(entry.kind(), &bytes).unwrap()
    }

    #[test]
    fn test_write_entry_all_kinds_roundtrip() {
        let entry = write_entry(&[
            ("cpu,host=A#!~#float", vec![Value::new(1_000_000_000, 1.1)]),
            ("cpu,host=A#!~#int", vec![Value::new(1_000_000_000, 1i64)]),
            ("cpu,host=A#!~#bool", vec![Value::new(1_000_000_000, true)]),
            ("cpu,host=A#!~#string", vec![Value::new(1_000_000_000, "string")]),
        ]);
        assert_eq!(roundtrip(&entry), entry);
    }

    #[test]
    fn test_write_entry_preserves_value_order() {
        let entry = write_entry(&[(
            "mem#!~#used",
            vec![Value::new(30, 3i64), Value::new(10, 1i64), Value::new(20, 2i64)],
        )]);
        match roundtrip(&entry) {
            WalEntry::Write(decoded) => {
                let stamps: Vec<i64> = decoded.values["mem#!~#used"]
                    .iter()
                    .map(|v| v.timestamp)
                    .collect();
                assert_eq!(stamps, vec![30, 10, 20]);
            }
            other => panic!("Expected write entry, got: {other:?}"),
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = write_entry(&[
            ("b", vec![Value::new(1, 1.0)]),
            ("a", vec![Value::new(1, 2.0)]),
        ]);
        let b = write_entry(&[
            ("a", vec![Value::new(1, 2.0)]),
            ("b", vec![Value::new(1, 1.0)]),
        ]);
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn test_mixed_kinds_rejected() {
        let entry = write_entry(&[("k", vec![Value::new(1, 1.0), Value::new(2, 2i64)])]);
        assert!(matches!(
            entry.encode(),
            Err(WalError::MixedValueKinds { key }) if key == "k"
        ));
    }

    #[test]
    fn test_key_too_long_rejected() {
        let key = "x".repeat(MAX_KEY_LEN + 1);
        let entry = WalEntry::Delete(DeleteEntry::new(vec![key]));
        assert!(matches!(entry.encode(), Err(WalError::KeyTooLong { .. })));
    }

    #[test]
    fn test_empty_write_entry() {
        let entry = WalEntry::Write(WriteEntry::default());
        assert!(entry.encode().unwrap().is_empty());
        assert_eq!(roundtrip(&entry), entry);
    }

    #[test]
    fn test_delete_entry_roundtrip() {
        let entry = WalEntry::Delete(DeleteEntry::new(vec![
            "cpu".to_string(),
            "cpu,host=A#!~#value".to_string(),
        ]));
        assert_eq!(roundtrip(&entry), entry);
    }

    #[test]
    fn test_delete_range_roundtrip() {
        let entry = WalEntry::Delete(DeleteEntry::with_range(vec!["cpu".to_string()], -5, 99));
        let decoded = roundtrip(&entry);
        assert_eq!(decoded, entry);
        match decoded {
            WalEntry::Delete(d) => assert_eq!(d.range, Some(TimeRange::new(-5, 99))),
            other => panic!("Expected delete entry, got: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_write_payload_is_malformed() {
        let entry = write_entry(&[("cpu", vec![Value::new(1, "some text")])]);
        let bytes = entry.encode().unwrap();
        for cut in 1..bytes.len() {
            let result = WalEntry::decode(EntryKind::Write, &bytes[..cut]);
            assert!(
                matches!(result, Err(ref e) if e.is_malformed()),
                "cut at {cut} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_oversized_count_is_malformed() {
        // key "k", then a value_count far larger than the buffer.
        let mut bytes = vec![1, 0, b'k'];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let result = WalEntry::decode(EntryKind::Write, &bytes);
        assert!(matches!(result, Err(WalError::MalformedEntry { .. })));
    }

    #[test]
    fn test_delete_trailing_garbage_is_malformed() {
        let entry = WalEntry::Delete(DeleteEntry::new(vec!["cpu".to_string()]));
        let mut bytes = entry.encode().unwrap();
        bytes.extend_from_slice(&[7, 7]);
        assert!(WalEntry::decode(EntryKind::Delete, &bytes).is_err());
    }

    #[test]
    fn test_invalid_value_kind_in_payload() {
        let mut bytes = vec![1, 0, b'k'];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.push(9);
        assert!(matches!(
            WalEntry::decode(EntryKind::Write, &bytes),
            Err(WalError::InvalidValueKind(9))
        ));
    }

    #[test]
    fn test_mixed_kinds_in_payload_is_malformed() {
        let mut bytes = vec![1, 0, b'k'];
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.push(ValueKind::Integer.to_byte());
        bytes.extend_from_slice(&5i64.to_le_bytes());
        bytes.extend_from_slice(&2i64.to_le_bytes());
        bytes.push(ValueKind::Boolean.to_byte());
        bytes.push(1);
        assert!(matches!(
            WalEntry::decode(EntryKind::Write, &bytes),
            Err(WalError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn test_entry_kind_bytes() {
        assert_eq!(EntryKind::from_byte(1).unwrap(), EntryKind::Write);
        assert_eq!(EntryKind::from_byte(2).unwrap(), EntryKind::Delete);
        assert!(EntryKind::from_byte(3).is_err());
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
    }
}
