// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TSM Write-Ahead Log - Typed values
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `Value` is one timestamped scalar for one series. The scalar is a tagged
// union over exactly four kinds; the kind travels explicitly on the wire
// (see `ValueKind`) rather than being inferred at decode time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{WalError, WalResult};

// ---------------------------------------------------------------------------
// ValueKind
// ---------------------------------------------------------------------------

/// Wire tag identifying the payload kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// 64-bit IEEE-754 float, 8 bytes.
    Float = 1,
    /// Signed 64-bit integer, 8 bytes.
    Integer = 2,
    /// Boolean, 1 byte.
    Boolean = 3,
    /// UTF-8 text, `u32` length prefix followed by the bytes.
    Text = 4,
}

impl ValueKind {
    /// Decode a single byte into a `ValueKind`.
    pub fn from_byte(byte: u8) -> WalResult<Self> {
        match byte {
            1 => Ok(Self::Float),
            2 => Ok(Self::Integer),
            3 => Ok(Self::Boolean),
            4 => Ok(Self::Text),
            other => Err(WalError::InvalidValueKind(other)),
        }
    }

    /// Encode this kind as a single byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// The scalar carried by a [`Value`].
///
/// Equality is exact: floats compare by bit pattern, so `NaN` equals an
/// identical `NaN` and `0.0` differs from `-0.0`. No coercion happens between
/// kinds, `Float(1.0)` is never equal to `Integer(1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl FieldValue {
    /// The wire tag for this scalar.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Float(_) => ValueKind::Float,
            Self::Integer(_) => ValueKind::Integer,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Number of bytes the scalar occupies in a write entry payload.
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Self::Float(_) | Self::Integer(_) => 8,
            Self::Boolean(_) => 1,
            Self::Text(text) => 4 + text.len(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single timestamped scalar belonging to one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,

    /// The scalar payload.
    pub field: FieldValue,
}

impl Value {
    /// Build a value from a nanosecond timestamp and any supported scalar.
    ///
    /// ```
    /// use tsm_wal::{FieldValue, Value};
    ///
    /// let v = Value::new(1_000_000_000, 1.1);
    /// assert_eq!(v.field, FieldValue::Float(1.1));
    /// ```
    pub fn new(timestamp: i64, field: impl Into<FieldValue>) -> Self {
        Self {
            timestamp,
            field: field.into(),
        }
    }

    /// The wire tag of the payload.
    pub fn kind(&self) -> ValueKind {
        self.field.kind()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp, self.field)
    }
}
