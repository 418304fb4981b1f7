// *****************************************************************************
// Modbus polling client library
// Copyright (c) 2021 by the authors, see LICENSE
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// Module authors:
//   Georg Brandl <g.brandl@fz-juelich.de>
//
// *****************************************************************************

//! Conversion between typed values and 16-bit register words.
//!
//! Multi-word values are stored least significant word first unless the
//! word order says otherwise.  Two independent swaps exist: the two words
//! inside each 32-bit group, and the two 32-bit groups inside a 64-bit value.
//! Strings are stored two characters per word, padded with NUL.

use std::convert::TryFrom;
use std::fmt;

use crate::{Error, Result};

/// The scalar kinds a data item can have on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// ASCII string with a fixed length in bytes.
    Str(usize),
}

impl Kind {
    /// Number of registers a value of this kind occupies.
    pub fn word_count(self) -> usize {
        match self {
            Kind::Bool | Kind::I16 | Kind::U16 => 1,
            Kind::I32 | Kind::U32 | Kind::F32 => 2,
            Kind::I64 | Kind::U64 | Kind::F64 => 4,
            Kind::Str(len) => (len + 1) / 2,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Kind::I16 | Kind::U16 | Kind::I32 | Kind::U32 | Kind::I64 | Kind::U64)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Bool(b) => b as u8 as f64,
            Value::I16(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::Str(_) => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(_) => None,
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    /// Exact integer view, for integer values only.
    fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Value::Bool(b) => b as i128,
            Value::I16(v) => v as i128,
            Value::U16(v) => v as i128,
            Value::I32(v) => v as i128,
            Value::U32(v) => v as i128,
            Value::I64(v) => v as i128,
            Value::U64(v) => v as i128,
            _ => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
        }
    }
}

/// Register layout conventions for multi-word values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordOrder {
    /// Most significant word first inside each 32-bit group.
    pub swap_word: bool,
    /// Most significant 32-bit group first inside 64-bit values.
    pub swap_dword: bool,
    /// First character in the high byte of each string register.
    pub swap_bytes: bool,
}

impl Default for WordOrder {
    fn default() -> Self {
        Self { swap_word: false, swap_dword: false, swap_bytes: true }
    }
}

impl WordOrder {
    /// Maps a register position to the index of the word (LSW = 0) stored there.
    ///
    /// The mapping is its own inverse, so it serves both directions.
    fn slot(&self, pos: usize, count: usize) -> usize {
        let mut idx = pos;
        if self.swap_word && count >= 2 {
            idx ^= 1;
        }
        if self.swap_dword && count >= 4 {
            idx ^= 2;
        }
        idx
    }

    fn spread(&self, bits: u64, count: usize) -> Vec<u16> {
        (0..count).map(|pos| (bits >> (16 * self.slot(pos, count))) as u16).collect()
    }

    fn gather(&self, words: &[u16]) -> u64 {
        let count = words.len();
        words.iter().enumerate()
             .fold(0, |acc, (pos, &w)| acc | (w as u64) << (16 * self.slot(pos, count)))
    }
}

/// Decodes the value of `kind` starting at `words[offset]`.
///
/// Numeric values are multiplied by `scale`; for integer kinds a scale other
/// than 1 produces a `Value::F64`.
pub fn decode(words: &[u16], offset: usize, kind: Kind, scale: f64, order: WordOrder) -> Result<Value> {
    let count = kind.word_count();
    let words = words.get(offset..offset + count).ok_or_else(|| Error::InvalidValue(
        format!("{} registers needed at offset {}, got {}", count, offset, words.len())))?;
    let bits = match kind {
        Kind::Str(_) => 0,
        _ => order.gather(words),
    };
    let scaled = |raw: f64| if scale == 1.0 { None } else { Some(Value::F64(raw * scale)) };

    Ok(match kind {
        Kind::Bool => Value::Bool(words[0] != 0),
        Kind::I16 => scaled(bits as u16 as i16 as f64).unwrap_or(Value::I16(bits as u16 as i16)),
        Kind::U16 => scaled(bits as u16 as f64).unwrap_or(Value::U16(bits as u16)),
        Kind::I32 => scaled(bits as u32 as i32 as f64).unwrap_or(Value::I32(bits as u32 as i32)),
        Kind::U32 => scaled(bits as u32 as f64).unwrap_or(Value::U32(bits as u32)),
        Kind::I64 => scaled(bits as i64 as f64).unwrap_or(Value::I64(bits as i64)),
        Kind::U64 => scaled(bits as f64).unwrap_or(Value::U64(bits)),
        Kind::F32 => {
            let raw = f32::from_bits(bits as u32);
            if scale == 1.0 { Value::F32(raw) } else { Value::F32((raw as f64 * scale) as f32) }
        }
        Kind::F64 => Value::F64(f64::from_bits(bits) * scale),
        Kind::Str(_) => Value::Str(decode_str(words, order.swap_bytes)),
    })
}

/// Encodes `value` as `kind`, dividing numeric values by `scale` first.
pub fn encode(value: &Value, kind: Kind, scale: f64, order: WordOrder) -> Result<Vec<u16>> {
    let count = kind.word_count();
    let bits = match kind {
        Kind::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch(value, kind))?;
            b as u64
        }
        Kind::I16 => to_int::<i16>(value, kind, scale)? as u16 as u64,
        Kind::U16 => to_int::<u16>(value, kind, scale)? as u64,
        Kind::I32 => to_int::<i32>(value, kind, scale)? as u32 as u64,
        Kind::U32 => to_int::<u32>(value, kind, scale)? as u64,
        Kind::I64 => to_int::<i64>(value, kind, scale)? as u64,
        Kind::U64 => to_int::<u64>(value, kind, scale)?,
        Kind::F32 => {
            let v = match value {
                Value::F32(v) if scale == 1.0 => *v,
                other => (other.as_f64().ok_or_else(|| mismatch(value, kind))? / scale) as f32,
            };
            v.to_bits() as u64
        }
        Kind::F64 => {
            let v = value.as_f64().ok_or_else(|| mismatch(value, kind))?;
            (v / scale).to_bits()
        }
        Kind::Str(len) => match value {
            Value::Str(s) => return Ok(encode_str(s, len, order.swap_bytes)),
            _ => return Err(mismatch(value, kind)),
        },
    };
    Ok(order.spread(bits, count))
}

fn mismatch(value: &Value, kind: Kind) -> Error {
    Error::InvalidValue(format!("{} cannot be stored as {:?}", value, kind))
}

fn to_int<T: TryFrom<i128>>(value: &Value, kind: Kind, scale: f64) -> Result<T> {
    let out_of_range = || Error::InvalidValue(format!("{} out of range for {:?}", value, kind));
    let wide = match value.as_i128() {
        Some(v) if scale == 1.0 => v,
        _ => {
            let v = value.as_f64().ok_or_else(|| mismatch(value, kind))? / scale;
            if !v.is_finite() {
                return Err(out_of_range());
            }
            v.round() as i128
        }
    };
    T::try_from(wide).map_err(|_| out_of_range())
}

fn encode_str(s: &str, len: usize, swap_bytes: bool) -> Vec<u16> {
    let mut bytes: Vec<u8> = s.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }).collect();
    bytes.truncate(len);
    bytes.resize(2 * Kind::Str(len).word_count(), 0);
    bytes.chunks(2).map(|pair| if swap_bytes {
        (pair[0] as u16) << 8 | pair[1] as u16
    } else {
        pair[0] as u16 | (pair[1] as u16) << 8
    }).collect()
}

fn decode_str(words: &[u16], swap_bytes: bool) -> String {
    let mut bytes = Vec::with_capacity(2 * words.len());
    for &w in words {
        let (first, second) = if swap_bytes { ((w >> 8) as u8, w as u8) } else { (w as u8, (w >> 8) as u8) };
        bytes.push(first);
        bytes.push(second);
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes.into_iter().map(|b| if b.is_ascii() { b as char } else { '?' }).collect()
}
