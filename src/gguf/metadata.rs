// GGUF key-value metadata: typed values, value-type tags, ordered map.

use std::collections::HashMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::cursor::ByteCursor;
use super::ParseOptions;
use crate::error::GgufError;

// ---------------------------------------------------------------------------
// GgufValue: typed metadata values
// ---------------------------------------------------------------------------

/// A typed value from a GGUF key-value pair.
///
/// GGUF supports 13 value types (IDs 0..12). Arrays contain homogeneous
/// elements stored as a nested `Vec<GgufValue>` (the inner values will all
/// be the same variant). Arrays of arrays are allowed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
}

impl GgufValue {
    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "U8",
            Self::I8(_) => "I8",
            Self::U16(_) => "U16",
            Self::I16(_) => "I16",
            Self::U32(_) => "U32",
            Self::I32(_) => "I32",
            Self::U64(_) => "U64",
            Self::I64(_) => "I64",
            Self::F32(_) => "F32",
            Self::F64(_) => "F64",
            Self::Bool(_) => "Bool",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            Self::Array(arr) => Some(arr.as_slice()),
            _ => None,
        }
    }

    /// Any unsigned or non-negative signed integer, widened to u64.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v as u64),
            Self::U16(v) => Some(v as u64),
            Self::U32(v) => Some(v as u64),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for GgufValue {
    /// Arrays longer than 8 elements are elided.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{}", v),
            Self::I8(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Array(arr) => {
                const SHOWN: usize = 8;
                write!(f, "[")?;
                for (i, item) in arr.iter().take(SHOWN).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if arr.len() > SHOWN {
                    write!(f, ", ... ({} items)", arr.len())?;
                }
                write!(f, "]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// GgufValueType: KV value type IDs
// ---------------------------------------------------------------------------

/// GGUF KV value type IDs (matches gguf_type enum in gguf.h).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GgufValueType {
    Uint8 = 0,
    Int8 = 1,
    Uint16 = 2,
    Int16 = 3,
    Uint32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    Uint64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl GgufValueType {
    pub fn from_u32(v: u32) -> Result<Self, GgufError> {
        match v {
            0 => Ok(Self::Uint8),
            1 => Ok(Self::Int8),
            2 => Ok(Self::Uint16),
            3 => Ok(Self::Int16),
            4 => Ok(Self::Uint32),
            5 => Ok(Self::Int32),
            6 => Ok(Self::Float32),
            7 => Ok(Self::Bool),
            8 => Ok(Self::String),
            9 => Ok(Self::Array),
            10 => Ok(Self::Uint64),
            11 => Ok(Self::Int64),
            12 => Ok(Self::Float64),
            _ => Err(GgufError::UnknownValueType(v)),
        }
    }

    /// Fewest bytes one value of this type can occupy on the wire.
    ///
    /// Strings are at least their u64 length prefix; arrays at least their
    /// element tag and count.
    pub fn min_encoded_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 | Self::Bool => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 | Self::String => 8,
            Self::Array => 4 + 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata: insertion-ordered map
// ---------------------------------------------------------------------------

/// Insertion-ordered key-value map.
///
/// Re-inserting an existing key replaces its value in place, so iteration
/// order is the order in which keys were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, GgufValue)>,
    index: HashMap<String, usize>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert or overwrite. Returns the previous value for `key`, if any.
    pub fn insert(&mut self, key: String, value: GgufValue) -> Option<GgufValue> {
        if let Some(&i) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[i].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GgufValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Wire reader
// ---------------------------------------------------------------------------

/// Read one KV entry: key string, u32 value-type tag, value.
pub(crate) fn read_entry(
    cur: &mut ByteCursor<'_>,
    opts: &ParseOptions,
) -> Result<(String, GgufValue), GgufError> {
    let key = cur.read_string_capped(opts.max_string_len)?;
    let vtype = GgufValueType::from_u32(cur.read_u32()?)?;
    let value = read_value(cur, vtype, opts, 0)?;
    Ok((key, value))
}

/// Read a single value of the given type.
///
/// Arrays recurse once per nesting level; `depth` counts the levels entered
/// so far and is capped by `opts.max_array_depth`.
pub(crate) fn read_value(
    cur: &mut ByteCursor<'_>,
    vtype: GgufValueType,
    opts: &ParseOptions,
    depth: usize,
) -> Result<GgufValue, GgufError> {
    match vtype {
        GgufValueType::Uint8 => Ok(GgufValue::U8(cur.read_u8()?)),
        GgufValueType::Int8 => Ok(GgufValue::I8(cur.read_i8()?)),
        GgufValueType::Uint16 => Ok(GgufValue::U16(cur.read_u16()?)),
        GgufValueType::Int16 => Ok(GgufValue::I16(cur.read_i16()?)),
        GgufValueType::Uint32 => Ok(GgufValue::U32(cur.read_u32()?)),
        GgufValueType::Int32 => Ok(GgufValue::I32(cur.read_i32()?)),
        GgufValueType::Float32 => Ok(GgufValue::F32(cur.read_f32()?)),
        GgufValueType::Bool => Ok(GgufValue::Bool(cur.read_bool()?)),
        GgufValueType::String => Ok(GgufValue::String(
            cur.read_string_capped(opts.max_string_len)?,
        )),
        GgufValueType::Uint64 => Ok(GgufValue::U64(cur.read_u64()?)),
        GgufValueType::Int64 => Ok(GgufValue::I64(cur.read_i64()?)),
        GgufValueType::Float64 => Ok(GgufValue::F64(cur.read_f64()?)),
        GgufValueType::Array => {
            if depth >= opts.max_array_depth {
                return Err(GgufError::Malformed(format!(
                    "arrays nested deeper than {} levels",
                    opts.max_array_depth
                )));
            }
            let elem_type = GgufValueType::from_u32(cur.read_u32()?)?;
            let count = cur.read_u64()?;
            if count > opts.max_array_len {
                return Err(GgufError::OversizedArray {
                    len: count,
                    max: opts.max_array_len,
                });
            }
            // Reject counts the remaining bytes cannot hold before allocating.
            let needed = (count as usize).saturating_mul(elem_type.min_encoded_size());
            if needed > cur.remaining() {
                return Err(GgufError::OutOfBounds {
                    offset: cur.position(),
                    needed,
                    len: cur.len(),
                });
            }

            let mut elements = Vec::with_capacity(count as usize);
            for _ in 0..count {
                elements.push(read_value(cur, elem_type, opts, depth + 1)?);
            }
            Ok(GgufValue::Array(elements))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
