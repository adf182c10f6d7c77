//! Values carried by intervals.
//!
//! Encoding (tag byte followed by payload):
//!
//! | Tag | Variant | Payload                              |
//! |-----|---------|--------------------------------------|
//! | 0   | Null    | none                                 |
//! | 1   | Int     | i32                                  |
//! | 2   | Long    | i64                                  |
//! | 3   | Double  | f64                                  |
//! | 4   | String  | u16 length + UTF-8 bytes             |
//! | 5   | Custom  | u8 type id + u16 length + raw bytes  |

use crate::error::{Result, StrataError};
use crate::safebuf::{
    string_size_in_buffer, SafeReader, SafeWriter, LENGTH_PREFIX_SIZE, MAX_STRING_LEN,
};

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_CUSTOM: u8 = 5;

/// State value of an attribute over an interval.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    /// Producer-defined payload, opaque to the engine.
    Custom { type_id: u8, bytes: Vec<u8> },
}

impl Value {
    /// Returns true for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Exact number of bytes `serialize` writes.
    pub fn size_on_disk(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Int(_) => 4,
            Value::Long(_) | Value::Double(_) => 8,
            Value::String(s) => string_size_in_buffer(s),
            Value::Custom { bytes, .. } => 1 + LENGTH_PREFIX_SIZE + bytes.len(),
        }
    }

    /// Fails with `SerializationOverflow` if the payload is too long for its
    /// u16 length prefix, whatever room the destination has.
    pub fn check_encodable(&self) -> Result<()> {
        let len = match self {
            Value::String(s) => s.len(),
            Value::Custom { bytes, .. } => bytes.len(),
            _ => return Ok(()),
        };
        if len > MAX_STRING_LEN {
            return Err(StrataError::SerializationOverflow {
                needed: len,
                available: MAX_STRING_LEN,
            });
        }
        Ok(())
    }

    pub fn serialize(&self, w: &mut SafeWriter<'_>) -> Result<()> {
        match self {
            Value::Null => w.put_u8(TAG_NULL),
            Value::Int(v) => {
                w.put_u8(TAG_INT)?;
                w.put_i32(*v)
            }
            Value::Long(v) => {
                w.put_u8(TAG_LONG)?;
                w.put_i64(*v)
            }
            Value::Double(v) => {
                w.put_u8(TAG_DOUBLE)?;
                w.put_f64(*v)
            }
            Value::String(s) => {
                w.put_u8(TAG_STRING)?;
                w.put_string(s)
            }
            Value::Custom { type_id, bytes } => {
                w.put_u8(TAG_CUSTOM)?;
                w.put_u8(*type_id)?;
                w.put_bytes(bytes)
            }
        }
    }

    pub fn deserialize(r: &mut SafeReader<'_>) -> Result<Self> {
        let tag = r.get_u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INT => Value::Int(r.get_i32()?),
            TAG_LONG => Value::Long(r.get_i64()?),
            TAG_DOUBLE => Value::Double(r.get_f64()?),
            TAG_STRING => Value::String(r.get_string()?),
            TAG_CUSTOM => {
                let type_id = r.get_u8()?;
                let bytes = r.get_bytes()?.to_vec();
                Value::Custom { type_id, bytes }
            }
            other => {
                return Err(StrataError::Internal(format!("unknown value tag {other}")));
            }
        };
        Ok(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Custom { type_id, bytes } => write!(f, "custom<{type_id}>[{} bytes]", bytes.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
