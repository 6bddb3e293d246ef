/// SQL value model and tuple codec
///
/// Parameters and result rows travel as tuples: a count word, one type tag
/// byte per value padded to the next word boundary, then the value payloads.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{get_string, get_u64, put_string, WireError, WORD};

/// Value type tags on the wire
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;
const TAG_NULL: u8 = 5;

/// A single SQL value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL (tag 5, no payload)
    Null,
    /// 64-bit signed integer (tag 1, one word)
    Integer(i64),
    /// 64-bit float (tag 2, one word)
    Real(f64),
    /// UTF-8 text (tag 3, NUL-terminated padded string)
    Text(String),
    /// Raw bytes (tag 4, length word then padded bytes)
    Blob(Vec<u8>),
}

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Integer(_) => TAG_INTEGER,
            Value::Real(_) => TAG_REAL,
            Value::Text(_) => TAG_TEXT,
            Value::Blob(_) => TAG_BLOB,
            Value::Null => TAG_NULL,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(b as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Blob(b.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Append a value tuple: count word, padded tag bytes, payloads
pub fn encode_tuple(buf: &mut BytesMut, values: &[Value]) {
    buf.put_u64_le(values.len() as u64);

    for value in values {
        buf.put_u8(value.type_tag());
    }
    let trailing = values.len() % WORD;
    if trailing != 0 {
        for _ in 0..WORD - trailing {
            buf.put_u8(0);
        }
    }

    for value in values {
        encode_payload(buf, value);
    }
}

/// Consume a value tuple from a body cursor
pub fn decode_tuple(buf: &mut Bytes) -> Result<Vec<Value>, WireError> {
    let count = get_u64(buf)?;
    // Every value carries at least a tag byte; the bound also keeps the
    // padding arithmetic below inside usize
    if count > buf.remaining() as u64 {
        return Err(WireError::InvalidFormat(
            "tuple count past end of body".to_string(),
        ));
    }
    let count = count as usize;
    let tag_bytes = (count + WORD - 1) / WORD * WORD;
    if buf.len() < tag_bytes {
        return Err(WireError::InvalidFormat(
            "tuple tags truncated".to_string(),
        ));
    }
    let tags = buf.split_to(tag_bytes);

    let mut values = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        values.push(decode_payload(tags[i], buf)?);
    }
    Ok(values)
}

fn encode_payload(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Null => {}
        Value::Integer(n) => buf.put_i64_le(*n),
        Value::Real(x) => buf.put_f64_le(*x),
        Value::Text(s) => put_string(buf, s),
        Value::Blob(b) => {
            buf.put_u64_le(b.len() as u64);
            buf.extend_from_slice(b);
            let trailing = b.len() % WORD;
            if trailing != 0 {
                for _ in 0..WORD - trailing {
                    buf.put_u8(0);
                }
            }
        }
    }
}

fn decode_payload(tag: u8, buf: &mut Bytes) -> Result<Value, WireError> {
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_INTEGER => {
            if buf.remaining() < WORD {
                return Err(WireError::InvalidFormat(
                    "integer payload truncated".to_string(),
                ));
            }
            Ok(Value::Integer(buf.get_i64_le()))
        }
        TAG_REAL => {
            if buf.remaining() < WORD {
                return Err(WireError::InvalidFormat(
                    "real payload truncated".to_string(),
                ));
            }
            Ok(Value::Real(buf.get_f64_le()))
        }
        TAG_TEXT => Ok(Value::Text(get_string(buf)?)),
        TAG_BLOB => {
            let len = get_u64(buf)?;
            if len > buf.remaining() as u64 {
                return Err(WireError::InvalidFormat(
                    "blob length past end of body".to_string(),
                ));
            }
            let len = len as usize;
            let padded = (len + WORD - 1) / WORD * WORD;
            if buf.len() < padded {
                return Err(WireError::InvalidFormat(
                    "blob payload truncated".to_string(),
                ));
            }
            let raw = buf.split_to(padded);
            Ok(Value::Blob(raw[..len].to_vec()))
        }
        other => Err(WireError::UnknownValueTag(other)),
    }
}
