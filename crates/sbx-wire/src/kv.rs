//! Key-value payload codec.
//!
//! Wire layout (see `spec.md` §6.2):
//! `u16be num_fields`, then per field `u16be key_len, key bytes, u8 tag,
//! u32be value_len, value bytes`. Tag 0x01 string, 0x02 number (f64 BE),
//! 0x03 boolean, 0x04 opaque bytes.

use crate::error::{WireError, WireResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const TAG_STRING: u8 = 0x01;
const TAG_NUMBER: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;

/// A single key-value's value. Numbers are IEEE-754 binary64.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Value::String(_) => TAG_STRING,
            Value::Number(_) => TAG_NUMBER,
            Value::Bool(_) => TAG_BOOL,
            Value::Bytes(_) => TAG_BYTES,
        }
    }
}

/// An ordered key-value map, preserving insertion order of first occurrence.
///
/// Duplicate keys are permitted by the grammar; per `spec.md` §3 this is
/// "last-write-wins on decode" — later occurrences overwrite the value at
/// the key's original position rather than appending a new entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvMap {
    entries: Vec<(String, Value)>,
}

impl KvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(Value::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromIterator<(String, Value)> for KvMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut map = KvMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

pub fn encode(map: &KvMap) -> WireResult<Vec<u8>> {
    let mut out = Vec::new();
    let num_fields = u16::try_from(map.entries.len())
        .map_err(|_| WireError::StringTooLong(map.entries.len()))?;
    out.write_u16::<BigEndian>(num_fields)?;

    for (key, value) in &map.entries {
        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len())
            .map_err(|_| WireError::StringTooLong(key_bytes.len()))?;
        out.write_u16::<BigEndian>(key_len)?;
        out.extend_from_slice(key_bytes);
        out.write_u8(value.tag())?;

        let value_bytes = encode_value(value);
        let value_len = u32::try_from(value_bytes.len())
            .map_err(|_| WireError::PayloadTooLong(value_bytes.len()))?;
        out.write_u32::<BigEndian>(value_len)?;
        out.extend_from_slice(&value_bytes);
    }

    Ok(out)
}

fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Number(n) => n.to_be_bytes().to_vec(),
        Value::Bool(b) => vec![if *b { 0x01 } else { 0x00 }],
        Value::Bytes(b) => b.clone(),
    }
}

pub fn decode(bytes: &[u8]) -> WireResult<KvMap> {
    let mut cursor = Cursor::new(bytes);
    let num_fields = read_u16(&mut cursor)?;
    let mut map = KvMap::new();

    for _ in 0..num_fields {
        let key_len = read_u16(&mut cursor)? as usize;
        let key = read_utf8(&mut cursor, key_len)?;
        let tag = read_u8(&mut cursor)?;
        let value_len = read_u32(&mut cursor)?;
        let value_bytes = read_exact(&mut cursor, value_len as usize)?;

        let value = match tag {
            TAG_STRING => Value::String(
                std::str::from_utf8(&value_bytes)
                    .map_err(WireError::InvalidUtf8)?
                    .to_owned(),
            ),
            TAG_NUMBER => {
                if value_len != 8 {
                    return Err(WireError::BadFixedLength {
                        tag,
                        len: value_len,
                        expected: 8,
                    });
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&value_bytes);
                Value::Number(f64::from_be_bytes(buf))
            }
            TAG_BOOL => {
                if value_len != 1 {
                    return Err(WireError::BadFixedLength {
                        tag,
                        len: value_len,
                        expected: 1,
                    });
                }
                Value::Bool(value_bytes[0] != 0)
            }
            TAG_BYTES => Value::Bytes(value_bytes),
            other => return Err(WireError::UnknownTag(other)),
        };

        map.insert(key, value);
    }

    Ok(map)
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> WireResult<u8> {
    cursor.read_u8().map_err(|_| WireError::Truncated {
        expected: 1,
        found: remaining(cursor),
    })
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> WireResult<u16> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|_| WireError::Truncated {
            expected: 2,
            found: remaining(cursor),
        })
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> WireResult<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| WireError::Truncated {
            expected: 4,
            found: remaining(cursor),
        })
}

fn read_exact(cursor: &mut Cursor<&[u8]>, len: usize) -> WireResult<Vec<u8>> {
    let remaining = remaining(cursor);
    if remaining < len {
        return Err(WireError::Truncated {
            expected: len,
            found: remaining,
        });
    }
    let mut buf = vec![0u8; len];
    std::io::Read::read_exact(cursor, &mut buf).map_err(|_| WireError::Truncated {
        expected: len,
        found: remaining,
    })?;
    Ok(buf)
}

fn read_utf8(cursor: &mut Cursor<&[u8]>, len: usize) -> WireResult<String> {
    let bytes = read_exact(cursor, len)?;
    Ok(std::str::from_utf8(&bytes)
        .map_err(WireError::InvalidUtf8)?
        .to_owned())
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    (cursor.get_ref().len() as u64 - cursor.position()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_value_kinds() {
        let mut map = KvMap::new();
        map.insert("output", Value::String("Hello, World!".to_owned()));
        map.insert("cols", Value::Number(80.0));
        map.insert("ok", Value::Bool(true));
        map.insert("blob", Value::Bytes(vec![0, 1, 2, 255]));

        let encoded = encode(&map).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.get_str("output"), Some("Hello, World!"));
        assert_eq!(decoded.get_number("cols"), Some(80.0));
        assert_eq!(decoded.get_bool("ok"), Some(true));
        assert_eq!(decoded.get_bytes("blob"), Some(&[0, 1, 2, 255][..]));
    }

    #[test]
    fn duplicate_keys_last_write_wins_preserving_position() {
        let mut map = KvMap::new();
        map.insert("a", Value::Number(1.0));
        map.insert("b", Value::Number(2.0));
        map.insert("a", Value::Number(3.0));

        assert_eq!(map.len(), 2);
        let keys: Vec<&str> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.get_number("a"), Some(3.0));
    }

    #[test]
    fn rejects_mismatched_fixed_length_for_number() {
        // num_fields=1, key="n" tag=0x02 len=4 (wrong, should be 8)
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(&[0x00, 0x01]);
        bytes.push(b'n');
        bytes.push(TAG_NUMBER);
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::BadFixedLength { .. }));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(&[0x00, 0x01]);
        bytes.push(b'x');
        bytes.push(0x99);
        bytes.extend_from_slice(&0u32.to_be_bytes());

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::UnknownTag(0x99)));
    }

    #[test]
    fn rejects_truncated_frame() {
        let bytes = vec![0x00, 0x02]; // claims 2 fields, has none
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }
}
