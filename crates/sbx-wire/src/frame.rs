//! Binary frame codec.
//!
//! Wire layout (see `spec.md` §6.1):
//! `[u8 kind][u16be chan_len][chan_bytes][u16be type_len][type_bytes]`
//! `[u32be payload_len][payload_bytes]`.

use crate::error::{WireError, WireResult};
use crate::kv::{self, KvMap};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Message types whose payload is attempted as a key-value map on decode
/// before falling back to raw bytes (`spec.md` §4.1).
const STRUCTURED_MSG_TYPES: &[&str] = &[
    "terminal:input",
    "terminal:resize",
    "terminal:output",
    "file:changed",
    "signal",
    "test",
];

/// Frame kind, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Subscribe,
    Unsubscribe,
    Data,
    Error,
    Connected,
    /// Any byte not in the known set. Per `spec.md` §6.1, unknown kinds
    /// still dispatch as data frames using the `msg_type` string.
    Unknown(u8),
}

impl Kind {
    fn to_byte(self) -> u8 {
        match self {
            Kind::Subscribe => 0x01,
            Kind::Unsubscribe => 0x02,
            Kind::Data => 0x03,
            Kind::Error => 0x04,
            Kind::Connected => 0x05,
            Kind::Unknown(b) => b,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Kind::Subscribe,
            0x02 => Kind::Unsubscribe,
            0x03 => Kind::Data,
            0x04 => Kind::Error,
            0x05 => Kind::Connected,
            other => Kind::Unknown(other),
        }
    }

    /// Whether this kind's frames should be dispatched as data (i.e. routed
    /// by `msg_type`/channel) rather than treated as protocol-level control.
    pub fn dispatches_as_data(self) -> bool {
        matches!(self, Kind::Data | Kind::Unknown(_))
    }
}

/// A decoded/to-be-encoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Map(KvMap),
}

impl Payload {
    fn to_bytes(&self) -> WireResult<Vec<u8>> {
        match self {
            Payload::Empty => Ok(Vec::new()),
            Payload::Text(s) => Ok(s.as_bytes().to_vec()),
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Map(m) => kv::encode(m),
        }
    }
}

/// A single wire message. See `spec.md` §3 "Frame".
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: Kind,
    pub channel: String,
    pub msg_type: String,
    pub payload: Payload,
}

impl Frame {
    pub fn new(kind: Kind, channel: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Frame {
            kind,
            channel: channel.into(),
            msg_type: msg_type.into(),
            payload: Payload::Empty,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        Frame::new(Kind::Subscribe, channel, "subscribe")
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Frame::new(Kind::Unsubscribe, channel, "unsubscribe")
    }

    pub fn data(channel: impl Into<String>, msg_type: impl Into<String>, payload: Payload) -> Self {
        Frame::new(Kind::Data, channel, msg_type).with_payload(payload)
    }
}

pub fn encode(frame: &Frame) -> WireResult<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u8(frame.kind.to_byte())?;

    let chan_bytes = frame.channel.as_bytes();
    let chan_len = u16::try_from(chan_bytes.len())
        .map_err(|_| WireError::StringTooLong(chan_bytes.len()))?;
    out.write_u16::<BigEndian>(chan_len)?;
    out.extend_from_slice(chan_bytes);

    let type_bytes = frame.msg_type.as_bytes();
    let type_len = u16::try_from(type_bytes.len())
        .map_err(|_| WireError::StringTooLong(type_bytes.len()))?;
    out.write_u16::<BigEndian>(type_len)?;
    out.extend_from_slice(type_bytes);

    let payload_bytes = frame.payload.to_bytes()?;
    let payload_len = u32::try_from(payload_bytes.len())
        .map_err(|_| WireError::PayloadTooLong(payload_bytes.len()))?;
    out.write_u32::<BigEndian>(payload_len)?;
    out.extend_from_slice(&payload_bytes);

    Ok(out)
}

pub fn decode(bytes: &[u8]) -> WireResult<Frame> {
    let mut cursor = Cursor::new(bytes);

    let kind_byte = cursor.read_u8().map_err(|_| WireError::Truncated {
        expected: 1,
        found: remaining(&cursor),
    })?;
    let kind = Kind::from_byte(kind_byte);

    let chan_len = read_u16(&mut cursor)?;
    let channel = read_utf8(&mut cursor, chan_len as usize)?;

    let type_len = read_u16(&mut cursor)?;
    let msg_type = read_utf8(&mut cursor, type_len as usize)?;

    let payload_len = read_u32(&mut cursor)?;
    let payload_bytes = read_exact(&mut cursor, payload_len as usize)?;

    let payload = resolve_payload(&msg_type, payload_bytes);

    Ok(Frame {
        kind,
        channel,
        msg_type,
        payload,
    })
}

/// Resolve raw payload bytes into a typed `Payload` per `spec.md` §4.1:
/// empty stays empty; for message types known to carry structured data,
/// attempt key-value decoding and fall back to raw bytes on failure; other
/// types are left as raw bytes for upstream interpretation.
fn resolve_payload(msg_type: &str, bytes: Vec<u8>) -> Payload {
    if bytes.is_empty() {
        return Payload::Empty;
    }
    if STRUCTURED_MSG_TYPES.contains(&msg_type) {
        match kv::decode(&bytes) {
            Ok(map) => return Payload::Map(map),
            Err(_) => return Payload::Bytes(bytes),
        }
    }
    Payload::Bytes(bytes)
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
    let avail = remaining(cursor);
    if avail < len {
        return Err(WireError::Truncated {
            expected: len,
            found: avail,
        });
    }
    let mut buf = vec![0u8; len];
    std::io::Read::read_exact(cursor, &mut buf).map_err(|_| WireError::Truncated {
        expected: len,
        found: avail,
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
    use crate::kv::Value;

    #[test]
    fn subscribe_frame_matches_s1() {
        let frame = Frame::subscribe("terminal:123");
        let encoded = encode(&frame).unwrap();

        assert_eq!(encoded[0], 0x01);
        assert_eq!(&encoded[1..3], &[0x00, 0x0c]);
        assert_eq!(&encoded[3..15], b"terminal:123");
    }

    #[test]
    fn round_trip_terminal_output_s2() {
        let mut map = KvMap::new();
        map.insert("output", Value::String("Hello, World!".to_owned()));
        map.insert("encoding", Value::String("raw".to_owned()));

        let frame = Frame::data("terminal:abc", "terminal:output", Payload::Map(map));
        let encoded = encode(&frame).unwrap();
        let decoded = decode(&encoded).unwrap();

        match decoded.payload {
            Payload::Map(m) => {
                assert_eq!(m.get_str("output"), Some("Hello, World!"));
                assert_eq!(m.get_str("encoding"), Some("raw"));
            }
            other => panic!("expected Map payload, got {:?}", other),
        }
    }

    #[test]
    fn round_trip_terminal_resize_numeric_fields_s3() {
        let mut map = KvMap::new();
        map.insert("terminal_id", Value::String("term_xyz".to_owned()));
        map.insert("cols", Value::Number(80.0));
        map.insert("rows", Value::Number(24.0));

        let frame = Frame::data("terminal:xyz", "terminal:resize", Payload::Map(map.clone()));
        let decoded = decode(&encode(&frame).unwrap()).unwrap();

        assert_eq!(decoded.payload, Payload::Map(map));
    }

    #[test]
    fn unknown_kind_still_dispatches_as_data() {
        let mut bytes = encode(&Frame::data("c", "custom:event", Payload::Empty)).unwrap();
        bytes[0] = 0x7f;
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.kind.dispatches_as_data());
        assert_eq!(decoded.msg_type, "custom:event");
    }

    #[test]
    fn size_binary_smaller_than_json_for_large_ascii_output() {
        let text: String = "a".repeat(256);
        let mut map = KvMap::new();
        map.insert("output", Value::String(text.clone()));
        let frame = Frame::data("terminal:abc", "terminal:output", Payload::Map(map));
        let binary = encode(&frame).unwrap();

        let json_equiv = serde_json::json!({
            "type": "terminal:output",
            "channel": "terminal:abc",
            "data": { "output": text },
        });
        let json_bytes = serde_json::to_vec(&json_equiv).unwrap();

        assert!(binary.len() < json_bytes.len());
    }

    #[test]
    fn unstructured_msg_type_stays_raw_bytes() {
        let frame = Frame::data("c", "some:blob", Payload::Bytes(vec![1, 2, 3]));
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn malformed_structured_payload_falls_back_to_raw_bytes() {
        // "terminal:output" is structured, but payload bytes are not a
        // valid key-value map (claims 5 fields, has none).
        let frame = Frame {
            kind: Kind::Data,
            channel: "c".to_owned(),
            msg_type: "terminal:output".to_owned(),
            payload: Payload::Bytes(vec![0x00, 0x05]),
        };
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::Bytes(vec![0x00, 0x05]));
    }
}
