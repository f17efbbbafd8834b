//! JSON fallback frame representation.
//!
//! Serializes each frame as `{type, channel, data}`. `type` is the literal
//! `subscribe`/`unsubscribe` for control frames, otherwise the frame's
//! `msg_type`. Chosen per transport via the `protocol=json` query parameter
//! (`spec.md` §4.1, §6.3); this mode round-trips the same semantics as the
//! binary format at higher cost (no inline raw-bytes value, everything is
//! text or base64 inside `data`).

use crate::error::{WireError, WireResult};
use crate::frame::{Frame, Kind, Payload};
use crate::kv::{KvMap, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value as Json};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct JsonFrame {
    #[serde(rename = "type")]
    msg_type: String,
    channel: String,
    #[serde(default)]
    data: Option<Json>,
}

pub fn encode(frame: &Frame) -> WireResult<String> {
    let msg_type = match frame.kind {
        Kind::Subscribe => "subscribe".to_owned(),
        Kind::Unsubscribe => "unsubscribe".to_owned(),
        _ => frame.msg_type.clone(),
    };

    let data = match &frame.payload {
        Payload::Empty => None,
        Payload::Text(s) => Some(Json::String(s.clone())),
        Payload::Bytes(b) => Some(Json::String(base64_standard_encode(b))),
        Payload::Map(m) => Some(kv_map_to_json(m)),
    };

    let json_frame = JsonFrame {
        msg_type,
        channel: frame.channel.clone(),
        data,
    };

    Ok(serde_json::to_string(&json_frame)?)
}

pub fn decode(text: &str) -> WireResult<Frame> {
    let json_frame: JsonFrame = serde_json::from_str(text)?;

    let kind = match json_frame.msg_type.as_str() {
        "subscribe" => Kind::Subscribe,
        "unsubscribe" => Kind::Unsubscribe,
        _ => Kind::Data,
    };

    let payload = match json_frame.data {
        None => Payload::Empty,
        Some(Json::String(s)) => Payload::Text(s),
        Some(Json::Object(map)) => Payload::Map(json_to_kv_map(map)?),
        Some(other) => Payload::Text(other.to_string()),
    };

    Ok(Frame {
        kind,
        channel: json_frame.channel,
        msg_type: json_frame.msg_type,
        payload,
    })
}

fn kv_map_to_json(map: &KvMap) -> Json {
    let mut obj = Map::new();
    for (key, value) in map.iter() {
        let json_value = match value {
            Value::String(s) => Json::String(s.clone()),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Bytes(b) => Json::String(base64_standard_encode(b)),
        };
        obj.insert(key.clone(), json_value);
    }
    Json::Object(obj)
}

fn json_to_kv_map(obj: Map<String, Json>) -> WireResult<KvMap> {
    let mut map = KvMap::new();
    for (key, value) in obj {
        let kv_value = match value {
            Json::String(s) => Value::String(s),
            Json::Number(n) => Value::Number(n.as_f64().ok_or(WireError::UnknownTag(0x02))?),
            Json::Bool(b) => Value::Bool(b),
            Json::Null => Value::String(String::new()),
            other => Value::String(other.to_string()),
        };
        map.insert(key, kv_value);
    }
    Ok(map)
}

fn base64_standard_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Value;

    #[test]
    fn subscribe_frame_serializes_with_literal_type() {
        let frame = Frame::subscribe("terminal:123");
        let json = encode(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["channel"], "terminal:123");
    }

    #[test]
    fn data_frame_round_trips_structured_payload() {
        let mut map = KvMap::new();
        map.insert("output", Value::String("hi".to_owned()));
        map.insert("cols", Value::Number(80.0));
        let frame = Frame::data("terminal:abc", "terminal:output", Payload::Map(map));

        let json = encode(&frame).unwrap();
        let decoded = decode(&json).unwrap();

        match decoded.payload {
            Payload::Map(m) => {
                assert_eq!(m.get_str("output"), Some("hi"));
                assert_eq!(m.get_number("cols"), Some(80.0));
            }
            other => panic!("expected Map, got {:?}", other),
        }
    }
}
