//! Binary frame and key-value payload codec for the sandbox transport
//! protocol, plus a lossless JSON fallback. No I/O lives here — this crate
//! only turns `Frame` values into bytes/text and back.

mod error;
mod frame;
mod json;
mod kv;

pub use error::{WireError, WireResult};
pub use frame::{Frame, Kind, Payload};
pub use kv::{KvMap, Value};

/// Which wire representation a transport is configured to use. Signaled to
/// the server via the `protocol` connection-time query parameter
/// (`spec.md` §4.1, §6.3) — always sent, never omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Binary,
    Json,
}

impl ProtocolMode {
    pub fn as_query_value(self) -> &'static str {
        match self {
            ProtocolMode::Binary => "binary",
            ProtocolMode::Json => "json",
        }
    }
}

/// The bytes (binary mode) or text (JSON mode) ready to hand to the socket.
#[derive(Debug, Clone)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
}

/// Encode a frame per the configured protocol mode.
pub fn encode(mode: ProtocolMode, frame: &Frame) -> WireResult<WireMessage> {
    match mode {
        ProtocolMode::Binary => Ok(WireMessage::Binary(frame::encode(frame)?)),
        ProtocolMode::Json => Ok(WireMessage::Text(json::encode(frame)?)),
    }
}

/// Decode a binary frame (the binary-mode wire representation).
pub fn decode_binary(bytes: &[u8]) -> WireResult<Frame> {
    frame::decode(bytes)
}

/// Decode a JSON-mode frame.
pub fn decode_json(text: &str) -> WireResult<Frame> {
    json::decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_mode_round_trip_via_top_level_api() {
        let frame = Frame::subscribe("terminal:123");
        let encoded = encode(ProtocolMode::Binary, &frame).unwrap();
        let WireMessage::Binary(bytes) = encoded else {
            panic!("expected binary message");
        };
        let decoded = decode_binary(&bytes).unwrap();
        assert_eq!(decoded.channel, "terminal:123");
    }

    #[test]
    fn json_mode_round_trip_via_top_level_api() {
        let frame = Frame::subscribe("terminal:123");
        let encoded = encode(ProtocolMode::Json, &frame).unwrap();
        let WireMessage::Text(text) = encoded else {
            panic!("expected text message");
        };
        let decoded = decode_json(&text).unwrap();
        assert_eq!(decoded.channel, "terminal:123");
    }
}
