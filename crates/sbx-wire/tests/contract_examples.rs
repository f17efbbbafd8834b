//! Contract tests for the literal wire scenarios in `spec.md` §8.

use sbx_wire::{Frame, Kind, Payload, ProtocolMode, Value, decode_binary, encode};

#[test]
fn s1_subscribe_round_trip() {
    let frame = Frame::subscribe("terminal:123");
    let encoded = encode(ProtocolMode::Binary, &frame).unwrap();
    let sbx_wire::WireMessage::Binary(bytes) = encoded else {
        panic!("binary mode must produce bytes");
    };

    assert_eq!(bytes[0], 0x01);
    assert_eq!(&bytes[1..3], &[0x00, 0x0c]);
    assert_eq!(&bytes[3..15], b"terminal:123");

    let decoded = decode_binary(&bytes).unwrap();
    assert_eq!(decoded.kind, Kind::Subscribe);
    assert_eq!(decoded.channel, "terminal:123");
    assert_eq!(decoded.msg_type, "subscribe");
}

#[test]
fn s2_binary_safe_output() {
    let mut map = sbx_wire::KvMap::new();
    map.insert("output", Value::String("Hello, World!".to_owned()));
    map.insert("encoding", Value::String("raw".to_owned()));

    let frame = Frame::data("terminal:abc", "terminal:output", Payload::Map(map));
    let encoded = encode(ProtocolMode::Binary, &frame).unwrap();
    let sbx_wire::WireMessage::Binary(bytes) = encoded else {
        panic!("binary mode must produce bytes");
    };
    let decoded = decode_binary(&bytes).unwrap();

    let Payload::Map(data) = decoded.payload else {
        panic!("expected structured payload");
    };
    assert_eq!(data.get_str("output"), Some("Hello, World!"));
    assert_eq!(data.get_str("encoding"), Some("raw"));
}

#[test]
fn round_trip_is_lossless_for_every_value_tag_combination() {
    let mut map = sbx_wire::KvMap::new();
    map.insert("s", Value::String("text".to_owned()));
    map.insert("n", Value::Number(-12345.6789));
    map.insert("b_true", Value::Bool(true));
    map.insert("b_false", Value::Bool(false));
    map.insert("bytes", Value::Bytes(vec![0, 1, 2, 253, 254, 255]));

    for kind in [Kind::Data, Kind::Error, Kind::Connected] {
        let frame = Frame::new(kind, "chan", "terminal:output").with_payload(Payload::Map(map.clone()));
        let encoded = match encode(ProtocolMode::Binary, &frame).unwrap() {
            sbx_wire::WireMessage::Binary(b) => b,
            _ => unreachable!(),
        };
        let decoded = decode_binary(&encoded).unwrap();
        assert_eq!(decoded.payload, Payload::Map(map.clone()));
    }
}

#[test]
fn unknown_kind_byte_dispatches_as_data_frame() {
    let frame = Frame::data("chan", "custom:thing", Payload::Text("x".to_owned()));
    let mut bytes = match encode(ProtocolMode::Binary, &frame).unwrap() {
        sbx_wire::WireMessage::Binary(b) => b,
        _ => unreachable!(),
    };
    bytes[0] = 0xaa;
    let decoded = decode_binary(&bytes).unwrap();
    assert!(decoded.kind.dispatches_as_data());
    assert_eq!(decoded.msg_type, "custom:thing");
}
