use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
///
/// On the inbound path these are downgraded to a logged warning by the
/// transport and the offending frame is dropped; on the outbound path they
/// are a caller bug and should propagate.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame truncated: expected at least {expected} more byte(s), found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("unknown key-value tag byte: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("value length {len} does not match fixed size {expected} for tag 0x{tag:02x}")]
    BadFixedLength { tag: u8, len: u32, expected: u32 },

    #[error("channel/type string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("channel or msg_type exceeds u16 length (max 65535 bytes): {0} bytes")]
    StringTooLong(usize),

    #[error("payload exceeds u32 length (max 4294967295 bytes): {0} bytes")]
    PayloadTooLong(usize),

    #[error("JSON fallback error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error while encoding: {0}")]
    Io(#[from] std::io::Error),
}

pub type WireResult<T> = Result<T, WireError>;
