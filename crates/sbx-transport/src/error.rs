use thiserror::Error;

/// Errors surfaced by the transport. Mirrors the `SessionError` shape in
/// the teacher's `services/receiver/src/session.rs`: one variant per
/// failure source, `#[from]` where a lower layer's error is wrapped as-is.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("frame codec: {0}")]
    Codec(#[from] sbx_wire::WireError),

    #[error("no websocket constructor configured")]
    MissingConstructor,

    #[error("reconnect attempts exhausted ({attempts} attempt(s))")]
    ReconnectExhausted { attempts: u32 },

    #[error("transport actor is gone")]
    ActorGone,
}

pub type TransportResult<T> = Result<T, TransportError>;
