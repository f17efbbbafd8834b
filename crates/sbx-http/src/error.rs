use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::HttpClient::request`]. One variant per
/// failure source, mirroring the teacher's `fetch_server_streams`/
/// `control_api.rs` error-surfacing idiom but kept as a typed enum instead
/// of `String` so callers can match on it.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("({status}): {message}")]
    Status { status: u16, message: String },

    #[error(
        "({status}): {message} (this endpoint requires an access token; a session token was used)"
    )]
    InsufficientScope { status: u16, message: String },

    #[error("invalid base URL or path: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response body was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HttpResult<T> = Result<T, HttpError>;
