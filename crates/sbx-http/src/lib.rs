//! Authenticated JSON request/response layer shared by every HTTP-backed
//! surface of the sandbox client SDK (auth, sandbox lifecycle, channel
//! teardown).

mod client;
mod error;

pub use client::HttpClient;
pub use error::{HttpError, HttpResult};
pub use reqwest::Method;
