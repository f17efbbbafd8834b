//! Single authenticated JSON request/response entry point (`spec.md` §4.4).
//!
//! Grounded on the teacher's `services/receiver/src/control_api.rs`
//! `fetch_server_streams`: a `reqwest::Client` built once with a fixed
//! timeout, `.bearer_auth(...)` when a token is present, and status-code
//! branching into a typed error. Unlike the teacher (which formats errors
//! as `String`), this client is a reusable library surface, so errors are
//! carried as a `HttpError` enum.

use crate::error::{HttpError, HttpResult};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> HttpResult<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpClient {
            base_url,
            token: None,
            client,
            timeout,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Issue a request and deserialize a JSON response body into `T`.
    /// Returns `Ok(None)` on HTTP 204. `body`, when present, is sent as the
    /// JSON request body and sets `Content-Type: application/json`; when
    /// absent, no body or content-type header is sent.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + Sync)>,
    ) -> HttpResult<Option<T>> {
        let url = self.base_url.join(path)?;
        debug!(%method, %url, "sending request");
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(self.timeout)
            } else {
                HttpError::Transport(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.status_error(path, status, response.text().await.ok()).await);
        }

        let text = response.text().await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn status_error(&self, path: &str, status: StatusCode, body: Option<String>) -> HttpError {
        let message = body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Json>(b).ok())
            .and_then(|v| v.get("error").and_then(Json::as_str).map(str::to_owned))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_owned()
            });

        if status == StatusCode::FORBIDDEN && path.starts_with("/auth/") {
            HttpError::InsufficientScope {
                status: status.as_u16(),
                message,
            }
        } else {
            HttpError::Status {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        ok: bool,
    }

    #[tokio::test]
    async fn attaches_bearer_token_and_deserializes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .and(header("authorization", "Bearer sekret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), Duration::from_secs(3))
            .unwrap()
            .with_token("sekret");
        let result: Option<Echo> = client
            .request(Method::GET, "/api/v1/status", None::<&()>)
            .await
            .unwrap();
        assert_eq!(result, Some(Echo { ok: true }));
    }

    #[tokio::test]
    async fn no_content_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/sandboxes/abc"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), Duration::from_secs(3)).unwrap();
        let result: Option<Json> = client
            .request(Method::DELETE, "/api/v1/sandboxes/abc", None::<&()>)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn non_2xx_parses_error_field_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad request"})))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), Duration::from_secs(3)).unwrap();
        let err = client
            .request::<Json>(Method::GET, "/api/v1/status", None::<&()>)
            .await
            .unwrap_err();
        match err {
            HttpError::Status { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_on_auth_path_gets_the_insufficient_scope_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/session_tokens"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), Duration::from_secs(3)).unwrap();
        let err = client
            .request::<Json>(Method::GET, "/auth/session_tokens", None::<&()>)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InsufficientScope { status: 403, .. }));
    }
}
