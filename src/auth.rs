//! Auth control surface (`spec.md` §4.10, §6.4): session-token
//! issuance/listing/retrieval/revocation and magic-link creation. Every
//! operation is a thin HTTP call carrying no channel/transport state,
//! grounded on the teacher's `services/receiver/src/control_api.rs`
//! sequential `reqwest` calls with `bearer_auth` and typed JSON response
//! structs.

use sbx_http::HttpClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateSessionTokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

/// A one-time URL that mints a session token and sets a cookie on first
/// visit, expiring on first use or after 5 minutes (`spec.md` §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagicLink {
    pub url: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    pub provider: String,
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Thin wrapper over the `/auth/*` HTTP surface. Every method but
/// [`Self::status`]/[`Self::info`] requires the access token configured on
/// the underlying [`HttpClient`] (`spec.md` §6.4); a session token instead
/// yields a 403 with the `/auth/` insufficient-scope hint from
/// [`sbx_http::HttpError::InsufficientScope`].
pub struct AuthClient {
    http: HttpClient,
}

impl AuthClient {
    pub(crate) fn new(http: HttpClient) -> Self {
        AuthClient { http }
    }

    pub async fn create_session_token(
        &self,
        request: CreateSessionTokenRequest,
    ) -> AuthResult<SessionToken> {
        Ok(self
            .http
            .request(sbx_http::Method::POST, "/auth/session_tokens", Some(&request))
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    pub async fn list_session_tokens(&self) -> AuthResult<Vec<SessionToken>> {
        Ok(self
            .http
            .request(sbx_http::Method::GET, "/auth/session_tokens", None::<&()>)
            .await?
            .unwrap_or_default())
    }

    pub async fn get_session_token(&self, id: &str) -> AuthResult<Option<SessionToken>> {
        Ok(self
            .http
            .request(
                sbx_http::Method::GET,
                &format!("/auth/session_tokens/{id}"),
                None::<&()>,
            )
            .await?)
    }

    pub async fn revoke_session_token(&self, id: &str) -> AuthResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::DELETE,
                &format!("/auth/session_tokens/{id}"),
                None::<&()>,
            )
            .await?;
        Ok(())
    }

    pub async fn create_magic_link(&self) -> AuthResult<MagicLink> {
        Ok(self
            .http
            .request(sbx_http::Method::POST, "/auth/magic-links", None::<&()>)
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    /// Unauthenticated (`spec.md` §4.10).
    pub async fn status(&self) -> AuthResult<AuthStatus> {
        Ok(self
            .http
            .request(sbx_http::Method::GET, "/auth/status", None::<&()>)
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    /// Unauthenticated (`spec.md` §4.10).
    pub async fn info(&self) -> AuthResult<AuthInfo> {
        Ok(self
            .http
            .request(sbx_http::Method::GET, "/auth/info", None::<&()>)
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }
}
