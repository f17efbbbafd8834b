//! Sandbox lifecycle control and preview-URL derivation (`spec.md` §4.10,
//! §4.5, §6.4). Thin HTTP calls generalized from the teacher's
//! `control_api.rs` pattern; `preview_url` is a pure string function with a
//! unit test table, in the style of `crates/ipico-core/src/read.rs`'s
//! parser unit tests.

use sbx_http::HttpClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub subdomain: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateSandboxRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

pub struct SandboxesClient {
    http: HttpClient,
}

impl SandboxesClient {
    pub(crate) fn new(http: HttpClient) -> Self {
        SandboxesClient { http }
    }

    pub async fn create(&self, request: CreateSandboxRequest) -> SandboxResult<Sandbox> {
        Ok(self
            .http
            .request(sbx_http::Method::POST, "/sandboxes", Some(&request))
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    pub async fn list(&self) -> SandboxResult<Vec<Sandbox>> {
        Ok(self
            .http
            .request(sbx_http::Method::GET, "/sandboxes", None::<&()>)
            .await?
            .unwrap_or_default())
    }

    pub async fn get(&self, subdomain: &str) -> SandboxResult<Option<Sandbox>> {
        Ok(self
            .http
            .request(
                sbx_http::Method::GET,
                &format!("/sandboxes/{subdomain}"),
                None::<&()>,
            )
            .await?)
    }

    pub async fn delete(&self, subdomain: &str, delete_files: bool) -> SandboxResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::DELETE,
                &format!("/sandboxes/{subdomain}?delete_files={delete_files}"),
                None::<&()>,
            )
            .await?;
        Ok(())
    }
}

/// Derives a port-preview URL: `<first-label>-<port>.<preview_base>`
/// (`spec.md` §4.5, §8 S5). `host` is the sandbox's own hostname (e.g.
/// `abc.sandbox.example.com`); only its first label is used.
pub fn preview_url(host: &str, port: u16, preview_base: &str) -> String {
    let first_label = host.split('.').next().unwrap_or(host);
    format!("https://{first_label}-{port}.{preview_base}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_preview_url_per_s5() {
        assert_eq!(
            preview_url("abc.sandbox.example.com", 3000, "preview.example.com"),
            "https://abc-3000.preview.example.com"
        );
    }

    #[test]
    fn uses_only_the_first_label_of_a_multi_part_host() {
        assert_eq!(
            preview_url("sbx123.region.provider.example.com", 8080, "preview.example.com"),
            "https://sbx123-8080.preview.example.com"
        );
    }

    #[test]
    fn a_bare_host_with_no_dots_is_its_own_first_label() {
        assert_eq!(
            preview_url("localhost", 5173, "preview.example.com"),
            "https://localhost-5173.preview.example.com"
        );
    }

    #[tokio::test]
    async fn creates_lists_and_deletes_a_sandbox() {
        use serde_json::json;
        use std::time::Duration;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subdomain": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sandboxes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"subdomain": "abc"}])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/sandboxes/abc"))
            .and(query_param("delete_files", "true"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = SandboxesClient::new(HttpClient::new(server.uri(), Duration::from_secs(3)).unwrap());

        let created = client.create(CreateSandboxRequest::default()).await.unwrap();
        assert_eq!(created.subdomain, "abc");

        let listed = client.list().await.unwrap();
        assert_eq!(listed.len(), 1);

        client.delete("abc", true).await.unwrap();
    }
}
