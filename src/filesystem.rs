//! Filesystem facade (`spec.md` §4.5: "The root exposes a narrow filesystem
//! facade that maps to HTTP/commands"). Read/write/list/remove/mkdir as
//! thin HTTP calls through C4, plus a `watch` convenience that stands up a
//! file-watcher channel client (C8) scoped to a path. A supplemented
//! feature per `SPEC_FULL.md` §C, not named explicitly by `spec.md` beyond
//! the one-line mention.

use crate::watcher::{FileWatcher, WatcherCreated, WatcherError};
use sbx_http::HttpClient;
use sbx_transport::Transport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),

    #[error("watcher: {0}")]
    Watcher(#[from] WatcherError),
}

pub type FilesystemResult<T> = Result<T, FilesystemError>;

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileResponse {
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WriteFileRequest<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
struct CreateWatcherRequest<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignored: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'a str>,
}

pub struct Filesystem {
    http: HttpClient,
    transport: Transport,
}

impl Filesystem {
    pub(crate) fn new(http: HttpClient, transport: Transport) -> Self {
        Filesystem { http, transport }
    }

    pub async fn read(&self, path: &str) -> FilesystemResult<ReadFileResponse> {
        Ok(self
            .http
            .request(
                sbx_http::Method::GET,
                &format!("/files?path={}", urlencode(path)),
                None::<&()>,
            )
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    pub async fn write(&self, path: &str, content: &str) -> FilesystemResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::POST,
                "/files",
                Some(&WriteFileRequest { path, content }),
            )
            .await?;
        Ok(())
    }

    pub async fn list(&self, path: &str) -> FilesystemResult<Vec<DirEntry>> {
        Ok(self
            .http
            .request(
                sbx_http::Method::GET,
                &format!("/files/list?path={}", urlencode(path)),
                None::<&()>,
            )
            .await?
            .unwrap_or_default())
    }

    pub async fn remove(&self, path: &str) -> FilesystemResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::DELETE,
                &format!("/files?path={}", urlencode(path)),
                None::<&()>,
            )
            .await?;
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> FilesystemResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::POST,
                &format!("/files/mkdir?path={}", urlencode(path)),
                None::<&()>,
            )
            .await?;
        Ok(())
    }

    /// Creates a watcher scoped to `path` and returns a live
    /// [`FileWatcher`], subscribed and ready to surface `file:changed`
    /// events.
    pub async fn watch(&self, path: &str) -> FilesystemResult<FileWatcher> {
        let created: WatcherCreated = self
            .http
            .request(
                sbx_http::Method::POST,
                "/watchers",
                Some(&CreateWatcherRequest {
                    path,
                    ..Default::default()
                }),
            )
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?;

        self.transport.subscribe(created.channel.clone()).await?;
        Ok(FileWatcher::new(
            created.id,
            created.channel,
            self.transport.clone(),
            self.http.clone(),
        )
        .await?)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
