//! File-watcher channel client (`spec.md` §4.8). Subscribes to a
//! server-created watcher's channel, surfaces `file:changed` events, and
//! lets the caller retune include-content/ignored-patterns/encoding on the
//! live watcher. Grounded on `services/receiver/src/session.rs`'s
//! batch-then-forward event shape for the inbound dispatch loop.

use sbx_http::HttpClient;
use sbx_transport::{Frame, HandlerId, Key, KvMap, Payload, Transport, Value};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("transport: {0}")]
    Transport(#[from] sbx_transport::TransportError),

    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),

    #[error("base64 content was not valid: {0}")]
    BadBase64(#[from] base64::DecodeError),

    #[error("this watcher has already been destroyed")]
    Destroyed,
}

pub type WatcherResult<T> = Result<T, WatcherError>;

/// `POST /watchers` response (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherCreated {
    pub id: String,
    pub channel: String,
    pub path: String,
}

/// What kind of filesystem change a `file:changed` frame reports
/// (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

impl ChangeKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(ChangeKind::Add),
            "change" => Some(ChangeKind::Change),
            "unlink" => Some(ChangeKind::Unlink),
            "addDir" => Some(ChangeKind::AddDir),
            "unlinkDir" => Some(ChangeKind::UnlinkDir),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileChanged {
    pub event: ChangeKind,
    pub path: String,
    pub content: Option<Vec<u8>>,
}

const EVENT_CAPACITY: usize = 256;

pub struct FileWatcher {
    id: String,
    channel: String,
    transport: Transport,
    http: HttpClient,
    active: Arc<AtomicBool>,
    events_tx: broadcast::Sender<FileChanged>,
    handler_id: HandlerId,
}

impl FileWatcher {
    pub(crate) async fn new(
        id: String,
        channel: String,
        transport: Transport,
        http: HttpClient,
    ) -> WatcherResult<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));

        let events_tx_for_handler = events_tx.clone();
        let active_for_handler = Arc::clone(&active);
        let handler_id = transport
            .on(
                Key::Channel(channel.clone()),
                Box::new(move |frame| {
                    if frame.msg_type != "file:changed" || !active_for_handler.load(Ordering::SeqCst) {
                        return;
                    }
                    let Payload::Map(map) = &frame.payload else {
                        return;
                    };
                    let Some(event) = map.get_str("event").and_then(ChangeKind::parse) else {
                        return;
                    };
                    let Some(path) = map.get_str("path") else {
                        return;
                    };
                    let content = match map.get_str("content") {
                        None => None,
                        Some(text) => {
                            let is_base64 = map.get_str("encoding") == Some("base64");
                            if is_base64 {
                                use base64::Engine;
                                match base64::engine::general_purpose::STANDARD.decode(text) {
                                    Ok(bytes) => Some(bytes),
                                    Err(e) => {
                                        warn!(error = %e, "dropping file:changed frame with invalid base64 content");
                                        return;
                                    }
                                }
                            } else {
                                Some(text.as_bytes().to_vec())
                            }
                        }
                    };
                    let _ = events_tx_for_handler.send(FileChanged {
                        event,
                        path: path.to_owned(),
                        content,
                    });
                }),
            )
            .await?;

        Ok(FileWatcher {
            id,
            channel,
            transport,
            http,
            active,
            events_tx,
            handler_id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FileChanged> {
        self.events_tx.subscribe()
    }

    async fn configure(&self, field: &str, value: Value) -> WatcherResult<()> {
        if !self.is_active() {
            return Err(WatcherError::Destroyed);
        }
        let mut payload = KvMap::new();
        payload.insert(field, value);
        self.transport
            .send(Frame::data(
                self.channel.clone(),
                "watcher:configure",
                Payload::Map(payload),
            ))
            .await?;
        Ok(())
    }

    pub async fn set_include_content(&self, include: bool) -> WatcherResult<()> {
        self.configure("includeContent", Value::Bool(include)).await
    }

    pub async fn set_ignored(&self, patterns: &[String]) -> WatcherResult<()> {
        let joined = patterns.join(",");
        self.configure("ignored", Value::String(joined)).await
    }

    pub async fn set_encoding(&self, base64: bool) -> WatcherResult<()> {
        let value = if base64 { "base64" } else { "raw" };
        self.configure("encoding", Value::String(value.to_owned())).await
    }

    /// Issues the HTTP delete, then unsubscribes and drops this watcher's
    /// handlers. A destroyed watcher emits nothing further
    /// (`spec.md` §4.8 invariant).
    pub async fn destroy(&self) -> WatcherResult<()> {
        self.http
            .request::<serde_json::Value>(
                sbx_http::Method::DELETE,
                &format!("/watchers/{}", self.id),
                None::<&()>,
            )
            .await?;
        self.active.store(false, Ordering::SeqCst);
        self.transport.off(self.handler_id);
        self.transport.unsubscribe(self.channel.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_test_support::MockWsServer;
    use sbx_transport::{ProtocolMode, TransportConfig};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn change_kind_parses_every_known_variant() {
        assert_eq!(ChangeKind::parse("add"), Some(ChangeKind::Add));
        assert_eq!(ChangeKind::parse("change"), Some(ChangeKind::Change));
        assert_eq!(ChangeKind::parse("unlink"), Some(ChangeKind::Unlink));
        assert_eq!(ChangeKind::parse("addDir"), Some(ChangeKind::AddDir));
        assert_eq!(ChangeKind::parse("unlinkDir"), Some(ChangeKind::UnlinkDir));
        assert_eq!(ChangeKind::parse("bogus"), None);
    }

    #[tokio::test]
    async fn routes_file_changed_frames_and_decodes_base64_content() {
        let ws = MockWsServer::start().await;
        let transport = Transport::spawn(
            TransportConfig::new(ws.ws_url(ProtocolMode::Binary).replace("?protocol=binary", ""))
                .with_protocol(ProtocolMode::Binary),
        );
        transport.connect().await.unwrap();
        let http = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(3)).unwrap();

        let watcher = FileWatcher::new("w1".to_owned(), "watcher:w1".to_owned(), transport, http)
            .await
            .unwrap();
        let mut events = watcher.subscribe_events();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut data = KvMap::new();
        data.insert("event", Value::String("change".to_owned()));
        data.insert("path", Value::String("src/main.rs".to_owned()));
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"fn main() {}");
        data.insert("content", Value::String(encoded));
        data.insert("encoding", Value::String("base64".to_owned()));
        ws.send(
            ProtocolMode::Binary,
            &Frame::data("watcher:w1", "file:changed", Payload::Map(data)),
        );

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event, ChangeKind::Change);
        assert_eq!(event.path, "src/main.rs");
        assert_eq!(event.content, Some(b"fn main() {}".to_vec()));
    }

    #[tokio::test]
    async fn destroy_issues_the_http_delete_and_marks_the_watcher_inactive() {
        let http_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/watchers/w1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&http_server)
            .await;

        let ws = MockWsServer::start().await;
        let transport = Transport::spawn(
            TransportConfig::new(ws.ws_url(ProtocolMode::Binary).replace("?protocol=binary", ""))
                .with_protocol(ProtocolMode::Binary),
        );
        transport.connect().await.unwrap();
        let http = HttpClient::new(http_server.uri(), Duration::from_secs(3)).unwrap();

        let watcher = FileWatcher::new("w1".to_owned(), "watcher:w1".to_owned(), transport, http)
            .await
            .unwrap();
        assert!(watcher.is_active());

        watcher.destroy().await.unwrap();
        assert!(!watcher.is_active());
    }
}
