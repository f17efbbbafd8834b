//! PTY-mode terminal channel client (`spec.md` §4.6). Interactive shell:
//! `write`/`resize` go out over the transport, `output`/`error`/`destroyed`
//! come back as pull-style broadcast streams rather than on/off callbacks
//! (Design Notes §9 "callback/event-emitter patterns").

use crate::terminal::{Encoding, TerminalCore, TerminalError, TerminalResult, TerminalState};
use sbx_transport::{Key, Payload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// One `terminal:output` frame, decoded per the channel's encoding
/// (`spec.md` §4.6 "Output decoding").
#[derive(Debug, Clone)]
pub struct TerminalOutput {
    pub data: Vec<u8>,
}

const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const ERROR_CHANNEL_CAPACITY: usize = 64;

pub struct PtyHandle {
    core: TerminalCore,
    running: Arc<AtomicBool>,
    output_tx: broadcast::Sender<TerminalOutput>,
    error_tx: broadcast::Sender<String>,
    destroyed_tx: broadcast::Sender<()>,
    channel_handler: sbx_transport::HandlerId,
}

impl PtyHandle {
    pub(crate) async fn new(core: TerminalCore) -> TerminalResult<Self> {
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let (destroyed_tx, _) = broadcast::channel(1);

        let running = Arc::new(AtomicBool::new(true));
        let default_encoding = core.encoding;
        let output_tx_for_handler = output_tx.clone();
        let error_tx_for_handler = error_tx.clone();
        let destroyed_tx_for_handler = destroyed_tx.clone();
        let running_for_handler = Arc::clone(&running);

        let channel_handler = core
            .transport
            .on(
                Key::Channel(core.channel.clone()),
                Box::new(move |frame| match frame.msg_type.as_str() {
                    "terminal:output" => {
                        let (text, tag) = match &frame.payload {
                            Payload::Map(map) => (map.get_str("output"), map.get_str("encoding")),
                            Payload::Text(t) => (Some(t.as_str()), None),
                            _ => (None, None),
                        };
                        let Some(text) = text else { return };
                        let encoding = Encoding::parse(tag, default_encoding);
                        match encoding.decode(text) {
                            Ok(data) => {
                                let _ = output_tx_for_handler.send(TerminalOutput { data });
                            }
                            Err(e) => warn!(error = %e, "dropping undecodable terminal:output frame"),
                        }
                    }
                    "terminal:error" => {
                        let message = match &frame.payload {
                            Payload::Map(map) => map.get_str("message").map(str::to_owned),
                            Payload::Text(t) => Some(t.clone()),
                            _ => None,
                        }
                        .unwrap_or_default();
                        let _ = error_tx_for_handler.send(message);
                    }
                    "terminal:destroyed" => {
                        running_for_handler.store(false, Ordering::SeqCst);
                        let _ = destroyed_tx_for_handler.send(());
                    }
                    _ => {}
                }),
            )
            .await?;

        Ok(PtyHandle {
            core,
            running,
            output_tx,
            error_tx,
            destroyed_tx,
            channel_handler,
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    pub fn state(&self) -> TerminalState {
        if self.running.load(Ordering::SeqCst) {
            TerminalState::Running
        } else {
            TerminalState::Stopped
        }
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<TerminalOutput> {
        self.output_tx.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    pub fn subscribe_destroyed(&self) -> broadcast::Receiver<()> {
        self.destroyed_tx.subscribe()
    }

    /// Writes input to the PTY. Per `spec.md` §4.6, writing while not
    /// running logs a warning but still proceeds (the server is the
    /// authority on whether the write is meaningful).
    pub async fn write(&self, input: impl Into<String>) -> TerminalResult<()> {
        if self.state() != TerminalState::Running {
            warn!(id = %self.core.id, "writing to a terminal that is not running");
        }
        self.core
            .transport
            .send_terminal_input(&self.core.id, input)
            .await?;
        Ok(())
    }

    /// Resizes the PTY. Unlike `write`, resizing while not running fails
    /// loudly (`spec.md` §4.6).
    pub async fn resize(&self, cols: u16, rows: u16) -> TerminalResult<()> {
        if self.state() != TerminalState::Running {
            return Err(TerminalError::NotRunning {
                id: self.core.id.clone(),
            });
        }
        self.core
            .transport
            .resize_terminal(&self.core.id, cols, rows)
            .await?;
        Ok(())
    }

    /// Issues the HTTP delete, then unsubscribes the channel and drops this
    /// handle's handlers. The delete is attempted on every call — the
    /// server owns idempotency (`spec.md` §4.6 "Teardown").
    pub async fn destroy(&self) -> TerminalResult<()> {
        self.core
            .http
            .request::<serde_json::Value>(
                sbx_http::Method::DELETE,
                &format!("/terminals/{}", self.core.id),
                None::<&()>,
            )
            .await?;
        self.core.transport.unsubscribe(self.core.channel.clone()).await?;
        self.core.transport.off(self.channel_handler);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.destroyed_tx.send(());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::TerminalCore;
    use sbx_http::HttpClient;
    use sbx_test_support::MockWsServer;
    use sbx_transport::{Frame, KvMap, ProtocolMode, Transport, TransportConfig};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn pty_handle(ws: &MockWsServer, http: HttpClient, encoding: Encoding) -> PtyHandle {
        let transport = Transport::spawn(
            TransportConfig::new(ws.ws_url(ProtocolMode::Binary).replace("?protocol=binary", ""))
                .with_protocol(ProtocolMode::Binary),
        );
        transport.connect().await.unwrap();
        PtyHandle::new(TerminalCore {
            id: "t1".to_owned(),
            channel: "terminal:t1".to_owned(),
            encoding,
            transport,
            http,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn decodes_base64_output_and_surfaces_it_on_the_output_stream() {
        let ws = MockWsServer::start().await;
        let http = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(3)).unwrap();
        let pty = pty_handle(&ws, http, Encoding::Base64).await;
        let mut output = pty.subscribe_output();

        tokio::time::sleep(Duration::from_millis(50)).await;
        use base64::Engine;
        let mut data = KvMap::new();
        data.insert(
            "output",
            sbx_transport::Value::String(base64::engine::general_purpose::STANDARD.encode(b"hello\n")),
        );
        ws.send(
            ProtocolMode::Binary,
            &Frame::data("terminal:t1", "terminal:output", Payload::Map(data)),
        );

        let chunk = tokio::time::timeout(Duration::from_secs(2), output.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.data, b"hello\n");
    }

    #[tokio::test]
    async fn terminal_destroyed_frame_flips_state_to_stopped() {
        let ws = MockWsServer::start().await;
        let http = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(3)).unwrap();
        let pty = pty_handle(&ws, http, Encoding::Raw).await;
        assert_eq!(pty.state(), TerminalState::Running);

        ws.send(
            ProtocolMode::Binary,
            &Frame::data("terminal:t1", "terminal:destroyed", Payload::Empty),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pty.state(), TerminalState::Stopped);

        let err = pty.resize(80, 24).await.unwrap_err();
        assert!(matches!(err, TerminalError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn destroy_issues_the_http_delete_and_unsubscribes() {
        let http_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/terminals/t1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&http_server)
            .await;
        let ws = MockWsServer::start().await;
        let http = HttpClient::new(http_server.uri(), Duration::from_secs(3)).unwrap();
        let pty = pty_handle(&ws, http, Encoding::Raw).await;

        pty.destroy().await.unwrap();
        assert_eq!(pty.state(), TerminalState::Stopped);
    }
}
