//! A mock websocket server for exercising `sbx-transport` without a real
//! sandbox backend. Grounded on the teacher's
//! `crates/rt-test-utils/src/mock_ws_server.rs`: bind to a random port,
//! accept connections in a background task, and expose a handle the test
//! can assert against and push frames through.

use futures_util::{SinkExt, StreamExt};
use sbx_wire::{Frame, ProtocolMode, WireMessage};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;

struct Shared {
    inbound: Mutex<Vec<Frame>>,
    notify: Notify,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connections: Mutex<u32>,
}

/// A mock websocket server for integration tests. Binds to a random port;
/// each accepted connection is handled in its own background task. Only the
/// most recently accepted connection can be pushed to via [`Self::send`] —
/// this is enough to exercise reconnect scenarios, where only one
/// connection is ever live at a time.
pub struct MockWsServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let shared = Arc::new(Shared {
            inbound: Mutex::new(Vec::new()),
            notify: Notify::new(),
            outbound: Mutex::new(None),
            connections: Mutex::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let shared = Arc::clone(&accept_shared);
                        tokio::spawn(async move {
                            let _ = handle_connection(stream, shared).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        MockWsServer {
            addr,
            shared,
            _task: task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The `ws://` URL a transport under test should connect to, including
    /// the `protocol` query parameter.
    pub fn ws_url(&self, protocol: ProtocolMode) -> String {
        format!(
            "ws://{}/ws?protocol={}",
            self.addr,
            protocol.as_query_value()
        )
    }

    /// Number of connections accepted so far (tracks reconnects).
    pub fn connection_count(&self) -> u32 {
        *self.shared.connections.lock().unwrap()
    }

    /// Push a frame to the current client connection, encoded per `mode`.
    pub fn send(&self, mode: ProtocolMode, frame: &Frame) {
        let encoded = sbx_wire::encode(mode, frame).expect("encode frame");
        let message = match encoded {
            WireMessage::Binary(b) => Message::Binary(b.into()),
            WireMessage::Text(t) => Message::Text(t.into()),
        };
        if let Some(tx) = self.shared.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// All frames received so far, oldest first.
    pub fn received(&self) -> Vec<Frame> {
        self.shared.inbound.lock().unwrap().clone()
    }

    /// Sends a websocket close frame to the currently connected client, to
    /// exercise a transport's own unplanned-disconnect/reconnect path
    /// (as opposed to a test driving reconnection by calling `connect()`
    /// a second time).
    pub fn close_current_connection(&self) {
        if let Some(tx) = self.shared.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Wait until at least `n` frames have been received, or the timeout
    /// elapses.
    pub async fn wait_for_received(&self, n: usize, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.inbound.lock().unwrap().len() >= n {
                return;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            let _ = tokio::time::timeout(remaining, self.shared.notify.notified()).await;
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    shared: Arc<Shared>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    *shared.connections.lock().unwrap() += 1;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.lock().unwrap() = Some(out_tx);

    let forward = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = read.next().await {
        let msg = msg_result?;
        let frame = match msg {
            Message::Text(t) => sbx_wire::decode_json(&t).ok(),
            Message::Binary(b) => sbx_wire::decode_binary(&b).ok(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        };
        if let Some(frame) = frame {
            shared.inbound.lock().unwrap().push(frame);
            shared.notify.notify_waiters();
        }
    }

    forward.abort();
    Ok(())
}
