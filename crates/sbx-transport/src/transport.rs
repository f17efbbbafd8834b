//! The `Transport` actor: a single background task owns the socket,
//! subscription set, and handler registry, and every public method talks to
//! it over a command channel. `spec.md` §4 describes a cooperative,
//! single-threaded scheduler; on a multi-threaded runtime the actor pattern
//! gives the same guarantee — all state mutation is serialized through one
//! task's event loop, mirroring the teacher's `run_session_loop`
//! (`services/receiver/src/session.rs`) `tokio::select! { biased; ... }`
//! dispatch shape and its `UplinkSession::connect` handshake
//! (`services/forwarder/src/uplink.rs`).

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::event_bus::{EventBus, Handler, HandlerId, Key};
use crate::subscription::SubscriptionSet;
use futures_util::{SinkExt, StreamExt};
use sbx_wire::{Frame, KvMap, Payload, ProtocolMode, Value, WireMessage};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Application-level `msg_type` for the liveness ping the transport sends
/// at `ping_interval`, and the `msg_type` a server echoes it back as
/// (`spec.md` §4.2). This is layered on top of, not instead of, the
/// websocket protocol's own ping/pong frames (handled transparently by
/// `tokio-tungstenite`) — the server's liveness contract is at the
/// application frame level.
const PING_MSG_TYPE: &str = "ping";
const PONG_MSG_TYPE: &str = "pong";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle notifications, delivered as a pull-style broadcast
/// stream rather than on/off emitter callbacks (Design Notes §9 item 2).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Open,
    Close { reason: Option<String> },
    Error(String),
    ReconnectFailed { attempts: u32 },
}

enum Command {
    Connect(oneshot::Sender<TransportResult<()>>),
    Disconnect,
    Subscribe(String, oneshot::Sender<TransportResult<()>>),
    Unsubscribe(String, oneshot::Sender<TransportResult<()>>),
    Send(Frame, oneshot::Sender<TransportResult<bool>>),
    On(Key, Handler, oneshot::Sender<HandlerId>),
    Off(HandlerId),
    OffAll(Key),
    TimeSinceLastPong(oneshot::Sender<Option<Duration>>),
    Shutdown,
}

/// A cheaply-clonable handle to the transport actor.
#[derive(Clone)]
pub struct Transport {
    cmd_tx: mpsc::UnboundedSender<Command>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
}

impl Transport {
    pub fn spawn(config: TransportConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, _) = broadcast::channel(64);
        let actor = Actor {
            config,
            ws: None,
            subscriptions: SubscriptionSet::new(),
            event_bus: EventBus::new(),
            lifecycle_tx: lifecycle_tx.clone(),
            cmd_rx,
            last_pong: None,
            manual_close: false,
        };
        tokio::spawn(actor.run());
        Transport {
            cmd_tx,
            lifecycle_tx,
        }
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    pub async fn connect(&self) -> TransportResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Connect(tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)?
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    pub async fn subscribe(&self, channel: impl Into<String>) -> TransportResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Subscribe(channel.into(), tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)?
    }

    pub async fn unsubscribe(&self, channel: impl Into<String>) -> TransportResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Unsubscribe(channel.into(), tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)?
    }

    /// Sends a frame over the socket. Per `spec.md` §4.2/§7 ("Transport-send-
    /// while-closed"), this never fails just because the socket happens to
    /// be closed: it returns `Ok(false)` as a no-op rather than an error, so
    /// a transient disconnect window never surfaces as an exception to the
    /// caller. `Ok(true)` means the frame was actually written to the
    /// socket; other `Err`s are genuine failures (encode error, write
    /// error).
    pub async fn send(&self, frame: Frame) -> TransportResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Send(frame, tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)?
    }

    /// Structured send used by the PTY-terminal channel client
    /// (`spec.md` §4.2): `{type: "terminal:input", channel: "terminal:<id>",
    /// data: {input}}`.
    pub async fn send_terminal_input(
        &self,
        terminal_id: &str,
        input: impl Into<String>,
    ) -> TransportResult<bool> {
        let mut data = KvMap::new();
        data.insert("input", Value::String(input.into()));
        self.send(Frame::data(
            format!("terminal:{terminal_id}"),
            "terminal:input",
            Payload::Map(data),
        ))
        .await
    }

    /// Structured send used by the PTY-terminal channel client
    /// (`spec.md` §4.2): `{type: "terminal:resize", channel:
    /// "terminal:<id>", data: {terminal_id, cols, rows}}`.
    pub async fn resize_terminal(
        &self,
        terminal_id: &str,
        cols: u16,
        rows: u16,
    ) -> TransportResult<bool> {
        let mut data = KvMap::new();
        data.insert("terminal_id", Value::String(terminal_id.to_owned()));
        data.insert("cols", Value::Number(f64::from(cols)));
        data.insert("rows", Value::Number(f64::from(rows)));
        self.send(Frame::data(
            format!("terminal:{terminal_id}"),
            "terminal:resize",
            Payload::Map(data),
        ))
        .await
    }

    /// Time elapsed since the last `pong`-typed frame was received, or
    /// `None` if none has been received yet in this session
    /// (`spec.md` §4.2/§8 testable property #8).
    pub async fn time_since_last_pong(&self) -> TransportResult<Option<Duration>> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::TimeSinceLastPong(tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)
    }

    pub async fn on(&self, key: Key, handler: Handler) -> TransportResult<HandlerId> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::On(key, handler, tx))?;
        rx.await.map_err(|_| TransportError::ActorGone)
    }

    pub fn off(&self, id: HandlerId) {
        let _ = self.cmd_tx.send(Command::Off(id));
    }

    pub fn off_all(&self, key: Key) {
        let _ = self.cmd_tx.send(Command::OffAll(key));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    fn send_command(&self, cmd: Command) -> TransportResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| TransportError::ActorGone)
    }
}

struct Actor {
    config: TransportConfig,
    ws: Option<WsStream>,
    subscriptions: SubscriptionSet,
    event_bus: EventBus,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    last_pong: Option<Instant>,
    /// Set by `disconnect()`, cleared on the next successful connect.
    /// `spec.md` §4.2: a manual disconnect is never followed by a
    /// reconnect, regardless of `auto_reconnect`.
    manual_close: bool,
}

impl Actor {
    async fn run(mut self) {
        let mut ping_timer = tokio::time::interval(ping_interval_or_forever(self.config.ping_interval));
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => {
                            if let Some(mut ws) = self.ws.take() {
                                let _ = ws.close(None).await;
                            }
                            return;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                msg = next_message(&mut self.ws) => {
                    self.handle_incoming(msg).await;
                }

                _ = ping_timer.tick(), if self.ws.is_some() && !self.config.ping_interval.is_zero() => {
                    if self.send_frame(Frame::new(sbx_wire::Kind::Data, "", PING_MSG_TYPE)).await.is_err() {
                        self.on_disconnect(None).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                let result = self.connect_and_resubscribe(0).await;
                let _ = reply.send(result);
            }
            Command::Disconnect => {
                self.manual_close = true;
                if let Some(ws) = self.ws.as_mut() {
                    let _ = ws.close(None).await;
                }
                self.on_disconnect(Some("disconnect requested".to_owned())).await;
            }
            Command::Subscribe(channel, reply) => {
                self.subscriptions.add(channel.clone());
                let result = self.send_frame(Frame::subscribe(channel)).await.map(|_| ());
                let _ = reply.send(result);
            }
            Command::Unsubscribe(channel, reply) => {
                self.subscriptions.remove(&channel);
                let result = self.send_frame(Frame::unsubscribe(channel)).await.map(|_| ());
                let _ = reply.send(result);
            }
            Command::Send(frame, reply) => {
                let result = self.send_frame(frame).await;
                let _ = reply.send(result);
            }
            Command::On(key, handler, reply) => {
                let id = self.event_bus.on(key, handler);
                let _ = reply.send(id);
            }
            Command::Off(id) => self.event_bus.off(id),
            Command::OffAll(key) => self.event_bus.off_all(&key),
            Command::TimeSinceLastPong(reply) => {
                let _ = reply.send(self.last_pong.map(|t| t.elapsed()));
            }
            Command::Shutdown => unreachable!("handled in run()"),
        }
    }

    async fn handle_incoming(&mut self, msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) {
        match msg {
            None => self.on_disconnect(None).await,
            Some(Err(e)) => {
                warn!(error = %e, "transport read error");
                let _ = self.lifecycle_tx.send(LifecycleEvent::Error(e.to_string()));
                self.on_disconnect(Some(e.to_string())).await;
            }
            Some(Ok(Message::Close(frame))) => {
                self.on_disconnect(frame.map(|f| f.reason.to_string())).await;
            }
            Some(Ok(Message::Ping(data))) => {
                if let Some(ws) = self.ws.as_mut() {
                    let _ = ws.send(Message::Pong(data)).await;
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Text(text))) => {
                self.dispatch_decoded(sbx_wire::decode_json(&text));
            }
            Some(Ok(Message::Binary(bytes))) => {
                self.dispatch_decoded(sbx_wire::decode_binary(&bytes));
            }
            Some(Ok(Message::Frame(_))) => {}
        }
    }

    fn dispatch_decoded(&mut self, decoded: sbx_wire::WireResult<Frame>) {
        match decoded {
            Ok(frame) => {
                debug!(channel = %frame.channel, msg_type = %frame.msg_type, "dispatching frame");
                if frame.msg_type == PONG_MSG_TYPE {
                    self.last_pong = Some(Instant::now());
                }
                self.event_bus.dispatch(&frame);
            }
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }

    /// Writes a frame to the socket. Returns `Ok(false)` rather than
    /// `TransportError::NotConnected` when there is no socket, so the
    /// command handlers above can treat "closed" as a no-op instead of an
    /// error (`spec.md` §4.2/§7).
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<bool> {
        let Some(ws) = self.ws.as_mut() else {
            return Ok(false);
        };
        let encoded = sbx_wire::encode(self.config.protocol, &frame)?;
        let message = match encoded {
            WireMessage::Binary(b) => Message::Binary(b.into()),
            WireMessage::Text(t) => Message::Text(t.into()),
        };
        ws.send(message).await?;
        Ok(true)
    }

    /// Idempotent (`spec.md` §4.2: "connect() ... idempotent"): a second
    /// call while already open is a no-op rather than opening a second
    /// socket and dropping the first without a close handshake.
    async fn connect_and_resubscribe(&mut self, attempt: u32) -> TransportResult<()> {
        if self.ws.is_some() {
            return Ok(());
        }

        let url = self.config.connection_url();
        let (stream, _response) = tokio_tungstenite::connect_async(&url).await?;
        self.ws = Some(stream);
        self.manual_close = false;
        info!(attempt, "transport connected");
        let _ = self.lifecycle_tx.send(LifecycleEvent::Open);

        let channels: Vec<String> = self.subscriptions.iter().map(str::to_owned).collect();
        for channel in channels {
            self.send_frame(Frame::subscribe(channel)).await?;
        }
        Ok(())
    }

    async fn on_disconnect(&mut self, reason: Option<String>) {
        if self.ws.take().is_none() {
            return;
        }
        let _ = self.lifecycle_tx.send(LifecycleEvent::Close {
            reason: reason.clone(),
        });

        if self.manual_close || !self.config.auto_reconnect {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.config.reconnect_max_attempts != 0 && attempt > self.config.reconnect_max_attempts {
                let _ = self
                    .lifecycle_tx
                    .send(LifecycleEvent::ReconnectFailed { attempts: attempt - 1 });
                return;
            }

            let delay = backoff_delay(
                self.config.reconnect_delay,
                self.config.reconnect_delay_max,
                attempt,
            );
            tokio::time::sleep(delay).await;

            match self.connect_and_resubscribe(attempt).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

async fn next_message(
    ws: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match ws {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn ping_interval_or_forever(interval: Duration) -> Duration {
    if interval.is_zero() {
        Duration::from_secs(60 * 60 * 24 * 365)
    } else {
        interval
    }
}

/// Exponential backoff with +/-20% jitter, capped at `max` (Open Question
/// decision #4 in `DESIGN.md`). `attempt` is 1-based.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    let capped = exp.min(max);
    let jitter_fraction = pseudo_random_unit(attempt);
    Duration::from_secs_f64(capped.as_secs_f64() * jitter_fraction).min(max)
}

/// Deterministic pseudo-random value in `[0.8, 1.2]`, seeded by the attempt
/// number. Not cryptographic — only needed to spread reconnect storms.
fn pseudo_random_unit(seed: u32) -> f64 {
    let x = (seed.wrapping_mul(2_654_435_761)) ^ 0x9e37_79b9;
    let normalized = f64::from(x % 1000) / 1000.0;
    0.8 + normalized * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_nondecreasing_in_its_cap_and_never_exceeds_max() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        for attempt in 1..10 {
            let d = backoff_delay(base, max, attempt);
            assert!(d <= max);
        }
    }

    #[test]
    fn ping_interval_zero_means_effectively_disabled() {
        let d = ping_interval_or_forever(Duration::ZERO);
        assert!(d > Duration::from_secs(3600));
    }
}
