//! Signal-service channel client (`spec.md` §4.9): subscribes to the fixed
//! `signals` channel and routes `port`/`server-ready` frames to a typed
//! `port` listener, `error` frames to a typed `error` listener, and
//! everything to a generic `signal` listener carrying the raw variant.
//! Grounded directly on the event-bus fan-out contract (`spec.md` §4.3) —
//! the teacher has no signal-routing analog, so this reuses `EventBus`
//! dispatch plumbing rather than any one teacher file.

use sbx_http::HttpClient;
use sbx_transport::{HandlerId, Key, Payload, Transport};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;

pub const SIGNALS_CHANNEL: &str = "signals";

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("transport: {0}")]
    Transport(#[from] sbx_transport::TransportError),

    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),
}

/// `GET /signals/status` response (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct SignalStatus {
    pub active: bool,
}

pub type SignalResult<T> = Result<T, SignalError>;

/// `type` annotation on a `port`/`server-ready` signal (`spec.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEventType {
    Open,
    Close,
}

#[derive(Debug, Clone)]
pub struct PortSignal {
    pub port: u32,
    pub url: String,
    pub event_type: Option<PortEventType>,
}

#[derive(Debug, Clone)]
pub struct ErrorSignal {
    pub message: String,
}

/// The raw variant name a frame's `signal` field carried, for the generic
/// listener (`spec.md` §4.9: "both are also emitted on a generic `signal`
/// listener that receives the raw variant").
#[derive(Debug, Clone)]
pub enum RawSignal {
    Port(PortSignal),
    ServerReady(PortSignal),
    Error(ErrorSignal),
    Unknown(String),
}

const SIGNAL_CAPACITY: usize = 64;

pub struct SignalService {
    transport: Transport,
    http: HttpClient,
    port_tx: broadcast::Sender<PortSignal>,
    error_tx: broadcast::Sender<ErrorSignal>,
    raw_tx: broadcast::Sender<RawSignal>,
    handler_id: HandlerId,
}

impl SignalService {
    pub(crate) async fn new(transport: Transport, http: HttpClient) -> SignalResult<Self> {
        transport.subscribe(SIGNALS_CHANNEL).await?;

        let (port_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (error_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (raw_tx, _) = broadcast::channel(SIGNAL_CAPACITY);

        let port_tx_for_handler = port_tx.clone();
        let error_tx_for_handler = error_tx.clone();
        let raw_tx_for_handler = raw_tx.clone();

        let handler_id = transport
            .on(
                Key::Channel(SIGNALS_CHANNEL.to_owned()),
                Box::new(move |frame| {
                    let Payload::Map(map) = &frame.payload else {
                        return;
                    };
                    let Some(signal) = map.get_str("signal") else {
                        return;
                    };

                    let raw = match signal {
                        "port" | "server-ready" => {
                            let Some(port_num) = map.get_number("port") else {
                                return;
                            };
                            let url = map.get_str("url").unwrap_or_default().to_owned();
                            let event_type = match map.get_str("type") {
                                Some("open") => Some(PortEventType::Open),
                                Some("close") => Some(PortEventType::Close),
                                _ => None,
                            };
                            let port_signal = PortSignal {
                                port: port_num as u32,
                                url,
                                event_type,
                            };
                            let _ = port_tx_for_handler.send(port_signal.clone());
                            if signal == "port" {
                                RawSignal::Port(port_signal)
                            } else {
                                RawSignal::ServerReady(port_signal)
                            }
                        }
                        "error" => {
                            let message = map.get_str("message").unwrap_or_default().to_owned();
                            let error_signal = ErrorSignal { message };
                            let _ = error_tx_for_handler.send(error_signal.clone());
                            RawSignal::Error(error_signal)
                        }
                        other => RawSignal::Unknown(other.to_owned()),
                    };

                    let _ = raw_tx_for_handler.send(raw);
                }),
            )
            .await?;

        Ok(SignalService {
            transport,
            http,
            port_tx,
            error_tx,
            raw_tx,
            handler_id,
        })
    }

    pub fn subscribe_port(&self) -> broadcast::Receiver<PortSignal> {
        self.port_tx.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<ErrorSignal> {
        self.error_tx.subscribe()
    }

    pub fn subscribe_signal(&self) -> broadcast::Receiver<RawSignal> {
        self.raw_tx.subscribe()
    }

    /// `POST /signals/start` (`spec.md` §6.4): asks the server to begin
    /// emitting signals on this channel.
    pub async fn start(&self) -> SignalResult<()> {
        self.http
            .request::<serde_json::Value>(sbx_http::Method::POST, "/signals/start", None::<&()>)
            .await?;
        Ok(())
    }

    /// `POST /signals/stop` (`spec.md` §6.4).
    pub async fn stop(&self) -> SignalResult<()> {
        self.http
            .request::<serde_json::Value>(sbx_http::Method::POST, "/signals/stop", None::<&()>)
            .await?;
        Ok(())
    }

    /// `GET /signals/status` (`spec.md` §6.4).
    pub async fn status(&self) -> SignalResult<SignalStatus> {
        Ok(self
            .http
            .request(sbx_http::Method::GET, "/signals/status", None::<&()>)
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    pub async fn teardown(&self) -> SignalResult<()> {
        self.transport.off(self.handler_id);
        self.transport.unsubscribe(SIGNALS_CHANNEL).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_test_support::MockWsServer;
    use sbx_transport::{Frame, KvMap, ProtocolMode, TransportConfig, Value};
    use std::time::Duration;

    async fn connected_transport(server: &MockWsServer) -> Transport {
        let transport = Transport::spawn(
            TransportConfig::new(server.ws_url(ProtocolMode::Binary).replace("?protocol=binary", ""))
                .with_protocol(ProtocolMode::Binary),
        );
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn subscribes_to_the_fixed_signals_channel_on_construction() {
        let server = MockWsServer::start().await;
        let transport = connected_transport(&server).await;
        let http = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(3)).unwrap();

        let _service = SignalService::new(transport, http).await.unwrap();

        server.wait_for_received(1, Duration::from_secs(2)).await;
        let received = server.received();
        assert_eq!(received[0].msg_type, "subscribe");
        assert_eq!(received[0].channel, SIGNALS_CHANNEL);
    }

    #[tokio::test]
    async fn routes_a_port_signal_to_the_typed_and_generic_listeners() {
        let server = MockWsServer::start().await;
        let transport = connected_transport(&server).await;
        let http = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(3)).unwrap();
        let service = SignalService::new(transport, http).await.unwrap();

        let mut port_rx = service.subscribe_port();
        let mut raw_rx = service.subscribe_signal();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut data = KvMap::new();
        data.insert("signal", Value::String("port".to_owned()));
        data.insert("port", Value::Number(3000.0));
        data.insert("url", Value::String("http://localhost:3000".to_owned()));
        data.insert("type", Value::String("open".to_owned()));
        server.send(
            ProtocolMode::Binary,
            &Frame::data(SIGNALS_CHANNEL, "signal", Payload::Map(data)),
        );

        let port_signal = tokio::time::timeout(Duration::from_secs(2), port_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(port_signal.port, 3000);
        assert_eq!(port_signal.event_type, Some(PortEventType::Open));

        let raw = tokio::time::timeout(Duration::from_secs(2), raw_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(raw, RawSignal::Port(_)));
    }
}
