use sbx_wire::ProtocolMode;
use std::time::Duration;

/// Transport-level configuration. Grounded on the teacher's
/// `services/forwarder/src/config.rs` defaults-with-override shape, adapted
/// to a builder since this SDK takes no TOML file (`spec.md` §1 excludes
/// config/env-file loading from scope).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://`/`wss://` base URL, without the `protocol`/`token` query.
    pub url: String,
    pub token: Option<String>,
    pub protocol: ProtocolMode,
    /// Delay before the first reconnect attempt after an unplanned close.
    pub reconnect_delay: Duration,
    /// Cap for exponential backoff between reconnect attempts (Open
    /// Question decision #4 in DESIGN.md).
    pub reconnect_delay_max: Duration,
    /// 0 means unlimited attempts.
    pub reconnect_max_attempts: u32,
    pub auto_reconnect: bool,
    /// 0 disables the ping timer.
    pub ping_interval: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        TransportConfig {
            url: url.into(),
            token: None,
            protocol: ProtocolMode::Binary,
            reconnect_delay: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_max_attempts: 0,
            auto_reconnect: true,
            ping_interval: Duration::from_secs(20),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolMode) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_reconnect_max_attempts(mut self, max: u32) -> Self {
        self.reconnect_max_attempts = max;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Build the connection URL per `spec.md` §6.3: `protocol` is always
    /// sent; `token` is omitted only when absent (Open Question #1).
    pub fn connection_url(&self) -> String {
        let mut url = format!(
            "{}{sep}protocol={}",
            self.url,
            self.protocol.as_query_value(),
            sep = if self.url.contains('?') { '&' } else { '?' }
        );
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(token);
        }
        url
    }
}
