//! Client root (`spec.md` §4.5, C5): wires the codec/transport/HTTP layers
//! together, resolves credentials and the sandbox endpoint, and lazily
//! builds the transport on first need. Grounded on the teacher's
//! `services/receiver/src/db.rs` `Profile` load/save generalized into the
//! `CredentialStore` capability trait (Design Notes §9), and
//! `services/forwarder/src/config.rs`'s defaults-with-override idiom,
//! adapted to a builder since this SDK takes no config file.

use crate::auth::AuthClient;
use crate::config::{resolve_endpoint, SandboxClientConfig};
use crate::credentials::{CredentialStore, JsonFileCredentialStore};
use crate::error::{ClientError, ClientResult};
use crate::filesystem::Filesystem;
use crate::sandboxes::SandboxesClient;
use crate::signals::SignalService;
use crate::terminal::{CommandOptions, Encoding, Terminal};
use sbx_http::HttpClient;
use sbx_transport::{ProtocolMode, Transport, TransportConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// `POST /terminals` response (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
struct TerminalCreated {
    id: String,
    channel: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
struct CreateTerminalRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
    pty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
}

/// The non-streaming `/execute`/`/run/command` shape (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct RunRequest<'a> {
    command: &'a str,
    background: bool,
    stream: bool,
}

/// The sandbox client SDK's entry point: credential/endpoint resolution on
/// construction, a lazily-created transport, and the channel/HTTP-backed
/// resource clients built on top of it (`spec.md` §4.5).
pub struct SandboxClient {
    sandbox_url: String,
    session_token: Option<String>,
    preview_base: Option<String>,
    protocol: ProtocolMode,
    transport_config_base: TransportConfig,
    http: HttpClient,
    transport: OnceCell<Transport>,
}

impl SandboxClient {
    /// Resolves credentials/endpoint per `spec.md` §4.5 and builds the HTTP
    /// layer. The transport is not opened here — it is created lazily by
    /// [`Self::transport`] on first use.
    pub fn connect(config: SandboxClientConfig) -> ClientResult<Self> {
        let store: Arc<dyn CredentialStore> = match config.credential_store.clone() {
            Some(store) => store,
            None => Arc::new(JsonFileCredentialStore::default_location()?),
        };

        let resolved = resolve_endpoint(&config, store.as_ref()).ok_or(ClientError::MissingSandboxUrl)?;

        let mut http = HttpClient::new(&resolved.sandbox_url, config.request_timeout)?;
        if let Some(token) = &resolved.session_token {
            http = http.with_token(token.clone());
        }

        let transport_config_base = TransportConfig::new(ws_url(&resolved.sandbox_url))
            .with_protocol(config.protocol)
            .with_reconnect_delay(config.reconnect_delay)
            .with_reconnect_max_attempts(config.reconnect_max_attempts)
            .with_auto_reconnect(config.auto_reconnect)
            .with_ping_interval(config.ping_interval);
        let transport_config_base = match &resolved.session_token {
            Some(token) => transport_config_base.with_token(token.clone()),
            None => transport_config_base,
        };

        Ok(SandboxClient {
            sandbox_url: resolved.sandbox_url,
            session_token: resolved.session_token,
            preview_base: config.preview_base,
            protocol: config.protocol,
            transport_config_base,
            http,
            transport: OnceCell::new(),
        })
    }

    pub fn sandbox_url(&self) -> &str {
        &self.sandbox_url
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// The underlying transport, connecting it on first call
    /// (`spec.md` §4.5: "lazily creates the transport on first need").
    pub async fn transport(&self) -> ClientResult<&Transport> {
        self.transport
            .get_or_try_init(|| async {
                let transport = Transport::spawn(self.transport_config_base.clone());
                transport.connect().await?;
                Ok::<_, sbx_transport::TransportError>(transport)
            })
            .await
            .map_err(ClientError::from)
    }

    /// Connects the transport (if not already connected) and returns a
    /// filesystem facade over it.
    pub async fn filesystem(&self) -> ClientResult<Filesystem> {
        let transport = self.transport().await?.clone();
        Ok(Filesystem::new(self.http.clone(), transport))
    }

    pub fn auth(&self) -> AuthClient {
        AuthClient::new(self.http.clone())
    }

    pub fn sandboxes(&self) -> SandboxesClient {
        SandboxesClient::new(self.http.clone())
    }

    pub async fn signals(&self) -> ClientResult<SignalService> {
        let transport = self.transport().await?.clone();
        Ok(SignalService::new(transport, self.http.clone()).await?)
    }

    /// Creates a terminal resource: `POST /terminals`, subscribes to its
    /// channel, and returns the unified [`Terminal`] (`spec.md` §4.6/§4.7).
    /// Call [`Terminal::into_pty`]/[`Terminal::into_exec`] to commit to a
    /// surface.
    pub async fn create_terminal(&self, pty: bool, shell: Option<String>) -> ClientResult<Terminal> {
        let transport = self.transport().await?.clone();
        let created: TerminalCreated = self
            .http
            .request(
                sbx_http::Method::POST,
                "/terminals",
                Some(&CreateTerminalRequest {
                    shell,
                    pty,
                    encoding: None,
                }),
            )
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?;

        transport.subscribe(created.channel.clone()).await?;

        let encoding = match created.encoding.as_deref() {
            Some("base64") => Encoding::Base64,
            _ => Encoding::Raw,
        };
        Ok(Terminal::new(
            created.id,
            created.channel,
            pty,
            encoding,
            transport,
            self.http.clone(),
        ))
    }

    /// Non-streaming command execution convenience wrapper: creates an
    /// exec-mode terminal, runs `command` to completion, and returns its
    /// captured stdout/stderr/exit code (`SPEC_FULL.md` §C).
    pub async fn run(&self, command: &str) -> ClientResult<CommandResult> {
        Ok(self
            .http
            .request(
                sbx_http::Method::POST,
                "/run/command",
                Some(&RunRequest {
                    command,
                    background: false,
                    stream: false,
                }),
            )
            .await?
            .ok_or(sbx_http::HttpError::Status {
                status: 200,
                message: "empty response body".to_owned(),
            })?)
    }

    /// Streaming command execution: creates an exec-mode terminal, submits
    /// `command` over the two-phase protocol (`spec.md` §4.7), and returns
    /// the exec handle and its pending-command record so the caller can
    /// subscribe to stdout/stderr and `wait` (`SPEC_FULL.md` §C).
    pub async fn run_streaming(
        &self,
        command: &str,
    ) -> ClientResult<(crate::terminal::ExecHandle, crate::terminal::PendingCommand)> {
        let terminal = self.create_terminal(false, None).await?;
        let exec = terminal
            .into_exec()
            .await?
            .expect("create_terminal(pty=false) always yields an exec terminal");
        let pending = exec.submit(CommandOptions::new(command)).await?;
        Ok((exec, pending))
    }

    /// Derives a port-preview URL for this sandbox (`spec.md` §4.5, S5).
    /// Requires `preview_base` to have been configured.
    pub fn preview_url(&self, port: u16) -> Option<String> {
        let preview_base = self.preview_base.as_deref()?;
        let host = Url::parse(&self.sandbox_url).ok()?.host_str()?.to_owned();
        Some(crate::sandboxes::preview_url(&host, port, preview_base))
    }

}

/// `{https->wss, http->ws}://<host>/ws` (`spec.md` §6.3); `protocol`/`token`
/// are appended by `TransportConfig::connection_url`.
fn ws_url(sandbox_url: &str) -> String {
    let mut url = sandbox_url.to_owned();
    if let Some(rest) = url.strip_prefix("https://") {
        url = format!("wss://{rest}");
    } else if let Some(rest) = url.strip_prefix("http://") {
        url = format!("ws://{rest}");
    }
    format!("{}/ws", url.trim_end_matches('/'))
}
