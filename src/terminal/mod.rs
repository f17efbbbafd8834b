//! Unified terminal channel client (`spec.md` §4.6/§4.7). One `Terminal`
//! type carries a `pty: bool` flag; `into_pty()`/`into_exec()` split it into
//! the PTY surface (`write`/`resize`/`destroy`) or the exec surface
//! (two-phase streaming command execution), per Design Notes §9 item 3 and
//! Open Question decision #3 in `DESIGN.md`. Calling the wrong accessor is
//! a type-level dead end (`None`), not a runtime bool check.

mod exec;
mod pty;

pub use exec::{CommandExit, CommandOptions, CommandState, ExecHandle, PendingCommand};
pub use pty::{PtyHandle, TerminalOutput};

use sbx_http::HttpClient;
use sbx_transport::Transport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("transport: {0}")]
    Transport(#[from] sbx_transport::TransportError),

    #[error("http: {0}")]
    Http(#[from] sbx_http::HttpError),

    #[error("{0}: base64 payload was not valid: {1}")]
    BadBase64(&'static str, base64::DecodeError),

    #[error("wait for command {cmd_id} timed out")]
    WaitTimedOut { cmd_id: String },

    #[error("resize failed: terminal {id} is not running")]
    NotRunning { id: String },

    #[error("expected a response body from {0}, got none")]
    MissingResponseBody(&'static str),
}

pub type TerminalResult<T> = Result<T, TerminalError>;

/// How output/content bytes are carried on the wire for a given channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Base64,
}

impl Encoding {
    pub(crate) fn parse(tag: Option<&str>, default: Encoding) -> Encoding {
        match tag {
            Some("base64") => Encoding::Base64,
            Some("raw") => Encoding::Raw,
            _ => default,
        }
    }

    pub(crate) fn decode(self, text: &str) -> TerminalResult<Vec<u8>> {
        match self {
            Encoding::Raw => Ok(text.as_bytes().to_vec()),
            Encoding::Base64 => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(text)
                    .map_err(|e| TerminalError::BadBase64("terminal output", e))
            }
        }
    }
}

/// `running`/`ready` are normalized to `Running` on creation; `Stopped`
/// follows a `terminal:destroyed` frame (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Running,
    Stopped,
}

pub(crate) struct TerminalCore {
    pub(crate) id: String,
    pub(crate) channel: String,
    pub(crate) encoding: Encoding,
    pub(crate) transport: Transport,
    pub(crate) http: HttpClient,
}

/// A terminal resource, in PTY or exec mode, before the caller has
/// committed to one surface via [`Terminal::into_pty`]/[`Terminal::into_exec`].
pub struct Terminal {
    pub(crate) core: TerminalCore,
    pub(crate) pty: bool,
}

impl Terminal {
    pub(crate) fn new(
        id: String,
        channel: String,
        pty: bool,
        encoding: Encoding,
        transport: Transport,
        http: HttpClient,
    ) -> Self {
        Terminal {
            core: TerminalCore {
                id,
                channel,
                encoding,
                transport,
                http,
            },
            pty,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    pub fn is_pty(&self) -> bool {
        self.pty
    }

    /// Registers this terminal's channel handlers and returns the PTY
    /// surface. Returns `Ok(None)` if this terminal was created in exec
    /// mode (a type-level dead end rather than a runtime bool check, per
    /// Open Question decision #3 in `DESIGN.md`); `Err` only if handler
    /// registration itself fails (the transport actor is gone).
    pub async fn into_pty(self) -> TerminalResult<Option<PtyHandle>> {
        if !self.pty {
            return Ok(None);
        }
        Ok(Some(PtyHandle::new(self.core).await?))
    }

    /// Registers this terminal's channel handlers and returns the exec
    /// surface. Returns `Ok(None)` if this terminal was created in PTY
    /// mode.
    pub async fn into_exec(self) -> TerminalResult<Option<ExecHandle>> {
        if self.pty {
            return Ok(None);
        }
        Ok(Some(ExecHandle::new(self.core).await?))
    }
}
