//! Client SDK and transport layer for the remote sandbox-execution service
//! (`spec.md` §1). This crate is C5-C10: the client root, credential and
//! endpoint resolution, the channel-scoped resource clients (terminal in
//! PTY/exec mode, file watcher, signal service), and the thin HTTP-backed
//! auth/sandbox control surface. The wire codec (`sbx-wire`), transport and
//! event bus (`sbx-transport`), and the HTTP request layer (`sbx-http`) are
//! separate crates this one depends on and partially re-exports.

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod filesystem;
pub mod sandboxes;
pub mod signals;
pub mod terminal;
pub mod watcher;

pub use auth::{AuthClient, AuthError};
pub use client::{CommandResult, SandboxClient};
pub use config::SandboxClientConfig;
pub use credentials::{CredentialStore, CredentialStoreError, JsonFileCredentialStore, Slot};
pub use error::{ClientError, ClientResult};
pub use filesystem::{Filesystem, FilesystemError};
pub use sandboxes::{SandboxError, SandboxesClient};
pub use signals::{ErrorSignal, PortSignal, RawSignal, SignalError, SignalService};
pub use terminal::{
    CommandExit, CommandOptions, CommandState, Encoding, ExecHandle, PendingCommand, PtyHandle,
    Terminal, TerminalError, TerminalOutput, TerminalState,
};
pub use watcher::{ChangeKind, FileChanged, FileWatcher, WatcherError};

pub use sbx_http::{HttpClient, HttpError, Method};
pub use sbx_transport::{LifecycleEvent, ProtocolMode, Transport, TransportConfig};
pub use sbx_wire::{Frame, Kind, KvMap, Payload, Value};
