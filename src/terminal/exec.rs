//! Exec-mode terminal channel client (`spec.md` §4.7): the two-phase
//! streaming command-execution protocol. A command is submitted over HTTP,
//! the client subscribes to the returned per-command channel, only then
//! sends `command:start`, and the server is contractually forbidden from
//! broadcasting `stdout`/`stderr`/`exit` before that trigger arrives
//! (`spec.md` §8 testable property #6).

use crate::terminal::{Encoding, TerminalCore, TerminalError, TerminalResult};
use sbx_transport::{Frame, HandlerId, Key, KvMap, Payload, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::warn;

const STDOUT_CAPACITY: usize = 512;
const STDERR_CAPACITY: usize = 512;

/// The pending record a streaming `POST /run/command` responds with
/// (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct PendingCommand {
    pub cmd_id: String,
    pub channel: String,
    pub status: String,
}

/// Command state machine (`spec.md` §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum CommandState {
    Pending,
    Running,
    Completed { exit_code: i64, duration_ms: u64 },
    Failed { exit_code: i64, duration_ms: u64 },
    TimedOut,
}

impl CommandState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Completed { .. } | CommandState::Failed { .. } | CommandState::TimedOut
        )
    }
}

/// The final `command:exit` record (`spec.md` §4.7 "Wait semantics").
#[derive(Debug, Clone, PartialEq)]
pub struct CommandExit {
    pub exit_code: i64,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Options for [`ExecHandle::submit`], mapping to the `POST /run/command`
/// body (`spec.md` §6.4).
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub command: String,
    pub shell: Option<String>,
    pub background: bool,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
}

impl CommandOptions {
    pub fn new(command: impl Into<String>) -> Self {
        CommandOptions {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[derive(Serialize)]
struct RunCommandRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: &'a Option<String>,
    background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: &'a Option<HashMap<String, String>>,
    stream: bool,
}

struct CommandEntry {
    state: Mutex<CommandState>,
    notify: Notify,
    stdout_tx: broadcast::Sender<Vec<u8>>,
    stderr_tx: broadcast::Sender<Vec<u8>>,
    handler_id: HandlerId,
}

/// The exec surface of a terminal resource: two-phase streaming command
/// execution, per-command state, `wait` (`spec.md` §4.7).
pub struct ExecHandle {
    core: TerminalCore,
    commands: Arc<Mutex<HashMap<String, Arc<CommandEntry>>>>,
}

impl ExecHandle {
    pub(crate) async fn new(core: TerminalCore) -> TerminalResult<Self> {
        Ok(ExecHandle {
            core,
            commands: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Submits a command via the two-phase streaming protocol. Returns once
    /// the client has subscribed to the command channel and sent
    /// `command:start` — not once the command has finished (use
    /// [`Self::wait`] for that).
    pub async fn submit(&self, options: CommandOptions) -> TerminalResult<PendingCommand> {
        let body = RunCommandRequest {
            command: &options.command,
            shell: &options.shell,
            background: options.background,
            cwd: &options.cwd,
            env: &options.env,
            stream: true,
        };

        let pending: PendingCommand = self
            .core
            .http
            .request(sbx_http::Method::POST, "/run/command", Some(&body))
            .await?
            .ok_or(TerminalError::MissingResponseBody("POST /run/command"))?;

        // Step 2: subscribe before anything else can be sent or received.
        self.core
            .transport
            .subscribe(pending.channel.clone())
            .await?;

        let (stdout_tx, _) = broadcast::channel(STDOUT_CAPACITY);
        let (stderr_tx, _) = broadcast::channel(STDERR_CAPACITY);
        let entry = Arc::new(CommandEntry {
            state: Mutex::new(CommandState::Pending),
            notify: Notify::new(),
            stdout_tx,
            stderr_tx,
            handler_id: self.install_handler(&pending.channel, &pending.cmd_id).await?,
        });
        self.commands
            .lock()
            .unwrap()
            .insert(pending.cmd_id.clone(), entry);

        // Step 3: only now may the server begin broadcasting.
        let mut start_payload = KvMap::new();
        start_payload.insert("cmd_id", Value::String(pending.cmd_id.clone()));
        self.core
            .transport
            .send(Frame::data(
                pending.channel.clone(),
                "command:start",
                Payload::Map(start_payload),
            ))
            .await?;

        Ok(pending)
    }

    async fn install_handler(
        &self,
        channel: &str,
        cmd_id: &str,
    ) -> TerminalResult<HandlerId> {
        let commands = Arc::clone(&self.commands);
        let cmd_id = cmd_id.to_owned();
        let default_encoding = self.core.encoding;

        let id = self
            .core
            .transport
            .on(
                Key::Channel(channel.to_owned()),
                Box::new(move |frame| {
                    let Some(entry) = commands.lock().unwrap().get(&cmd_id).cloned() else {
                        return;
                    };
                    match frame.msg_type.as_str() {
                        "command:stdout" => {
                            if let Some(bytes) = decode_stream_payload(&frame.payload, default_encoding) {
                                *entry.state.lock().unwrap() = CommandState::Running;
                                let _ = entry.stdout_tx.send(bytes);
                            }
                        }
                        "command:stderr" => {
                            if let Some(bytes) = decode_stream_payload(&frame.payload, default_encoding) {
                                *entry.state.lock().unwrap() = CommandState::Running;
                                let _ = entry.stderr_tx.send(bytes);
                            }
                        }
                        "command:exit" => {
                            let (exit_code, duration_ms) = match &frame.payload {
                                Payload::Map(map) => (
                                    map.get_number("exit_code").unwrap_or(-1.0) as i64,
                                    map.get_number("duration_ms").unwrap_or(0.0) as u64,
                                ),
                                _ => (-1, 0),
                            };
                            let state = if exit_code < 0 {
                                CommandState::Failed {
                                    exit_code,
                                    duration_ms,
                                }
                            } else {
                                CommandState::Completed {
                                    exit_code,
                                    duration_ms,
                                }
                            };
                            *entry.state.lock().unwrap() = state;
                            entry.notify.notify_waiters();
                        }
                        _ => {}
                    }
                }),
            )
            .await?;
        Ok(id)
    }

    /// Current state of a previously submitted command, or `None` if
    /// `cmd_id` is unknown to this handle.
    pub fn state(&self, cmd_id: &str) -> Option<CommandState> {
        self.commands
            .lock()
            .unwrap()
            .get(cmd_id)
            .map(|e| e.state.lock().unwrap().clone())
    }

    pub fn subscribe_stdout(&self, cmd_id: &str) -> Option<broadcast::Receiver<Vec<u8>>> {
        self.commands
            .lock()
            .unwrap()
            .get(cmd_id)
            .map(|e| e.stdout_tx.subscribe())
    }

    pub fn subscribe_stderr(&self, cmd_id: &str) -> Option<broadcast::Receiver<Vec<u8>>> {
        self.commands
            .lock()
            .unwrap()
            .get(cmd_id)
            .map(|e| e.stderr_tx.subscribe())
    }

    /// Waits for `cmd_id`'s exit frame. Returns immediately if the command
    /// has already reached a terminal state. `timeout` of `None` waits
    /// indefinitely (`spec.md` §4.7 "Wait semantics").
    pub async fn wait(&self, cmd_id: &str, timeout: Option<Duration>) -> TerminalResult<CommandExit> {
        let entry = self
            .commands
            .lock()
            .unwrap()
            .get(cmd_id)
            .cloned()
            .ok_or_else(|| TerminalError::WaitTimedOut {
                cmd_id: cmd_id.to_owned(),
            })?;

        loop {
            if let Some(exit) = terminal_exit(&entry) {
                return exit;
            }
            if *entry.state.lock().unwrap() == CommandState::TimedOut {
                return Err(TerminalError::WaitTimedOut {
                    cmd_id: cmd_id.to_owned(),
                });
            }

            let notified = entry.notify.notified();
            match timeout {
                Some(d) => {
                    if tokio::time::timeout(d, notified).await.is_err() {
                        *entry.state.lock().unwrap() = CommandState::TimedOut;
                        return Err(TerminalError::WaitTimedOut {
                            cmd_id: cmd_id.to_owned(),
                        });
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Drops the wait without sending a cancel frame — the command
    /// continues server-side (`spec.md` §4.7 "Cancellation"). There is
    /// nothing to clean up client-side: dropping the `wait` future is the
    /// entire contract.
    pub fn cancel_wait(&self) {}

    /// Fetches final state from the server's retrieve endpoint, for
    /// recovering a command whose wait failed on a transport closure
    /// (`spec.md` §4.7 "Failure semantics"). Also updates this handle's
    /// local state for `cmd_id` if it is still tracked.
    pub async fn retrieve(&self, cmd_id: &str) -> TerminalResult<CommandExit> {
        let exit: RetrievedCommand = self
            .core
            .http
            .request(
                sbx_http::Method::GET,
                &format!("/run/command/{cmd_id}"),
                None::<&()>,
            )
            .await?
            .ok_or(TerminalError::MissingResponseBody("GET /run/command/{cmd_id}"))?;

        if let Some(entry) = self.commands.lock().unwrap().get(cmd_id) {
            let state = if exit.exit_code < 0 {
                CommandState::Failed {
                    exit_code: exit.exit_code,
                    duration_ms: exit.duration_ms,
                }
            } else {
                CommandState::Completed {
                    exit_code: exit.exit_code,
                    duration_ms: exit.duration_ms,
                }
            };
            *entry.state.lock().unwrap() = state;
            entry.notify.notify_waiters();
        }

        Ok(CommandExit {
            exit_code: exit.exit_code,
            duration_ms: exit.duration_ms,
            timed_out: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RetrievedCommand {
    exit_code: i64,
    duration_ms: u64,
}


fn terminal_exit(entry: &CommandEntry) -> Option<TerminalResult<CommandExit>> {
    match entry.state.lock().unwrap().clone() {
        CommandState::Completed {
            exit_code,
            duration_ms,
        }
        | CommandState::Failed {
            exit_code,
            duration_ms,
        } => Some(Ok(CommandExit {
            exit_code,
            duration_ms,
            timed_out: false,
        })),
        CommandState::TimedOut => None,
        _ => None,
    }
}

fn decode_stream_payload(payload: &Payload, default_encoding: Encoding) -> Option<Vec<u8>> {
    match payload {
        Payload::Map(map) => {
            let text = map.get_str("data")?;
            let encoding = Encoding::parse(map.get_str("encoding"), default_encoding);
            match encoding.decode(text) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable command stream frame");
                    None
                }
            }
        }
        Payload::Text(t) => Some(t.as_bytes().to_vec()),
        Payload::Bytes(b) => Some(b.clone()),
        Payload::Empty => None,
    }
}
