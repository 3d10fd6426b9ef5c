//! Daemon sessions over newline-delimited JSON.
//!
//! A [`Session`] owns one connection. A reader task decodes every line and
//! forwards it, in arrival order, to the session's inbox. Commands are answered
//! in the order they were sent, so [`Session::command`] simply takes the next
//! response off the inbox, parking any push or transport error it meets on
//! the way so [`Session::next_event`] can hand them out afterwards.
//!
//! ```text
//! ┌────────────┐  lines   ┌─────────────┐  SessionEvent  ┌───────────────┐
//! │ DaemonStream│ ───────► │ reader task │ ─────────────► │ Session inbox │
//! └────────────┘          └─────────────┘                └───────────────┘
//!       ▲                                                        │
//!       └──────────── command() writes one JSON line ◄───────────┘
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::WatchError;
use crate::protocol::Pdu;

/// Byte stream to the daemon.
pub trait DaemonIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DaemonIo for T {}

/// A boxed connection to the daemon.
pub type DaemonStream = Box<dyn DaemonIo>;

/// Opens connections to the daemon.
///
/// Called once per (re)initialization.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a fresh connection.
    async fn connect(&self) -> Result<DaemonStream, WatchError>;
}

/// Something the reader task observed.
#[derive(Debug)]
pub enum SessionEvent {
    /// A command response.
    Response(Value),
    /// A subscription push.
    Push(Value),
    /// The connection failed or sent something undecodable.
    Error(WatchError),
    /// The daemon closed the connection.
    End,
}

/// One connection to the daemon.
pub struct Session {
    writer: WriteHalf<DaemonStream>,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
    parked: VecDeque<SessionEvent>,
    reader: JoinHandle<()>,
    ended: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("parked", &self.parked.len())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Starts a session on an open stream.
    #[must_use]
    pub fn start(stream: DaemonStream) -> Self {
        let (read, writer) = tokio::io::split(stream);
        let (tx, inbox) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read, tx));

        Self {
            writer,
            inbox,
            parked: VecDeque::new(),
            reader,
            ended: false,
        }
    }

    /// Sends a command and waits for its response.
    ///
    /// Pushes and transport errors that arrive first are parked for
    /// [`next_event`](Self::next_event).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Disconnected`] if the session ends before the
    /// response arrives, or [`WatchError::Transport`] if the write fails.
    pub async fn command(&mut self, command: &Value) -> Result<Value, WatchError> {
        if self.ended {
            return Err(WatchError::Disconnected);
        }

        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        tracing::trace!(%command, "Sent watchman command");

        loop {
            match self.inbox.recv().await {
                Some(SessionEvent::Response(response)) => return Ok(response),
                Some(SessionEvent::End) | None => {
                    self.ended = true;
                    self.parked.push_back(SessionEvent::End);
                    return Err(WatchError::Disconnected);
                }
                Some(other) => self.parked.push_back(other),
            }
        }
    }

    /// Returns the next push, error, or end-of-session.
    ///
    /// Stray responses (answers to commands nobody is waiting for) are
    /// dropped. After `End` has been returned, every further call returns
    /// `End` again.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            let event = match self.parked.pop_front() {
                Some(event) => event,
                None if self.ended => return SessionEvent::End,
                None => self.inbox.recv().await.unwrap_or(SessionEvent::End),
            };

            match event {
                SessionEvent::Response(response) => {
                    tracing::debug!(%response, "Dropping unsolicited watchman response");
                }
                SessionEvent::End => {
                    self.ended = true;
                    return SessionEvent::End;
                }
                other => return other,
            }
        }
    }

    /// Detaches the reader and closes the write side.
    ///
    /// Does not wait for the daemon to acknowledge anything.
    pub async fn end(mut self) {
        self.reader.abort();
        // The daemon may already be gone.
        let _ = self.writer.shutdown().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // A detached session must never deliver again.
        self.reader.abort();
    }
}

async fn read_loop(read: ReadHalf<DaemonStream>, tx: mpsc::UnboundedSender<SessionEvent>) {
    let mut lines = BufReader::new(read).lines();

    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                Ok(value) => match Pdu::classify(value) {
                    Pdu::Response(value) => SessionEvent::Response(value),
                    Pdu::Subscription(value) => SessionEvent::Push(value),
                    Pdu::Unilateral(value) => {
                        tracing::trace!(pdu = %value, "Ignoring unilateral watchman message");
                        continue;
                    }
                },
                Err(error) => SessionEvent::Error(WatchError::Decode(error)),
            },
            Ok(None) => {
                let _ = tx.send(SessionEvent::End);
                return;
            }
            Err(error) => {
                let _ = tx.send(SessionEvent::Error(WatchError::Transport(error)));
                let _ = tx.send(SessionEvent::End);
                return;
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }
}

/// Connects to the daemon's Unix domain socket.
///
/// The socket is taken from, in order: the explicit path, the
/// `WATCHMAN_SOCK` environment variable, and `watchman get-sockname`.
#[derive(Debug, Clone, Default)]
pub struct UnixSocketConnector {
    socket_path: Option<Utf8PathBuf>,
}

impl UnixSocketConnector {
    /// Creates a connector. `None` discovers the socket on every connect.
    #[must_use]
    pub const fn new(socket_path: Option<Utf8PathBuf>) -> Self {
        Self { socket_path }
    }

    /// Returns the configured socket path, if any.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Utf8Path> {
        self.socket_path.as_deref()
    }

    async fn resolve(&self) -> Result<Utf8PathBuf, WatchError> {
        if let Some(path) = &self.socket_path {
            return Ok(path.clone());
        }

        if let Some(path) = std::env::var_os("WATCHMAN_SOCK") {
            return Utf8PathBuf::from_path_buf(path.into()).map_err(WatchError::non_utf8_path);
        }

        discover_sockname().await
    }
}

#[async_trait]
impl Connector for UnixSocketConnector {
    #[cfg(unix)]
    async fn connect(&self) -> Result<DaemonStream, WatchError> {
        let path = self.resolve().await?;
        let stream = tokio::net::UnixStream::connect(&path)
            .await
            .map_err(|error| WatchError::Connect(format!("{path}: {error}")))?;
        tracing::debug!(socket = %path, "Connected to watchman");
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    async fn connect(&self) -> Result<DaemonStream, WatchError> {
        let path = self.resolve().await?;
        Err(WatchError::Connect(format!(
            "{path}: unix domain sockets are not supported on this platform"
        )))
    }
}

/// Asks the `watchman` binary for its socket.
async fn discover_sockname() -> Result<Utf8PathBuf, WatchError> {
    let output = tokio::process::Command::new("watchman")
        .args(["--output-encoding=json", "--no-pretty", "get-sockname"])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|error| WatchError::Connect(format!("failed to run watchman: {error}")))?;

    if !output.status.success() {
        return Err(WatchError::Connect(format!(
            "watchman get-sockname exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let response: crate::protocol::SocknameResponse = serde_json::from_slice(&output.stdout)?;
    response
        .into_path()
        .ok_or_else(|| WatchError::Connect("watchman get-sockname returned no socket".to_owned()))
}
