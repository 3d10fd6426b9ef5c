//! In-process fakes for the daemon and the filesystem.
//!
//! [`FakeConnector`] hands out one end of a `tokio::io::duplex` pipe per
//! connect and passes the other end to the paired [`FakeDaemon`], which a test
//! drives line by line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::{Notify, Semaphore, mpsc};
use wm_core::{FileKind, FileStat};

use crate::error::WatchError;
use crate::metadata::MetadataSource;
use crate::session::{Connector, DaemonStream};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connects to a [`FakeDaemon`].
#[derive(Debug)]
pub(crate) struct FakeConnector {
    accepted: mpsc::UnboundedSender<DuplexStream>,
    refuse: AtomicU32,
    connects: AtomicU32,
}

impl FakeConnector {
    pub(crate) fn new() -> (Arc<Self>, FakeDaemon) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepted,
            refuse: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        });
        (connector, FakeDaemon { incoming })
    }

    /// Makes the next `count` connects fail.
    pub(crate) fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<DaemonStream, WatchError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(WatchError::Connect("connection refused".to_owned()));
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.accepted
            .send(server)
            .map_err(|_| WatchError::Connect("fake daemon is gone".to_owned()))?;
        Ok(Box::new(client))
    }
}

/// The daemon side of a [`FakeConnector`].
#[derive(Debug)]
pub(crate) struct FakeDaemon {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl FakeDaemon {
    pub(crate) async fn accept(&mut self) -> FakeConnection {
        let stream = self.incoming.recv().await.unwrap();
        let (read, write) = tokio::io::split(stream);
        FakeConnection {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// Accepts a connection and answers the three handshake commands.
    pub(crate) async fn accept_ready(&mut self, root: &Utf8Path) -> FakeConnection {
        let mut conn = self.accept().await;
        conn.handshake(root).await;
        conn
    }
}

/// One accepted connection.
pub(crate) struct FakeConnection {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    write: WriteHalf<DuplexStream>,
}

impl FakeConnection {
    /// Reads the next command and checks its name.
    pub(crate) async fn expect(&mut self, command: &str) -> Value {
        let line = self.lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value[0], command, "unexpected command {value}");
        value
    }

    pub(crate) async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_vec(&value).unwrap();
        line.push(b'\n');
        self.write.write_all(&line).await.unwrap();
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.write.write_all(bytes).await.unwrap();
    }

    /// Reads the next command, or `None` once the client hung up.
    pub(crate) async fn next_command(&mut self) -> Option<Value> {
        let line = self.lines.next_line().await.ok()??;
        Some(serde_json::from_str(&line).unwrap())
    }

    pub(crate) async fn handshake(&mut self, root: &Utf8Path) {
        self.expect("watch-project").await;
        self.send(json!({"version": "2024.01.01", "watch": root, "relative_path": ""}))
            .await;
        self.handshake_tail().await;
    }

    /// Answers `clock` and `subscribe`.
    pub(crate) async fn handshake_tail(&mut self) {
        self.expect("clock").await;
        self.send(json!({"clock": "c:1"})).await;
        self.expect("subscribe").await;
        self.send(json!({"subscribe": "sane-sub", "clock": "c:1"})).await;
    }

    /// Sends a push for the default subscription.
    pub(crate) async fn push(&mut self, files: Value) {
        self.send(json!({"subscription": "sane-sub", "unilateral": true, "files": files}))
            .await;
    }
}

/// A scripted filesystem.
///
/// Paths without an entry are reported as not found. When gated, every stat
/// waits for a permit from [`release`](Self::release).
#[derive(Debug, Default)]
pub(crate) struct FakeMetadata {
    entries: Mutex<FxHashMap<Utf8PathBuf, Result<FileStat, std::io::ErrorKind>>>,
    calls: AtomicUsize,
    called: Notify,
    gate: Option<Semaphore>,
}

impl FakeMetadata {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub(crate) fn file(&self, path: impl Into<Utf8PathBuf>) {
        self.entries
            .lock()
            .insert(path.into(), Ok(FileStat::new(FileKind::File, 1)));
    }

    pub(crate) fn dir(&self, path: impl Into<Utf8PathBuf>) {
        self.entries
            .lock()
            .insert(path.into(), Ok(FileStat::new(FileKind::Directory, 0)));
    }

    pub(crate) fn fail(&self, path: impl Into<Utf8PathBuf>, kind: std::io::ErrorKind) {
        self.entries.lock().insert(path.into(), Err(kind));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Waits until at least one stat has started.
    pub(crate) async fn wait_called(&self) {
        let notified = self.called.notified();
        if self.calls() > 0 {
            return;
        }
        notified.await;
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn stat(&self, path: &Utf8Path) -> std::io::Result<FileStat> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_waiters();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match self.entries.lock().get(path) {
            Some(Ok(stat)) => Ok(*stat),
            Some(Err(kind)) => Err(std::io::Error::from(*kind)),
            None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
        }
    }
}
