//! The public watcher handle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── manager task (tokio::spawn) ─────────────┐
//! │  ConnectionManager ──► Session ──► HandshakeSequencer ──► WatchContext   │
//! │         │                 │                                   │          │
//! │         │              pushes ──► ChangeProcessor ◄── reads ──┘          │
//! │         │                              │                                 │
//! │         │                        stat tasks (tokio::spawn)               │
//! └─────────│──────────────────────────────│──────────────────────────────────┘
//!           ▼                              ▼
//!        EventBus ──► observers / UnboundedReceiver<WatcherEvent>
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use camino::Utf8Path;
//! use wm_core::WatcherOptions;
//! use wm_watcher::{EventKind, WatcherEvent, WatchmanWatcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wm_watcher::WatchError> {
//!     let mut watcher = WatchmanWatcher::new(Utf8Path::new("./src"), WatcherOptions::default())?;
//!     let mut events = watcher.subscribe(&[EventKind::Ready, EventKind::All, EventKind::Error]);
//!     watcher.start()?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let WatcherEvent::All(kind, change) = event {
//!             println!("{kind} {}", change.path);
//!         }
//!     }
//!
//!     watcher.shutdown().await
//! }
//! ```

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wm_core::{WatchRoot, WatcherOptions};

use crate::connection::ConnectionManager;
use crate::context::WatchContext;
use crate::error::WatchError;
use crate::events::{EventBus, EventKind, WatcherEvent};
use crate::filter::{CompositeFilter, FileFilter, GlobFilter, IgnoreFilter};
use crate::metadata::{MetadataSource, TokioMetadata};
use crate::processor::{ChangeProcessor, Outlet};
use crate::session::{Connector, UnixSocketConnector};
use crate::stats::{StatsSnapshot, WatcherStats};

/// A live subscription to the watchman daemon for one directory.
///
/// # Lifecycle
///
/// 1. **Creation**: [`new`](Self::new) validates the directory and options.
///    Nothing is connected yet.
/// 2. **Wiring**: register observers with [`on`](Self::on) or
///    [`subscribe`](Self::subscribe); swap collaborators with the `with_*`
///    builders.
/// 3. **Start**: [`start`](Self::start) spawns the manager task, which
///    connects, runs the handshake and emits [`WatcherEvent::Ready`].
/// 4. **Shutdown**: [`close`](Self::close) detaches every observer and ends
///    the session without waiting for the daemon; [`shutdown`](Self::shutdown)
///    also joins the manager task. Dropping the watcher closes it.
///
/// Stat queries already in flight when the watcher is closed complete, but
/// their results are discarded.
pub struct WatchmanWatcher {
    root: Utf8PathBuf,
    options: WatcherOptions,
    bus: Arc<EventBus>,
    stats: Arc<WatcherStats>,
    context: WatchContext,
    cancel: CancellationToken,
    connector: Arc<dyn Connector>,
    metadata: Arc<dyn MetadataSource>,
    extra_filters: CompositeFilter,
    task_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatchmanWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchmanWatcher")
            .field("root", &self.root)
            .field("subscription", &self.options.subscription_name)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl WatchmanWatcher {
    /// Creates a watcher for `path`.
    ///
    /// The path is canonicalized; events report paths relative to it.
    ///
    /// # Errors
    ///
    /// - [`WatchError::PathNotFound`] if the path does not exist
    /// - [`WatchError::Metadata`] if it cannot be canonicalized
    /// - [`WatchError::NonUtf8Path`] if the canonical path is not UTF-8
    /// - [`WatchError::Config`] if the options are invalid
    pub fn new(path: &Utf8Path, options: WatcherOptions) -> Result<Self, WatchError> {
        options.validate()?;

        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }

        let canonical = path
            .as_std_path()
            .canonicalize()
            .map_err(|source| WatchError::Metadata {
                path: path.to_owned(),
                source,
            })?;
        let root = Utf8PathBuf::from_path_buf(canonical).map_err(WatchError::non_utf8_path)?;

        let connector = Arc::new(UnixSocketConnector::new(options.socket_path.clone()));

        Ok(Self {
            root,
            options,
            bus: Arc::new(EventBus::new()),
            stats: Arc::new(WatcherStats::new()),
            context: WatchContext::new(),
            cancel: CancellationToken::new(),
            connector,
            metadata: Arc::new(TokioMetadata),
            extra_filters: CompositeFilter::new(),
            task_handle: None,
        })
    }

    /// Replaces the daemon connector.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replaces the filesystem metadata source.
    #[must_use]
    pub fn with_metadata_source(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds an ignore predicate. Records for which it returns `true` produce
    /// no events.
    ///
    /// The predicate receives the path relative to the watched directory.
    #[must_use]
    pub fn with_ignore<F>(self, predicate: F) -> Self
    where
        F: Fn(&Utf8Path) -> bool + Send + Sync + 'static,
    {
        self.with_filter(IgnoreFilter::new(predicate))
    }

    /// Adds a filter that must accept a record for it to produce events.
    #[must_use]
    pub fn with_filter<F: FileFilter>(mut self, filter: F) -> Self {
        self.extra_filters = std::mem::take(&mut self.extra_filters).and(filter);
        self
    }

    /// Registers an observer for one event kind.
    pub fn on<F>(&self, kind: EventKind, observer: F)
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, observer);
    }

    /// Returns a receiver fed with every event of the given kinds.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<WatcherEvent> {
        self.bus.subscribe(kinds)
    }

    /// Spawns the manager task. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Glob`] if an inclusion glob is invalid
    /// - [`WatchError::ChannelClosed`] if the watcher was already closed
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.cancel.is_cancelled() {
            return Err(WatchError::ChannelClosed);
        }
        if self.task_handle.is_some() {
            return Ok(());
        }

        let globs = GlobFilter::new(&self.options.globs, self.options.dot)?;
        let extra = std::mem::take(&mut self.extra_filters);
        let filter: Arc<dyn FileFilter> = Arc::new(CompositeFilter::new().and(globs).and(extra));

        let outlet = Outlet::new(Arc::clone(&self.bus), Arc::clone(&self.stats));
        let processor = ChangeProcessor::new(
            self.options.subscription_name.clone(),
            self.root.clone(),
            self.context.clone(),
            filter,
            Arc::clone(&self.metadata),
            &self.options.defer_states,
            outlet.clone(),
            self.cancel.clone(),
        );
        let manager = ConnectionManager::new(
            self.root.clone(),
            self.options.clone(),
            Arc::clone(&self.connector),
            processor,
            self.context.clone(),
            outlet,
            self.cancel.clone(),
        );

        tracing::info!(
            root = %self.root,
            subscription = %self.options.subscription_name,
            "Starting watchman watcher"
        );
        self.task_handle = Some(tokio::spawn(manager.run()));
        Ok(())
    }

    /// Returns the watched directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the watch root of the current session, or `None` before the
    /// first handshake completes and between sessions.
    #[must_use]
    pub fn watch_root(&self) -> Option<Arc<WatchRoot>> {
        self.context.get()
    }

    /// Returns a snapshot of the watcher's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns `true` while the manager task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Detaches every observer and ends the session.
    ///
    /// Returns immediately; the daemon is not asked to acknowledge anything.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!(root = %self.root, "Closing watchman watcher");
        self.cancel.cancel();
        self.bus.clear();
    }

    /// Closes the watcher and waits for the manager task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the manager task panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        self.close();

        if let Some(handle) = self.task_handle.take() {
            handle.await.map_err(|_join_error| WatchError::ChannelClosed)?;
        }

        Ok(())
    }
}

impl Drop for WatchmanWatcher {
    fn drop(&mut self) {
        // The manager stops at its next suspension point.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeDaemon, FakeMetadata};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wm_core::{ChangeKind, FileChange, FileKind, FileStat};

    struct Fixture {
        _dir: tempfile::TempDir,
        watcher: WatchmanWatcher,
        daemon: FakeDaemon,
        connector: Arc<FakeConnector>,
        metadata: Arc<FakeMetadata>,
    }

    fn fixture(options: WatcherOptions) -> Fixture {
        fixture_with(options, FakeMetadata::new())
    }

    fn fixture_with(options: WatcherOptions, metadata: Arc<FakeMetadata>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let (connector, daemon) = FakeConnector::new();
        let watcher = WatchmanWatcher::new(&path, options)
            .unwrap()
            .with_connector(Arc::clone(&connector) as Arc<dyn Connector>)
            .with_metadata_source(Arc::clone(&metadata) as Arc<dyn MetadataSource>);
        Fixture {
            _dir: dir,
            watcher,
            daemon,
            connector,
            metadata,
        }
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<WatcherEvent>) -> WatcherEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_new_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("missing")).unwrap();
        let result = WatchmanWatcher::new(&missing, WatcherOptions::default());
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[test]
    fn test_new_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let options = WatcherOptions {
            subscription_name: String::new(),
            ..WatcherOptions::default()
        };
        let result = WatchmanWatcher::new(&path, options);
        assert!(matches!(result, Err(WatchError::Config(_))));
    }

    #[test]
    fn test_builder_filters_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let watcher = WatchmanWatcher::new(&path, WatcherOptions::default())
            .unwrap()
            .with_ignore(|path: &Utf8Path| path.starts_with("target"))
            .with_filter(GlobFilter::new(&["**/*.rs".to_owned()], true).unwrap());

        assert_eq!(watcher.extra_filters.len(), 2);
        assert!(watcher.extra_filters.should_process(Utf8Path::new("src/lib.rs")));
        assert!(!watcher.extra_filters.should_process(Utf8Path::new("target/debug/build.rs")));
        assert!(!watcher.extra_filters.should_process(Utf8Path::new("README.md")));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_glob() {
        let mut fx = fixture(WatcherOptions {
            globs: vec!["src/[oops".to_owned()],
            ..WatcherOptions::default()
        });
        assert!(matches!(fx.watcher.start(), Err(WatchError::Glob(_))));
        assert!(!fx.watcher.is_running());
    }

    #[tokio::test]
    async fn test_ready_then_add_scenario() {
        let mut fx = fixture(WatcherOptions::default());
        let root = fx.watcher.root().to_owned();
        fx.metadata.file(root.join("a.txt"));

        let mut events = fx.watcher.subscribe(&EventKind::ALL_KINDS);
        fx.watcher.start().unwrap();
        assert!(fx.watcher.watch_root().is_none());

        let mut conn = fx.daemon.accept_ready(&root).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Ready));
        assert_eq!(
            fx.watcher.watch_root().as_deref(),
            Some(&WatchRoot::new(root.clone(), ""))
        );

        conn.push(json!([{"name": "a.txt", "exists": true, "new": true}]))
            .await;

        let expected = FileChange::new("a.txt", root.clone(), Some(FileStat::new(FileKind::File, 1)));
        match next(&mut events).await {
            WatcherEvent::Add(change) => assert_eq!(change, expected),
            other => panic!("expected add, got {other:?}"),
        }
        match next(&mut events).await {
            WatcherEvent::All(ChangeKind::Add, change) => assert_eq!(change, expected),
            other => panic!("expected all, got {other:?}"),
        }

        fx.watcher.shutdown().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_scenario_performs_no_stat() {
        let mut fx = fixture(WatcherOptions::default());
        let root = fx.watcher.root().to_owned();
        let mut events = fx.watcher.subscribe(&[EventKind::Ready, EventKind::Delete, EventKind::All]);
        fx.watcher.start().unwrap();

        let mut conn = fx.daemon.accept_ready(&root).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Ready));

        conn.push(json!([{"name": "b.txt", "exists": false}])).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Delete(change) if change.path == "b.txt"));
        assert!(matches!(next(&mut events).await, WatcherEvent::All(ChangeKind::Delete, _)));
        assert_eq!(fx.metadata.calls(), 0);

        fx.watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_fires_once_per_handshake() {
        let mut fx = fixture(WatcherOptions::default());
        let root = fx.watcher.root().to_owned();
        let readies = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&readies);
        fx.watcher.on(EventKind::Ready, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut events = fx.watcher.subscribe(&[EventKind::Ready]);
        fx.watcher.start().unwrap();

        let conn = fx.daemon.accept_ready(&root).await;
        next(&mut events).await;
        assert_eq!(readies.load(Ordering::SeqCst), 1);

        drop(conn);
        let _conn = fx.daemon.accept_ready(&root).await;
        next(&mut events).await;
        assert_eq!(readies.load(Ordering::SeqCst), 2);
        assert_eq!(fx.watcher.stats().handshakes, 2);

        fx.watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ignore_predicate_and_globs() {
        let mut fx = fixture(WatcherOptions {
            globs: vec!["**/*.js".to_owned()],
            ..WatcherOptions::default()
        });
        fx.watcher = fx
            .watcher
            .with_ignore(|path: &Utf8Path| path.starts_with("node_modules"));
        let root = fx.watcher.root().to_owned();
        let mut events = fx.watcher.subscribe(&[EventKind::Ready, EventKind::All]);
        fx.watcher.start().unwrap();

        let mut conn = fx.daemon.accept_ready(&root).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Ready));

        // Globs disable the daemon-side dotfile expression.
        conn.push(json!([
            {"name": "node_modules/pkg/index.js", "exists": false},
            {"name": "styles.css", "exists": false},
            {"name": ".eslintrc.js", "exists": false},
            {"name": "src/app.js", "exists": false}
        ]))
        .await;

        match next(&mut events).await {
            WatcherEvent::All(ChangeKind::Delete, change) => assert_eq!(change.path, "src/app.js"),
            other => panic!("expected delete of src/app.js, got {other:?}"),
        }
        assert_eq!(fx.watcher.stats().filtered, 3);

        fx.watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_subscription_scenario() {
        let mut fx = fixture(WatcherOptions::default());
        let root = fx.watcher.root().to_owned();
        let mut events = fx.watcher.subscribe(&EventKind::ALL_KINDS);
        fx.watcher.start().unwrap();

        let mut conn = fx.daemon.accept_ready(&root).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Ready));

        conn.send(json!({
            "subscription": "someone-else",
            "unilateral": true,
            "files": [{"name": "b.txt", "exists": false}]
        }))
        .await;

        match next(&mut events).await {
            WatcherEvent::Error(error) => {
                assert!(error.is_fatal());
                assert!(matches!(error.as_ref(), WatchError::InvariantViolation(_)));
            }
            other => panic!("expected invariant violation, got {other:?}"),
        }

        // The session itself is still alive.
        conn.push(json!([{"name": "c.txt", "exists": false}])).await;
        assert!(matches!(next(&mut events).await, WatcherEvent::Delete(_)));
        assert_eq!(fx.connector.connects(), 1);

        fx.watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_subscription_name() {
        let mut fx = fixture(WatcherOptions {
            subscription_name: "my-build".to_owned(),
            ..WatcherOptions::default()
        });
        let root = fx.watcher.root().to_owned();
        fx.watcher.start().unwrap();

        let mut conn = fx.daemon.accept().await;
        conn.expect("watch-project").await;
        conn.send(json!({"watch": root, "relative_path": ""})).await;
        conn.expect("clock").await;
        conn.send(json!({"clock": "c:9"})).await;
        let subscribe = conn.expect("subscribe").await;
        assert_eq!(subscribe[2], "my-build");

        fx.watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_discards_in_flight_stat() {
        let mut fx = fixture_with(WatcherOptions::default(), FakeMetadata::gated());
        let root = fx.watcher.root().to_owned();
        fx.metadata.file(root.join("a.txt"));

        let adds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&adds);
        fx.watcher.on(EventKind::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut ready = fx.watcher.subscribe(&[EventKind::Ready]);
        fx.watcher.start().unwrap();

        let mut conn = fx.daemon.accept_ready(&root).await;
        next(&mut ready).await;
        conn.push(json!([{"name": "a.txt", "exists": true, "new": true}]))
            .await;
        fx.metadata.wait_called().await;

        let metadata = Arc::clone(&fx.metadata);
        fx.watcher.shutdown().await.unwrap();
        metadata.release(1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(adds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_after_close_fails() {
        let mut fx = fixture(WatcherOptions::default());
        fx.watcher.close();
        assert!(matches!(fx.watcher.start(), Err(WatchError::ChannelClosed)));
    }
}
