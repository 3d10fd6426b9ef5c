//! Turns subscription pushes into normalized change events.
//!
//! # Record Pipeline
//!
//! ```text
//! push ─► subscription name check ─► fresh_instance? ─► per record:
//!
//!   malformed ───────────────────► Error(Decode), rest of push continues
//!   filter rejects ──────────────► (nothing)
//!   exists: false ───────────────► Delete + All
//!   exists: true ─► stat task ─┬─► not found ─► (nothing)
//!                              ├─► error ─────► Error(Metadata)
//!                              └─► ok ─► classify ─► Add/Change + All
//! ```
//!
//! Stat tasks run independently, so two records from near-simultaneous pushes
//! may be emitted in either order. Each record's own classification is always
//! based on its own data.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wm_core::{ChangeKind, ChangeRecord, FileChange, FileStat, WatchRoot};

use crate::context::WatchContext;
use crate::error::WatchError;
use crate::events::{EventBus, WatcherEvent};
use crate::filter::FileFilter;
use crate::metadata::MetadataSource;
use crate::protocol::SubscriptionPush;
use crate::stats::WatcherStats;
use crate::warnings::WarningPolicy;

/// Classifies an existing record from its `new` flag and its metadata.
///
/// | `new` | target    | result   |
/// |-------|-----------|----------|
/// | true  | any       | `Add`    |
/// | false | directory | nothing  |
/// | false | otherwise | `Change` |
///
/// Directory modification times change whenever an entry is added or removed,
/// which the entry's own record already reports.
#[must_use]
pub fn classify(is_new: bool, stat: &FileStat) -> Option<ChangeKind> {
    if is_new {
        Some(ChangeKind::Add)
    } else if stat.is_dir() {
        None
    } else {
        Some(ChangeKind::Change)
    }
}

/// Emits events and keeps the counters in step with them.
#[derive(Debug, Clone)]
pub(crate) struct Outlet {
    bus: Arc<EventBus>,
    stats: Arc<WatcherStats>,
}

impl Outlet {
    pub(crate) const fn new(bus: Arc<EventBus>, stats: Arc<WatcherStats>) -> Self {
        Self { bus, stats }
    }

    pub(crate) fn emit(&self, event: &WatcherEvent) {
        self.bus.emit(event);
    }

    pub(crate) fn change(&self, kind: ChangeKind, change: FileChange) {
        tracing::debug!(kind = %kind, path = %change.path, "Emitting change");
        self.stats.record_event();
        self.bus.emit_change(kind, change);
    }

    pub(crate) fn error(&self, error: WatchError) {
        self.stats.record_error();
        self.bus.emit_error(error);
    }

    pub(crate) fn stats(&self) -> &WatcherStats {
        &self.stats
    }
}

/// Handles pushes for one watcher.
///
/// The processor outlives sessions: it reads the current [`WatchRoot`] from
/// the shared [`WatchContext`] on every push.
pub(crate) struct ChangeProcessor {
    subscription: String,
    watched_dir: Utf8PathBuf,
    context: WatchContext,
    filter: Arc<dyn FileFilter>,
    metadata: Arc<dyn MetadataSource>,
    defer_states: FxHashSet<String>,
    outlet: Outlet,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChangeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeProcessor")
            .field("subscription", &self.subscription)
            .field("watched_dir", &self.watched_dir)
            .field("defer_states", &self.defer_states)
            .finish_non_exhaustive()
    }
}

impl ChangeProcessor {
    #[allow(clippy::too_many_arguments)] // Wiring only; built once per watcher
    pub(crate) fn new(
        subscription: String,
        watched_dir: Utf8PathBuf,
        context: WatchContext,
        filter: Arc<dyn FileFilter>,
        metadata: Arc<dyn MetadataSource>,
        defer_states: &[String],
        outlet: Outlet,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            watched_dir,
            context,
            filter,
            metadata,
            defer_states: defer_states.iter().cloned().collect(),
            outlet,
            cancel,
        }
    }

    /// Handles one push.
    ///
    /// Returns the stat tasks spawned for existing records. Dropping the
    /// handles detaches the tasks; they still honour cancellation.
    pub(crate) fn handle(&self, push: Value, warnings: &mut WarningPolicy) -> Vec<JoinHandle<()>> {
        self.outlet.stats().record_push();

        let received = push.get("subscription").and_then(Value::as_str);
        if received != Some(self.subscription.as_str()) {
            tracing::error!(
                expected = %self.subscription,
                received = ?received,
                "Push for a foreign subscription"
            );
            self.outlet.error(WatchError::invariant(format!(
                "push for subscription {received:?} on a session subscribed as {:?}",
                self.subscription
            )));
            return Vec::new();
        }

        let push: SubscriptionPush = match serde_json::from_value(push) {
            Ok(push) => push,
            Err(error) => {
                self.outlet.error(WatchError::Decode(error));
                return Vec::new();
            }
        };

        if let Some(warning) = &push.warning {
            warnings.observe(warning);
        }

        if push.is_fresh_instance {
            tracing::info!(dir = %self.watched_dir, "watchman rebuilt its view (fresh instance)");
            self.outlet.emit(&WatcherEvent::FreshInstance);
        }

        self.log_state(push.state_enter.as_deref(), "Entered");
        self.log_state(push.state_leave.as_deref(), "Left");

        let Some(records) = push.files else {
            return Vec::new();
        };

        let root = match self.context.require() {
            Ok(root) => root,
            Err(error) => {
                tracing::error!(%error, "Dropping push received before the handshake completed");
                self.outlet.error(error);
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<ChangeRecord>(record) {
                Ok(record) => self.process_record(&root, record),
                Err(error) => {
                    tracing::warn!(%error, "Skipping malformed change record");
                    self.outlet.error(WatchError::Decode(error));
                    None
                }
            })
            .collect()
    }

    fn process_record(&self, root: &WatchRoot, record: ChangeRecord) -> Option<JoinHandle<()>> {
        if !self.filter.should_process(&record.name) {
            tracing::trace!(path = %record.name, "Filtered change record");
            self.outlet.stats().record_filtered();
            return None;
        }

        if !record.exists {
            self.outlet.change(
                ChangeKind::Delete,
                FileChange::new(record.name, self.watched_dir.clone(), None),
            );
            return None;
        }

        let task = StatTask {
            absolute: root.resolve(&record.name),
            record,
            watched_dir: self.watched_dir.clone(),
            metadata: Arc::clone(&self.metadata),
            outlet: self.outlet.clone(),
            cancel: self.cancel.clone(),
        };
        Some(tokio::spawn(task.run()))
    }

    fn log_state(&self, state: Option<&str>, action: &str) {
        let Some(state) = state else {
            return;
        };
        if self.defer_states.contains(state) {
            tracing::info!(state, "{action} deferred watchman state");
        } else {
            tracing::debug!(state, "{action} watchman state");
        }
    }
}

/// Resolves one existing record against the filesystem.
struct StatTask {
    absolute: Utf8PathBuf,
    record: ChangeRecord,
    watched_dir: Utf8PathBuf,
    metadata: Arc<dyn MetadataSource>,
    outlet: Outlet,
    cancel: CancellationToken,
}

impl StatTask {
    async fn run(self) {
        let result = self.metadata.stat(&self.absolute).await;

        // The watcher may have been closed while the query was in flight.
        if self.cancel.is_cancelled() {
            tracing::trace!(path = %self.absolute, "Discarding stat result after close");
            return;
        }

        match result {
            Ok(stat) => match classify(self.record.is_new, &stat) {
                Some(kind) => self.outlet.change(
                    kind,
                    FileChange::new(self.record.name, self.watched_dir, Some(stat)),
                ),
                None => tracing::trace!(path = %self.record.name, "Suppressed directory change"),
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(path = %self.absolute, "File vanished before stat");
                self.outlet.stats().record_stat_race();
            }
            Err(source) => self.outlet.error(WatchError::Metadata {
                path: self.absolute,
                source,
            }),
        }
    }
}
