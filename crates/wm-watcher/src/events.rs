//! Events emitted by the watcher and the bus that delivers them.
//!
//! # Event Flow
//!
//! ```text
//! handshake / push / stat result
//!        │
//!        ▼
//!   EventBus::emit ──► observers registered for that EventKind
//!        │
//!        └─(add/change/delete only)─► EventKind::All observers
//! ```
//!
//! Consumers either register callbacks with [`EventBus::on`] or take an async
//! receiver with [`EventBus::subscribe`].

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use wm_core::{ChangeKind, FileChange};

use crate::error::WatchError;

/// The kind of an event, used to register observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Handshake complete.
    Ready,
    /// An error was forwarded.
    Error,
    /// The daemon discarded its history and rescanned.
    FreshInstance,
    /// A file was added.
    Add,
    /// A file changed.
    Change,
    /// A file was deleted.
    Delete,
    /// Catch-all for add, change, and delete.
    All,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL_KINDS: [Self; 7] = [
        Self::Ready,
        Self::Error,
        Self::FreshInstance,
        Self::Add,
        Self::Change,
        Self::Delete,
        Self::All,
    ];

    /// Returns the event name (`ready`, `error`, `fresh_instance`, `add`,
    /// `change`, `delete`, `all`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error => "error",
            Self::FreshInstance => "fresh_instance",
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
            Self::All => "all",
        }
    }
}

impl From<ChangeKind> for EventKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Add => Self::Add,
            ChangeKind::Change => Self::Change,
            ChangeKind::Delete => Self::Delete,
        }
    }
}

/// An event emitted by the watcher.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// The subscription is live.
    Ready,
    /// A recoverable or fatal error.
    Error(Arc<WatchError>),
    /// The daemon rebuilt its view from scratch.
    FreshInstance,
    /// A file or directory was added.
    Add(FileChange),
    /// A file changed.
    Change(FileChange),
    /// A file or directory was deleted.
    Delete(FileChange),
    /// Catch-all twin of an add, change, or delete event.
    All(ChangeKind, FileChange),
}

impl WatcherEvent {
    /// Builds the typed event for a change.
    #[must_use]
    pub fn change(kind: ChangeKind, change: FileChange) -> Self {
        match kind {
            ChangeKind::Add => Self::Add(change),
            ChangeKind::Change => Self::Change(change),
            ChangeKind::Delete => Self::Delete(change),
        }
    }

    /// Wraps an error.
    #[must_use]
    pub fn error(error: WatchError) -> Self {
        Self::Error(Arc::new(error))
    }

    /// Returns the kind observers are keyed by.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::Error(_) => EventKind::Error,
            Self::FreshInstance => EventKind::FreshInstance,
            Self::Add(_) => EventKind::Add,
            Self::Change(_) => EventKind::Change,
            Self::Delete(_) => EventKind::Delete,
            Self::All(..) => EventKind::All,
        }
    }

    /// Returns the change payload, if this is a file event.
    #[must_use]
    pub const fn file_change(&self) -> Option<&FileChange> {
        match self {
            Self::Add(change) | Self::Change(change) | Self::Delete(change) | Self::All(_, change) => {
                Some(change)
            }
            Self::Ready | Self::Error(_) | Self::FreshInstance => None,
        }
    }
}

/// A callback registered on the bus.
pub type Observer = Arc<dyn Fn(&WatcherEvent) + Send + Sync>;

/// Delivers events to per-kind observer lists.
///
/// Observers are called synchronously on the emitting task, outside the
/// registry lock, so an observer may register further observers. Receivers
/// handed out by [`subscribe`](Self::subscribe) are unregistered the first
/// time an event finds them dropped.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use wm_core::{ChangeKind, FileChange};
/// use wm_watcher::{EventBus, EventKind};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// bus.on(EventKind::All, move |_| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
///
/// bus.emit_change(ChangeKind::Delete, FileChange::new("a.txt", "/repo", None));
/// assert_eq!(seen.load(Ordering::Relaxed), 1);
/// ```
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<FxHashMap<EventKind, Vec<Observer>>>,
    channels: RwLock<FxHashMap<EventKind, Vec<mpsc::UnboundedSender<WatcherEvent>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for one event kind.
    pub fn on<F>(&self, kind: EventKind, observer: F)
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(observer));
    }

    /// Returns a receiver fed with every event of the given kinds.
    ///
    /// The channel is unbounded; the watcher never waits on a slow consumer.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<WatcherEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.write();
        for &kind in kinds {
            channels.entry(kind).or_default().push(tx.clone());
        }
        rx
    }

    /// Delivers an event to the observers of its kind.
    pub fn emit(&self, event: &WatcherEvent) {
        let observers: SmallVec<[Observer; 4]> = self
            .observers
            .read()
            .get(&event.kind())
            .map(|list| list.iter().map(Arc::clone).collect())
            .unwrap_or_default();

        for observer in observers {
            observer(event);
        }

        let kind = event.kind();
        let mut closed = false;
        if let Some(senders) = self.channels.read().get(&kind) {
            for tx in senders {
                closed |= tx.send(event.clone()).is_err();
            }
        }
        if closed {
            if let Some(senders) = self.channels.write().get_mut(&kind) {
                senders.retain(|tx| !tx.is_closed());
            }
        }
    }

    /// Emits a typed change event followed by its catch-all twin.
    pub fn emit_change(&self, kind: ChangeKind, change: FileChange) {
        self.emit(&WatcherEvent::change(kind, change.clone()));
        self.emit(&WatcherEvent::All(kind, change));
    }

    /// Forwards an error to `Error` observers.
    pub fn emit_error(&self, error: WatchError) {
        self.emit(&WatcherEvent::error(error));
    }

    /// Detaches every observer.
    pub fn clear(&self) {
        self.observers.write().clear();
        self.channels.write().clear();
    }

    /// Returns the number of registered observers across all kinds.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        let callbacks: usize = self.observers.read().values().map(Vec::len).sum();
        let channels: usize = self.channels.read().values().map(Vec::len).sum();
        callbacks + channels
    }
}
