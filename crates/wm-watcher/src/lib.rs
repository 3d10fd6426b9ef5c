//! Watchman subscription client with automatic reconnection.
//!
//! This crate keeps a live subscription to the watchman daemon and republishes
//! its pushes as normalized add, change, and delete events.
//!
//! # Overview
//!
//! - Run the `watch-project`, `clock`, `subscribe` handshake and resolve the
//!   watch root the daemon actually uses
//! - Translate subscription pushes into [`WatcherEvent`]s, filtering by glob,
//!   dotfile rule and ignore predicate, and classifying each record against
//!   the live filesystem
//! - Reconnect when the daemon drops the session, following a configurable
//!   [`ReconnectPolicy`](wm_core::ReconnectPolicy)
//! - Deduplicate the daemon's recrawl warnings per watcher
//!
//! # Architecture
//!
//! ```text
//! WatchmanWatcher ──start──► ConnectionManager (one tokio task)
//!                                 │
//!                                 ├─► Connector ─► Session (reader task)
//!                                 ├─► HandshakeSequencer ─► WatchContext
//!                                 └─► ChangeProcessor ─► stat tasks
//!                                              │
//!                                              ▼
//!                                          EventBus ─► observers
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! wm-cli ──► wm-watcher ──► wm-core
//! ```
//!
//! # Usage
//!
//! ## Observers
//!
//! ```no_run
//! use camino::Utf8Path;
//! use wm_core::WatcherOptions;
//! use wm_watcher::{EventKind, WatcherEvent, WatchmanWatcher};
//!
//! # async fn example() -> Result<(), wm_watcher::WatchError> {
//! let options = WatcherOptions {
//!     globs: vec!["**/*.rs".to_owned()],
//!     defer_states: vec!["hg.update".to_owned()],
//!     ..WatcherOptions::default()
//! };
//!
//! let mut watcher = WatchmanWatcher::new(Utf8Path::new("."), options)?
//!     .with_ignore(|path: &Utf8Path| path.starts_with("target"));
//!
//! watcher.on(EventKind::Ready, |_| println!("watching"));
//! watcher.on(EventKind::All, |event| {
//!     if let WatcherEvent::All(kind, change) = event {
//!         println!("{kind}: {}", change.path);
//!     }
//! });
//!
//! watcher.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using with `tokio::select!`
//!
//! ```no_run
//! use camino::Utf8Path;
//! use wm_core::WatcherOptions;
//! use wm_watcher::{EventKind, WatcherEvent, WatchmanWatcher};
//!
//! # async fn example() -> Result<(), wm_watcher::WatchError> {
//! let mut watcher = WatchmanWatcher::new(Utf8Path::new("."), WatcherOptions::default())?;
//! let mut events = watcher.subscribe(&[EventKind::All, EventKind::Error]);
//! watcher.start()?;
//!
//! loop {
//!     tokio::select! {
//!         Some(event) = events.recv() => match event {
//!             WatcherEvent::Error(err) if err.is_fatal() => break,
//!             WatcherEvent::Error(err) => eprintln!("warning: {err}"),
//!             other => println!("{other:?}"),
//!         },
//!         _ = tokio::signal::ctrl_c() => break,
//!     }
//! }
//!
//! watcher.shutdown().await
//! # }
//! ```
//!
//! # Error Handling
//!
//! Errors that happen while the watcher runs are delivered as
//! [`WatcherEvent::Error`]; only construction and [`WatchmanWatcher::start`]
//! return them directly. See [`WatchError`] for which ones are fatal.
//!
//! # Ordering
//!
//! Stat queries run concurrently, so events from near-simultaneous pushes may
//! be emitted out of notification order. Every event is paired with exactly
//! one [`WatcherEvent::All`] emitted right after it.

#![deny(clippy::all)]
#![warn(missing_docs)]

mod connection;
mod context;
pub mod error;
pub mod events;
pub mod filter;
pub mod handshake;
pub mod metadata;
mod processor;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod warnings;
pub mod watcher;

#[cfg(test)]
mod testing;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{EventBus, EventKind, Observer, WatcherEvent};

// Re-export filter types
pub use filter::{AcceptAllFilter, CompositeFilter, FileFilter, GlobFilter, IgnoreFilter};

// Re-export the collaborators a consumer may replace
pub use metadata::{MetadataSource, TokioMetadata};
pub use session::{Connector, DaemonIo, DaemonStream, UnixSocketConnector};

pub use processor::classify;
pub use stats::{StatsSnapshot, WatcherStats};
pub use warnings::WarningPolicy;
pub use watcher::WatchmanWatcher;
