//! Watcher statistics with atomic counters.
//!
//! Counters use [`Relaxed`](std::sync::atomic::Ordering::Relaxed) ordering;
//! they are informational and are shared between the manager task and the
//! stat tasks it spawns.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters describing a watcher's lifetime.
///
/// # Examples
///
/// ```
/// use wm_watcher::WatcherStats;
///
/// let stats = WatcherStats::new();
/// stats.record_session();
/// stats.record_ready();
///
/// let snap = stats.snapshot();
/// assert_eq!(snap.sessions, 1);
/// assert_eq!(snap.reinitializations(), 0);
/// ```
#[derive(Debug, Default)]
pub struct WatcherStats {
    /// Sessions opened (initial connection plus every reinitialization).
    sessions: AtomicU64,
    /// Handshakes that reached `ready`.
    handshakes: AtomicU64,
    /// Sessions the daemon ended.
    disconnects: AtomicU64,
    /// Subscription pushes handled.
    pushes: AtomicU64,
    /// Add, change, and delete events emitted (catch-all twins not counted).
    events: AtomicU64,
    /// Records rejected by the path filter.
    filtered: AtomicU64,
    /// Records whose file vanished before it could be stat'ed.
    stat_races: AtomicU64,
    /// Errors forwarded to consumers.
    errors: AtomicU64,
}

impl WatcherStats {
    /// Creates a new [`WatcherStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an opened session.
    #[inline]
    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a completed handshake.
    #[inline]
    pub fn record_ready(&self) {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a session ended by the daemon.
    #[inline]
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a handled push.
    #[inline]
    pub fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an emitted change event.
    #[inline]
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a filtered record.
    #[inline]
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a not-found stat.
    #[inline]
    pub fn record_stat_race(&self) {
        self.stat_races.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a forwarded error.
    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            stat_races: self.stat_races.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`WatcherStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Sessions opened.
    pub sessions: u64,
    /// Handshakes that reached `ready`.
    pub handshakes: u64,
    /// Sessions the daemon ended.
    pub disconnects: u64,
    /// Subscription pushes handled.
    pub pushes: u64,
    /// Change events emitted.
    pub events: u64,
    /// Records rejected by the path filter.
    pub filtered: u64,
    /// Records whose file vanished before it could be stat'ed.
    pub stat_races: u64,
    /// Errors forwarded to consumers.
    pub errors: u64,
}

impl StatsSnapshot {
    /// Sessions opened after the first one.
    #[inline]
    #[must_use]
    pub const fn reinitializations(&self) -> u64 {
        self.sessions.saturating_sub(1)
    }
}
