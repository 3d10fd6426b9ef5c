//! The shared, atomically replaced watch root snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use wm_core::WatchRoot;

use crate::error::WatchError;

/// Holds the [`WatchRoot`] of the current session.
///
/// Only the manager task writes it: [`install`](Self::install) after a
/// complete handshake, [`invalidate`](Self::invalidate) before the next one.
/// Readers get a cheap `Arc` snapshot that stays valid even if the context is
/// replaced while they hold it.
#[derive(Debug, Clone, Default)]
pub struct WatchContext {
    current: Arc<RwLock<Option<Arc<WatchRoot>>>>,
}

impl WatchContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot.
    pub fn install(&self, root: WatchRoot) {
        *self.current.write() = Some(Arc::new(root));
    }

    /// Clears the snapshot.
    pub fn invalidate(&self) {
        self.current.write().take();
    }

    /// Returns the snapshot, if a handshake has completed.
    #[must_use]
    pub fn get(&self) -> Option<Arc<WatchRoot>> {
        self.current.read().as_ref().map(Arc::clone)
    }

    /// Returns the snapshot or fails fast.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvariantViolation`] when no handshake has
    /// completed for the current session.
    pub fn require(&self) -> Result<Arc<WatchRoot>, WatchError> {
        self.get()
            .ok_or_else(|| WatchError::invariant("watch root read before the handshake completed"))
    }
}
