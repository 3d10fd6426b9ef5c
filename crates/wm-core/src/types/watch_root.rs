//! The watch root resolved by the daemon during the handshake.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// The directory the daemon actually watches, plus the offset of the
/// requested directory inside it.
///
/// The daemon may collapse overlapping watches onto a common ancestor, so the
/// watched root is not necessarily the directory that was requested. Names in
/// subscription pushes are reported relative to `root/relative_path`.
///
/// A `WatchRoot` is immutable. A new handshake produces a new value.
///
/// # Examples
///
/// ```
/// use wm_core::WatchRoot;
/// use camino::Utf8Path;
///
/// let root = WatchRoot::new("/repo", "packages/app");
/// assert_eq!(
///     root.resolve(Utf8Path::new("src/index.js")).as_str(),
///     "/repo/packages/app/src/index.js"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchRoot {
    /// Absolute path watched by the daemon.
    pub root: Utf8PathBuf,

    /// Prefix applied to every name the daemon reports. Empty when the
    /// requested directory is the watched root itself.
    pub relative_path: Utf8PathBuf,
}

impl WatchRoot {
    /// Creates a watch root from the daemon's `watch` and `relative_path`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, relative_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            relative_path: relative_path.into(),
        }
    }

    /// Resolves a reported name to an absolute path.
    #[must_use]
    pub fn resolve(&self, name: &Utf8Path) -> Utf8PathBuf {
        if self.relative_path.as_str().is_empty() {
            self.root.join(name)
        } else {
            self.root.join(&self.relative_path).join(name)
        }
    }

    /// Returns `true` if the requested directory was collapsed onto an
    /// ancestor watch.
    #[inline]
    #[must_use]
    pub fn is_nested(&self) -> bool {
        !self.relative_path.as_str().is_empty()
    }
}
