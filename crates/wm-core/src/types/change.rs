//! Change records from the daemon and the normalized changes built from them.

use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use super::stat::FileStat;

/// A single entry of the `files` array in a subscription push.
///
/// Only the fields requested by the subscription query (`name`, `exists`,
/// `new`) are present.
///
/// # Examples
///
/// ```
/// use wm_core::ChangeRecord;
///
/// let record: ChangeRecord =
///     serde_json::from_str(r#"{"name": "b.txt", "exists": false}"#).unwrap();
/// assert!(!record.exists);
/// assert!(!record.is_new);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Path relative to the subscription's relative root.
    pub name: Utf8PathBuf,

    /// Whether the file exists at the clock position of the push.
    pub exists: bool,

    /// Whether the file was created since the subscription's `since` clock.
    #[serde(rename = "new", default)]
    pub is_new: bool,
}

impl ChangeRecord {
    /// Creates a record for an existing file.
    #[must_use]
    pub fn existing(name: impl Into<Utf8PathBuf>, is_new: bool) -> Self {
        Self {
            name: name.into(),
            exists: true,
            is_new,
        }
    }

    /// Creates a record for a removed file.
    #[must_use]
    pub fn removed(name: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            exists: false,
            is_new: false,
        }
    }
}

/// The kind of a normalized change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A file or directory appeared.
    Add,
    /// A file's content or metadata changed.
    Change,
    /// A file or directory was removed.
    Delete,
}

impl ChangeKind {
    /// Returns the lowercase event name (`add`, `change`, `delete`).
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The payload carried by add, change, and delete events.
///
/// `path` is relative to `root`, which is the directory the watcher was
/// constructed with (not the possibly broader daemon watch root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the watched directory.
    pub path: Utf8PathBuf,

    /// The watched directory.
    pub root: Utf8PathBuf,

    /// Metadata for adds and changes. Deletes carry none.
    pub stat: Option<FileStat>,
}

impl FileChange {
    /// Creates a change payload.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, root: impl Into<Utf8PathBuf>, stat: Option<FileStat>) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
            stat,
        }
    }

    /// Returns the absolute path of the changed file.
    #[must_use]
    pub fn absolute_path(&self) -> Utf8PathBuf {
        self.root.join(&self.path)
    }
}
