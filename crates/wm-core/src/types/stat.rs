//! File metadata attached to add and change events.

use std::fs::Metadata;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The type of filesystem entry a change refers to.
///
/// Derived from `lstat`, so a symlink is reported as [`FileKind::Symlink`]
/// rather than as the type of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FileKind {
    /// A regular file.
    #[default]
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// Sockets, FIFOs, devices.
    Other,
}

/// File metadata captured when a change record is classified.
///
/// # Examples
///
/// ```
/// use wm_core::{FileKind, FileStat};
///
/// let stat = FileStat::new(FileKind::Directory, 0);
/// assert!(stat.is_dir());
/// assert!(stat.modified.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Entry type.
    pub kind: FileKind,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

impl FileStat {
    /// Creates metadata without a modification time.
    #[inline]
    #[must_use]
    pub const fn new(kind: FileKind, size: u64) -> Self {
        Self {
            kind,
            size,
            modified: None,
        }
    }

    /// Returns `true` for directories.
    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    /// Returns `true` for regular files.
    #[inline]
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::File)
    }
}

impl From<&Metadata> for FileStat {
    fn from(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        Self {
            kind,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}
