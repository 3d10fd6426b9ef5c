//! Domain types for the watchman subscription client.
//!
//! # Module Organization
//!
//! - [`change`] - Wire-level change records and normalized file changes
//! - [`stat`] - File metadata captured when classifying a change
//! - [`watch_root`] - The resolved watch root returned by the daemon
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use wm_core::{ChangeKind, FileChange, WatchRoot};
//! ```

pub mod change;
pub mod stat;
pub mod watch_root;

pub use change::{ChangeKind, ChangeRecord, FileChange};
pub use stat::{FileKind, FileStat};
pub use watch_root::WatchRoot;
