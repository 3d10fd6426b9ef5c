//! Core types, configuration, and errors for the watchman subscription client.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - Configuration structures ([`WatcherOptions`], [`ReconnectPolicy`], [`Config`])
//! - Error types for configuration loading ([`ConfigError`])
//! - Domain types ([`WatchRoot`], [`ChangeRecord`], [`FileChange`], [`FileStat`])
//!
//! The types here carry no async or transport concerns and are shared between
//! the watcher library and the command-line binary.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ReconnectPolicy, WatcherOptions, DEFAULT_SUBSCRIPTION_NAME};
pub use error::ConfigError;
pub use types::{ChangeKind, ChangeRecord, FileChange, FileKind, FileStat, WatchRoot};
