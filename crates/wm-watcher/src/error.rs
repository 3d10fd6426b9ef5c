//! Error types for the wm-watcher crate.
//!
//! This module provides the [`WatchError`] type for everything that can go
//! wrong while talking to the daemon or classifying a change.

use camino::Utf8PathBuf;

/// Errors that can occur while maintaining a daemon subscription.
///
/// Most of these are delivered to consumers through the `Error` event rather
/// than returned, because the watcher keeps running after them.
///
/// # Error Recovery Strategy
///
/// - **Transport** ([`WatchError::Transport`], [`WatchError::Decode`],
///   [`WatchError::Connect`]): Recoverable - forwarded; a disconnect, if one
///   follows, triggers reinitialization
/// - **Protocol** ([`WatchError::Protocol`]): Recoverable - aborts the current
///   handshake attempt only
/// - **Metadata** ([`WatchError::Metadata`]): Recoverable - the record is skipped
/// - **Invariant violations** ([`WatchError::InvariantViolation`]): Fatal - the
///   offending message is dropped
/// - **Reconnect exhausted** ([`WatchError::ReconnectExhausted`]): Fatal - the
///   watcher stops
///
/// # Examples
///
/// ```
/// use wm_watcher::WatchError;
///
/// fn handle_error(err: &WatchError) {
///     if err.is_fatal() {
///         eprintln!("watcher cannot continue: {err}");
///     } else {
///         eprintln!("warning: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The daemon connection failed with an I/O error.
    #[error("daemon transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A message from the daemon could not be decoded.
    #[error("malformed daemon message: {0}")]
    Decode(#[from] serde_json::Error),

    /// No connection to the daemon could be established.
    #[error("cannot connect to watchman: {0}")]
    Connect(String),

    /// The daemon answered a command with an error field.
    #[error("watchman {command} failed: {message}")]
    Protocol {
        /// The command that failed (`watch-project`, `clock`, `subscribe`).
        command: &'static str,
        /// The daemon's error message.
        message: String,
    },

    /// The daemon session ended.
    ///
    /// Drives reinitialization; never delivered to consumers.
    #[error("daemon connection closed")]
    Disconnected,

    /// Querying file metadata failed for a reason other than the file having
    /// disappeared.
    #[error("failed to stat {path}: {source}")]
    Metadata {
        /// The absolute path that was queried.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A protocol invariant was broken: a push for a foreign subscription, or
    /// a change record arriving before any handshake completed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The reconnect policy gave up.
    #[error("gave up reconnecting to watchman after {attempts} attempts")]
    ReconnectExhausted {
        /// Consecutive attempts made since the last successful handshake.
        attempts: u32,
    },

    /// An inclusion glob could not be compiled.
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    /// The specified path does not exist.
    ///
    /// The watcher requires a valid, existing directory.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// A path is not valid UTF-8.
    ///
    /// Daemon names are JSON strings, so the watched directory must be UTF-8
    /// too.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// The watcher options are invalid.
    #[error(transparent)]
    Config(#[from] wm_core::ConfigError),

    /// The manager task could not be joined.
    #[error("watcher task ended unexpectedly")]
    ChannelClosed,
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Creates a new [`WatchError::InvariantViolation`] error.
    #[inline]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Creates a new [`WatchError::Protocol`] error.
    #[inline]
    pub fn protocol(command: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            command,
            message: message.into(),
        }
    }

    /// Returns `true` if the watcher keeps running after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Returns `true` if this error stops the watcher or invalidates the
    /// message that produced it.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_)
                | Self::ReconnectExhausted { .. }
                | Self::PathNotFound(_)
                | Self::NonUtf8Path(_)
                | Self::Glob(_)
                | Self::Config(_)
                | Self::ChannelClosed
        )
    }

    /// Returns `true` for a not-found metadata failure.
    ///
    /// The processor treats these as a benign race and never emits them.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Metadata { source, .. } | Self::Transport(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) | Self::Metadata { path, .. } => Some(path),
            _ => None,
        }
    }
}
