//! Configuration structures for the watchman subscription client.
//!
//! - [`WatcherOptions`] - Subscription settings (globs, dotfiles, defer states)
//! - [`ReconnectPolicy`] - Delay and retry limits applied after a lost session
//! - [`Config`] - Root configuration, loadable from a JSON file
//!
//! All configuration types implement [`Default`] and deserialize with
//! `#[serde(default)]`, so a config file only needs the fields it overrides.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Subscription name registered with the daemon unless overridden.
pub const DEFAULT_SUBSCRIPTION_NAME: &str = "sane-sub";

/// Controls how quickly the watcher reconnects after the daemon session ends.
///
/// The delay depends on how many reinitializations happened since the last
/// session that reached `ready`. The first reinitialization after a healthy
/// session is always immediate; subsequent consecutive attempts back off
/// exponentially from `initial_delay_ms` up to `max_delay_ms`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use wm_core::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::default();
/// assert_eq!(policy.delay_for(0), Some(Duration::ZERO));
/// assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
///
/// let bounded = ReconnectPolicy { max_attempts: Some(3), ..ReconnectPolicy::default() };
/// assert_eq!(bounded.delay_for(3), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the second consecutive attempt, in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for the backoff delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Maximum consecutive attempts without reaching `ready`.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// A policy that always reconnects immediately and never gives up.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: None,
        }
    }

    /// Returns the delay before attempt number `consecutive` (zero-based,
    /// counted since the last successful handshake), or `None` once
    /// `max_attempts` is exhausted.
    #[must_use]
    pub fn delay_for(&self, consecutive: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| consecutive >= max) {
            return None;
        }
        if consecutive == 0 {
            return Some(Duration::ZERO);
        }

        let factor = 1_u64.checked_shl(consecutive - 1).unwrap_or(u64::MAX);
        let delay = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            max_attempts: None,
        }
    }
}

/// Options supplied when constructing a watcher.
///
/// # Examples
///
/// ```
/// use wm_core::WatcherOptions;
///
/// let options = WatcherOptions::default();
/// assert!(options.globs.is_empty());
/// assert!(!options.dot);
/// assert_eq!(options.subscription_name, "sane-sub");
/// assert!(options.excludes_dotfiles_only());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherOptions {
    /// Inclusion glob patterns, relative to the watched directory.
    /// Empty means every path is included.
    pub globs: Vec<String>,

    /// Whether dotfiles (any path segment starting with `.`) are reported.
    pub dot: bool,

    /// Daemon state names (for example `hg.update`) passed as the
    /// subscription's `defer` list.
    pub defer_states: Vec<String>,

    /// Name the subscription is registered under.
    pub subscription_name: String,

    /// Explicit daemon socket. When unset the socket is discovered.
    pub socket_path: Option<Utf8PathBuf>,

    /// Reconnection behaviour after the session ends.
    pub reconnect: ReconnectPolicy,
}

impl WatcherOptions {
    /// Returns `true` when the daemon can do all the filtering itself: no
    /// inclusion globs and dotfiles excluded.
    #[inline]
    #[must_use]
    pub fn excludes_dotfiles_only(&self) -> bool {
        self.globs.is_empty() && !self.dot
    }

    /// Checks option values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_name.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "subscription_name".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::InvalidOption {
                option: "reconnect.max_delay_ms".to_owned(),
                reason: "must be at least reconnect.initial_delay_ms".to_owned(),
            });
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidOption {
                option: "reconnect.max_attempts".to_owned(),
                reason: "must be positive when set".to_owned(),
            });
        }

        if let Some(path) = &self.socket_path {
            if path.as_str().is_empty() {
                return Err(ConfigError::InvalidPath {
                    path: path.clone(),
                    reason: "socket path is empty".to_owned(),
                });
            }
        }

        Ok(())
    }
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            globs: Vec::new(),
            dot: false,
            defer_states: Vec::new(),
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_owned(),
            socket_path: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Root configuration.
///
/// # Examples
///
/// ```
/// use wm_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"watch": {"dot": true}}"#).unwrap();
/// assert!(config.watch.dot);
/// assert_eq!(config.watch.subscription_name, "sane-sub");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watcher configuration.
    pub watch: WatcherOptions,
}

impl Config {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if the file does not exist,
    /// [`ConfigError::Io`] or [`ConfigError::Parse`] if it cannot be read,
    /// and [`ConfigError::InvalidOption`] if validation fails.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_owned()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()
    }
}
