//! Error and warning fields on daemon responses.
//!
//! Every daemon response may carry an `error` field (the command failed) or a
//! `warning` field (the command succeeded, but something needs attention).
//! The daemon repeats recrawl warnings on every response until the watch is
//! deleted, so those are deduplicated per root.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::WatchError;

const RECRAWL_PREFIX: &str = "Recrawled this watch ";
const RECRAWL_BECAUSE: &str = "most recently because:\n";

/// A parsed `Recrawled this watch N times` warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecrawlWarning {
    /// The root that was recrawled.
    pub root: String,
    /// How many recrawls the daemon has done so far.
    pub count: u64,
}

impl RecrawlWarning {
    /// Parses a warning message, returning `None` for anything that is not a
    /// recrawl warning.
    ///
    /// # Examples
    ///
    /// ```
    /// use wm_watcher::warnings::RecrawlWarning;
    ///
    /// let warning = RecrawlWarning::parse(
    ///     "Recrawled this watch 3 times, most recently because:\n/repo: kFSEventStreamEventFlagMustScanSubDirs",
    /// )
    /// .unwrap();
    /// assert_eq!(warning.count, 3);
    /// assert_eq!(warning.root, "/repo");
    /// ```
    #[must_use]
    pub fn parse(message: &str) -> Option<Self> {
        let start = message.find(RECRAWL_PREFIX)? + RECRAWL_PREFIX.len();
        let rest = &message[start..];
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        let count = rest[..digits].parse().ok()?;

        let reason = rest[digits..].find(RECRAWL_BECAUSE)? + digits + RECRAWL_BECAUSE.len();
        let root = rest[reason..].split(':').next()?.trim();
        if root.is_empty() {
            return None;
        }

        Some(Self {
            root: root.to_owned(),
            count,
        })
    }
}

/// Converts error fields into protocol errors and logs warnings once.
///
/// One policy belongs to one watcher; dedup state is never shared between
/// watchers.
#[derive(Debug, Default)]
pub struct WarningPolicy {
    recrawls: FxHashMap<String, u64>,
    logged: u64,
    suppressed: u64,
}

impl WarningPolicy {
    /// Creates a policy with no remembered warnings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a command response.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Protocol`] if the response has an `error` field.
    /// A `warning` field is logged (or suppressed) and is never an error.
    pub fn check(&mut self, command: &'static str, response: &Value) -> Result<(), WatchError> {
        if let Some(error) = response.get("error") {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), str::to_owned);
            return Err(WatchError::protocol(command, message));
        }

        if let Some(warning) = response.get("warning").and_then(Value::as_str) {
            self.observe(warning);
        }

        Ok(())
    }

    /// Logs a warning unless it repeats a recrawl warning already reported for
    /// the same root. Returns `true` if the warning was logged.
    pub fn observe(&mut self, warning: &str) -> bool {
        if self.is_duplicate(warning) {
            self.suppressed += 1;
            tracing::trace!(warning, "Suppressed duplicate watchman warning");
            return false;
        }

        self.logged += 1;
        tracing::warn!(warning, "watchman warning");
        true
    }

    /// Number of warnings logged so far.
    #[must_use]
    pub const fn logged(&self) -> u64 {
        self.logged
    }

    /// Number of warnings suppressed as duplicates.
    #[must_use]
    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }

    fn is_duplicate(&mut self, warning: &str) -> bool {
        let Some(recrawl) = RecrawlWarning::parse(warning) else {
            return false;
        };

        match self.recrawls.get_mut(&recrawl.root) {
            Some(seen) if *seen >= recrawl.count => true,
            Some(seen) => {
                *seen = recrawl.count;
                false
            }
            None => {
                self.recrawls.insert(recrawl.root, recrawl.count);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recrawl(count: u64, root: &str) -> String {
        format!(
            "Recrawled this watch {count} times, most recently because:\n{root}: kFSEventStreamEventFlagUserDropped\nTo resolve, please review the information on\nhttps://facebook.github.io/watchman/docs/troubleshooting.html#recrawl"
        )
    }

    #[test]
    fn test_parse_recrawl_warning() {
        let warning = RecrawlWarning::parse(&recrawl(12, "/Users/dev/repo")).unwrap();
        assert_eq!(warning.count, 12);
        assert_eq!(warning.root, "/Users/dev/repo");
    }

    #[test]
    fn test_parse_other_warning() {
        assert!(RecrawlWarning::parse("watchman is running low on inotify watches").is_none());
        assert!(RecrawlWarning::parse("Recrawled this watch many times").is_none());
    }

    #[test]
    fn test_check_error_field() {
        let mut policy = WarningPolicy::new();
        let err = policy
            .check("clock", &json!({"error": "unable to resolve root /nope"}))
            .unwrap_err();
        match err {
            WatchError::Protocol { command, message } => {
                assert_eq!(command, "clock");
                assert_eq!(message, "unable to resolve root /nope");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_check_plain_response() {
        let mut policy = WarningPolicy::new();
        assert!(policy.check("clock", &json!({"clock": "c:1"})).is_ok());
        assert_eq!(policy.logged(), 0);
    }

    #[test]
    fn test_recrawl_warning_deduplicated_per_root() {
        let mut policy = WarningPolicy::new();

        assert!(policy.observe(&recrawl(1, "/repo")));
        assert!(!policy.observe(&recrawl(1, "/repo")));
        assert!(policy.observe(&recrawl(2, "/repo")));
        assert!(policy.observe(&recrawl(1, "/other")));
        assert!(!policy.observe(&recrawl(2, "/repo")));

        assert_eq!(policy.logged(), 3);
        assert_eq!(policy.suppressed(), 2);
    }

    #[test]
    fn test_non_recrawl_warnings_always_logged() {
        let mut policy = WarningPolicy::new();
        let response = json!({"clock": "c:1", "warning": "low on watches"});
        assert!(policy.check("clock", &response).is_ok());
        assert!(policy.check("clock", &response).is_ok());
        assert_eq!(policy.logged(), 2);
    }

    #[test]
    fn test_policies_do_not_share_state() {
        let mut first = WarningPolicy::new();
        let mut second = WarningPolicy::new();
        assert!(first.observe(&recrawl(5, "/repo")));
        assert!(second.observe(&recrawl(5, "/repo")));
    }
}
