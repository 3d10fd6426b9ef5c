//! Watchman JSON protocol: command builders and PDU shapes.
//!
//! Every PDU is one line of JSON. Responses to commands arrive in the order the
//! commands were sent; unilateral PDUs (subscription pushes, logs) can arrive
//! at any time in between and are marked with `"unilateral": true` or carry a
//! `subscription` field.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use wm_core::WatcherOptions;

/// Fields requested for every change record.
pub const SUBSCRIPTION_FIELDS: [&str; 3] = ["name", "exists", "new"];

/// A PDU read from the daemon, classified by how it must be routed.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    /// The response to the oldest outstanding command.
    Response(Value),
    /// A subscription push.
    Subscription(Value),
    /// A `log` PDU or other unilateral message nobody asked for.
    Unilateral(Value),
}

impl Pdu {
    /// Classifies a decoded PDU.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if value.get("subscription").is_some() {
            Self::Subscription(value)
        } else if value.get("unilateral").and_then(Value::as_bool) == Some(true)
            || value.get("log").is_some()
        {
            Self::Unilateral(value)
        } else {
            Self::Response(value)
        }
    }
}

/// Builds `["watch-project", root]`.
#[must_use]
pub fn watch_project(root: &Utf8Path) -> Value {
    json!(["watch-project", root])
}

/// Builds `["clock", root]`.
#[must_use]
pub fn clock(root: &Utf8Path) -> Value {
    json!(["clock", root])
}

/// Builds `["subscribe", root, name, query]`.
#[must_use]
pub fn subscribe(root: &Utf8Path, name: &str, query: &SubscriptionQuery) -> Value {
    json!(["subscribe", root, name, query])
}

/// The query object sent with `subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionQuery {
    /// Requested record fields.
    pub fields: Vec<&'static str>,
    /// Clock token the subscription starts from.
    pub since: String,
    /// State names during which the daemon defers delivery.
    pub defer: Vec<String>,
    /// Offset of the requested directory inside the watched root.
    pub relative_root: Utf8PathBuf,
    /// Daemon-side filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Value>,
}

impl SubscriptionQuery {
    /// Builds the query for a handshake.
    ///
    /// The dotfile-excluding expression is only attached when no inclusion
    /// globs are configured and dotfiles are excluded; every other case is
    /// filtered client-side.
    #[must_use]
    pub fn new(since: String, relative_root: &Utf8Path, options: &WatcherOptions) -> Self {
        let expression = options
            .excludes_dotfiles_only()
            .then(|| json!(["match", "**", "wholename", { "includedotfiles": false }]));

        Self {
            fields: SUBSCRIPTION_FIELDS.to_vec(),
            since,
            defer: options.defer_states.clone(),
            relative_root: relative_root.to_owned(),
            expression,
        }
    }
}

/// Response to `watch-project`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchProjectResponse {
    /// The root the daemon actually watches.
    pub watch: Utf8PathBuf,
    /// Offset of the requested directory inside `watch`.
    #[serde(default)]
    pub relative_path: Option<Utf8PathBuf>,
}

/// Response to `clock`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockResponse {
    /// Opaque clock token.
    pub clock: String,
}

/// Response to `get-sockname`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SocknameResponse {
    /// Socket path reported by older daemons.
    #[serde(default)]
    pub sockname: Option<Utf8PathBuf>,
    /// Socket path reported by newer daemons.
    #[serde(default)]
    pub unix_domain: Option<Utf8PathBuf>,
}

impl SocknameResponse {
    /// Returns the Unix socket path, preferring `unix_domain`.
    #[must_use]
    pub fn into_path(self) -> Option<Utf8PathBuf> {
        self.unix_domain.or(self.sockname)
    }
}

/// A subscription push.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionPush {
    /// Name of the subscription the push belongs to.
    pub subscription: String,
    /// The daemon discarded its history and rescanned.
    #[serde(default)]
    pub is_fresh_instance: bool,
    /// Changed files, absent on state notifications.
    ///
    /// Kept undecoded so that one malformed record does not cost the rest of
    /// the push; each one decodes into a [`wm_core::ChangeRecord`].
    #[serde(default)]
    pub files: Option<Vec<Value>>,
    /// A state the daemon entered.
    #[serde(default, rename = "state-enter")]
    pub state_enter: Option<String>,
    /// A state the daemon left.
    #[serde(default, rename = "state-leave")]
    pub state_leave: Option<String>,
    /// Warning attached to the push.
    #[serde(default)]
    pub warning: Option<String>,
}
