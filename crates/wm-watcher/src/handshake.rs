//! The watch-project, clock, subscribe sequence.
//!
//! ```text
//! watch-project <dir> ──► { watch, relative_path } ──► WatchRoot
//! clock <watch>       ──► { clock }                ──► since token
//! subscribe <watch> <name> { fields, since, defer, relative_root, expression? }
//! ```
//!
//! Each step is issued only after the previous response arrived. Any error
//! field aborts the attempt; the sequencer never retries on its own.

use camino::Utf8Path;
use serde_json::Value;
use wm_core::{WatchRoot, WatcherOptions};

use crate::error::WatchError;
use crate::protocol::{self, ClockResponse, SubscriptionQuery, WatchProjectResponse};
use crate::session::Session;
use crate::warnings::WarningPolicy;

/// Runs the three-step handshake for one session.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeSequencer<'a> {
    requested: &'a Utf8Path,
    options: &'a WatcherOptions,
}

impl<'a> HandshakeSequencer<'a> {
    /// Creates a sequencer for the requested directory.
    #[must_use]
    pub const fn new(requested: &'a Utf8Path, options: &'a WatcherOptions) -> Self {
        Self { requested, options }
    }

    /// Runs the handshake and returns the resolved watch root.
    ///
    /// The caller installs the returned root; nothing is published here, so a
    /// failed attempt leaves no partial context behind.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Protocol`] if a response carries an error field
    /// - [`WatchError::Disconnected`] if the session ends mid-handshake
    /// - [`WatchError::Decode`] if a response lacks a required field
    pub async fn run(
        &self,
        session: &mut Session,
        warnings: &mut WarningPolicy,
    ) -> Result<WatchRoot, WatchError> {
        let response: WatchProjectResponse = step(
            session,
            warnings,
            "watch-project",
            &protocol::watch_project(self.requested),
        )
        .await?;
        let root = WatchRoot::new(response.watch, response.relative_path.unwrap_or_default());
        tracing::debug!(
            root = %root.root,
            relative_path = %root.relative_path,
            "Resolved watch root"
        );

        let ClockResponse { clock } =
            step(session, warnings, "clock", &protocol::clock(&root.root)).await?;
        tracing::trace!(clock = %clock, "Subscribing from clock");

        let query = SubscriptionQuery::new(clock, &root.relative_path, self.options);
        let _: Value = step(
            session,
            warnings,
            "subscribe",
            &protocol::subscribe(&root.root, &self.options.subscription_name, &query),
        )
        .await?;

        Ok(root)
    }
}

/// Sends one command, applies the warning policy and decodes the response.
async fn step<T>(
    session: &mut Session,
    warnings: &mut WarningPolicy,
    name: &'static str,
    command: &Value,
) -> Result<T, WatchError>
where
    T: serde::de::DeserializeOwned,
{
    let response = session.command(command).await?;
    warnings.check(name, &response)?;
    Ok(serde_json::from_value(response)?)
}
