//! Session ownership and reinitialization.
//!
//! # Lifecycle
//!
//! ```text
//!        ┌──────────────────────────────────────────────────────────┐
//!        ▼                                                          │
//!   invalidate context ─► connect ─► handshake ─► install + Ready   │
//!                            │           │              │           │
//!                          error       error            ▼           │
//!                            │           └────► drain pushes/errors │
//!                            │                          │           │
//!                            └──────────────► session ends ─► delay ┘
//! ```
//!
//! Exactly one session exists at a time. Dropping a [`Session`] aborts its
//! reader, so a stale session never delivers into the next one.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tokio_util::sync::CancellationToken;
use wm_core::WatcherOptions;

use crate::context::WatchContext;
use crate::error::WatchError;
use crate::events::WatcherEvent;
use crate::handshake::HandshakeSequencer;
use crate::processor::{ChangeProcessor, Outlet};
use crate::session::{Connector, Session, SessionEvent};
use crate::warnings::WarningPolicy;

/// How a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOutcome {
    /// No session could be opened.
    Unreachable,
    /// The daemon closed an open session.
    Ended {
        /// Whether the handshake completed before the end.
        ready: bool,
    },
    /// The watcher was closed.
    Closed,
}

impl SessionOutcome {
    /// What to log before the next attempt, if one follows.
    const fn retry_notice(self) -> Option<&'static str> {
        match self {
            Self::Unreachable => Some("Retrying connection to watchman"),
            Self::Ended { .. } => Some("Lost connection to watchman, reconnecting"),
            Self::Closed => None,
        }
    }
}

/// Drives sessions until the watcher is closed or the reconnect policy gives
/// up.
pub(crate) struct ConnectionManager {
    requested: Utf8PathBuf,
    options: WatcherOptions,
    connector: Arc<dyn Connector>,
    processor: ChangeProcessor,
    context: WatchContext,
    outlet: Outlet,
    warnings: WarningPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("requested", &self.requested)
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        requested: Utf8PathBuf,
        options: WatcherOptions,
        connector: Arc<dyn Connector>,
        processor: ChangeProcessor,
        context: WatchContext,
        outlet: Outlet,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            requested,
            options,
            connector,
            processor,
            context,
            outlet,
            warnings: WarningPolicy::new(),
            cancel,
        }
    }

    /// Runs sessions back to back.
    ///
    /// After a session that reached `ready`, the next attempt starts
    /// immediately. Each consecutive session that ends without reaching
    /// `ready` moves one step further along the backoff.
    pub(crate) async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut previous: Option<SessionOutcome> = None;

        loop {
            let Some(delay) = self.options.reconnect.delay_for(failures) else {
                let error = WatchError::ReconnectExhausted { attempts: failures };
                tracing::error!(%error, root = %self.requested, "Stopping watcher");
                self.outlet.error(error);
                break;
            };

            if let Some(notice) = previous.and_then(SessionOutcome::retry_notice) {
                tracing::warn!(root = %self.requested, "{notice}");
            }

            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis(), attempt = failures, "Backing off");
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = self.run_session().await;
            match outcome {
                SessionOutcome::Closed => break,
                SessionOutcome::Ended { ready: true } => failures = 0,
                SessionOutcome::Ended { ready: false } | SessionOutcome::Unreachable => {
                    failures = failures.saturating_add(1);
                }
            }
            previous = Some(outcome);
        }

        self.context.invalidate();
        tracing::debug!(root = %self.requested, "Connection manager stopped");
    }

    /// Opens one session, runs the handshake and forwards everything the
    /// session delivers until it ends.
    async fn run_session(&mut self) -> SessionOutcome {
        self.context.invalidate();
        self.outlet.stats().record_session();

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return SessionOutcome::Closed,
            connected = self.connector.connect() => connected,
        };
        let mut session = match connected {
            Ok(stream) => Session::start(stream),
            Err(error) => {
                tracing::warn!(%error, "Failed to connect to watchman");
                self.outlet.error(error);
                return SessionOutcome::Unreachable;
            }
        };

        let sequencer = HandshakeSequencer::new(&self.requested, &self.options);
        let handshake = tokio::select! {
            () = self.cancel.cancelled() => {
                session.end().await;
                return SessionOutcome::Closed;
            }
            result = sequencer.run(&mut session, &mut self.warnings) => result,
        };

        let ready = match handshake {
            Ok(root) => {
                tracing::info!(
                    root = %root.root,
                    relative_path = %root.relative_path,
                    "Subscribed to watchman"
                );
                self.context.install(root);
                self.outlet.stats().record_ready();
                self.outlet.emit(&WatcherEvent::Ready);
                true
            }
            // Whatever ended the session is still queued in it.
            Err(WatchError::Disconnected) => false,
            Err(error) => {
                tracing::warn!(%error, "watchman handshake failed");
                self.outlet.error(error);
                false
            }
        };

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    session.end().await;
                    return SessionOutcome::Closed;
                }
                event = session.next_event() => event,
            };

            match event {
                SessionEvent::Push(push) => {
                    self.processor.handle(push, &mut self.warnings);
                }
                SessionEvent::Error(error) => {
                    tracing::debug!(%error, "watchman session error");
                    self.outlet.error(error);
                }
                SessionEvent::Response(response) => {
                    tracing::debug!(%response, "Ignoring stray watchman response");
                }
                SessionEvent::End => {
                    self.outlet.stats().record_disconnect();
                    return SessionOutcome::Ended { ready };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use crate::filter::AcceptAllFilter;
    use crate::metadata::MetadataSource;
    use crate::stats::WatcherStats;
    use crate::testing::{FakeConnector, FakeDaemon, FakeMetadata};
    use camino::Utf8Path;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use wm_core::ReconnectPolicy;

    struct Running {
        daemon: FakeDaemon,
        connector: Arc<FakeConnector>,
        events: mpsc::UnboundedReceiver<WatcherEvent>,
        stats: Arc<WatcherStats>,
        context: WatchContext,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(reconnect: ReconnectPolicy) -> Running {
        let (connector, daemon) = FakeConnector::new();
        let options = WatcherOptions {
            reconnect,
            ..WatcherOptions::default()
        };
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe(&EventKind::ALL_KINDS);
        let stats = Arc::new(WatcherStats::new());
        let outlet = Outlet::new(bus, Arc::clone(&stats));
        let context = WatchContext::new();
        let cancel = CancellationToken::new();
        let metadata: Arc<dyn MetadataSource> = FakeMetadata::new();

        let processor = ChangeProcessor::new(
            options.subscription_name.clone(),
            Utf8PathBuf::from("/repo"),
            context.clone(),
            Arc::new(AcceptAllFilter),
            metadata,
            &options.defer_states,
            outlet.clone(),
            cancel.clone(),
        );
        let manager = ConnectionManager::new(
            Utf8PathBuf::from("/repo"),
            options,
            Arc::clone(&connector) as Arc<dyn Connector>,
            processor,
            context.clone(),
            outlet,
            cancel.clone(),
        );

        Running {
            daemon,
            connector,
            events,
            stats,
            context,
            cancel,
            task: tokio::spawn(manager.run()),
        }
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<WatcherEvent>) -> WatcherEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_disconnects_trigger_reinitialization() {
        let mut running = start(ReconnectPolicy::default());
        let root = Utf8Path::new("/repo");

        for round in 0..3 {
            let mut conn = running.daemon.accept_ready(root).await;
            assert!(matches!(next(&mut running.events).await, WatcherEvent::Ready));

            conn.push(json!([{"name": format!("gone-{round}.txt"), "exists": false}]))
                .await;
            assert!(matches!(next(&mut running.events).await, WatcherEvent::Delete(_)));
            assert!(matches!(next(&mut running.events).await, WatcherEvent::All(..)));
            drop(conn);
        }

        let _conn = running.daemon.accept_ready(root).await;
        assert!(matches!(next(&mut running.events).await, WatcherEvent::Ready));

        let snap = running.stats.snapshot();
        assert_eq!(snap.reinitializations(), 3);
        assert_eq!(snap.disconnects, 3);
        assert_eq!(snap.handshakes, 4);
        assert_eq!(running.connector.connects(), 4);

        running.cancel.cancel();
        running.task.await.unwrap();
        assert!(running.context.get().is_none());
    }

    #[tokio::test]
    async fn test_protocol_error_waits_for_disconnect() {
        let mut running = start(ReconnectPolicy::immediate());

        let mut conn = running.daemon.accept().await;
        conn.expect("watch-project").await;
        conn.send(json!({"error": "unable to resolve root /repo"})).await;

        match next(&mut running.events).await {
            WatcherEvent::Error(error) => {
                assert!(matches!(
                    error.as_ref(),
                    WatchError::Protocol { command: "watch-project", .. }
                ));
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert!(running.context.get().is_none());
        assert_eq!(running.connector.connects(), 1);

        // Only the disconnect starts the next attempt.
        drop(conn);
        let _conn = running.daemon.accept_ready(Utf8Path::new("/repo")).await;
        assert!(matches!(next(&mut running.events).await, WatcherEvent::Ready));
        assert_eq!(running.connector.connects(), 2);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_errors_are_forwarded_without_reconnect() {
        let mut running = start(ReconnectPolicy::default());

        let mut conn = running.daemon.accept_ready(Utf8Path::new("/repo")).await;
        assert!(matches!(next(&mut running.events).await, WatcherEvent::Ready));

        conn.send_raw(b"{truncated\n").await;
        conn.send(json!("stray response")).await;
        conn.push(json!([{"name": "x", "exists": false}])).await;

        assert!(matches!(
            next(&mut running.events).await,
            WatcherEvent::Error(error) if matches!(error.as_ref(), WatchError::Decode(_))
        ));
        // The session survives; the push still arrives on it.
        assert!(matches!(next(&mut running.events).await, WatcherEvent::Delete(_)));
        assert_eq!(running.connector.connects(), 1);
        assert_eq!(running.stats.snapshot().errors, 1);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[test]
    fn test_retry_notice_distinguishes_failed_connects() {
        assert_eq!(
            SessionOutcome::Unreachable.retry_notice(),
            Some("Retrying connection to watchman")
        );
        for ready in [true, false] {
            assert_eq!(
                SessionOutcome::Ended { ready }.retry_notice(),
                Some("Lost connection to watchman, reconnecting")
            );
        }
        assert_eq!(SessionOutcome::Closed.retry_notice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_back_off_and_give_up() {
        let mut running = start(ReconnectPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: Some(3),
        });
        running.connector.refuse_next(u32::MAX);

        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            assert!(matches!(
                next(&mut running.events).await,
                WatcherEvent::Error(error) if matches!(error.as_ref(), WatchError::Connect(_))
            ));
        }
        match next(&mut running.events).await {
            WatcherEvent::Error(error) => {
                assert!(matches!(
                    error.as_ref(),
                    WatchError::ReconnectExhausted { attempts: 3 }
                ));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }

        running.task.await.unwrap();
        // 0 ms, then 100 ms, then 200 ms.
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(running.connector.connects(), 3);
    }

    #[tokio::test]
    async fn test_close_during_handshake() {
        let mut running = start(ReconnectPolicy::default());

        let mut conn = running.daemon.accept().await;
        conn.expect("watch-project").await;

        running.cancel.cancel();
        running.task.await.unwrap();

        assert!(conn.next_command().await.is_none());
        assert!(running.events.try_recv().is_err());
    }
}
