//! Public handle for the session engine.
//!
//! The handle is the one object the embedding layer talks to: it starts and
//! tears down sessions, forwards subscribe/unsubscribe requests, and hands
//! out watch receivers for observing state. At most one session is live per
//! handle; starting a new connection attempt force-terminates the previous
//! one first.

use std::sync::Arc;

use rumqttc::{AsyncClient, NetworkOptions};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::{SessionConfig, CONNECT_DEADLINE};
use super::engine::{ConnectionState, SessionEngine, SessionSnapshot};
use super::error::SessionError;
use super::session_worker::{run_session_worker, SessionCommand};

const COMMAND_CAPACITY: usize = 64;
const EVENT_LOOP_CAPACITY: usize = 256;

struct ActiveSession {
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Owned session engine: connection lifecycle, subscription registry and
/// topic tree behind one API.
///
/// State is observed through [`SessionHandle::snapshots`]: every mutation
/// publishes a new [`SessionSnapshot`] on the watch channel, so a UI can
/// react to changes without polling and without touching worker internals.
pub struct SessionHandle {
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    active: Option<ActiveSession>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::initial());
        SessionHandle {
            snapshots: Arc::new(snapshots),
            active: None,
        }
    }

    /// Watch receiver delivering a snapshot per state mutation.
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Most recent snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshots.borrow().state
    }

    /// Connects to the broker described by `config`.
    ///
    /// Any existing session is force-terminated first, without waiting for a
    /// protocol-level disconnect. The call resolves with exactly one of:
    /// success once the broker acknowledges the connection, a classified
    /// transport error, or [`SessionError::Timeout`] when neither arrives
    /// within the 10 second deadline. A lost attempt cannot leak into a
    /// later one: each attempt gets a fresh completion token and
    /// cancellation token.
    pub async fn connect(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        self.teardown().await;
        config.validate()?;
        info!(host = %config.host, port = config.port, transport = ?config.transport,
            "starting connection attempt");

        let (client, mut event_loop) = AsyncClient::new(config.mqtt_options(), EVENT_LOOP_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(CONNECT_DEADLINE.as_secs());
        event_loop.set_network_options(network_options);

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (connect_tx, connect_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let engine = SessionEngine::connecting(self.snapshots.clone());

        let worker = tokio::spawn(run_session_worker(
            client,
            event_loop,
            command_rx,
            connect_tx,
            cancel.clone(),
            engine,
        ));
        self.active = Some(ActiveSession {
            commands,
            cancel,
            worker,
        });

        match await_connect_result(connect_rx).await {
            Ok(()) => Ok(()),
            Err(error) => {
                // Timeout or failure: make sure the transport is torn down
                // before surfacing the classified error.
                self.teardown().await;
                Err(error)
            }
        }
    }

    /// Force-terminates the current session, clearing subscriptions and
    /// resetting the topic tree. No-op while disconnected.
    pub async fn disconnect(&mut self) {
        if self.active.is_some() {
            info!("disconnecting session");
        }
        self.teardown().await;
    }

    /// Requests a subscription on the live session. Silently ignored unless
    /// connected; the registry updates once the broker acknowledges.
    pub async fn subscribe(&self, topic_filter: &str, qos: u8) {
        let Some(active) = self.connected_session() else {
            debug!(filter = %topic_filter, "subscribe ignored, not connected");
            return;
        };
        let _ = active
            .commands
            .send(SessionCommand::Subscribe {
                topic_filter: topic_filter.to_string(),
                qos,
            })
            .await;
    }

    /// Requests removal of a subscription by exact topic filter. Silently
    /// ignored unless connected.
    pub async fn unsubscribe(&self, topic_filter: &str) {
        let Some(active) = self.connected_session() else {
            debug!(filter = %topic_filter, "unsubscribe ignored, not connected");
            return;
        };
        let _ = active
            .commands
            .send(SessionCommand::Unsubscribe {
                topic_filter: topic_filter.to_string(),
            })
            .await;
    }

    fn connected_session(&self) -> Option<&ActiveSession> {
        if self.snapshots.borrow().state != ConnectionState::Connected {
            return None;
        }
        self.active.as_ref()
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(error) = active.worker.await {
            debug!(%error, "session worker ended abnormally");
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        SessionHandle::new()
    }
}

/// Races the worker's completion token against the connect deadline.
async fn await_connect_result(
    connect_rx: oneshot::Receiver<Result<(), SessionError>>,
) -> Result<(), SessionError> {
    match timeout(CONNECT_DEADLINE, connect_rx).await {
        Ok(Ok(result)) => result,
        // Worker died without reporting; treat like a transport loss.
        Ok(Err(_)) => Err(SessionError::WorkerGone),
        Err(_) => Err(SessionError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_when_nothing_resolves() {
        let (_tx, rx) = oneshot::channel::<Result<(), SessionError>>();
        let started = tokio::time::Instant::now();
        let result = await_connect_result(rx).await;
        assert_eq!(result, Err(SessionError::Timeout));
        assert_eq!(started.elapsed(), CONNECT_DEADLINE);
    }

    #[tokio::test(start_paused = true)]
    async fn success_beats_the_deadline() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(Ok(()));
        });
        assert_eq!(await_connect_result(rx).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn classified_error_beats_the_deadline() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(Err(SessionError::AuthFailed));
        });
        assert_eq!(await_connect_result(rx).await, Err(SessionError::AuthFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_worker_is_not_a_timeout() {
        let (tx, rx) = oneshot::channel::<Result<(), SessionError>>();
        drop(tx);
        assert_eq!(await_connect_result(rx).await, Err(SessionError::WorkerGone));
    }

    #[tokio::test]
    async fn subscribe_is_a_noop_while_disconnected() {
        let handle = SessionHandle::new();
        handle.subscribe("sensors/#", 1).await;
        handle.unsubscribe("sensors/#").await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.subscriptions.is_empty());
        assert_eq!(snapshot.revision, 0);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_a_noop() {
        let mut handle = SessionHandle::new();
        handle.disconnect().await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.snapshot().revision, 0);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_dialing() {
        let mut handle = SessionHandle::new();
        let config = SessionConfig::new("", "c1", crate::session::TransportKind::Tcp);
        let result = handle.connect(config).await;
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
