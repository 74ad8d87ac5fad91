//! Worker task driving one broker session.
//!
//! Exactly one worker exists per connection attempt. It owns the rumqttc
//! client and event loop together with the [`SessionEngine`], so every state
//! transition, registry change and tree mutation is serialized through this
//! single task. The worker exits on cancellation, on the first transport
//! error or when the broker closes the connection; it never reconnects on
//! its own.

use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::config::transport_qos;
use super::engine::SessionEngine;
use super::error::{classify_connack_code, classify_connection_error, SessionError};

/// Commands the handle forwards into the worker.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Subscribe { topic_filter: String, qos: u8 },
    Unsubscribe { topic_filter: String },
}

/// Runs the session until cancellation, transport failure or broker close.
///
/// `connect_result` is the one-shot completion token for the pending
/// `connect()` call: the first of CONNACK or transport error fulfills it,
/// everything after that is a no-op. The caller's deadline timer holds the
/// receiving half, so the three-way race resolves exactly once.
pub(crate) async fn run_session_worker(
    client: AsyncClient,
    mut event_loop: EventLoop,
    mut commands: mpsc::Receiver<SessionCommand>,
    connect_result: oneshot::Sender<Result<(), SessionError>>,
    cancel: CancellationToken,
    mut engine: SessionEngine,
) {
    let mut connect_result = Some(connect_result);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("session worker cancelled, tearing down transport");
                engine.collapse(None);
                break;
            }

            command = commands.recv() => match command {
                Some(command) => handle_command(&client, &mut engine, command).await,
                // Handle dropped without an explicit disconnect.
                None => {
                    debug!("command channel closed, ending session");
                    engine.collapse(None);
                    break;
                }
            },

            event = event_loop.poll() => match event {
                Ok(event) => {
                    if !handle_event(&mut engine, &mut connect_result, event) {
                        break;
                    }
                }
                Err(error) => {
                    handle_transport_error(&mut engine, &mut connect_result, &error);
                    break;
                }
            },
        }
    }

    // Dropping the client and event loop closes the socket without a
    // protocol-level DISCONNECT, matching the forced-teardown contract.
    drop(client);
    drop(event_loop);
}

async fn handle_command(client: &AsyncClient, engine: &mut SessionEngine, command: SessionCommand) {
    match command {
        SessionCommand::Subscribe { topic_filter, qos } => {
            match client.subscribe(&topic_filter, transport_qos(qos)).await {
                Ok(()) => {
                    debug!(filter = %topic_filter, qos, "subscribe request sent");
                    engine.subscribe_requested(topic_filter, qos);
                }
                Err(error) => warn!(filter = %topic_filter, %error, "subscribe request failed"),
            }
        }
        SessionCommand::Unsubscribe { topic_filter } => {
            match client.unsubscribe(&topic_filter).await {
                Ok(()) => {
                    debug!(filter = %topic_filter, "unsubscribe request sent");
                    engine.unsubscribe_requested(topic_filter);
                }
                Err(error) => warn!(filter = %topic_filter, %error, "unsubscribe request failed"),
            }
        }
    }
}

/// Applies one transport event. Returns `false` when the session is over and
/// the worker should exit.
fn handle_event(
    engine: &mut SessionEngine,
    connect_result: &mut Option<oneshot::Sender<Result<(), SessionError>>>,
    event: Event,
) -> bool {
    let Event::Incoming(packet) = event else {
        return true;
    };

    match packet {
        Packet::ConnAck(ConnAck { code, .. }) => {
            if code == ConnectReturnCode::Success {
                info!("broker accepted the connection");
                engine.mark_connected();
                if let Some(sender) = connect_result.take() {
                    let _ = sender.send(Ok(()));
                }
            } else {
                // rumqttc normally surfaces rejections as poll errors; kept
                // for brokers that still deliver the CONNACK packet first.
                let error = classify_connack_code(code);
                warn!(%error, "broker rejected the connection");
                if let Some(sender) = connect_result.take() {
                    let _ = sender.send(Err(error.clone()));
                }
                engine.collapse(Some(error.to_string()));
                return false;
            }
        }
        Packet::Publish(publish) => {
            let payload = String::from_utf8_lossy(&publish.payload);
            trace!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
            engine.record_message(&publish.topic, &payload);
        }
        Packet::SubAck(ack) => {
            for code in ack.return_codes {
                let granted = match code {
                    SubscribeReasonCode::Success(qos) => Some(qos as u8),
                    SubscribeReasonCode::Failure => None,
                };
                engine.subscribe_acknowledged(granted);
            }
        }
        Packet::UnsubAck(_) => engine.unsubscribe_acknowledged(),
        Packet::Disconnect => {
            info!("broker closed the session");
            engine.collapse(None);
            return false;
        }
        _ => {}
    }
    true
}

/// Post-connect errors end the session silently; during the connect attempt
/// they also fail the pending `connect()` call with a classified error.
fn handle_transport_error(
    engine: &mut SessionEngine,
    connect_result: &mut Option<oneshot::Sender<Result<(), SessionError>>>,
    error: &ConnectionError,
) {
    let classified = classify_connection_error(error);
    warn!(%error, %classified, "transport error ended the session");
    match connect_result.take() {
        Some(sender) => {
            let _ = sender.send(Err(classified));
            engine.collapse(None);
        }
        None => engine.collapse(Some(classified.to_string())),
    }
}
