//! Error definitions and classification for the session engine.
//!
//! Raw transport failures from rumqttc are collapsed into a small,
//! user-facing taxonomy. Classification prefers structured error variants
//! and falls back to substring matching on raw I/O messages.

use std::io::ErrorKind;

use rumqttc::{ConnectReturnCode, ConnectionError};
use thiserror::Error;

/// User-facing session failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// TCP-level refusal, typically a wrong port or a broker that is down.
    #[error("Connection refused. Please check if the broker is running and the port is correct.")]
    Refused,

    /// Broker rejected the credentials in the CONNECT handshake.
    #[error("Authentication failed. Please check your username and password.")]
    AuthFailed,

    /// Neither a CONNACK nor an error arrived within the connect deadline.
    #[error("Connection timed out. Please check your broker URL and port.")]
    Timeout,

    /// TLS or WebSocket negotiation failed before MQTT ever started.
    #[error("Transport handshake failed. Please check protocol/port compatibility.")]
    Handshake,

    /// Anything the taxonomy does not recognize, carrying the raw message.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Connection settings rejected before dialing.
    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    /// The session worker went away without reporting a connect result.
    #[error("Session worker terminated unexpectedly")]
    WorkerGone,
}

/// Maps a rumqttc connection error onto the user-facing taxonomy.
pub fn classify_connection_error(err: &ConnectionError) -> SessionError {
    match err {
        ConnectionError::ConnectionRefused(code) => classify_connack_code(*code),
        ConnectionError::Io(io) => match io.kind() {
            ErrorKind::ConnectionRefused => SessionError::Refused,
            ErrorKind::TimedOut => SessionError::Timeout,
            _ => classify_raw(&io.to_string()),
        },
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => SessionError::Timeout,
        ConnectionError::Tls(_) => SessionError::Handshake,
        ConnectionError::NotConnAck(_) => SessionError::Handshake,
        ConnectionError::Websocket(_) | ConnectionError::WsConnect(_) => SessionError::Handshake,
        other => classify_raw(&other.to_string()),
    }
}

/// Maps a broker CONNACK rejection code onto the taxonomy.
pub fn classify_connack_code(code: ConnectReturnCode) -> SessionError {
    match code {
        ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => {
            SessionError::AuthFailed
        }
        other => SessionError::Connection(format!("broker rejected the connection: {other:?}")),
    }
}

fn classify_raw(raw: &str) -> SessionError {
    let lowered = raw.to_lowercase();
    if lowered.contains("connection refused") || raw.contains("ECONNREFUSED") {
        SessionError::Refused
    } else if lowered.contains("not authorized") {
        SessionError::AuthFailed
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        SessionError::Timeout
    } else if lowered.contains("websocket") || lowered.contains("handshake") {
        SessionError::Handshake
    } else {
        SessionError::Connection(raw.to_string())
    }
}
