//! Connection settings for a single broker session and their translation
//! into rumqttc transport options.

use std::time::Duration;

use rumqttc::{MqttOptions, QoS, Transport};
use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Fixed sub-path brokers expose for MQTT over WebSocket.
pub const MQTT_WS_PATH: &str = "/mqtt";

/// Keep-alive interval applied to every session.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Outer deadline for a connect attempt: whichever of CONNACK, transport
/// error or this timer wins first decides the attempt.
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// How the session reaches the broker. Both variants are TLS-secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// MQTT over secure WebSocket on the `/mqtt` sub-path.
    #[default]
    WebSocket,
    /// MQTT over a raw TLS socket.
    Tcp,
}

impl TransportKind {
    /// Port used when the caller does not pick one explicitly.
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::WebSocket => 443,
            TransportKind::Tcp => 8883,
        }
    }
}

/// Immutable description of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Broker hostname or domain, without a scheme prefix.
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub transport: TransportKind,
}

impl SessionConfig {
    /// Config for the given endpoint with the transport's default port and
    /// no credentials.
    pub fn new(
        host: impl Into<String>,
        client_id: impl Into<String>,
        transport: TransportKind,
    ) -> Self {
        SessionConfig {
            host: host.into(),
            port: transport.default_port(),
            client_id: client_id.into(),
            username: None,
            password: None,
            transport,
        }
    }

    /// Rejects settings rumqttc would choke on before any dialing happens.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.host.trim().is_empty() {
            return Err(SessionError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidConfig("port must be nonzero".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "client id must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Builds the rumqttc options for this session.
    ///
    /// Clean session and a 30 second keep-alive are always applied. There is
    /// no auto-reconnect setting to disable here: the session worker simply
    /// stops polling the event loop on the first failure.
    pub(crate) fn mqtt_options(&self) -> MqttOptions {
        let mut options = match self.transport {
            TransportKind::WebSocket => {
                // rumqttc takes the full URL as the broker address for ws
                // transports; the port argument is part of the URL instead.
                let url = format!("wss://{}:{}{}", self.host, self.port, MQTT_WS_PATH);
                let mut options = MqttOptions::new(&self.client_id, url, self.port);
                options.set_transport(Transport::wss_with_default_config());
                options
            }
            TransportKind::Tcp => {
                let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
                options.set_transport(Transport::tls_with_default_config());
                options
            }
        };

        options.set_keep_alive(KEEP_ALIVE).set_clean_session(true);
        if let Some(username) = &self.username {
            let password = self.password.clone().unwrap_or_default();
            options.set_credentials(username, password);
        }
        options
    }
}

/// Maps the registry's plain QoS tag onto the transport enum. Values above 2
/// are clamped to at-most-once rather than rejected.
pub(crate) fn transport_qos(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}
