//! Application configuration for the mqttscope binary.
//!
//! Loaded from `mqttscope/config.toml` under the platform config directory.
//! A missing file is not an error: the default configuration is written out
//! so the user has something concrete to edit, and the run continues with
//! the defaults. Broken TOML is an error, silently falling back would hide
//! typos in broker credentials.

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::{SessionConfig, TransportKind};

const CONFIG_DIR: &str = "mqttscope";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub broker: BrokerSettings,
    /// Filters subscribed right after a successful connect.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSettings {
    pub host: String,
    /// Defaults to the transport's well-known port when absent.
    pub port: Option<u16>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub filter: String,
    #[serde(default)]
    pub qos: u8,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            host: "test.mosquitto.org".to_string(),
            port: None,
            client_id: "mqttscope".to_string(),
            username: None,
            password: None,
            transport: TransportKind::WebSocket,
        }
    }
}

impl BrokerSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or_else(|| self.transport.default_port()),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            transport: self.transport,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let mut path =
            dirs::config_dir().ok_or_else(|| eyre!("no config directory on this platform"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Reads the config file, creating it with defaults on first run.
    pub async fn load_or_default() -> Result<Self> {
        let path = Self::config_path()?;
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("failed to check for config file: {}", e))?
        {
            let config = AppConfig::default();
            config.save(&path).await?;
            info!("wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("failed to read {}: {}", path.display(), e))?;
        let config =
            toml::from_str(&raw).map_err(|e| eyre!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    async fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("failed to create config directory: {}", e))?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| eyre!("serialize config: {}", e))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| eyre!("failed to write {}: {}", path.display(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_port_falls_back_to_transport_default() {
        let raw = r#"
            [broker]
            host = "broker.example"
            client_id = "c1"
            transport = "tcp"

            [[subscriptions]]
            filter = "sensors/+/temperature"
            qos = 1
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        let session = config.broker.session_config();
        assert_eq!(session.port, 8883);
        assert_eq!(config.subscriptions.len(), 1);
        assert_eq!(config.subscriptions[0].qos, 1);
    }

    #[test]
    fn explicit_port_wins() {
        let settings = BrokerSettings {
            port: Some(9001),
            ..BrokerSettings::default()
        };
        assert_eq!(settings.session_config().port, 9001);
    }

    #[test]
    fn qos_defaults_to_zero() {
        let raw = r##"
            [broker]
            host = "broker.example"
            client_id = "c1"

            [[subscriptions]]
            filter = "#"
        "##;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.subscriptions[0].qos, 0);
    }
}
