//! # Configuration
//!
//! All settings live in one TOML document with four sections. Every field
//! has a default, so a missing file or a partial file both work:
//!
//! ```toml
//! [connection]
//! broker_url = "wss://broker.hivemq.com:8884/mqtt"
//! keep_alive_secs = 60
//! reconnect_delay_ms = 1000
//!
//! [simulator]
//! interval_ms = 2000
//!
//! [hub]
//! interval_ms = 5000
//!
//! [aggregator]
//! window_capacity = 7
//! tariff_per_kwh = 0.8
//! ```
//!
//! Lookup order: `ENERGYSYNC_CONFIG`, then `<config dir>/energysync/config.toml`,
//! then built-in defaults. `ENERGYSYNC_BROKER_URL` overrides the broker URL.
//! The file is only ever read.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::mqtt::BrokerAddress;
use crate::codec::DeviceId;

const CONFIG_DIR: &str = "energysync";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "ENERGYSYNC_CONFIG";
const BROKER_URL_ENV: &str = "ENERGYSYNC_BROKER_URL";

pub const DEFAULT_BROKER_URL: &str = "wss://broker.hivemq.com:8884/mqtt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broker connection settings
///
/// Immutable once handed to a [`BusConnection`](crate::bus::BusConnection).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `mqtt://host:port`, `ws://host:port/path` or `wss://host:port/path`
    pub broker_url: String,
    /// Fixed client id; a random one is generated per process when unset
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// Broker keeps no session state between connections
    pub clean_session: bool,
    pub reconnect_delay_ms: u64,
    /// Bounds only the very first connect attempt
    pub connect_timeout_secs: u64,
    /// `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the transport's outgoing request queue
    pub request_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            client_id: None,
            keep_alive_secs: 60,
            clean_session: true,
            reconnect_delay_ms: 1000,
            connect_timeout_secs: 30,
            max_reconnect_attempts: None,
            request_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Configured client id, or `<role>-<random hex>`
    pub fn resolved_client_id(&self, role: &str) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format!("{role}-{:08x}", rand::random::<u32>()),
        }
    }
}

/// Settings for one synthetic telemetry source
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PublisherSettings {
    pub appliance_name: String,
    /// Last topic segment: `energysync/appliances/<device_id>`
    pub device_id: String,
    pub interval_ms: u64,
    pub min_power_kw: f64,
    /// Exclusive upper bound
    pub max_power_kw: f64,
}

impl Default for PublisherSettings {
    /// Standalone simulator: one sample every 2 s
    fn default() -> Self {
        Self {
            appliance_name: "Virtual Lab Simulator".to_string(),
            device_id: "simulator".to_string(),
            interval_ms: 2000,
            min_power_kw: 3.5,
            max_power_kw: 9.5,
        }
    }
}

impl PublisherSettings {
    /// Publisher co-located with the device hub: one sample every 5 s
    pub fn hub() -> Self {
        Self {
            interval_ms: 5000,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "publisher interval must be non-zero".to_string(),
            ));
        }
        let range_ok = self.min_power_kw.is_finite()
            && self.max_power_kw.is_finite()
            && self.min_power_kw > 0.0
            && self.min_power_kw < self.max_power_kw;
        if !range_ok {
            return Err(ConfigError::Invalid(format!(
                "power range [{}, {}) must be positive and non-empty",
                self.min_power_kw, self.max_power_kw
            )));
        }
        DeviceId::new(self.device_id.as_str())
            .map_err(|e| ConfigError::Invalid(format!("publisher device id: {e}")))?;
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AggregatorSettings {
    pub window_capacity: NonZeroUsize,
    /// Cost per kWh used for the instantaneous cost figure
    pub tariff_per_kwh: f64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            window_capacity: NonZeroUsize::new(7).unwrap_or(NonZeroUsize::MIN),
            tariff_per_kwh: 0.8,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub simulator: PublisherSettings,
    pub hub: PublisherSettings,
    pub aggregator: AggregatorSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            simulator: PublisherSettings::default(),
            hub: PublisherSettings::hub(),
            aggregator: AggregatorSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config file (if any), applies env overrides and validates
    pub async fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path).await?,
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };

        if let Ok(url) = std::env::var(BROKER_URL_ENV) {
            info!("Broker URL overridden by {}: {}", BROKER_URL_ENV, url);
            config.connection.broker_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads one file; a missing file yields the defaults
    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        info!("Loaded config from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        BrokerAddress::parse(&self.connection.broker_url)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.connection.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "request capacity must be non-zero".to_string(),
            ));
        }
        self.simulator.validate()?;
        self.hub.validate()?;
        if !self.aggregator.tariff_per_kwh.is_finite() || self.aggregator.tariff_per_kwh < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tariff must be a non-negative number, got {}",
                self.aggregator.tariff_per_kwh
            )));
        }
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|mut base| {
        base.push(CONFIG_DIR);
        base.push(CONFIG_FILE);
        base
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.connection.broker_url, DEFAULT_BROKER_URL);
        assert_eq!(config.connection.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.connection.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(30));
        assert!(config.connection.clean_session);
        assert_eq!(config.connection.max_reconnect_attempts, None);
        assert_eq!(config.simulator.interval(), Duration::from_secs(2));
        assert_eq!(config.hub.interval(), Duration::from_secs(5));
        assert_eq!(config.aggregator.window_capacity.get(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [connection]
            broker_url = "mqtt://localhost:1883"

            [hub]
            interval_ms = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.connection.keep_alive_secs, 60);
        assert_eq!(config.hub.interval_ms, 3000);
        assert_eq!(config.hub.appliance_name, "Virtual Lab Simulator");
        assert_eq!(config.simulator.interval_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.connection.broker_url = "ftp://example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.simulator.interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.hub.min_power_kw = 9.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.simulator.device_id = "a/b".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            AppConfig::from_toml_str("[aggregator]\nwindow_capacity = 0"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn client_id_is_generated_when_unset() {
        let config = ConnectionConfig::default();
        let id = config.resolved_client_id("energysync-hub");
        assert!(id.starts_with("energysync-hub-"));

        let fixed = ConnectionConfig {
            client_id: Some("dashboard-1".to_string()),
            ..ConnectionConfig::default()
        };
        assert_eq!(fixed.resolved_client_id("ignored"), "dashboard-1");
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("energysync-definitely-missing.toml");
        let config = AppConfig::load_from(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
