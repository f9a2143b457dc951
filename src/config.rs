//! YAML configuration. `main` calls `dotenvy::dotenv()` before `Config::load`
//! so a `.env` file populates `std::env`; `load` then overrides the handful
//! of fields that are secrets or per-deployment values rather than
//! checked-in config (`DATABASE_URL`, `SESSION_SECRET`, `KAFKA_BROKERS`) from
//! the environment. See `spec.md` §6 for the recognized option tree.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    Poll,
    Sse,
}

fn default_warlink_poll_rate_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarlinkConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_warlink_poll_rate_secs")]
    pub poll_rate_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gateway_mode")]
    pub mode: GatewayMode,
}

fn default_gateway_mode() -> GatewayMode {
    GatewayMode::Poll
}

impl WarlinkConfig {
    pub fn poll_rate(&self) -> Duration {
        Duration::from_secs(self.poll_rate_secs)
    }
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_false() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    pub port: u16,
    pub session_secret: String,
    #[serde(default = "default_false")]
    pub auto_confirm: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
}

fn default_outbox_drain_interval_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    pub kafka: KafkaConfig,
    pub orders_topic: String,
    pub dispatch_topic: String,
    #[serde(default = "default_outbox_drain_interval_secs")]
    pub outbox_drain_interval_secs: u64,
    pub station_id: Option<String>,
}

impl MessagingConfig {
    pub fn outbox_drain_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_drain_interval_secs)
    }
}

fn default_jump_threshold() -> i64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    #[serde(default = "default_jump_threshold")]
    pub jump_threshold: i64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            jump_threshold: default_jump_threshold(),
        }
    }
}

fn default_poll_rate_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub namespace: String,
    pub line_id: String,
    pub database_url: String,
    #[serde(default = "default_poll_rate_secs")]
    pub poll_rate_secs: u64,
    pub warlink: WarlinkConfig,
    pub web: WebConfig,
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub counter: CounterConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overrides the fields that are secrets or per-deployment values
    /// rather than checked-in config. Silent no-op per field when the
    /// corresponding env var isn't set.
    fn apply_env_overrides(&mut self) {
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            self.database_url = database_url;
        }
        if let Ok(session_secret) = std::env::var("SESSION_SECRET") {
            self.web.session_secret = session_secret;
        }
        if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
            self.messaging.kafka.brokers = brokers;
        }
    }

    pub fn poll_rate(&self) -> Duration {
        Duration::from_secs(self.poll_rate_secs)
    }

    /// Station id defaults to `{namespace}.{line_id}`; `messaging.station_id`
    /// overrides it when set.
    pub fn station_id(&self) -> String {
        self.messaging
            .station_id
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.namespace, self.line_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
namespace: acme
line_id: line1
database_url: postgres://localhost/station_edge
warlink:
  host: 127.0.0.1
  port: 8088
web:
  port: 8080
  session_secret: test-secret
messaging:
  kafka:
    brokers: localhost:9092
    group_id: station-edge-line1
  orders_topic: shingo.orders
  dispatch_topic: shingo.dispatch
  station_id: null
"#;

    #[test]
    fn station_id_defaults_to_namespace_dot_line() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.station_id(), "acme.line1");
    }

    #[test]
    fn station_id_override_takes_precedence() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.messaging.station_id = Some("custom.station".to_string());
        assert_eq!(config.station_id(), "custom.station");
    }

    #[test]
    fn env_override_replaces_database_url_when_set() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        std::env::set_var("DATABASE_URL", "postgres://override/station_edge");
        config.apply_env_overrides();
        std::env::remove_var("DATABASE_URL");
        assert_eq!(config.database_url, "postgres://override/station_edge");
    }

    #[test]
    fn env_override_is_a_no_op_when_unset() {
        std::env::remove_var("SESSION_SECRET");
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.apply_env_overrides();
        assert_eq!(config.web.session_secret, "test-secret");
    }

    #[test]
    fn warlink_mode_defaults_to_poll() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.warlink.mode, GatewayMode::Poll);
    }
}
