//! Server configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tacfed_bridge::BridgeConfig;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP status surface settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Federation bridge settings.
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Network configuration for the HTTP status surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "tacfed_bridge=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Federation bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Master switch for the bridge. When off, the process serves only
    /// the status surface.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-deployment node identifier, carried in heartbeat pings and
    /// health reporting. Generated when not configured.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Per-record send attempt ceiling.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Durable-queue page size per poll.
    #[serde(default = "default_send_batch_size")]
    pub send_batch_size: i64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl FederationConfig {
    /// Translates the config section into bridge runtime settings.
    pub fn bridge_config(&self) -> Arc<BridgeConfig> {
        let defaults = BridgeConfig::default();
        Arc::new(BridgeConfig {
            node_id: self.node_id.clone(),
            max_retries: self.max_retries,
            send_batch_size: self.send_batch_size,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            ..defaults
        })
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "tacfed.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_node_id() -> String {
    format!("tacfed-{}", uuid::Uuid::new_v4())
}

fn default_max_retries() -> i64 {
    5
}

fn default_send_batch_size() -> i64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            node_id: default_node_id(),
            max_retries: default_max_retries(),
            send_batch_size: default_send_batch_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TACFED_HOST` overrides `server.host`
/// - `TACFED_PORT` overrides `server.port`
/// - `TACFED_DB_PATH` overrides `database.path`
/// - `TACFED_LOG_LEVEL` overrides `logging.level`
/// - `TACFED_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TACFED_FEDERATION_ENABLED` overrides `federation.enabled`
/// - `TACFED_NODE_ID` overrides `federation.node_id`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("TACFED_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TACFED_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("TACFED_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("TACFED_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TACFED_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(enabled) = std::env::var("TACFED_FEDERATION_ENABLED") {
        config.federation.enabled = enabled == "true" || enabled == "1";
    }
    if let Ok(node_id) = std::env::var("TACFED_NODE_ID") {
        config.federation.node_id = node_id;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.federation.enabled);
        assert_eq!(config.federation.max_retries, 5);
        assert!(config.federation.node_id.starts_with("tacfed-"));
    }

    #[test]
    fn federation_section_maps_to_bridge_settings() {
        let config: Config = toml::from_str(
            r#"
            [federation]
            node_id = "ops-east-1"
            max_retries = 3
            heartbeat_interval_secs = 15
            reconcile_interval_secs = 20
            "#,
        )
        .unwrap();

        let bridge = config.federation.bridge_config();
        assert_eq!(bridge.node_id, "ops-east-1");
        assert_eq!(bridge.max_retries, 3);
        assert_eq!(bridge.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(bridge.reconcile_interval, Duration::from_secs(20));
        // Untouched knobs keep their bridge defaults.
        assert_eq!(bridge.send_batch_size, 10);
    }
}
