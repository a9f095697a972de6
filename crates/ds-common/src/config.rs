//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Service configuration model and loader."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_service_name() -> String {
    "device-simple".to_owned()
}

fn default_service_host() -> String {
    "localhost".to_owned()
}

fn default_service_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 59999))
}

fn default_startup_message() -> String {
    "device service started".to_owned()
}

fn default_connect_retries() -> u32 {
    20
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_max_cmd_ops() -> usize {
    128
}

fn default_async_buffer_size() -> usize {
    16
}

fn default_metadata_endpoint() -> ClientEndpoint {
    ClientEndpoint {
        protocol: default_protocol(),
        host: "localhost".to_owned(),
        port: 59881,
    }
}

fn default_core_data_endpoint() -> ClientEndpoint {
    ClientEndpoint {
        protocol: default_protocol(),
        host: "localhost".to_owned(),
        port: 59880,
    }
}

fn default_protocol() -> String {
    "http".to_owned()
}

fn default_base_topic() -> String {
    "edgex".to_owned()
}

fn default_max_event_size() -> usize {
    25_000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Primary configuration object for the device service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
    #[serde(default)]
    pub message_bus: MessageBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "DS_CONFIG";

    /// Load configuration from disk, respecting the `DS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(anyhow!("service.name must not be empty"));
        }
        if self.service.connect_retries == 0 {
            return Err(anyhow!("service.connect_retries must be at least 1"));
        }
        if self.device.max_cmd_ops == 0 {
            return Err(anyhow!("device.max_cmd_ops must be at least 1"));
        }
        if self.device.enable_async_readings && self.device.async_buffer_size == 0 {
            return Err(anyhow!(
                "device.async_buffer_size must be positive when async readings are enabled"
            ));
        }
        if self.message_bus.enabled && self.message_bus.base_topic.trim().is_empty() {
            return Err(anyhow!(
                "message_bus.base_topic must not be empty when the bus is enabled"
            ));
        }
        Ok(())
    }

    /// Maximum encoded event size in bytes, `None` when unlimited.
    pub fn max_event_bytes(&self) -> Option<usize> {
        match self.message_bus.max_event_size {
            0 => None,
            kib => Some(kib.saturating_mul(1024)),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity and lifecycle settings of this service instance.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Host advertised to Metadata as the callback address.
    #[serde(default = "default_service_host")]
    pub host: String,
    #[serde(default = "default_service_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_startup_message")]
    pub startup_message: String,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_interval", rename = "retry_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    /// Callback base address registered with Metadata.
    pub fn base_address(&self) -> String {
        format!("http://{}:{}", self.host, self.listen.port())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            host: default_service_host(),
            listen: default_service_listen(),
            labels: Vec::new(),
            startup_message: default_startup_message(),
            connect_retries: default_connect_retries(),
            retry_interval: default_retry_interval(),
            request_timeout: default_request_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Behaviour of the command pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_true")]
    pub data_transform: bool,
    #[serde(default = "default_max_cmd_ops")]
    pub max_cmd_ops: usize,
    #[serde(default)]
    pub update_last_connected: bool,
    #[serde(default = "default_true")]
    pub enable_async_readings: bool,
    #[serde(default = "default_async_buffer_size")]
    pub async_buffer_size: usize,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            data_transform: true,
            max_cmd_ops: default_max_cmd_ops(),
            update_last_connected: false,
            enable_async_readings: true,
            async_buffer_size: default_async_buffer_size(),
            discovery_enabled: true,
        }
    }
}

/// Address of an upstream HTTP dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientEndpoint {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl ClientEndpoint {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsConfig {
    #[serde(default = "default_metadata_endpoint")]
    pub core_metadata: ClientEndpoint,
    #[serde(default = "default_core_data_endpoint")]
    pub core_data: ClientEndpoint,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            core_metadata: default_metadata_endpoint(),
            core_data: default_core_data_endpoint(),
        }
    }
}

/// Message bus transports known to the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MessageBusKind {
    #[default]
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: MessageBusKind,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Upper bound for an encoded event in KiB; zero disables the check.
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: MessageBusKind::default(),
            base_topic: default_base_topic(),
            max_event_size: default_max_event_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily rolling JSON file under `directory`.
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file_prefix: None,
            level: default_log_level(),
            file: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_takes_defaults() {
        let config: AppConfig = "[service]\nname = \"device-modbus\"\n".parse().unwrap();
        assert_eq!(config.service.name, "device-modbus");
        assert_eq!(config.device.max_cmd_ops, 128);
        assert!(config.device.data_transform);
        assert_eq!(config.message_bus.base_topic, "edgex");
        assert_eq!(config.service.retry_interval, Duration::from_millis(1000));
        assert_eq!(config.max_event_bytes(), Some(25_000 * 1024));
    }

    #[test]
    fn durations_and_sections_parse() {
        let doc = r#"
            [service]
            name = "device-virtual"
            host = "edge-gw"
            listen = "127.0.0.1:59900"
            retry_interval_ms = 250
            shutdown_grace = 2

            [device]
            max_cmd_ops = 4
            update_last_connected = true

            [message_bus]
            max_event_size = 0
        "#;
        let config: AppConfig = doc.parse().unwrap();
        assert_eq!(config.service.retry_interval, Duration::from_millis(250));
        assert_eq!(config.service.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.service.base_address(), "http://edge-gw:59900");
        assert!(config.device.update_last_connected);
        assert_eq!(config.max_event_bytes(), None);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!("[service]\nname = \"\"\n".parse::<AppConfig>().is_err());
        assert!("[device]\nmax_cmd_ops = 0\n".parse::<AppConfig>().is_err());
        assert!("[device]\nasync_buffer_size = 0\n"
            .parse::<AppConfig>()
            .is_err());
        assert!("[message_bus]\nbase_topic = \" \"\n"
            .parse::<AppConfig>()
            .is_err());
    }

    #[test]
    fn config_serialises_to_json() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        assert_eq!(json["service"]["name"], "device-simple");
        assert_eq!(json["service"]["retry_interval_ms"], 1000);
    }
}
