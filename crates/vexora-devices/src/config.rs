//! Backend configuration.
//!
//! Every field has a default. A TOML file may override any subset of them and
//! the deployment environment variables are applied on top of that.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_BROKER_URL: &str = "MQTT_BROKER_URL";
    pub const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
    pub const MQTT_USERNAME: &str = "MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "MQTT_PASSWORD";
    pub const TELEMETRY_MIN_WRITE_MS: &str = "TELEMETRY_MIN_WRITE_MS";
    pub const INFLUX_URL: &str = "INFLUX_URL";
    pub const INFLUX_TOKEN: &str = "INFLUX_TOKEN";
    pub const INFLUX_ORG: &str = "INFLUX_ORG";
    pub const INFLUX_BUCKET: &str = "INFLUX_BUCKET";
    pub const HTTP_ADDR: &str = "HTTP_ADDR";
}

pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:1883";
pub const DEFAULT_CLIENT_ID: &str = "vexora-backend-dev";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const MASK: &str = "***";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid broker url '{0}'")]
    InvalidBrokerUrl(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// MQTT connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// `tcp://host:port`, `mqtt://host:port`, `host:port` or `host`.
    pub broker_url: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
        }
    }
}

impl MqttConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Host and port of the broker.
    pub fn broker_address(&self) -> Result<(String, u16), ConfigError> {
        parse_broker_url(&self.broker_url)
    }

    /// Username safe for logs: first character followed by a mask.
    pub fn masked_username(&self) -> Option<String> {
        self.username.as_deref().map(mask_username)
    }
}

/// Split a broker URL into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidBrokerUrl(url.to_string());

    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("tcp://")
        .or_else(|| trimmed.strip_prefix("mqtt://"))
        .unwrap_or(trimmed);
    if rest.contains("://") {
        return Err(invalid());
    }
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() || port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

fn mask_username(username: &str) -> String {
    match username.chars().next() {
        Some(first) => format!("{first}{MASK}"),
        None => String::new(),
    }
}

/// Telemetry write throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Minimum interval between stored points of one (device, metric); 0 disables.
    pub min_write_ms: u64,
    pub soft_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            min_write_ms: 0,
            soft_capacity: crate::rate_limit::DEFAULT_SOFT_CAPACITY,
        }
    }
}

/// InfluxDB v2 writer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub org: String,
    pub bucket: String,
    pub write_timeout_ms: u64,
    pub queue_capacity: usize,
    pub batch_size: usize,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: None,
            org: "vexora".to_string(),
            bucket: "telemetry".to_string(),
            write_timeout_ms: 5000,
            queue_capacity: 10_000,
            batch_size: 500,
        }
    }
}

impl InfluxConfig {
    /// The writer runs only when a token is configured.
    pub fn is_enabled(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Command dispatch timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Used when a request carries no timeout.
    pub default_timeout_ms: u64,
    /// Upper bound for handing a publish to the transport.
    pub publish_timeout_ms: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            publish_timeout_ms: 5_000,
        }
    }
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

/// Complete backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VexoraConfig {
    pub mqtt: MqttConfig,
    pub telemetry: TelemetryConfig,
    pub influx: InfluxConfig,
    pub http: HttpConfig,
    pub commands: CommandsConfig,
    pub reconnect: ReconnectConfig,
}

impl VexoraConfig {
    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(env_vars::MQTT_BROKER_URL) {
            self.mqtt.broker_url = v;
        }
        if let Some(v) = get(env_vars::MQTT_CLIENT_ID) {
            self.mqtt.client_id = v;
        }
        if let Some(v) = get(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = get(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = get(env_vars::TELEMETRY_MIN_WRITE_MS) {
            match v.trim().parse::<i64>() {
                Ok(ms) if ms >= 0 => self.telemetry.min_write_ms = ms as u64,
                _ => tracing::warn!(value = %v, "ignoring invalid TELEMETRY_MIN_WRITE_MS"),
            }
        }
        if let Some(v) = get(env_vars::INFLUX_URL) {
            self.influx.url = v;
        }
        if let Some(v) = get(env_vars::INFLUX_TOKEN) {
            self.influx.token = Some(v);
        }
        if let Some(v) = get(env_vars::INFLUX_ORG) {
            self.influx.org = v;
        }
        if let Some(v) = get(env_vars::INFLUX_BUCKET) {
            self.influx.bucket = v;
        }
        if let Some(v) = get(env_vars::HTTP_ADDR) {
            self.http.addr = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.broker_address()?;
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.client_id is empty".into()));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.initial_ms must be positive".into()));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_ms must not be below reconnect.initial_ms".into(),
            ));
        }
        self.http_addr()?;
        Ok(())
    }

    /// Bind address for the HTTP API. A bare `:port` binds all interfaces.
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.http.addr.trim();
        let addr = match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => addr.to_string(),
        };
        addr.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "http.addr '{}' is not a socket address",
                self.http.addr
            ))
        })
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.mqtt.username = self.mqtt.masked_username();
        if config.mqtt.password.is_some() {
            config.mqtt.password = Some(MASK.to_string());
        }
        if config.influx.token.is_some() {
            config.influx.token = Some(MASK.to_string());
        }
        config
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
