//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::bus::DEFAULT_BUS_CHANNEL;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transmit: TransmitConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broadcast core configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransmitConfig {
    /// Keep-alive ping period; disabled when absent, zero or `false`
    #[serde(default)]
    pub ping_interval: PingInterval,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Cross-instance bus configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub driver: BusDriver,

    /// Bus channel name, `transmit::broadcast` when unset
    pub channel: Option<String>,
}

impl TransportConfig {
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(DEFAULT_BUS_CHANNEL)
    }
}

/// Bus implementation selected at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusDriver {
    /// Single instance, no bus
    #[default]
    None,
    /// In-process [`MemoryBus`](crate::bus::MemoryBus)
    Memory,
}

impl std::str::FromStr for BusDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(BusDriver::None),
            "memory" => Ok(BusDriver::Memory),
            other => Err(ConfigError::Invalid {
                field: "transmit.transport.driver",
                error: format!("unknown bus driver {:?}", other),
            }),
        }
    }
}

/// Keep-alive ping period
///
/// Deserializes from milliseconds (`30000`), a duration string (`"30s"`),
/// or `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingInterval(Option<Duration>);

impl PingInterval {
    pub fn disabled() -> Self {
        Self(None)
    }

    /// A zero period disables pinging
    pub fn every(period: Duration) -> Self {
        if period.is_zero() {
            Self(None)
        } else {
            Self(Some(period))
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::every(Duration::from_millis(millis))
    }

    pub fn period(&self) -> Option<Duration> {
        self.0
    }
}

impl std::str::FromStr for PingInterval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "false" | "off" | "none" => Ok(Self::disabled()),
            text => parse_duration(text).map(Self::every),
        }
    }
}

impl<'de> Deserialize<'de> for PingInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) if Duration::from_millis(millis) > MAX_DURATION => Err(
                serde::de::Error::custom(format!("ping_interval of {}ms is too long", millis)),
            ),
            Raw::Millis(millis) => Ok(Self::from_millis(millis)),
            Raw::Flag(false) => Ok(Self::disabled()),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "ping_interval must be a duration or false",
            )),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Longest duration accepted by [`parse_duration`]
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 86_400);

fn duration_regex() -> &'static Regex {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    DURATION.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)\s*([a-zA-Z]*)$").expect("duration regex is valid")
    })
}

/// Parse a human duration such as `"500"`, `"30s"`, `"1.5m"` or `"2 hours"`
///
/// A bare number is milliseconds. Durations above [`MAX_DURATION`] are
/// rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Invalid {
        field: "transmit.ping_interval",
        error: format!("invalid duration {:?}", input),
    };

    let captures = duration_regex().captures(input.trim()).ok_or_else(invalid)?;
    let amount: f64 = captures[1].parse().map_err(|_| invalid())?;

    let unit_ms = match captures[2].to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        _ => return Err(invalid()),
    };

    let millis = (amount * unit_ms).round();
    if millis > MAX_DURATION.as_millis() as f64 {
        return Err(ConfigError::Invalid {
            field: "transmit.ping_interval",
            error: format!("duration {:?} exceeds {}s", input, MAX_DURATION.as_secs()),
        });
    }

    Ok(Duration::from_millis(millis as u64))
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of the SSE routes
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3333
}

fn default_route_prefix() -> String {
    "/__transmit".to_string()
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            route_prefix: default_route_prefix(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("transmit").join("config.toml")),
            Some(PathBuf::from("/etc/transmit/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `TRANSMIT_*` overrides resolved through `lookup`
    ///
    /// Values that fail to parse are logged and ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TRANSMIT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TRANSMIT_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid TRANSMIT_PORT {:?}", port),
            }
        }

        if let Some(interval) = lookup("TRANSMIT_PING_INTERVAL") {
            match interval.parse() {
                Ok(parsed) => self.transmit.ping_interval = parsed,
                Err(e) => tracing::warn!("Ignoring TRANSMIT_PING_INTERVAL: {}", e),
            }
        }
        if let Some(driver) = lookup("TRANSMIT_BUS_DRIVER") {
            match driver.parse() {
                Ok(parsed) => self.transmit.transport.driver = parsed,
                Err(e) => tracing::warn!("Ignoring TRANSMIT_BUS_DRIVER: {}", e),
            }
        }
        if let Some(channel) = lookup("TRANSMIT_BUS_CHANNEL") {
            self.transmit.transport.channel = Some(channel);
        }

        if let Some(level) = lookup("TRANSMIT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TRANSMIT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {field}: {error}")]
    Invalid { field: &'static str, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Transmit Configuration
#
# Environment variables override these settings:
# - TRANSMIT_HOST
# - TRANSMIT_PORT
# - TRANSMIT_PING_INTERVAL
# - TRANSMIT_BUS_DRIVER
# - TRANSMIT_BUS_CHANNEL
# - TRANSMIT_LOG_LEVEL
# - TRANSMIT_LOG_FORMAT

[transmit]
# Keep-alive ping sent to every connection: milliseconds, a duration
# string ("30s", "1m") or false to disable
ping_interval = "30s"

[transmit.transport]
# Bus used to replicate broadcasts between instances: none or memory
driver = "none"

# Bus channel shared by all instances
# channel = "transmit::broadcast"

[server]
# HTTP server host
host = "0.0.0.0"

# HTTP server port
port = 3333

# Prefix of the events, subscribe and unsubscribe routes
route_prefix = "/__transmit"

# Allowed CORS origins (empty allows any origin)
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
