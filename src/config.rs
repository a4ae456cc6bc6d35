//! Configuration for the balancer.
//!
//! Configuration comes from an optional toml file plus CLI overrides; the
//! target list may also be given as a single `;`-separated argument
//! (`"localhost:11000;localhost:11001"`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BalancerError;
use crate::registry::Endpoint;

/// Top-level balancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address (ip:port).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Backend targets as `host:port` strings.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Timeout and buffer settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// TCP socket options applied to both sides of a relay.
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            targets: Vec::new(),
            timeouts: TimeoutConfig::default(),
            tcp: TcpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Parse the configured target strings into endpoints.
    ///
    /// Fails on a malformed entry or an empty target list; both are
    /// fatal at startup.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, BalancerError> {
        if self.targets.is_empty() {
            return Err(BalancerError::Config("no targets configured".into()));
        }
        self.targets.iter().map(|t| t.parse()).collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.idle_timeout_secs)
    }
}

/// Timeout and buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for establishing a target connection (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle relay timeout (seconds): tear down a relay with no traffic
    /// in either direction for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Relay buffer size per direction (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            relay_buffer_size: default_relay_buffer_size(),
        }
    }
}

/// TCP socket options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// TCP_NODELAY (disable Nagle's algorithm).
    #[serde(default = "default_no_delay")]
    pub no_delay: bool,

    /// TCP keepalive interval in seconds (0 = disabled).
    #[serde(default)]
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: default_no_delay(),
            keepalive_secs: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default)]
    pub level: Option<String>,
}

fn default_listen() -> SocketAddr {
    ([127, 0, 0, 1], 8080).into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_relay_buffer_size() -> usize {
    4096
}
fn default_no_delay() -> bool {
    true
}

/// Load configuration from a toml file.
pub fn load_config(path: &Path) -> Result<Config, BalancerError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BalancerError::Config(format!("failed to read config file {path:?}: {e}")))?;
    toml::from_str(&raw).map_err(|e| BalancerError::Config(format!("failed to parse config: {e}")))
}

/// Split a `;`-separated target-list argument into its entries.
///
/// Entries are validated by [`Config::endpoints`] later; an empty entry
/// (e.g. a trailing `;`) is rejected here so a typo does not silently
/// shrink the rotation.
pub fn split_target_list(arg: &str) -> Result<Vec<String>, BalancerError> {
    let entries: Vec<String> = arg.split(';').map(|e| e.trim().to_string()).collect();
    if entries.iter().any(|e| e.is_empty()) {
        return Err(BalancerError::Config(format!(
            "empty entry in target list: {arg:?}"
        )));
    }
    Ok(entries)
}

/// Validate a fully assembled configuration before the server starts.
pub fn validate_config(config: &Config) -> Result<(), BalancerError> {
    config.endpoints()?;
    if config.timeouts.connect_timeout_secs == 0 {
        return Err(BalancerError::Config(
            "connect_timeout_secs must be positive".into(),
        ));
    }
    if config.timeouts.idle_timeout_secs == 0 {
        return Err(BalancerError::Config(
            "idle_timeout_secs must be positive".into(),
        ));
    }
    if config.timeouts.relay_buffer_size == 0 {
        return Err(BalancerError::Config(
            "relay_buffer_size must be positive".into(),
        ));
    }
    Ok(())
}
