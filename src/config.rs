//! Process Configuration
//!
//! Environment-driven settings shared by the engine and gateway
//! binaries. Every knob has a production default; the environment only
//! overrides.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::LockConfig;
use crate::gateway::GatewayConfig;

/// Configuration parse failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Settings for one worker or gateway process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store URL.
    pub redis_url: String,
    /// Gateway bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent gateway connections.
    pub max_connections: usize,
    /// Session lock timing.
    pub lock: LockConfig,
    /// Gateway liveness probe interval.
    pub heartbeat_interval: Duration,
    /// Gateway reconnect grace window.
    pub reconnect_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind address"),
            max_connections: 1000,
            lock: LockConfig::default(),
            heartbeat_interval: Duration::from_secs(10),
            reconnect_window: Duration::from_secs(30),
        }
    }
}

fn parse_millis(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_millis(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `REDIS_URL`, `BIND_ADDR`, `MAX_CONNECTIONS`,
    /// `LOCK_TTL_MS`, `LOCK_RETRY_MS`, `LOCK_ACQUIRE_TIMEOUT_MS`,
    /// `HEARTBEAT_INTERVAL_MS`, `RECONNECT_WINDOW_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = env::var("REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|_| ConfigError::Invalid {
                name: "BIND_ADDR",
                value: addr.clone(),
            })?;
        }
        if let Ok(value) = env::var("MAX_CONNECTIONS") {
            config.max_connections = value.parse().map_err(|_| ConfigError::Invalid {
                name: "MAX_CONNECTIONS",
                value: value.clone(),
            })?;
        }
        if let Some(ttl) = env_millis("LOCK_TTL_MS")? {
            config.lock.ttl = ttl;
        }
        if let Some(retry) = env_millis("LOCK_RETRY_MS")? {
            config.lock.retry_interval = retry;
        }
        if let Some(timeout) = env_millis("LOCK_ACQUIRE_TIMEOUT_MS")? {
            config.lock.acquire_timeout = timeout;
        }
        if let Some(interval) = env_millis("HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = interval;
        }
        if let Some(window) = env_millis("RECONNECT_WINDOW_MS")? {
            config.reconnect_window = window;
        }
        Ok(config)
    }

    /// The gateway-facing slice of this configuration.
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            bind_addr: self.bind_addr,
            max_connections: self.max_connections,
            heartbeat_interval: self.heartbeat_interval,
            reconnect_window: self.reconnect_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = Config::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.lock.ttl, Duration::from_secs(5));
        assert_eq!(config.lock.retry_interval, Duration::from_millis(100));
        assert_eq!(config.lock.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_window, Duration::from_secs(30));
        assert_eq!(config.max_connections, 1000);
    }

    #[test]
    fn test_parse_millis_accepts_numbers_only() {
        assert_eq!(
            parse_millis("LOCK_TTL_MS", "2500").unwrap(),
            Duration::from_millis(2500)
        );
        assert!(parse_millis("LOCK_TTL_MS", "soon").is_err());
    }

    #[test]
    fn test_gateway_slice_carries_the_shared_settings() {
        let config = Config::default();
        let gateway = config.gateway();
        assert_eq!(gateway.bind_addr, config.bind_addr);
        assert_eq!(gateway.reconnect_window, config.reconnect_window);
    }
}
