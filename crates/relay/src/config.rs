// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `murmur_relay=debug`).
    pub log_filter: String,
    /// Interval between server pings. A connection that has not answered
    /// the previous ping by the next tick is dropped.
    pub heartbeat_interval: Duration,
    /// Upper bound on messages returned by the history endpoint.
    pub history_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `MURMUR_RELAY_HOST` | `0.0.0.0` |
    /// | `MURMUR_RELAY_PORT` | `8080` |
    /// | `MURMUR_RELAY_LOG_FILTER` | `info` |
    /// | `MURMUR_RELAY_HEARTBEAT_INTERVAL_MS` | `15000` |
    /// | `MURMUR_RELAY_HISTORY_LIMIT` | `200` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("MURMUR_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("MURMUR_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter = env("MURMUR_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let heartbeat_ms = env("MURMUR_RELAY_HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);

        let history_limit = env("MURMUR_RELAY_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);

        Self {
            listen_addr,
            log_filter,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            history_limit,
        }
    }
}
