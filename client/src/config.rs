//! Configuration for the coordination layer.
//!
//! Loaded from environment variables with sensible defaults. The embedding
//! application decides whether to load a `.env` file first.

use std::env;
use std::time::Duration;

/// Configuration for the coordination layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint, e.g. `wss://api.example.com/ws`
    pub ws_url: String,
    /// REST base URL, e.g. `https://api.example.com`
    pub api_base_url: String,
    /// Client-side timeout for REST calls
    pub request_timeout: Duration,
    /// Heartbeat interval, sent symmetrically in both directions
    pub heartbeat: Duration,
    /// Reconnection schedule for the realtime connection
    pub reconnect: ReconnectConfig,
    /// Purchase window started on entering `ready` (seconds)
    pub purchase_window_secs: u32,
    /// Capacity of the bounded seat change log
    pub seat_log_capacity: usize,
}

/// Reconnection schedule: linear backoff `base_delay × attempt`, capped at
/// `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay; attempt N waits `base_delay × N`
    pub base_delay: Duration,
    /// Attempts before reconnection is reported as exhausted
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_millis(4000),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(3000),
                max_attempts: 5,
            },
            purchase_window_secs: 900,
            seat_log_capacity: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ws_url: env::var("TURNSTILE_WS_URL").unwrap_or(defaults.ws_url),
            api_base_url: env::var("TURNSTILE_API_BASE_URL").unwrap_or(defaults.api_base_url),
            request_timeout: env_secs("TURNSTILE_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
            heartbeat: env_millis("TURNSTILE_HEARTBEAT_MS").unwrap_or(defaults.heartbeat),
            reconnect: ReconnectConfig {
                base_delay: env_millis("TURNSTILE_RECONNECT_BASE_DELAY_MS")
                    .unwrap_or(defaults.reconnect.base_delay),
                max_attempts: env_parse("TURNSTILE_MAX_RECONNECT_ATTEMPTS")
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            purchase_window_secs: env_parse("TURNSTILE_PURCHASE_WINDOW_SECS")
                .unwrap_or(defaults.purchase_window_secs),
            seat_log_capacity: env_parse("TURNSTILE_SEAT_LOG_CAPACITY")
                .unwrap_or(defaults.seat_log_capacity),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_backend_contract() {
        let config = Config::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat, Duration::from_millis(4000));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.purchase_window_secs, 900);
        assert_eq!(config.seat_log_capacity, 100);
    }
}
