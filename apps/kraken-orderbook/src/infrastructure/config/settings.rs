//! Order Book Configuration Settings
//!
//! Configuration for the book stream and session, loaded from environment
//! variables. Numeric values that fail to parse fall back to their defaults;
//! the instrument and depth must name a supported value.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::SessionSettings;
use crate::domain::instrument::{Depth, Instrument};
use crate::infrastructure::kraken::messages::KRAKEN_WS_URL;

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// WebSocket URL.
    pub ws_url: String,
    /// Instrument selected at startup.
    pub instrument: Instrument,
    /// Depth selected at startup.
    pub depth: Depth,
    /// Maximum number of history captures kept.
    pub history_capacity: usize,
    /// Minimum wall-clock spacing between history captures.
    pub capture_interval: Duration,
    /// Period of the capture timer.
    pub capture_tick: Duration,
    /// Delta delivery window.
    pub delta_throttle: Duration,
    /// Reconnect backoff unit; attempt `k` waits `k` times this.
    pub reconnect_delay: Duration,
    /// Maximum single reconnect wait.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Capacity of the feed event queue.
    pub event_buffer: usize,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Connect at startup.
    pub auto_connect: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            ws_url: KRAKEN_WS_URL.to_string(),
            instrument: Instrument::default(),
            depth: Depth::default(),
            history_capacity: 1000,
            capture_interval: Duration::from_secs(2),
            capture_tick: Duration::from_millis(250),
            delta_throttle: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            event_buffer: 1024,
            health_port: 8083,
            auto_connect: true,
        }
    }
}

impl BookConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrument or depth is unsupported, or the
    /// history capacity is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`BookConfig::from_env`].
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(lookup);

        let instrument = env.parse_strict("BOOK_INSTRUMENT", defaults.instrument)?;
        let depth = env.parse_strict("BOOK_DEPTH", defaults.depth)?;

        let history_capacity = env.parse_or("BOOK_HISTORY_CAPACITY", defaults.history_capacity);
        if history_capacity == 0 {
            return Err(ConfigError::at_least_one("BOOK_HISTORY_CAPACITY"));
        }

        let heartbeat_interval =
            env.secs("BOOK_HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval);
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::at_least_one("BOOK_HEARTBEAT_INTERVAL_SECS"));
        }
        let heartbeat_timeout = env.secs("BOOK_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout);
        if heartbeat_timeout <= heartbeat_interval {
            return Err(ConfigError::InvalidValue {
                key: "BOOK_HEARTBEAT_TIMEOUT_SECS".to_string(),
                value: heartbeat_timeout.as_secs().to_string(),
                reason: "must exceed BOOK_HEARTBEAT_INTERVAL_SECS".to_string(),
            });
        }

        Ok(Self {
            ws_url: env
                .get("KRAKEN_WS_URL")
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.ws_url),
            instrument,
            depth,
            history_capacity,
            capture_interval: env.millis("BOOK_CAPTURE_INTERVAL_MS", defaults.capture_interval),
            capture_tick: env.millis("BOOK_CAPTURE_TICK_MS", defaults.capture_tick),
            delta_throttle: env.millis("BOOK_DELTA_THROTTLE_MS", defaults.delta_throttle),
            reconnect_delay: env.millis("BOOK_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            reconnect_delay_max: env.secs(
                "BOOK_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: env.parse_or(
                "BOOK_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            connect_timeout: env.secs("BOOK_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            heartbeat_interval,
            heartbeat_timeout,
            event_buffer: env.parse_or("BOOK_EVENT_BUFFER", defaults.event_buffer).max(1),
            health_port: env.parse_or("BOOK_HEALTH_PORT", defaults.health_port),
            auto_connect: env.get("BOOK_AUTO_CONNECT").map_or(defaults.auto_connect, |v| {
                parse_bool(&v).unwrap_or(defaults.auto_connect)
            }),
        })
    }

    /// Session startup parameters.
    #[must_use]
    pub const fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            instrument: self.instrument,
            depth: self.depth,
            history_capacity: self.history_capacity,
            capture_interval: self.capture_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds an unsupported value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn at_least_one(key: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<L>(L);

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn parse_strict<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key).filter(|v| !v.is_empty()) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<BookConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BookConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.ws_url, "wss://ws.kraken.com/v2");
        assert_eq!(config.instrument, Instrument::XbtUsd);
        assert_eq!(config.depth, Depth::D10);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.capture_interval, Duration::from_secs(2));
        assert_eq!(config.capture_tick, Duration::from_millis(250));
        assert_eq!(config.delta_throttle, Duration::from_millis(50));
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.health_port, 8083);
        assert!(config.auto_connect);
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("KRAKEN_WS_URL", "ws://127.0.0.1:9000"),
            ("BOOK_INSTRUMENT", "eth/usd"),
            ("BOOK_DEPTH", "100"),
            ("BOOK_HISTORY_CAPACITY", "50"),
            ("BOOK_DELTA_THROTTLE_MS", "10"),
            ("BOOK_MAX_RECONNECT_ATTEMPTS", "0"),
            ("BOOK_HEALTH_PORT", "0"),
            ("BOOK_AUTO_CONNECT", "false"),
        ])
        .unwrap();

        assert_eq!(config.ws_url, "ws://127.0.0.1:9000");
        assert_eq!(config.instrument, Instrument::EthUsd);
        assert_eq!(config.depth, Depth::D100);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.delta_throttle, Duration::from_millis(10));
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.health_port, 0);
        assert!(!config.auto_connect);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = from_pairs(&[
            ("BOOK_CAPTURE_INTERVAL_MS", "soon"),
            ("BOOK_HEALTH_PORT", "99999"),
            ("BOOK_AUTO_CONNECT", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.capture_interval, Duration::from_secs(2));
        assert_eq!(config.health_port, 8083);
        assert!(config.auto_connect);
    }

    #[test]
    fn unsupported_depth_is_rejected() {
        let err = from_pairs(&[("BOOK_DEPTH", "50")]).unwrap_err();
        assert!(err.to_string().contains("BOOK_DEPTH"));
    }

    #[test]
    fn unknown_instrument_is_rejected() {
        let err = from_pairs(&[("BOOK_INSTRUMENT", "DOGE/USD")]).unwrap_err();
        let ConfigError::InvalidValue { key, value, .. } = err;
        assert_eq!(key, "BOOK_INSTRUMENT");
        assert_eq!(value, "DOGE/USD");
    }

    #[test]
    fn zero_history_capacity_is_rejected() {
        assert!(from_pairs(&[("BOOK_HISTORY_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let err = from_pairs(&[("BOOK_HEARTBEAT_INTERVAL_SECS", "0")]).unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "BOOK_HEARTBEAT_INTERVAL_SECS");

        let config = from_pairs(&[("BOOK_HEARTBEAT_INTERVAL_SECS", "5")]).unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let err = from_pairs(&[
            ("BOOK_HEARTBEAT_INTERVAL_SECS", "30"),
            ("BOOK_HEARTBEAT_TIMEOUT_SECS", "30"),
        ])
        .unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "BOOK_HEARTBEAT_TIMEOUT_SECS");
    }

    #[test]
    fn session_settings_follow_config() {
        let config = from_pairs(&[("BOOK_INSTRUMENT", "ADA/USD"), ("BOOK_DEPTH", "25")]).unwrap();
        let settings = config.session_settings();
        assert_eq!(settings.instrument, Instrument::AdaUsd);
        assert_eq!(settings.depth, Depth::D25);
        assert_eq!(settings.history_capacity, 1000);
    }
}
