//! Link configuration.
//!
//! All tunables of the link layer with their defaults, TOML loading and
//! environment overrides.
//!
//! ```toml
//! [transport]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//! wire_mode = "text"
//!
//! [dispatcher]
//! throttle_interval_ms = 100
//! staleness_threshold_ms = 5000
//!
//! [health]
//! tick_interval_secs = 5
//! max_reconnect_attempts = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandPriority;
use crate::error::ConfigError;
use crate::frame::WireMode;

/// Default values.
pub mod defaults {
    pub const PORT: &str = "COM3";
    pub const BAUD_RATE: u32 = 9600;
    pub const READ_POLL_INTERVAL_MS: u64 = 75;
    pub const IO_TIMEOUT_MS: u64 = 1000;
    pub const INBOUND_CAPACITY: usize = 256;

    pub const THROTTLE_INTERVAL_MS: u64 = 100;
    pub const STALENESS_THRESHOLD_MS: u64 = 5000;
    pub const WORKER_POLL_INTERVAL_MS: u64 = 50;
    pub const MAX_RETRY_ERRORS: u32 = 3;
    pub const RETRY_PRIORITY: u8 = 5;
    pub const JOIN_TIMEOUT_MS: u64 = 1000;

    pub const TICK_INTERVAL_SECS: u64 = 5;
    pub const CPU_THRESHOLD_PERCENT: f64 = 80.0;
    pub const MEMORY_THRESHOLD_PERCENT: f64 = 80.0;
    pub const ERROR_THRESHOLD: u32 = 5;
    pub const HEALTH_PENALTY: f64 = 10.0;
    pub const RECOVERY_BONUS: f64 = 20.0;
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

    pub const EVENT_CAPACITY: usize = 1000;
}

/// Environment variable names.
pub mod env_vars {
    pub const PORT: &str = "LINACT_PORT";
    pub const BAUD_RATE: &str = "LINACT_BAUD_RATE";
    pub const WIRE_MODE: &str = "LINACT_WIRE_MODE";
    pub const LOG_JSON: &str = "LINACT_LOG_JSON";
}

/// Serial transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Serial port name, or "auto" to pick the controller automatically
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Wire encoding
    pub wire_mode: WireMode,
    /// Reader loop poll interval
    pub read_poll_interval_ms: u64,
    /// Per-operation I/O timeout of the serial port
    pub io_timeout_ms: u64,
    /// Inbound frame channel capacity
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: defaults::PORT.to_string(),
            baud_rate: defaults::BAUD_RATE,
            wire_mode: WireMode::Text,
            read_poll_interval_ms: defaults::READ_POLL_INTERVAL_MS,
            io_timeout_ms: defaults::IO_TIMEOUT_MS,
            inbound_capacity: defaults::INBOUND_CAPACITY,
        }
    }
}

impl TransportConfig {
    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Command dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Minimum spacing between two accepted submissions
    pub throttle_interval_ms: u64,
    /// Maximum age of a queued command at dequeue time
    pub staleness_threshold_ms: u64,
    /// Worker poll interval
    pub poll_interval_ms: u64,
    /// Failed commands are retried while the error counter is at most this
    pub max_retry_errors: u32,
    /// Priority given to retried commands (1-5)
    pub retry_priority: u8,
    /// Bounded wait for the worker on shutdown
    pub join_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: defaults::THROTTLE_INTERVAL_MS,
            staleness_threshold_ms: defaults::STALENESS_THRESHOLD_MS,
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            max_retry_errors: defaults::MAX_RETRY_ERRORS,
            retry_priority: defaults::RETRY_PRIORITY,
            join_timeout_ms: defaults::JOIN_TIMEOUT_MS,
        }
    }
}

impl DispatcherConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Retry priority, falling back to the lowest priority when out of range.
    pub fn retry_priority(&self) -> CommandPriority {
        CommandPriority::from_value(self.retry_priority).unwrap_or(CommandPriority::Lowest)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between two health ticks
    pub tick_interval_secs: u64,
    /// CPU usage above this percentage counts as pressure
    pub cpu_threshold_percent: f64,
    /// Memory usage above this percentage counts as pressure
    pub memory_threshold_percent: f64,
    /// Recovery runs when the dispatcher error counter exceeds this
    pub error_threshold: u32,
    /// Score deducted on pressure or error breach
    pub penalty: f64,
    /// Score restored after a recovery
    pub recovery_bonus: f64,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::TICK_INTERVAL_SECS,
            cpu_threshold_percent: defaults::CPU_THRESHOLD_PERCENT,
            memory_threshold_percent: defaults::MEMORY_THRESHOLD_PERCENT,
            error_threshold: defaults::ERROR_THRESHOLD,
            penalty: defaults::HEALTH_PENALTY,
            recovery_bonus: defaults::RECOVERY_BONUS,
            max_reconnect_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl HealthConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffered events per subscriber before the slowest one lags
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::EVENT_CAPACITY,
        }
    }
}

/// Complete link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    pub dispatcher: DispatcherConfig,
    pub health: HealthConfig,
    pub events: EventsConfig,
}

impl LinkConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `LINACT_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Used by [`Self::apply_env`].
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(env_vars::PORT) {
            self.transport.port = port;
        }
        if let Some(baud) = lookup(env_vars::BAUD_RATE) {
            self.transport.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("transport.baud_rate", baud))?;
        }
        if let Some(mode) = lookup(env_vars::WIRE_MODE) {
            self.transport.wire_mode = mode
                .parse()
                .map_err(|reason: String| ConfigError::invalid("transport.wire_mode", reason))?;
        }
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if t.port.trim().is_empty() {
            return Err(ConfigError::invalid("transport.port", "must not be empty"));
        }

        let d = &self.dispatcher;
        let h = &self.health;
        for (field, value) in [
            ("transport.baud_rate", u64::from(t.baud_rate)),
            ("transport.read_poll_interval_ms", t.read_poll_interval_ms),
            ("transport.io_timeout_ms", t.io_timeout_ms),
            ("transport.inbound_capacity", t.inbound_capacity as u64),
            ("dispatcher.throttle_interval_ms", d.throttle_interval_ms),
            ("dispatcher.staleness_threshold_ms", d.staleness_threshold_ms),
            ("dispatcher.poll_interval_ms", d.poll_interval_ms),
            ("dispatcher.join_timeout_ms", d.join_timeout_ms),
            ("health.tick_interval_secs", h.tick_interval_secs),
            ("events.capacity", self.events.capacity as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }

        if CommandPriority::from_value(d.retry_priority).is_none() {
            return Err(ConfigError::invalid(
                "dispatcher.retry_priority",
                format!("{} is outside 1-5", d.retry_priority),
            ));
        }

        for (field, value) in [
            ("health.cpu_threshold_percent", h.cpu_threshold_percent),
            ("health.memory_threshold_percent", h.memory_threshold_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::invalid(field, format!("{} is outside (0, 100]", value)));
            }
        }
        if h.penalty < 0.0 || h.recovery_bonus < 0.0 {
            return Err(ConfigError::invalid(
                "health.penalty",
                "score deltas must not be negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = LinkConfig::default();
        assert_eq!(config.dispatcher.throttle_interval(), Duration::from_millis(100));
        assert_eq!(config.dispatcher.staleness_threshold(), Duration::from_secs(5));
        assert_eq!(config.dispatcher.max_retry_errors, 3);
        assert_eq!(config.dispatcher.retry_priority(), CommandPriority::Lowest);
        assert_eq!(config.health.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.health.max_reconnect_attempts, 3);
        assert_eq!(config.transport.baud_rate, 9600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LinkConfig::from_toml_str(
            r#"
            [transport]
            port = "/dev/ttyUSB0"
            wire_mode = "binary"

            [health]
            error_threshold = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.port, "/dev/ttyUSB0");
        assert_eq!(config.transport.wire_mode, WireMode::Binary);
        assert_eq!(config.transport.baud_rate, 9600);
        assert_eq!(config.health.error_threshold, 8);
        assert_eq!(config.dispatcher, DispatcherConfig::default());
    }

    #[test]
    fn test_invalid_retry_priority_rejected() {
        let err = LinkConfig::from_toml_str("[dispatcher]\nretry_priority = 9\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "dispatcher.retry_priority",
                ..
            }
        ));
    }

    fn rejected_field(toml: &str) -> &'static str {
        match LinkConfig::from_toml_str(toml) {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected an invalid field, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_throttle_interval_rejected() {
        assert_eq!(
            rejected_field("[dispatcher]\nthrottle_interval_ms = 0\n"),
            "dispatcher.throttle_interval_ms"
        );
    }

    #[test]
    fn test_zero_join_timeout_rejected() {
        assert_eq!(
            rejected_field("[dispatcher]\njoin_timeout_ms = 0\n"),
            "dispatcher.join_timeout_ms"
        );
    }

    #[test]
    fn test_zero_io_timeout_rejected() {
        assert_eq!(
            rejected_field("[transport]\nio_timeout_ms = 0\n"),
            "transport.io_timeout_ms"
        );
    }

    #[test]
    fn test_overrides() {
        let mut config = LinkConfig::default();
        config
            .apply_overrides(|key| match key {
                env_vars::PORT => Some("/dev/ttyACM1".to_string()),
                env_vars::WIRE_MODE => Some("binary".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.transport.port, "/dev/ttyACM1");
        assert_eq!(config.transport.wire_mode, WireMode::Binary);

        let err = config
            .apply_overrides(|key| (key == env_vars::BAUD_RATE).then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
