use crate::config::helpers::{parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// Orphan watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Whether a heartbeat process watches each container.
    pub enabled: bool,
    /// Interval between parent liveness checks in seconds.
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
        }
    }
}

impl HeartbeatConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let interval_secs = parse_optional_env(
            "SEARCH_SANDBOX_HEARTBEAT_INTERVAL_SECS",
            defaults.interval_secs,
        )?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SEARCH_SANDBOX_HEARTBEAT_INTERVAL_SECS".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        Ok(Self {
            enabled: parse_bool_env("SEARCH_SANDBOX_HEARTBEAT_ENABLED", defaults.enabled)?,
            interval_secs,
        })
    }
}
