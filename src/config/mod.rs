//! Configuration for search-sandbox.
//!
//! Settings are loaded with priority: CLI flags > environment variables
//! (including `.env`) > defaults.

mod container;
pub(crate) mod helpers;
mod heartbeat;
mod install;

use std::path::PathBuf;
use std::time::Duration;

pub use self::container::ContainerConfig;
pub use self::heartbeat::HeartbeatConfig;
pub use self::install::InstallConfig;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::engine::EngineKind;
use crate::error::ConfigError;
use crate::launcher::{LaunchOptions, LauncherConfig};
use crate::probe::ProbeProtocol;

/// Everything needed to launch an engine.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub engine: EngineKind,
    /// `None` means the engine's default port.
    pub port: Option<u16>,
    /// Parent directory for per-launch workspaces.
    pub temp_dir: PathBuf,
    pub probe_interval: Duration,
    pub install: InstallConfig,
    pub container: ContainerConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            port: None,
            temp_dir: default_temp_dir(),
            probe_interval: Duration::from_millis(500),
            install: InstallConfig::default(),
            container: ContainerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Load from the environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let engine = match optional_env("SEARCH_SANDBOX_ENGINE")? {
            Some(name) => name
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "SEARCH_SANDBOX_ENGINE".to_string(),
                    message,
                })?,
            None => defaults.engine,
        };

        let port = optional_env("SEARCH_SANDBOX_PORT")?
            .map(|s| s.parse::<u16>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SEARCH_SANDBOX_PORT".to_string(),
                message: format!("must be a port number: {e}"),
            })?;

        let probe_interval_ms = parse_optional_env(
            "SEARCH_SANDBOX_PROBE_INTERVAL_MS",
            defaults.probe_interval.as_millis() as u64,
        )?;

        Ok(Self {
            engine,
            port,
            temp_dir: optional_env("SEARCH_SANDBOX_TEMP_DIR")?
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            probe_interval: Duration::from_millis(probe_interval_ms.max(1)),
            install: InstallConfig::resolve()?,
            container: ContainerConfig::resolve()?,
            heartbeat: HeartbeatConfig::resolve()?,
        })
    }

    /// Launcher settings derived from this configuration.
    pub fn to_launcher_config(&self) -> LauncherConfig {
        LauncherConfig {
            temp_root: self.temp_dir.clone(),
            probe_interval: self.probe_interval,
            probe_protocol: ProbeProtocol::Http,
            image: self.container.image.clone(),
            heartbeat_enabled: self.heartbeat.enabled,
            heartbeat_interval: Duration::from_secs(self.heartbeat.interval_secs),
            force_container: self.container.force,
            ..Default::default()
        }
    }

    /// Engine and port to launch.
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            kind: self.engine,
            port: self.port,
        }
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("search-sandbox")
}
