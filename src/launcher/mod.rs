//! Launch strategies and the orchestrator that picks between them.
//!
//! ```text
//! Launcher::launch()
//!     │
//!     ├── TempWorkspace (data/, logs/)
//!     │
//!     ├── binary installed? ──yes──▶ BinaryLauncher ──▶ engine process tree
//!     │          │
//!     │          no
//!     │          ▼
//!     │   ContainerLauncher ──▶ watchdog host ──▶ container
//!     │                               └──▶ heartbeat (orphan watchdog)
//!     │
//!     └── race_readiness(port probe, wait_until_stopped)
//!              │
//!              ▼
//!        LocalEngine::stop(): kill → wait → remove workspace
//! ```

pub mod binary;
pub mod container;
pub mod local;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::EngineKind;
use crate::error::LaunchError;
use crate::installer::BinaryResolver;
use crate::process::UntilTerminated;
use crate::workspace::TempWorkspace;

pub use binary::{BinaryHandle, BinaryLauncher};
pub use container::{ContainerHandle, ContainerLauncher};
pub use local::{LaunchOptions, LaunchState, Launcher, LauncherConfig, LocalEngine};

/// How the engine is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Native executable.
    Binary,
    /// Container managed by a watchdog host.
    Container,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// The strategy picked for an engine, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyChoice {
    /// A native executable is installed.
    Binary(PathBuf),
    /// Containers were requested even if a binary exists.
    ForcedContainer,
    /// No native executable, so fall back to a container.
    NoBinary,
}

impl StrategyChoice {
    /// Binary if `resolver` finds one and containers are not forced.
    pub fn select(resolver: &dyn BinaryResolver, kind: EngineKind, force_container: bool) -> Self {
        if force_container {
            return Self::ForcedContainer;
        }
        match resolver.resolve_binary(kind) {
            Some(bin) => Self::Binary(bin),
            None => Self::NoBinary,
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Binary(_) => Strategy::Binary,
            Self::ForcedContainer | Self::NoBinary => Strategy::Container,
        }
    }

    /// Executable to run, for the binary strategy.
    pub fn binary(&self) -> Option<&Path> {
        match self {
            Self::Binary(bin) => Some(bin),
            _ => None,
        }
    }
}

/// Everything a strategy needs to start one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub kind: EngineKind,
    pub port: u16,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// `key=value` engine settings, in order.
    pub options: Vec<String>,
}

impl LaunchRequest {
    /// Request for `kind` on `port` storing into `workspace`.
    pub fn new(kind: EngineKind, port: u16, workspace: &TempWorkspace) -> Self {
        Self {
            kind,
            port,
            data_dir: workspace.data_dir().to_path_buf(),
            logs_dir: workspace.logs_dir().to_path_buf(),
            options: kind.startup_options(port),
        }
    }
}

/// A running engine as seen through either strategy.
#[async_trait]
pub trait LaunchHandle: Send + Sync {
    /// Which strategy produced this handle.
    fn strategy(&self) -> Strategy;

    /// Ask the engine to terminate. Returns without waiting for the exit;
    /// calling it again, or after the engine is gone, is a no-op.
    async fn kill(&self) -> Result<(), LaunchError>;

    /// Resolves once, after the engine process or container has exited.
    fn wait_until_stopped(&self) -> UntilTerminated;

    /// Container ID, once the container strategy knows it.
    fn container_id(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_from_workspace() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path()).await.unwrap();
        let request = LaunchRequest::new(EngineKind::OpenSearch, 19201, &ws);

        assert_eq!(request.data_dir, ws.data_dir());
        assert_eq!(request.logs_dir, ws.logs_dir());
        assert_eq!(request.options[0], "http.port=19201");
    }

    #[test]
    fn test_strategy_choice() {
        use crate::installer::{ContainerOnly, FixedBinary};

        let bin = PathBuf::from("/opt/es/bin/elasticsearch");
        let installed = FixedBinary(bin.clone());

        let choice = StrategyChoice::select(&installed, EngineKind::Elasticsearch, false);
        assert_eq!(choice, StrategyChoice::Binary(bin.clone()));
        assert_eq!(choice.strategy(), Strategy::Binary);
        assert_eq!(choice.binary(), Some(bin.as_path()));

        let choice = StrategyChoice::select(&installed, EngineKind::Elasticsearch, true);
        assert_eq!(choice, StrategyChoice::ForcedContainer);
        assert_eq!(choice.strategy(), Strategy::Container);
        assert_eq!(choice.binary(), None);

        let choice = StrategyChoice::select(&ContainerOnly, EngineKind::OpenSearch, false);
        assert_eq!(choice, StrategyChoice::NoBinary);
        assert_eq!(choice.strategy(), Strategy::Container);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Binary.to_string(), "binary");
        assert_eq!(Strategy::Container.to_string(), "container");
    }
}
