//! The orchestrator: provision a workspace, pick a strategy, wait for the
//! engine to come up, and hand back an owned [`LocalEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{EngineKind, engine_url};
use crate::error::LaunchError;
use crate::installer::BinaryResolver;
use crate::launcher::{
    BinaryLauncher, ContainerLauncher, LaunchHandle, LaunchRequest, Strategy, StrategyChoice,
};
use crate::probe::{PortProbe, ProbeProtocol};
use crate::process::{self, UntilTerminated};
use crate::readiness::race_readiness;
use crate::shutdown::ShutdownSignal;
use crate::workspace::TempWorkspace;

/// Lifecycle of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    /// Creating the workspace and choosing a strategy.
    Provisioning,
    /// Engine started, waiting for its port.
    Starting,
    /// Port is answering.
    Ready,
    /// `stop()` in progress.
    Stopping,
    /// Engine gone and workspace removed.
    Stopped,
    /// Engine died or failed to start before becoming ready.
    Failed,
}

/// Settings shared by every launch.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Parent directory for per-launch workspaces.
    pub temp_root: PathBuf,
    /// Delay between readiness probes.
    pub probe_interval: Duration,
    /// How readiness is judged.
    pub probe_protocol: ProbeProtocol,
    /// Executable started as the container watchdog host.
    pub host_program: PathBuf,
    /// Image to run instead of the engine's pinned image.
    pub image: Option<String>,
    /// Start an orphan watchdog next to each container.
    pub heartbeat_enabled: bool,
    /// Orphan watchdog polling interval.
    pub heartbeat_interval: Duration,
    /// Skip binary resolution and always use a container.
    pub force_container: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("search-sandbox"),
            probe_interval: Duration::from_millis(500),
            probe_protocol: ProbeProtocol::Http,
            host_program: std::env::current_exe()
                .unwrap_or_else(|_| PathBuf::from("search-sandbox")),
            image: None,
            heartbeat_enabled: true,
            heartbeat_interval: Duration::from_secs(10),
            force_container: false,
        }
    }
}

/// What to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchOptions {
    pub kind: EngineKind,
    /// Defaults to the engine's conventional port.
    pub port: Option<u16>,
}

/// Launches local engines.
pub struct Launcher {
    config: LauncherConfig,
    resolver: Arc<dyn BinaryResolver>,
    shutdown: Option<ShutdownSignal>,
}

impl Launcher {
    /// Create a launcher that asks `resolver` for native binaries.
    pub fn new(config: LauncherConfig, resolver: Arc<dyn BinaryResolver>) -> Self {
        Self {
            config,
            resolver,
            shutdown: None,
        }
    }

    /// Forward `shutdown` to every engine this launcher starts.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Start an engine and wait until its port answers.
    ///
    /// If the engine exits first, or cannot be started at all, the
    /// workspace is removed before the error is returned.
    pub async fn launch(&self, options: LaunchOptions) -> Result<LocalEngine, LaunchError> {
        let kind = options.kind;
        let port = options.port.unwrap_or_else(|| kind.default_port());
        tracing::debug!("{} on port {}: {:?}", kind, port, LaunchState::Provisioning);

        let choice =
            StrategyChoice::select(self.resolver.as_ref(), kind, self.config.force_container);
        tracing::debug!("{} strategy: {:?}", kind, choice);
        let strategy = choice.strategy();
        let fail = |source: LaunchError| LaunchError::StartupFailed {
            kind,
            strategy,
            source: Box::new(source),
        };

        let workspace = TempWorkspace::create(&self.config.temp_root)
            .await
            .map_err(fail)?;
        let request = LaunchRequest::new(kind, port, &workspace);

        let handle = match self.start(choice.binary(), &request) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to start {}: {}", kind, e);
                discard_workspace(workspace).await;
                return Err(fail(e));
            }
        };
        tracing::debug!("{} on port {}: {:?}", kind, port, LaunchState::Starting);

        let stopped = handle.wait_until_stopped();
        let probe = PortProbe::new(port, self.config.probe_protocol, self.config.probe_interval);

        if let Err(e) = race_readiness(probe.wait(), stopped.clone()).await {
            tracing::error!("Search engine terminated unexpectedly: {}", e);
            tracing::debug!("{} on port {}: {:?}", kind, port, LaunchState::Failed);
            if !process::has_terminated(&stopped)
                && let Err(kill_err) = handle.kill().await
            {
                tracing::warn!("Failed to kill {} after startup failure: {}", kind, kill_err);
            }
            discard_workspace(workspace).await;
            return Err(fail(e));
        }

        tracing::info!("{} ready at {} ({})", kind, engine_url(port), strategy);
        Ok(LocalEngine {
            url: engine_url(port),
            port,
            kind,
            handle,
            stopped,
            workspace: Some(workspace),
            state: LaunchState::Ready,
        })
    }

    fn start(
        &self,
        binary: Option<&Path>,
        request: &LaunchRequest,
    ) -> Result<Box<dyn LaunchHandle>, LaunchError> {
        match binary {
            Some(bin) => {
                let handle = BinaryLauncher::new(bin)
                    .with_shutdown(self.shutdown.clone())
                    .launch(request)?;
                Ok(Box::new(handle))
            }
            None => {
                let handle = ContainerLauncher::new(&self.config.host_program)
                    .with_image(self.config.image.clone())
                    .with_heartbeat(
                        self.config.heartbeat_enabled,
                        self.config.heartbeat_interval,
                    )
                    .with_shutdown(self.shutdown.clone())
                    .launch(request)?;
                Ok(Box::new(handle))
            }
        }
    }
}

async fn discard_workspace(workspace: TempWorkspace) {
    if let Err(e) = workspace.remove().await {
        tracing::warn!("{}", e);
    }
}

/// A running engine. Call [`stop`](Self::stop) when done.
pub struct LocalEngine {
    url: String,
    port: u16,
    kind: EngineKind,
    handle: Box<dyn LaunchHandle>,
    stopped: UntilTerminated,
    workspace: Option<TempWorkspace>,
    state: LaunchState,
}

impl LocalEngine {
    /// Base URL, e.g. `http://localhost:9200`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn strategy(&self) -> Strategy {
        self.handle.strategy()
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Root of the temporary workspace, until it is removed.
    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace.as_ref().map(TempWorkspace::path)
    }

    /// Container ID when running under the container strategy.
    pub fn container_id(&self) -> Option<String> {
        self.handle.container_id()
    }

    /// Resolves when the engine exits, whether or not `stop()` was called.
    pub fn wait_until_stopped(&self) -> UntilTerminated {
        self.stopped.clone()
    }

    /// Kill the engine, wait for it to exit, then delete the workspace.
    ///
    /// If the kill request fails the workspace is still removed (best
    /// effort) and the kill error is returned.
    pub async fn stop(mut self) -> Result<(), LaunchError> {
        self.state = LaunchState::Stopping;

        let outcome = match self.handle.kill().await {
            Ok(()) => match self.stopped.clone().await {
                Ok(status) => {
                    tracing::info!("{} stopped ({})", self.kind, status);
                    Ok(())
                }
                Err(e) => Err(LaunchError::from(e)),
            },
            Err(e) => {
                tracing::warn!("Failed to kill {}: {}", self.kind, e);
                Err(e)
            }
        };

        let removal = match self.workspace.take() {
            Some(workspace) => workspace.remove().await,
            None => Ok(()),
        };
        self.state = LaunchState::Stopped;

        outcome?;
        removal
    }
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("strategy", &self.handle.strategy())
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        if self.state != LaunchState::Stopped {
            tracing::warn!(
                "LocalEngine '{}' at {} dropped without stop(), engine may remain running",
                self.kind,
                self.url
            );
        }
    }
}
