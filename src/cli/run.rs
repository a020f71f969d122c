use std::sync::Arc;

use clap::Args;

use crate::config::SandboxConfig;
use crate::engine::EngineKind;
use crate::error::LaunchError;
use crate::launcher::Launcher;
use crate::shutdown::ShutdownSignal;

/// Flags for `run`. Each overrides its environment setting.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Engine to launch
    #[arg(long, value_enum, env = "SEARCH_SANDBOX_ENGINE")]
    pub engine: Option<EngineKind>,

    /// HTTP port (default 9200)
    #[arg(long, env = "SEARCH_SANDBOX_PORT")]
    pub port: Option<u16>,

    /// Use a container even if a local binary is installed
    #[arg(long)]
    pub container: bool,
}

impl RunArgs {
    /// Apply these flags on top of `config`.
    pub fn apply(&self, config: &mut SandboxConfig) {
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if self.container {
            config.container.force = true;
        }
    }
}

/// Launch an engine, print its URL, and stop it on Ctrl-C or SIGTERM.
pub async fn run_engine_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = SandboxConfig::resolve()?;
    args.apply(&mut config);

    let shutdown = ShutdownSignal::install();
    let launcher = Launcher::new(
        config.to_launcher_config(),
        Arc::new(config.install.resolver()),
    )
    .with_shutdown(shutdown.clone());

    let kind = config.engine;
    let engine = match launcher.launch(config.launch_options()).await {
        Ok(engine) => engine,
        Err(e) if shutdown.is_triggered() => {
            tracing::info!("Interrupted before {} was ready: {}", kind, e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{} {} ready at {}", kind, kind.version(), engine.url());
    if let Some(id) = engine.container_id() {
        tracing::info!("Container: {}", id);
    }

    tokio::select! {
        () = shutdown.cancelled() => {
            tracing::info!("Stopping {}", kind);
            engine.stop().await?;
            Ok(())
        }
        status = engine.wait_until_stopped() => {
            let status = status.map_err(LaunchError::from)?;
            // Engine is gone already; this only clears the workspace.
            if let Err(e) = engine.stop().await {
                tracing::warn!("Cleanup after exit failed: {}", e);
            }
            anyhow::bail!("{} exited unexpectedly ({})", kind, status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = SandboxConfig::default();
        RunArgs {
            engine: Some(EngineKind::OpenSearch),
            port: Some(19200),
            container: true,
        }
        .apply(&mut config);

        assert_eq!(config.engine, EngineKind::OpenSearch);
        assert_eq!(config.port, Some(19200));
        assert!(config.container.force);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = SandboxConfig {
            port: Some(19300),
            ..Default::default()
        };
        RunArgs::default().apply(&mut config);

        assert_eq!(config.engine, EngineKind::Elasticsearch);
        assert_eq!(config.port, Some(19300));
        assert!(!config.container.force);
    }
}
