use std::fmt::Write as _;

use crate::config::SandboxConfig;
use crate::docker::connect_docker;
use crate::engine::EngineKind;
use crate::installer::{BinaryResolver, artifact_name};
use crate::launcher::{Strategy, StrategyChoice};

/// Whether the container strategy could run right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    Reachable,
    Unreachable(String),
}

impl RuntimeStatus {
    async fn detect() -> Self {
        match connect_docker().await {
            Ok(_) => Self::Reachable,
            Err(e) => Self::Unreachable(e.to_string()),
        }
    }
}

/// How one engine would be launched on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub kind: EngineKind,
    pub choice: StrategyChoice,
    /// Image a container launch would run.
    pub image: String,
    /// Whether a native distribution is published for this OS and architecture.
    pub distributed: bool,
}

impl EngineReport {
    fn new(config: &SandboxConfig, resolver: &dyn BinaryResolver, kind: EngineKind) -> Self {
        Self {
            kind,
            choice: StrategyChoice::select(resolver, kind, config.container.force),
            image: config
                .container
                .image
                .clone()
                .unwrap_or_else(|| kind.image().to_string()),
            distributed: artifact_name(kind, std::env::consts::OS, std::env::consts::ARCH)
                .is_some(),
        }
    }

    /// Why the engine falls back to a container, if it does.
    fn fallback_reason(&self) -> Option<String> {
        match self.choice {
            StrategyChoice::Binary(_) => None,
            StrategyChoice::ForcedContainer => Some("container forced".to_string()),
            StrategyChoice::NoBinary if self.distributed => {
                Some("no local binary installed".to_string())
            }
            StrategyChoice::NoBinary => Some(format!(
                "no {} build for {}/{}",
                self.kind,
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
        }
    }

    /// Whether a launch would get as far as starting the engine.
    fn launchable(&self, runtime: &RuntimeStatus) -> bool {
        self.choice.strategy() == Strategy::Binary || *runtime == RuntimeStatus::Reachable
    }

    fn line(&self, runtime: &RuntimeStatus) -> String {
        let mark = if self.launchable(runtime) { "ok" } else { "!!" };
        let mut line = format!("  [{}] {} {}: ", mark, self.kind, self.kind.version());
        match (&self.choice, self.fallback_reason()) {
            (StrategyChoice::Binary(bin), _) => {
                let _ = write!(line, "binary {}", bin.display());
            }
            (_, reason) => {
                let _ = write!(line, "container {}", self.image);
                if let Some(reason) = reason {
                    let _ = write!(line, " ({})", reason);
                }
            }
        }
        line
    }
}

fn engine_reports(config: &SandboxConfig, resolver: &dyn BinaryResolver) -> Vec<EngineReport> {
    EngineKind::ALL
        .into_iter()
        .map(|kind| EngineReport::new(config, resolver, kind))
        .collect()
}

fn render(reports: &[EngineReport], runtime: &RuntimeStatus) -> Vec<String> {
    let mut lines = match runtime {
        RuntimeStatus::Reachable => vec!["  [ok] Docker: reachable".to_string()],
        RuntimeStatus::Unreachable(reason) => vec![format!("  [--] Docker: {}", reason)],
    };
    lines.extend(reports.iter().map(|report| report.line(runtime)));

    if reports.iter().any(|report| !report.launchable(runtime)) {
        lines.push(
            "       Start Docker, point DOCKER_HOST at a running daemon, or install a binary"
                .to_string(),
        );
    }
    lines
}

/// Report how each engine would be launched on this machine.
pub async fn run_doctor_command() -> anyhow::Result<()> {
    let config = SandboxConfig::resolve()?;
    let resolver = config.install.resolver();
    let reports = engine_reports(&config, &resolver);
    let runtime = RuntimeStatus::detect().await;

    println!("search-sandbox doctor");
    println!();
    for line in render(&reports, &runtime) {
        println!("{}", line);
    }
    println!();
    println!("  workspaces: {}", config.temp_dir.display());
    println!("  binary cache: {}", config.install.cache_dir.display());
    Ok(())
}
