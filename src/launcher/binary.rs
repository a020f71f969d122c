//! Run the engine from a native distribution.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{LaunchError, SpawnError};
use crate::launcher::{LaunchHandle, LaunchRequest, Strategy};
use crate::process::{self, UntilTerminated};
use crate::shutdown::ShutdownSignal;

/// Environment variables removed so the distribution uses its bundled JVM.
const STRIPPED_ENV: &[&str] = &["JAVA_HOME"];

/// `-Ekey=value` flags for the request, storage and log roots last.
pub fn engine_flags(request: &LaunchRequest) -> Vec<String> {
    request
        .options
        .iter()
        .cloned()
        .chain([
            format!("path.data={}", request.data_dir.display()),
            format!("path.logs={}", request.logs_dir.display()),
        ])
        .map(|opt| format!("-E{}", opt))
        .collect()
}

/// Starts the engine executable directly.
#[derive(Debug, Clone)]
pub struct BinaryLauncher {
    bin: PathBuf,
    shutdown: Option<ShutdownSignal>,
}

impl BinaryLauncher {
    /// Launcher for the executable at `bin`.
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            shutdown: None,
        }
    }

    /// Kill the engine when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Option<ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Executable path.
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Build the command without running it.
    pub fn command(&self, request: &LaunchRequest) -> Command {
        let flags = engine_flags(request);

        // Windows distributions ship a .bat launcher that needs cmd.exe.
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.bin);
            cmd
        } else {
            Command::new(&self.bin)
        };
        cmd.args(&flags);

        for key in STRIPPED_ENV {
            cmd.env_remove(key);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        process::isolate_process_group(&mut cmd);
        cmd
    }

    /// Spawn the engine.
    ///
    /// Fails immediately with [`SpawnError`] if the executable can't be started.
    pub fn launch(&self, request: &LaunchRequest) -> Result<BinaryHandle, SpawnError> {
        let mut cmd = self.command(request);
        tracing::info!(
            "Spawning {} {}",
            self.bin.display(),
            engine_flags(request).join(" ")
        );

        let child = process::spawn(&mut cmd)?;
        let pid = child.id();
        // The distribution's launcher forks the server; wait for the whole group.
        let stopped = process::until_group_terminated(child);
        let handle = BinaryHandle { pid, stopped };

        if let Some(shutdown) = self.shutdown.clone() {
            handle.forward_shutdown(shutdown);
        }

        Ok(handle)
    }
}

/// A running engine process tree.
#[derive(Clone, Debug)]
pub struct BinaryHandle {
    pid: Option<u32>,
    stopped: UntilTerminated,
}

impl BinaryHandle {
    /// Process ID of the launched executable.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill_tree(&self) -> Result<(), LaunchError> {
        // The group ID stays reserved while any member lives, so it is safe
        // to signal until the group has drained, even after the leader is
        // reaped. Once drained the ID may belong to someone else.
        if process::has_terminated(&self.stopped) {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        tracing::info!("Killing engine process group {}", pid);
        process::kill_tree(pid).map_err(|e| LaunchError::Kill {
            strategy: Strategy::Binary,
            reason: e.to_string(),
        })
    }

    fn forward_shutdown(&self, shutdown: ShutdownSignal) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    if let Err(e) = handle.kill_tree() {
                        tracing::warn!("Failed to forward shutdown to engine: {}", e);
                    }
                }
                _ = handle.stopped.clone() => {}
            }
        });
    }
}

#[async_trait]
impl LaunchHandle for BinaryHandle {
    fn strategy(&self) -> Strategy {
        Strategy::Binary
    }

    async fn kill(&self) -> Result<(), LaunchError> {
        self.kill_tree()
    }

    fn wait_until_stopped(&self) -> UntilTerminated {
        self.stopped.clone()
    }
}
