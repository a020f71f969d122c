//! Run the engine in a container owned by a detached watchdog host.
//!
//! The launching process may die without running any cleanup (SIGKILL, a
//! short-lived CLI invocation), so it never holds the container itself.
//! It starts a watchdog host process instead, hands it the serialized
//! [`LaunchRequest`], and talks to it over the host's stdin/stdout. The
//! host's own exit is the authoritative "container is gone" signal.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::LaunchError;
use crate::launcher::{LaunchHandle, LaunchRequest, Strategy};
use crate::process::{self, UntilTerminated};
use crate::shutdown::ShutdownSignal;
use crate::watchdog::protocol::{
    CONTAINER_HOST_COMMAND, ControlMessage, HostEvent, HostRequest, encode_line,
};

/// Starts watchdog hosts for container launches.
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    host_program: PathBuf,
    image: Option<String>,
    heartbeat: bool,
    heartbeat_interval: Duration,
    shutdown: Option<ShutdownSignal>,
}

impl ContainerLauncher {
    /// Use `host_program` (normally this crate's own binary) as the watchdog host.
    pub fn new(host_program: impl Into<PathBuf>) -> Self {
        Self {
            host_program: host_program.into(),
            image: None,
            heartbeat: true,
            heartbeat_interval: Duration::from_secs(10),
            shutdown: None,
        }
    }

    /// Run `image` instead of the engine's pinned image.
    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    /// Configure the orphan watchdog started next to the container.
    pub fn with_heartbeat(mut self, enabled: bool, interval: Duration) -> Self {
        self.heartbeat = enabled;
        self.heartbeat_interval = interval;
        self
    }

    /// Send a kill request when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Option<ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Watchdog host executable.
    pub fn host_program(&self) -> &Path {
        &self.host_program
    }

    /// Payload handed to the watchdog host.
    pub fn host_request(&self, request: &LaunchRequest) -> HostRequest {
        HostRequest {
            request: request.clone(),
            image: self
                .image
                .clone()
                .unwrap_or_else(|| request.kind.image().to_string()),
            heartbeat: self.heartbeat,
            heartbeat_interval_secs: self.heartbeat_interval.as_secs().max(1),
        }
    }

    /// Start the watchdog host, which pulls, creates, and starts the container.
    pub fn launch(&self, request: &LaunchRequest) -> Result<ContainerHandle, LaunchError> {
        let host_request = self.host_request(request);
        let payload = serde_json::to_string(&host_request).map_err(|e| LaunchError::Channel {
            reason: format!("failed to encode host request: {}", e),
        })?;

        let mut cmd = Command::new(&self.host_program);
        cmd.arg(CONTAINER_HOST_COMMAND)
            .arg("--request")
            .arg(payload)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        process::isolate_process_group(&mut cmd);

        tracing::info!("Launching container {}", host_request.image);
        let mut child = process::spawn(&mut cmd)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LaunchError::Channel {
                reason: "watchdog host stdio was not captured".to_string(),
            });
        };

        let host_pid = child.id();
        let stopped = process::until_terminated(child);
        let started = Arc::new(OnceLock::new());
        spawn_event_reader(stdout, Arc::clone(&started));

        let handle = ContainerHandle {
            image: host_request.image,
            control: Arc::new(ControlChannel {
                stdin: Mutex::new(Some(stdin)),
                stopped: stopped.clone(),
            }),
            stopped,
            host_pid,
            started,
        };

        if let Some(shutdown) = self.shutdown.clone() {
            handle.forward_shutdown(shutdown);
        }

        Ok(handle)
    }
}

/// Writes control messages to the host's stdin.
struct ControlChannel {
    stdin: Mutex<Option<ChildStdin>>,
    stopped: UntilTerminated,
}

impl ControlChannel {
    async fn send(&self, message: ControlMessage) -> Result<(), LaunchError> {
        // Host already gone: the container is gone with it.
        if process::has_terminated(&self.stopped) {
            return Ok(());
        }

        let line = encode_line(&message).map_err(|e| LaunchError::Channel {
            reason: e.to_string(),
        })?;

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(LaunchError::Channel {
                reason: "control channel already closed".to_string(),
            });
        };

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                guard.take();
                drop(guard);
                // A broken pipe from a host that is exiting anyway is harmless.
                tokio::time::sleep(Duration::from_millis(50)).await;
                if process::has_terminated(&self.stopped) {
                    Ok(())
                } else {
                    Err(LaunchError::Channel {
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

/// What the host reported once the container was running.
#[derive(Debug, Clone)]
struct Started {
    container_id: String,
    heartbeat_pid: Option<u32>,
}

fn spawn_event_reader(stdout: ChildStdout, started: Arc<OnceLock<Started>>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<HostEvent>(&line) {
                    Ok(HostEvent::Pulling { image }) => {
                        tracing::info!("Pulling image {}", image);
                    }
                    Ok(HostEvent::Started {
                        container_id,
                        heartbeat_pid,
                    }) => {
                        tracing::info!(
                            "Container {} started (heartbeat pid {:?})",
                            container_id,
                            heartbeat_pid
                        );
                        let _ = started.set(Started {
                            container_id,
                            heartbeat_pid,
                        });
                    }
                    Ok(HostEvent::Exited { status_code }) => {
                        tracing::info!("Container exited with status {}", status_code);
                    }
                    Err(e) => {
                        tracing::debug!("Ignoring unrecognized host output '{}': {}", line, e);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Lost event stream from watchdog host: {}", e);
                    break;
                }
            }
        }
    });
}

/// A container running under a watchdog host.
#[derive(Clone)]
pub struct ContainerHandle {
    image: String,
    control: Arc<ControlChannel>,
    stopped: UntilTerminated,
    host_pid: Option<u32>,
    started: Arc<OnceLock<Started>>,
}

impl ContainerHandle {
    /// Image the container runs.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Process ID of the watchdog host.
    pub fn host_pid(&self) -> Option<u32> {
        self.host_pid
    }

    /// Process ID of the orphan watchdog, once the container has started.
    pub fn heartbeat_pid(&self) -> Option<u32> {
        self.started.get().and_then(|started| started.heartbeat_pid)
    }

    fn forward_shutdown(&self, shutdown: ShutdownSignal) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    if let Err(e) = handle.control.send(ControlMessage::Kill).await {
                        tracing::warn!("Failed to forward shutdown to watchdog host: {}", e);
                    }
                }
                _ = handle.stopped.clone() => {}
            }
        });
    }
}

#[async_trait]
impl LaunchHandle for ContainerHandle {
    fn strategy(&self) -> Strategy {
        Strategy::Container
    }

    async fn kill(&self) -> Result<(), LaunchError> {
        tracing::info!("Stopping container {}", self.image);
        self.control.send(ControlMessage::Kill).await
    }

    fn wait_until_stopped(&self) -> UntilTerminated {
        self.stopped.clone()
    }

    fn container_id(&self) -> Option<String> {
        self.started.get().map(|started| started.container_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    fn request() -> LaunchRequest {
        LaunchRequest {
            kind: EngineKind::Elasticsearch,
            port: 9200,
            data_dir: PathBuf::from("/tmp/data"),
            logs_dir: PathBuf::from("/tmp/logs"),
            options: EngineKind::Elasticsearch.startup_options(9200),
        }
    }

    #[test]
    fn test_host_request_defaults_to_engine_image() {
        let launcher = ContainerLauncher::new("/usr/bin/search-sandbox");
        let host = launcher.host_request(&request());
        assert_eq!(host.image, "elastic/elasticsearch:8.6.2");
        assert!(host.heartbeat);
        assert_eq!(host.heartbeat_interval_secs, 10);
    }

    #[test]
    fn test_host_request_image_override() {
        let launcher = ContainerLauncher::new("/usr/bin/search-sandbox")
            .with_image(Some("mirror.local/es:8.6.2".to_string()))
            .with_heartbeat(false, Duration::from_millis(10));
        let host = launcher.host_request(&request());
        assert_eq!(host.image, "mirror.local/es:8.6.2");
        assert!(!host.heartbeat);
        assert_eq!(host.heartbeat_interval_secs, 1);
    }

    /// A stand-in host that echoes one event, then exits when it reads a line.
    #[cfg(unix)]
    fn fake_host(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-host");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             echo '{\"event\":\"started\",\"container_id\":\"c0ffee\",\"heartbeat_pid\":null}'\n\
             read line\n\
             echo \"$line\" > \"$(dirname \"$0\")/received\"\n\
             exit 137\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_is_delivered_over_channel() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ContainerLauncher::new(fake_host(dir.path()));
        let handle = launcher.launch(&request()).unwrap();

        handle.kill().await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(10), handle.wait_until_stopped())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.code(), Some(137));

        let received = std::fs::read_to_string(dir.path().join("received")).unwrap();
        assert_eq!(received.trim(), r#"{"action":"kill"}"#);

        let mut container_id = None;
        for _ in 0..50 {
            container_id = handle.container_id();
            if container_id.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(container_id.as_deref(), Some("c0ffee"));
        assert_eq!(handle.heartbeat_pid(), None);
        assert!(handle.host_pid().is_some());

        // Host is gone: further kills are no-ops.
        handle.kill().await.unwrap();
    }
}
