//! The watchdog host: owns one engine container for its whole life.

use std::collections::HashMap;
use std::io::Write;
use std::pin::pin;
use std::process::Stdio;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::docker::{ContainerControl, DockerControl, is_already_stopped};
use crate::engine::{CONTAINER_DATA_PATH, CONTAINER_LOGS_PATH};
use crate::error::ContainerError;
use crate::process;
use crate::shutdown::ShutdownSignal;
use crate::watchdog::protocol::{
    ControlMessage, HEARTBEAT_COMMAND, HostEvent, HostRequest, encode_line,
};

/// Label carrying the engine name on every sandbox container.
pub const ENGINE_LABEL: &str = "search-sandbox.engine";

/// Label carrying the host port on every sandbox container.
pub const PORT_LABEL: &str = "search-sandbox.port";

/// Read kill requests from `reader` and fire `shutdown` for them.
///
/// EOF or a read error also fires `shutdown`: without a channel the
/// launcher can no longer stop the container, so it must not outlive it.
pub fn listen_for_control<R>(reader: R, shutdown: ShutdownSignal) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ControlMessage>(line) {
                        Ok(ControlMessage::Kill) => {
                            tracing::info!("Kill requested by launcher");
                            shutdown.trigger();
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring malformed control message '{}': {}", line, e);
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!("Control channel closed, stopping container");
                    shutdown.trigger();
                    break;
                }
                Err(e) => {
                    tracing::error!("Control channel failed: {}", e);
                    shutdown.trigger();
                    break;
                }
            }
        }
    })
}

/// Write one event line to stdout for the launcher.
fn emit(event: &HostEvent) {
    let Ok(line) = encode_line(event) else {
        return;
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(line.as_bytes()).and_then(|()| stdout.flush()) {
        tracing::debug!("Failed to report {:?} to launcher: {}", event, e);
    }
}

/// Runs one container and blocks until it exits.
pub struct ContainerHost {
    docker: Docker,
    control: DockerControl,
    request: HostRequest,
    shutdown: ShutdownSignal,
}

impl ContainerHost {
    /// Connect to Docker for `request`. `shutdown` is the kill trigger.
    pub async fn connect(
        request: HostRequest,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ContainerError> {
        let control = DockerControl::connect().await?;
        Ok(Self {
            docker: control.docker().clone(),
            control,
            request,
            shutdown,
        })
    }

    /// Pull, create, start, and wait. Returns the container's exit code.
    ///
    /// A kill request before the container starts skips the launch.
    pub async fn run(self) -> Result<i64, ContainerError> {
        tokio::select! {
            result = self.pull_image() => result?,
            () = self.shutdown.cancelled() => {
                tracing::info!("Kill requested before container was created");
                return Ok(0);
            }
        }

        let id = self.create_container().await?;

        if let Err(e) = self.attach_stderr(&id).await {
            tracing::warn!("Could not attach to container stderr: {}", e);
        }

        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            // AutoRemove only applies once a container has run.
            let _ = self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(ContainerError::ContainerStartFailed {
                id,
                reason: e.to_string(),
            });
        }

        let heartbeat_pid = self.spawn_heartbeat(&id);
        tracing::info!("Started container {} from {}", id, self.request.image);
        emit(&HostEvent::Started {
            container_id: id.clone(),
            heartbeat_pid,
        });

        let status_code = self.wait_for_exit(&id).await;
        tracing::info!("Container {} exited with status {}", id, status_code);
        emit(&HostEvent::Exited { status_code });
        Ok(status_code)
    }

    /// Pull the image unless it is already present.
    async fn pull_image(&self) -> Result<(), ContainerError> {
        let image = &self.request.image;
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);
        emit(&HostEvent::Pulling {
            image: image.clone(),
        });

        let options = CreateImageOptions {
            from_image: image.clone(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    /// Create the container: bind mounts, one loopback port, auto-remove.
    async fn create_container(&self) -> Result<String, ContainerError> {
        let request = &self.request.request;
        let port_key = format!("{}/tcp", request.port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(request.port.to_string()),
            }]),
        );

        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            HashMap::from([(port_key, HashMap::new())]);

        let mounts = vec![
            Mount {
                source: Some(request.data_dir.to_string_lossy().into_owned()),
                target: Some(CONTAINER_DATA_PATH.to_string()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            },
            Mount {
                source: Some(request.logs_dir.to_string_lossy().into_owned()),
                target: Some(CONTAINER_LOGS_PATH.to_string()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            },
        ];

        let host_config = HostConfig {
            auto_remove: Some(true),
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let labels = HashMap::from([
            (ENGINE_LABEL.to_string(), request.kind.to_string()),
            (PORT_LABEL.to_string(), request.port.to_string()),
        ]);

        let config = Config {
            image: Some(self.request.image.clone()),
            labels: Some(labels),
            env: Some(self.request.container_env()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let name = format!(
            "search-sandbox-{}-{}",
            request.kind,
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::ContainerCreationFailed {
                image: self.request.image.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!("Container {}: {}", name, warning);
        }
        Ok(response.id)
    }

    /// Copy the engine's stderr to ours.
    async fn attach_stderr(&self, id: &str) -> Result<(), ContainerError> {
        let AttachContainerResults { mut output, .. } = self
            .docker
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stream: Some(true),
                    stderr: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ContainerError::Operation {
                operation: "attach",
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            let mut stderr = tokio::io::stderr();
            while let Some(Ok(chunk)) = output.next().await {
                if stderr.write_all(&chunk.into_bytes()).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Start the orphan watchdog, watching this process.
    fn spawn_heartbeat(&self, id: &str) -> Option<u32> {
        if !self.request.heartbeat {
            return None;
        }
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                tracing::warn!("Cannot locate own executable for heartbeat: {}", e);
                return None;
            }
        };

        let mut cmd = Command::new(exe);
        cmd.arg(HEARTBEAT_COMMAND)
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .arg("--container")
            .arg(id)
            .arg("--interval-secs")
            .arg(self.request.heartbeat_interval_secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        process::isolate_process_group(&mut cmd);

        match process::spawn(&mut cmd) {
            // Not awaited: it exits on its own once this process or the container is gone.
            Ok(child) => child.id(),
            Err(e) => {
                tracing::warn!("Failed to start heartbeat: {}", e);
                None
            }
        }
    }

    /// Block until the container exits, killing it once if asked to.
    async fn wait_for_exit(&self, id: &str) -> i64 {
        let mut wait = pin!(
            self.docker
                .wait_container(id, None::<WaitContainerOptions<String>>)
        );
        let mut kill_sent = false;

        loop {
            tokio::select! {
                next = wait.next() => {
                    return match next {
                        Some(Ok(response)) => response.status_code,
                        Some(Err(BollardError::DockerContainerWaitError { code, .. })) => code,
                        Some(Err(e)) if is_already_stopped(&e) => 0,
                        Some(Err(e)) => {
                            tracing::warn!("Lost wait on container {}: {}", id, e);
                            self.kill_and_poll(id).await
                        }
                        None => 0,
                    };
                }
                () = self.shutdown.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    tracing::info!("Terminating container {}", id);
                    if let Err(e) = self.control.kill(id).await {
                        tracing::error!("{}", e);
                    }
                }
            }
        }
    }

    /// Fallback when the wait stream breaks: kill and poll until gone.
    async fn kill_and_poll(&self, id: &str) -> i64 {
        if let Err(e) = self.control.kill(id).await {
            tracing::error!("{}", e);
        }
        loop {
            match self.control.is_running(id).await {
                Ok(false) => return 137,
                Ok(true) => {}
                Err(e) => tracing::warn!("{}", e),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_message_triggers_shutdown() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let shutdown = ShutdownSignal::new();
        let _listener = listen_for_control(reader, shutdown.clone());

        writer.write_all(b"\n{\"action\":\"kill\"}\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_is_ignored() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let shutdown = ShutdownSignal::new();
        let _listener = listen_for_control(reader, shutdown.clone());

        writer.write_all(b"{\"action\":\"dance\"}\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.is_triggered());
        drop(writer);
    }

    #[tokio::test]
    async fn test_closed_channel_triggers_shutdown() {
        let shutdown = ShutdownSignal::new();
        let listener = listen_for_control(&b""[..], shutdown.clone());

        listener.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_read_error_triggers_shutdown() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"action\":\"dance\"}\n")
            .read_error(std::io::Error::other("connection reset"))
            .build();
        let shutdown = ShutdownSignal::new();
        let listener = listen_for_control(reader, shutdown.clone());

        listener.await.unwrap();
        assert!(shutdown.is_triggered());
    }
}
