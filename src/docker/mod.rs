//! Container runtime access.
//!
//! Connection handling plus the handful of idempotent container operations
//! the watchdog processes need. Stop and kill requests against a container
//! that is already stopped or removed succeed silently, because the explicit
//! kill path and the orphan watchdog may race to stop the same container.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{InspectContainerOptions, KillContainerOptions};
use bollard::errors::Error as BollardError;

use crate::error::ContainerError;

/// Connect to the local Docker daemon.
///
/// Tries bollard's defaults (`DOCKER_HOST` or the platform socket) first,
/// then the Docker Desktop and rootless socket locations on Unix.
pub async fn connect_docker() -> Result<Docker, ContainerError> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        match Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = format!("{}: {}", path, e),
            },
            Err(e) => last_error = format!("{}: {}", path, e),
        }
    }

    Err(ContainerError::DockerNotAvailable { reason: last_error })
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<std::path::PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
    }
    let uid = unsafe { libc::getuid() };
    sockets.push(std::path::PathBuf::from(format!("/run/user/{}/docker.sock", uid)));
    sockets
}

/// Whether `err` means the container is already stopped or gone.
///
/// 304: already stopped. 404: no such container (auto-removed).
/// 409: not running, or removal already in progress.
pub fn is_already_stopped(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304 | 404 | 409,
            ..
        }
    )
}

/// The container operations the watchdogs rely on.
#[async_trait]
pub trait ContainerControl: Send + Sync {
    /// Whether the container exists and is running.
    async fn is_running(&self, id: &str) -> Result<bool, ContainerError>;

    /// Gracefully stop the container. Already stopped is success.
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    /// Send SIGKILL to the container. Already stopped is success.
    async fn kill(&self, id: &str) -> Result<(), ContainerError>;
}

/// [`ContainerControl`] backed by the Docker API.
#[derive(Debug, Clone)]
pub struct DockerControl {
    docker: Docker,
}

impl DockerControl {
    /// Wrap a connected client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect with [`connect_docker`].
    pub async fn connect() -> Result<Self, ContainerError> {
        Ok(Self::new(connect_docker().await?))
    }

    /// Underlying client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerControl for DockerControl {
    async fn is_running(&self, id: &str) -> Result<bool, ContainerError> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::Operation {
                operation: "inspect",
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        match self.docker.stop_container(id, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_stopped(&e) => {
                tracing::debug!("Container {} already stopped", id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Operation {
                operation: "stop",
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), ContainerError> {
        match self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_already_stopped(&e) => {
                tracing::debug!("Container {} already stopped", id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Operation {
                operation: "kill",
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
