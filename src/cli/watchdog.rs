use std::time::Duration;

use crate::docker::DockerControl;
use crate::error::ContainerError;
use crate::shutdown::ShutdownSignal;
use crate::watchdog::{ContainerHost, Heartbeat, HostRequest, listen_for_control};

/// Run the watchdog host. Returns the process exit code.
///
/// The code mirrors the container's exit status, clamped to a byte.
pub async fn run_container_host_command(request: &str) -> anyhow::Result<u8> {
    let request: HostRequest = serde_json::from_str(request).map_err(ContainerError::from)?;

    let shutdown = ShutdownSignal::install();
    listen_for_control(tokio::io::stdin(), shutdown.clone());

    let host = ContainerHost::connect(request, shutdown).await?;
    let status_code = host.run().await?;
    Ok(status_code.clamp(0, 255) as u8)
}

/// Run the orphan watchdog until the parent or the container is gone.
pub async fn run_heartbeat_command(
    parent_pid: u32,
    container: String,
    interval_secs: u64,
) -> anyhow::Result<()> {
    let control = DockerControl::connect().await?;
    let heartbeat = Heartbeat::new(
        parent_pid,
        container,
        Duration::from_secs(interval_secs.max(1)),
        control,
    );
    let outcome = heartbeat.run().await;
    tracing::debug!("Heartbeat finished: {:?}", outcome);
    Ok(())
}
