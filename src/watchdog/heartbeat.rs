//! Orphan watchdog: stops a container whose owner vanished.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::docker::ContainerControl;
use crate::process;

/// Why the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Parent died; a stop was issued for the container.
    ParentGone,
    /// Container stopped on its own; nothing left to watch.
    ContainerGone,
}

/// Polls a parent PID and stops one container when the parent is gone.
pub struct Heartbeat<C> {
    parent_pid: u32,
    container_id: String,
    interval: Duration,
    control: C,
}

impl<C: ContainerControl> Heartbeat<C> {
    pub fn new(
        parent_pid: u32,
        container_id: impl Into<String>,
        interval: Duration,
        control: C,
    ) -> Self {
        Self {
            parent_pid,
            container_id: container_id.into(),
            interval,
            control,
        }
    }

    /// Poll until the parent or the container is gone.
    pub async fn run(&self) -> HeartbeatOutcome {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if !process::is_process_alive(self.parent_pid) {
                tracing::warn!(
                    "Parent process {} is gone, stopping container {}",
                    self.parent_pid,
                    self.container_id
                );
                if let Err(e) = self.control.stop(&self.container_id).await {
                    tracing::error!("{}", e);
                }
                return HeartbeatOutcome::ParentGone;
            }

            match self.control.is_running(&self.container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Container {} no longer running", self.container_id);
                    return HeartbeatOutcome::ContainerGone;
                }
                // Transient daemon trouble; the parent check still runs next tick.
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }
}
