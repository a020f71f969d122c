//! Messages exchanged between the launcher and its watchdog host.
//!
//! Both directions are newline-delimited JSON: control messages on the
//! host's stdin, events on the host's stdout.

use serde::{Deserialize, Serialize};

use crate::launcher::LaunchRequest;

/// Subcommand the host executable is started with.
pub const CONTAINER_HOST_COMMAND: &str = "container-host";

/// Subcommand the orphan watchdog is started with.
pub const HEARTBEAT_COMMAND: &str = "heartbeat";

/// Everything the watchdog host needs, passed as a single argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    pub request: LaunchRequest,
    /// Image to run.
    pub image: String,
    /// Whether to start an orphan watchdog next to the container.
    pub heartbeat: bool,
    /// Orphan watchdog polling interval.
    pub heartbeat_interval_secs: u64,
}

impl HostRequest {
    /// Container environment: engine options plus container-side storage paths.
    pub fn container_env(&self) -> Vec<String> {
        self.request
            .options
            .iter()
            .cloned()
            .chain([
                format!("path.data={}", crate::engine::CONTAINER_DATA_PATH),
                format!("path.logs={}", crate::engine::CONTAINER_LOGS_PATH),
            ])
            .collect()
    }
}

/// Launcher → host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Kill the container.
    Kill,
}

/// Host → launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// Image is being pulled.
    Pulling { image: String },
    /// Container is running.
    Started {
        container_id: String,
        heartbeat_pid: Option<u32>,
    },
    /// Container has exited.
    Exited { status_code: i64 },
}

/// Encode as one line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
