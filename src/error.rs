//! Error types for launching and supervising a local search engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineKind;
use crate::launcher::Strategy;
use crate::process::ExitStatus;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting was present but could not be parsed.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

/// The executable could not be started at all.
#[derive(Debug, Error)]
#[error("Failed to spawn '{program}': {source}")]
pub struct SpawnError {
    /// Program that was being launched.
    pub program: String,
    /// Underlying OS error (not found, permission denied, ...).
    #[source]
    pub source: std::io::Error,
}

/// Waiting on a child process failed for a reason other than the child exiting.
///
/// Cloneable so it can travel through a shared termination future.
#[derive(Debug, Clone, Error)]
#[error("Failed to wait for process: {reason}")]
pub struct WaitError {
    /// Reason for failure.
    pub reason: String,
}

impl WaitError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors from launching, supervising, and stopping an engine.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The engine executable or watchdog host could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The engine exited before it became reachable.
    #[error("Search engine terminated unexpectedly with {status}")]
    UnexpectedTermination {
        /// How the process exited.
        status: ExitStatus,
    },

    /// Observing the engine's termination failed.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// A control message could not be delivered to the watchdog host.
    #[error("Control channel to watchdog host failed: {reason}")]
    Channel {
        /// Reason for failure.
        reason: String,
    },

    /// The kill request itself failed.
    #[error("Failed to kill {strategy} engine: {reason}")]
    Kill {
        /// Which strategy was being killed.
        strategy: Strategy,
        /// Reason for failure.
        reason: String,
    },

    /// Temporary workspace could not be created or removed.
    #[error("Temporary workspace error at {}: {source}", path.display())]
    Workspace {
        /// Workspace path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Launch failed; carries the engine, the attempted strategy, and the cause.
    #[error("Failed to start {kind} using the {strategy} strategy: {source}")]
    StartupFailed {
        /// Engine that was being launched.
        kind: EngineKind,
        /// Strategy that was attempted.
        strategy: Strategy,
        /// Underlying cause.
        #[source]
        source: Box<LaunchError>,
    },
}

impl LaunchError {
    /// Returns the exit status if this error (or its cause) is an unexpected termination.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::UnexpectedTermination { status } => Some(*status),
            Self::StartupFailed { source, .. } => source.exit_status(),
            _ => None,
        }
    }
}

/// Errors raised while driving the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Docker is not available.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container from '{image}': {reason}")]
    ContainerCreationFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{id}': {reason}")]
    ContainerStartFailed {
        /// Container ID.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Kill, stop, inspect, or wait against a container failed.
    #[error("Container operation '{operation}' on '{id}' failed: {reason}")]
    Operation {
        /// Operation name.
        operation: &'static str,
        /// Container ID.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The host request could not be decoded.
    #[error("Invalid watchdog host request: {0}")]
    InvalidRequest(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failure_exposes_exit_status() {
        let status = ExitStatus::from_code(3);
        let err = LaunchError::StartupFailed {
            kind: EngineKind::OpenSearch,
            strategy: Strategy::Binary,
            source: Box::new(LaunchError::UnexpectedTermination { status }),
        };

        assert_eq!(err.exit_status(), Some(status));
        let message = err.to_string();
        assert!(message.contains("opensearch"));
        assert!(message.contains("binary"));
        assert!(message.contains("exit code 3"));
    }

    #[test]
    fn channel_error_has_no_exit_status() {
        let err = LaunchError::Channel {
            reason: "broken pipe".to_string(),
        };
        assert_eq!(err.exit_status(), None);
    }
}
