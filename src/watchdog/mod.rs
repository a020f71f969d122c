//! Out-of-process supervision for containerized engines.
//!
//! Two helper processes, both this crate's own binary run with a hidden
//! subcommand:
//!
//! - the **watchdog host** (`container-host`) owns the container: it pulls,
//!   creates, starts, and waits on it, and kills it when the launcher asks,
//!   when it receives SIGINT/SIGTERM, or when its control channel breaks;
//! - the **heartbeat** (`heartbeat`) polls the host's PID and stops the
//!   container if the host disappears without doing so itself.
//!
//! They share nothing with the launcher except the host's stdio pipes and
//! what the OS and the container runtime report.

pub mod heartbeat;
pub mod host;
pub mod protocol;

pub use heartbeat::{Heartbeat, HeartbeatOutcome};
pub use host::{ContainerHost, ENGINE_LABEL, PORT_LABEL, listen_for_control};
pub use protocol::{ControlMessage, HostEvent, HostRequest};
