//! Launch and supervise a disposable local Elasticsearch or OpenSearch.
//!
//! [`launcher::Launcher`] starts an engine from a native binary when one is
//! installed, or in a container owned by a detached watchdog host
//! otherwise, waits for its port, and hands back a
//! [`launcher::LocalEngine`] whose `stop()` kills the engine and removes
//! its temporary data and log directories.

pub mod cli;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod installer;
pub mod launcher;
pub mod probe;
pub mod process;
pub mod readiness;
pub mod shutdown;
pub mod watchdog;
pub mod workspace;

pub use engine::EngineKind;
pub use error::LaunchError;
pub use launcher::{LaunchOptions, Launcher, LauncherConfig, LocalEngine};
