//! CLI command handling.
//!
//! Provides subcommands for:
//! - Launching an engine until interrupted (`run`)
//! - Checking the container runtime and installed binaries (`doctor`)
//! - Generating shell completions (`completion`)
//!
//! plus the hidden `container-host` and `heartbeat` subcommands the
//! launcher starts itself.

mod completion;
mod doctor;
mod run;
mod watchdog;

pub use completion::Completion;
pub use doctor::run_doctor_command;
pub use run::{RunArgs, run_engine_command};
pub use watchdog::{run_container_host_command, run_heartbeat_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "search-sandbox")]
#[command(about = "Launch a disposable local Elasticsearch or OpenSearch instance")]
#[command(
    long_about = "Runs a throwaway single-node search engine from a local binary or a container.\nExamples:\n  search-sandbox run  # Elasticsearch on :9200\n  search-sandbox run --engine opensearch --port 19200"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch an engine and keep it running until Ctrl-C
    #[command(
        about = "Launch an engine",
        long_about = "Starts an engine, prints its URL, and stops it on Ctrl-C.\nExample: search-sandbox run --engine opensearch"
    )]
    Run(RunArgs),

    /// Check the container runtime and installed binaries
    #[command(
        about = "Run diagnostics",
        long_about = "Reports which strategy each engine would use, why, and whether Docker is reachable.\nExample: search-sandbox doctor"
    )]
    Doctor,

    /// Generate shell completion scripts
    #[command(
        about = "Generate completions",
        long_about = "Generates shell completion scripts.\nExample: search-sandbox completion --shell bash > search-sandbox.bash"
    )]
    Completion(Completion),

    /// Own one engine container (internal use).
    /// Started by the container strategy, controlled over stdin.
    #[command(hide = true)]
    ContainerHost {
        /// JSON-encoded host request.
        #[arg(long)]
        request: String,
    },

    /// Stop a container once its owner dies (internal use).
    #[command(hide = true)]
    Heartbeat {
        /// PID to watch.
        #[arg(long)]
        parent_pid: u32,

        /// Container to stop.
        #[arg(long)]
        container: String,

        /// Seconds between checks.
        #[arg(long, default_value = "10")]
        interval_secs: u64,
    },
}
