//! search-sandbox - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use search_sandbox::cli::{
    Cli, Command, run_container_host_command, run_doctor_command, run_engine_command,
    run_heartbeat_command,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // stdout belongs to the watchdog host's event stream, so logs go to stderr.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("search_sandbox=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    match cli.command {
        Command::Run(args) => run_engine_command(args).await,
        Command::Doctor => run_doctor_command().await,
        Command::Completion(completion) => completion.run(),
        Command::ContainerHost { request } => {
            let code = match run_container_host_command(&request).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!("Container host failed: {:#}", e);
                    1
                }
            };
            // A pending stdin read would otherwise hold up runtime shutdown.
            std::process::exit(i32::from(code));
        }
        Command::Heartbeat {
            parent_pid,
            container,
            interval_secs,
        } => run_heartbeat_command(parent_pid, container, interval_secs).await,
    }
}
