//! Container strategy against a real Docker daemon and real engine images.
//!
//! Needs Docker and network access for the first image pull:
//! `cargo test --features integration --test container_lifecycle`

#![cfg(unix)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{InspectContainerOptions, KillContainerOptions, ListContainersOptions};
use tempfile::TempDir;

use search_sandbox::docker::connect_docker;
use search_sandbox::engine::EngineKind;
use search_sandbox::error::LaunchError;
use search_sandbox::installer::ContainerOnly;
use search_sandbox::launcher::{
    ContainerHandle, ContainerLauncher, LaunchHandle, LaunchOptions, LaunchRequest, Launcher,
    LauncherConfig, Strategy,
};
use search_sandbox::probe::{PortProbe, ProbeProtocol};
use search_sandbox::process::is_process_alive;
use search_sandbox::watchdog::PORT_LABEL;
use search_sandbox::workspace::TempWorkspace;

const STARTUP_LIMIT: Duration = Duration::from_secs(300);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Two heartbeat intervals plus the runtime's default stop grace period.
const HEARTBEAT_STOP_LIMIT: Duration = Duration::from_secs(2 + 10 + 5);

fn launcher(temp_root: &TempDir) -> Launcher {
    let config = LauncherConfig {
        temp_root: temp_root.path().to_path_buf(),
        host_program: PathBuf::from(env!("CARGO_BIN_EXE_search-sandbox")),
        heartbeat_interval: HEARTBEAT_INTERVAL,
        ..Default::default()
    };
    Launcher::new(config, Arc::new(ContainerOnly))
}

async fn container_exists(id: &str) -> bool {
    let docker = connect_docker().await.unwrap();
    docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
        .is_ok()
}

async fn launch_and_stop(kind: EngineKind, port: u16) {
    let temp_root = TempDir::new().unwrap();
    let engine = tokio::time::timeout(
        STARTUP_LIMIT,
        launcher(&temp_root).launch(LaunchOptions {
            kind,
            port: Some(port),
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(engine.strategy(), Strategy::Container);
    assert_eq!(engine.url(), format!("http://localhost:{port}"));

    let body: serde_json::Value = reqwest::get(engine.url())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["version"]["number"], kind.version());

    let id = engine.container_id().unwrap();
    engine.stop().await.unwrap();

    let probe = PortProbe::new(port, ProbeProtocol::Tcp, Duration::from_millis(100));
    assert!(!probe.is_ready().await, "port {port} still open after stop");
    assert!(!container_exists(&id).await, "container {id} left behind");
    assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn elasticsearch_container_round_trip() {
    launch_and_stop(EngineKind::Elasticsearch, 19200).await;
}

#[tokio::test]
async fn opensearch_container_round_trip() {
    launch_and_stop(EngineKind::OpenSearch, 19201).await;
}

#[tokio::test]
async fn container_killed_externally_is_observed() {
    let temp_root = TempDir::new().unwrap();
    let engine = tokio::time::timeout(
        STARTUP_LIMIT,
        launcher(&temp_root).launch(LaunchOptions {
            kind: EngineKind::Elasticsearch,
            port: Some(19202),
        }),
    )
    .await
    .unwrap()
    .unwrap();

    let id = engine.container_id().unwrap();
    let docker = connect_docker().await.unwrap();
    docker
        .kill_container(&id, None::<KillContainerOptions<String>>)
        .await
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(60), engine.wait_until_stopped())
        .await
        .unwrap()
        .unwrap();
    assert!(!status.success());

    // Already gone: stop only removes the workspace.
    engine.stop().await.unwrap();
    assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn container_killed_during_startup_fails_launch() {
    const PORT: u16 = 19203;
    let temp_root = TempDir::new().unwrap();

    // Kill the container as soon as it shows up, long before the engine listens.
    let killer = tokio::spawn(async move {
        let docker = connect_docker().await.unwrap();
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![format!("{PORT_LABEL}={PORT}")])]),
            ..Default::default()
        };
        loop {
            let found = docker.list_containers(Some(options.clone())).await.unwrap();
            // Created but not yet started answers 409; keep trying until it runs.
            if let Some(id) = found.into_iter().find_map(|c| c.id)
                && docker
                    .kill_container(&id, None::<KillContainerOptions<String>>)
                    .await
                    .is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    let err = tokio::time::timeout(
        STARTUP_LIMIT,
        launcher(&temp_root).launch(LaunchOptions {
            kind: EngineKind::OpenSearch,
            port: Some(PORT),
        }),
    )
    .await
    .unwrap()
    .unwrap_err();
    killer.await.unwrap();

    assert!(matches!(
        err,
        LaunchError::StartupFailed {
            kind: EngineKind::OpenSearch,
            strategy: Strategy::Container,
            ..
        }
    ));
    assert!(err.exit_status().is_some());
    assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
}

/// Start a host directly so the test can signal it, and wait until the
/// container is running.
async fn start_host(workspace: &TempWorkspace, port: u16) -> ContainerHandle {
    let request = LaunchRequest::new(EngineKind::Elasticsearch, port, workspace);
    let handle = ContainerLauncher::new(env!("CARGO_BIN_EXE_search-sandbox"))
        .with_heartbeat(true, HEARTBEAT_INTERVAL)
        .launch(&request)
        .unwrap();

    let started = tokio::time::timeout(STARTUP_LIMIT, async {
        while handle.container_id().is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    assert!(started.is_ok(), "container never started");
    handle
}

/// Exited, or a zombie nobody has reaped yet.
fn has_exited(pid: u32) -> bool {
    if !is_process_alive(pid) {
        return true;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

async fn eventually(limit: Duration, mut check: impl AsyncFnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    check().await
}

#[tokio::test]
async fn heartbeat_stops_container_when_host_is_killed() {
    let temp_root = TempDir::new().unwrap();
    let workspace = TempWorkspace::create(temp_root.path()).await.unwrap();
    let handle = start_host(&workspace, 19204).await;

    let id = handle.container_id().unwrap();
    let host_pid = handle.host_pid().unwrap();
    let heartbeat_pid = handle.heartbeat_pid().expect("heartbeat was not started");

    // SIGKILL: the host gets no chance to clean up.
    assert_eq!(unsafe { libc::kill(host_pid as libc::pid_t, libc::SIGKILL) }, 0);
    let status = tokio::time::timeout(Duration::from_secs(10), handle.wait_until_stopped())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.signal(), Some(libc::SIGKILL));

    assert!(
        eventually(HEARTBEAT_STOP_LIMIT, async || !container_exists(&id).await).await,
        "container {id} outlived its host"
    );
    assert!(
        eventually(Duration::from_secs(5), async || has_exited(heartbeat_pid)).await,
        "heartbeat {heartbeat_pid} kept running after stopping the container"
    );

    workspace.remove().await.unwrap();
}

#[tokio::test]
async fn host_terminated_by_signal_kills_container() {
    let temp_root = TempDir::new().unwrap();
    let workspace = TempWorkspace::create(temp_root.path()).await.unwrap();
    let handle = start_host(&workspace, 19205).await;

    let id = handle.container_id().unwrap();
    let host_pid = handle.host_pid().unwrap();

    assert_eq!(unsafe { libc::kill(host_pid as libc::pid_t, libc::SIGTERM) }, 0);
    let status = tokio::time::timeout(Duration::from_secs(30), handle.wait_until_stopped())
        .await
        .unwrap()
        .unwrap();
    // The host exits with the container's status, not by the signal.
    assert_eq!(status.signal(), None);
    assert!(!status.success());

    assert!(
        eventually(Duration::from_secs(10), async || !container_exists(&id).await).await,
        "container {id} survived SIGTERM to its host"
    );

    workspace.remove().await.unwrap();
}
