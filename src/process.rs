//! Process primitives: spawning, awaiting termination, and tree kills.

use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::process::{Child, Command};

use crate::error::{SpawnError, WaitError};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    /// Status for a process that exited with `code`.
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Terminating signal, if the process was killed by one (Unix only).
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Resolves exactly once, when the process has exited. Clones observe the same outcome.
pub type UntilTerminated = Shared<BoxFuture<'static, Result<ExitStatus, WaitError>>>;

/// Spawn `command`.
///
/// Returns once the OS has started the executable; a missing or
/// non-executable program surfaces here as a [`SpawnError`].
pub fn spawn(command: &mut Command) -> Result<Child, SpawnError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    command.spawn().map_err(|source| {
        tracing::error!("Failed to spawn {}: {}", program, source);
        SpawnError { program, source }
    })
}

/// Take ownership of `child` and report its termination.
///
/// The child is reaped on a background task even if the returned future is
/// never polled, so [`has_terminated`] is accurate without a waiter. A
/// non-zero exit is a normal outcome, not an error.
pub fn until_terminated(mut child: Child) -> UntilTerminated {
    let pid = child.id();
    let stopped = async move {
        let outcome = child
            .wait()
            .await
            .map(ExitStatus::from)
            .map_err(|e| WaitError::new(e.to_string()));
        if let Ok(status) = &outcome {
            tracing::debug!("Process {:?} exited with {}", pid, status);
        }
        outcome
    }
    .boxed()
    .shared();

    tokio::spawn(stopped.clone());
    stopped
}

/// How long a process group left behind by its leader gets to exit on
/// SIGTERM before it is sent SIGKILL.
pub const GROUP_KILL_GRACE: Duration = Duration::from_secs(10);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Like [`until_terminated`], for a child that leads its own process group
/// (see [`isolate_process_group`]).
///
/// Resolves with the leader's status, but only once every process in the
/// group has exited. Members still running after the leader is reaped are
/// sent SIGTERM, then SIGKILL after [`GROUP_KILL_GRACE`].
pub fn until_group_terminated(child: Child) -> UntilTerminated {
    let pgid = child.id();
    let leader = until_terminated(child);
    let stopped = async move {
        let status = leader.await?;
        #[cfg(unix)]
        {
            if let Some(pgid) = pgid {
                drain_group(pgid).await;
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
        Ok(status)
    }
    .boxed()
    .shared();

    tokio::spawn(stopped.clone());
    stopped
}

#[cfg(unix)]
async fn group_still_running(pgid: u32) -> bool {
    tokio::task::spawn_blocking(move || group_has_members(pgid))
        .await
        .unwrap_or(true)
}

#[cfg(unix)]
async fn drain_group(pgid: u32) {
    if !group_still_running(pgid).await {
        return;
    }
    tracing::debug!("Process group {} outlived its leader, terminating it", pgid);
    if let Err(e) = signal_group(pgid, libc::SIGTERM) {
        tracing::warn!("Failed to signal process group {}: {}", pgid, e);
    }

    let started = tokio::time::Instant::now();
    let mut escalated = false;
    while group_still_running(pgid).await {
        let elapsed = started.elapsed();
        if !escalated && elapsed >= GROUP_KILL_GRACE {
            tracing::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pgid);
            if let Err(e) = signal_group(pgid, libc::SIGKILL) {
                tracing::warn!("Failed to signal process group {}: {}", pgid, e);
            }
            escalated = true;
        } else if elapsed >= GROUP_KILL_GRACE * 2 {
            tracing::error!("Process group {} survived SIGKILL, giving up", pgid);
            return;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
    tracing::debug!("Process group {} has exited", pgid);
}

/// Whether any process in group `pgid` is still running.
///
/// On Linux zombies don't count: an orphan that has exited may sit
/// unreaped under a parent we don't control.
#[cfg(unix)]
pub fn group_has_members(pgid: u32) -> bool {
    if unsafe { libc::killpg(pgid as libc::pid_t, 0) } != 0 {
        return std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    }
    #[cfg(target_os = "linux")]
    {
        live_group_member_on_proc(pgid).unwrap_or(true)
    }
    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

#[cfg(target_os = "linux")]
fn live_group_member_on_proc(pgid: u32) -> Option<bool> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let found = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .any(|stat| {
            // Fields after the parenthesised command: state ppid pgrp ...
            let Some((_, rest)) = stat.rsplit_once(')') else {
                return false;
            };
            let mut fields = rest.split_whitespace();
            let state = fields.next();
            let pgrp = fields.nth(1).and_then(|f| f.parse::<u32>().ok());
            pgrp == Some(pgid) && state != Some("Z") && state != Some("X")
        });
    Some(found)
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::killpg(pgid as libc::pid_t, signal) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// Whether an [`UntilTerminated`] future has already resolved.
pub fn has_terminated(stopped: &UntilTerminated) -> bool {
    stopped.peek().is_some()
}

/// Put the child in its own process group so the whole tree can be signalled.
pub fn isolate_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    command
}

/// Terminate `pid` and every process in its group.
///
/// A process that is already gone is not an error.
pub fn kill_tree(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM)
    }
    #[cfg(windows)]
    {
        // taskkill exits non-zero when the process is already gone.
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        Ok(())
    }
}

/// Check whether `pid` names a live process.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(windows)]
    {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}
