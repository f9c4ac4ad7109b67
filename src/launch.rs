//! Launching and owning a Companions host executable.
//!
//! The supervisor:
//! 1. Deletes any stale `portnum.dat` next to the executable.
//! 2. Spawns the executable with `kill_on_drop(true)` as a safety net.
//! 3. Polls at `poll_interval` until the port record appears and parses,
//!    optionally giving up after `max_wait` with `AppError::LaunchTimeout`.
//! 4. Reads the port, verifying the pid against the child when asked.
//!
//! Only hosts spawned here are ever terminated.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::LaunchConfig;
use crate::discovery::port_file::{read_port, PORTNUM_FILE};
use crate::{AppError, Result};

/// Time the host gets to exit after the terminate signal before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Identity of a host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process id.
    pub pid: u32,
    /// Executable that was started.
    pub executable_path: PathBuf,
}

/// A host process spawned and owned by this agent.
#[derive(Debug)]
pub struct SupervisedHost {
    handle: ProcessHandle,
    child: Child,
    terminated: bool,
}

impl SupervisedHost {
    /// Identity of the owned process.
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Whether [`terminate`](Self::terminate) has completed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Ask the host to exit, killing it if it ignores the request for
    /// [`TERMINATE_GRACE`]. Calling this again, or on a host that already
    /// exited, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the signal cannot be delivered to a
    /// process that is still running.
    pub async fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        let pid = self.handle.pid;

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(pid, %status, "companions already exited");
            self.terminated = true;
            return Ok(());
        }

        info!(pid, "shutting down companions");
        self.send_terminate()?;

        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "companions exited"),
            Ok(Err(err)) => warn!(pid, %err, "error waiting for companions to exit"),
            Err(_) => {
                warn!(pid, "companions did not exit within grace period, forcing kill");
                if let Err(err) = self.child.kill().await {
                    warn!(pid, %err, "failed to force-kill companions");
                }
            }
        }

        self.terminated = true;
        Ok(())
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(self.handle.pid)
            .map_err(|_| AppError::Launch(format!("pid {} out of range", self.handle.pid)))?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::Launch(format!(
                "failed to signal pid {}: {err}",
                self.handle.pid
            ))),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|err| AppError::Launch(format!("failed to terminate pid {}: {err}", self.handle.pid)))
    }
}

/// Spawn the configured host and wait for the port it publishes.
///
/// # Errors
///
/// - `AppError::Launch`: stale record cannot be removed, spawn fails, or the
///   child exits before publishing its port.
/// - `AppError::LaunchTimeout`: `max_wait` elapsed first.
/// - `AppError::PortVerificationFailed`: `verify` is set and the record pid
///   is not the child's.
///
/// The child is terminated before any error after spawning is returned.
pub async fn launch_and_resolve(
    launch: &LaunchConfig,
    verify: bool,
) -> Result<(SupervisedHost, u16)> {
    let port_path = launch.exe_dir.join(PORTNUM_FILE);
    let exe_path = launch.exe_dir.join(&launch.exe_name);

    match tokio::fs::remove_file(&port_path).await {
        Ok(()) => debug!(path = %port_path.display(), "removed stale port file"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(AppError::Launch(format!(
                "failed to remove stale {}: {err}",
                port_path.display()
            )))
        }
    }

    let child = Command::new(&exe_path)
        .current_dir(&launch.exe_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Launch(format!("failed to spawn {}: {err}", exe_path.display()))
        })?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Launch("companions exited immediately".into()))?;
    let mut host = SupervisedHost {
        handle: ProcessHandle {
            pid,
            executable_path: exe_path,
        },
        child,
        terminated: false,
    };
    info!(pid, exe = %host.handle.executable_path.display(), "launched companions");

    match wait_for_port(&mut host, launch, &port_path, verify).await {
        Ok(port) => Ok((host, port)),
        Err(err) => {
            if let Err(term_err) = host.terminate().await {
                warn!(%term_err, "failed to terminate companions after launch error");
            }
            Err(err)
        }
    }
}

async fn wait_for_port(
    host: &mut SupervisedHost,
    launch: &LaunchConfig,
    port_path: &std::path::Path,
    verify: bool,
) -> Result<u16> {
    let started = Instant::now();
    loop {
        if tokio::fs::try_exists(port_path).await.unwrap_or(false) {
            // A record caught mid-write reads as malformed; keep polling.
            if let Some(port) = read_port(port_path, host.handle.pid, verify)? {
                info!(pid = host.handle.pid, port, "companions published port");
                return Ok(port);
            }
        }

        if let Ok(Some(status)) = host.child.try_wait() {
            host.terminated = true;
            return Err(AppError::Launch(format!(
                "companions exited before publishing its port: {status}"
            )));
        }

        if let Some(max_wait) = launch.max_wait() {
            if started.elapsed() >= max_wait {
                return Err(AppError::LaunchTimeout(format!(
                    "{} did not appear within {max_wait:?}",
                    port_path.display()
                )));
            }
        }

        tokio::time::sleep(launch.poll_interval()).await;
    }
}
