//! PID-level liveness probing and termination.
//!
//! These primitives work from a bare PID so they also apply to processes
//! rehydrated from a snapshot, which have no live handle. On POSIX a launched
//! child leads its own process group (pgid == pid), which is what makes
//! [`kill_tree`] reach its descendants. Windows has no group at spawn time;
//! `taskkill /T` walks the descendant tree instead.
//!
//! A recycled PID cannot be told apart from the original process. Signals
//! sent to a stale entry may reach an unrelated process of the same user.

use crate::error::ProcessError;

/// Whether a process with this PID currently exists.
///
/// A permission error counts as alive: the PID is in use, possibly by
/// another user's process.
pub fn pid_exists(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    imp::pid_exists(pid)
}

/// Ask a single process to exit (SIGTERM on POSIX).
pub fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
    if pid == 0 {
        return Err(ProcessError::AlreadyDead { pid });
    }
    imp::terminate_pid(pid)
}

/// Forcefully kill a process together with its group or descendant tree.
pub fn kill_tree(pid: u32) -> Result<(), ProcessError> {
    if pid == 0 {
        return Err(ProcessError::AlreadyDead { pid });
    }
    imp::kill_tree(pid)
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    use crate::error::ProcessError;

    fn to_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    pub fn pid_exists(pid: u32) -> bool {
        let Some(nix_pid) = to_pid(pid) else {
            return false;
        };
        match kill(nix_pid, None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(Errno::EPERM) => true,
            Err(e) => {
                tracing::warn!(pid, "Unexpected error probing process: {}", e);
                true
            }
        }
    }

    pub fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
        let nix_pid = to_pid(pid).ok_or(ProcessError::AlreadyDead { pid })?;
        kill(nix_pid, Signal::SIGTERM).map_err(|e| map_errno(pid, e))
    }

    pub fn kill_tree(pid: u32) -> Result<(), ProcessError> {
        let pgid = to_pid(pid).ok_or(ProcessError::AlreadyDead { pid })?;
        killpg(pgid, Signal::SIGKILL).map_err(|e| map_errno(pid, e))
    }

    fn map_errno(pid: u32, errno: Errno) -> ProcessError {
        match errno {
            Errno::ESRCH => ProcessError::AlreadyDead { pid },
            other => ProcessError::Signal {
                pid,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::process::{Command, Stdio};

    use crate::error::ProcessError;

    const TASKLIST: &str = r"C:\Windows\system32\tasklist.exe";
    const TASKKILL: &str = r"C:\Windows\system32\taskkill.exe";

    /// taskkill exit code for "process not found".
    const TASKKILL_NOT_FOUND: i32 = 128;

    pub fn pid_exists(pid: u32) -> bool {
        let output = Command::new(TASKLIST)
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(out) => {
                let text = crate::exec::decoder::force_decode(&out.stdout);
                let found = text.contains(&format!("\"{pid}\""));
                // Treat a failed probe as alive rather than dropping a live task.
                found || !out.status.success() || !out.stderr.is_empty()
            }
            Err(e) => {
                tracing::warn!(pid, "Failed to run tasklist: {}", e);
                true
            }
        }
    }

    pub fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
        taskkill(pid, &["/PID"])
    }

    pub fn kill_tree(pid: u32) -> Result<(), ProcessError> {
        taskkill(pid, &["/F", "/T", "/PID"])
    }

    fn taskkill(pid: u32, flags: &[&str]) -> Result<(), ProcessError> {
        let out = Command::new(TASKKILL)
            .args(flags)
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ProcessError::Signal {
                pid,
                message: format!("failed to run taskkill: {e}"),
            })?;
        match out.status.code() {
            Some(0) => Ok(()),
            Some(TASKKILL_NOT_FOUND) => Err(ProcessError::AlreadyDead { pid }),
            _ => Err(ProcessError::Signal {
                pid,
                message: crate::exec::decoder::force_decode(&out.stderr).trim().to_string(),
            }),
        }
    }
}
