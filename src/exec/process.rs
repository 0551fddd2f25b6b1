//! One shell subprocess under management.
//!
//! A [`ManagedProcess`] is created by [`ManagedProcess::launch`], which spawns
//! `<shell> <command>` and registers the result with a [`ProcessRegistry`].
//! The process unregisters itself once [`ManagedProcess::communicate`] has
//! reaped it, or when it is terminated or killed.
//!
//! Entries rehydrated from a snapshot have a PID but no handle. For those,
//! liveness and termination go through the PID-based primitives in
//! [`super::signal`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use crate::config::ProcessConfig;
use crate::error::ProcessError;
use crate::registry::{ProcessRecord, ProcessRegistry, WeakRegistry};

use super::decoder::force_decode;
use super::dir_guard::DirGuard;
use super::env::build_environment;
use super::pump::{PumpMode, pump_pipes};
use super::signal;
use super::ExecResult;

/// Exit code shells use for "command not found".
pub const COMMAND_NOT_FOUND: i32 = 127;

/// Everything a launch needs besides the command text.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub working_dir: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub nonblocking: bool,
    /// Change the process-wide working directory around the spawn call
    /// instead of handing `working_dir` to the spawn.
    pub chdir_on_spawn: bool,
}

impl ProcessSpec {
    /// Spec with the inherited OS environment and non-blocking pumping.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            environment: build_environment(None),
            nonblocking: true,
            chdir_on_spawn: false,
        }
    }

    pub fn from_config(working_dir: impl Into<PathBuf>, config: &ProcessConfig) -> Self {
        Self {
            working_dir: working_dir.into(),
            environment: build_environment(config.path.as_deref()),
            nonblocking: config.nonblocking,
            chdir_on_spawn: config.chdir_on_spawn,
        }
    }

    pub fn nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    pub fn chdir_on_spawn(mut self, chdir: bool) -> Self {
        self.chdir_on_spawn = chdir;
        self
    }

    /// Run `command` to completion and decode both streams.
    ///
    /// Meant for short probes of the task runner's own CLI, not for tasks.
    /// The child is never registered.
    pub fn run_synchronously(&self, command: &str) -> Result<SyncRun, ProcessError> {
        let mut cmd = self.shell_command(command);
        cmd.stdin(Stdio::null());

        let output = self
            .spawn_scoped(|| cmd.output())
            .map_err(|source| self.spawn_error(command, source))?;

        let stdout = force_decode(&output.stdout);
        let stderr = force_decode(&output.stderr);
        let exit_code = output.status.code();
        let failed = exit_code == Some(COMMAND_NOT_FOUND) || !stderr.is_empty();

        tracing::debug!(command, exit_code, failed, "synchronous run finished");

        Ok(SyncRun {
            stdout,
            stderr,
            exit_code,
            failed,
        })
    }

    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = shell(command);
        cmd.env_clear().envs(&self.environment);
        if !self.chdir_on_spawn {
            cmd.current_dir(&self.working_dir);
        }
        cmd
    }

    /// Run the spawn closure, inside a scoped directory change if requested.
    fn spawn_scoped<T>(
        &self,
        spawn: impl FnOnce() -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        if self.chdir_on_spawn {
            let _guard = DirGuard::enter(&self.working_dir)?;
            spawn()
        } else {
            spawn()
        }
    }

    fn spawn_error(&self, command: &str, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            command: command.to_string(),
            cwd: self.working_dir.clone(),
            source,
        }
    }
}

/// Result of [`ProcessSpec::run_synchronously`].
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Exit code 127 or anything written to stderr.
    pub failed: bool,
}

/// What this session knows about the OS process behind an entry.
#[derive(Debug)]
enum Handle {
    /// Launched here and not yet being waited on.
    Owned(Child),
    /// Handle moved out by `communicate` for the final wait.
    Waiting,
    Exited(ExitStatus),
    /// Rehydrated from a snapshot: PID only.
    Detached,
}

/// Wrapper around one spawned shell process.
#[derive(Debug)]
pub struct ManagedProcess {
    working_dir: PathBuf,
    command: String,
    pid: u32,
    nonblocking: bool,
    environment: BTreeMap<String, String>,
    handle: Mutex<Handle>,
    registry: WeakRegistry,
}

impl ManagedProcess {
    /// Spawn `command` through the OS shell and register it.
    ///
    /// On POSIX the child leads a new process group so [`Self::kill`] can
    /// reach everything it starts. stdout and stderr are piped and must be
    /// drained with [`Self::communicate`].
    pub fn launch(
        spec: &ProcessSpec,
        command: &str,
        registry: &ProcessRegistry,
    ) -> Result<Arc<Self>, ProcessError> {
        let mut cmd = spec.shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = spec
            .spawn_scoped(|| cmd.spawn())
            .map_err(|source| spec.spawn_error(command, source))?;
        let pid = child.id();

        let process = Arc::new(Self {
            working_dir: spec.working_dir.clone(),
            command: command.trim_end().to_string(),
            pid,
            nonblocking: spec.nonblocking,
            environment: spec.environment.clone(),
            handle: Mutex::new(Handle::Owned(child)),
            registry: registry.downgrade(),
        });

        tracing::info!(
            pid,
            command = %process.command,
            cwd = %process.working_dir.display(),
            "launched process"
        );

        registry.add(Arc::clone(&process));
        Ok(process)
    }

    /// Rebuild a handle-less entry from a persisted record.
    pub(crate) fn from_record(record: ProcessRecord, registry: WeakRegistry) -> Self {
        Self {
            working_dir: record.working_dir,
            command: record.command,
            pid: record.pid,
            nonblocking: true,
            environment: BTreeMap::new(),
            handle: Mutex::new(Handle::Detached),
            registry,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Whether this entry was launched in this session (as opposed to
    /// rehydrated from a snapshot).
    pub fn has_handle(&self) -> bool {
        !matches!(*self.handle.lock().unwrap(), Handle::Detached)
    }

    /// Pump stdout and stderr to EOF, wait for exit, then unregister.
    ///
    /// `on_line` receives each decoded line as it arrives, from the pump
    /// thread that read it.
    pub fn communicate<F>(&self, on_line: F) -> Result<ExecResult, ProcessError>
    where
        F: Fn(&str) + Sync,
    {
        let (stdout, stderr) = {
            let mut handle = self.handle.lock().unwrap();
            let Handle::Owned(child) = &mut *handle else {
                return Err(ProcessError::NotLaunched { pid: self.pid });
            };
            let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe {
                pid: self.pid,
                stream: "stdout",
            })?;
            let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe {
                pid: self.pid,
                stream: "stderr",
            })?;
            (stdout, stderr)
        };

        let mode = PumpMode::from_nonblocking(self.nonblocking);
        let (out_text, err_text) = pump_pipes(stdout, stderr, mode, &on_line);

        let waited = self.wait();
        self.unregister();

        let status = waited?;
        tracing::info!(pid = self.pid, exit_code = status.code(), "process exited");

        Ok(ExecResult {
            stdout: out_text,
            stderr: err_text,
            exit_code: status.code(),
        })
    }

    /// Block until the process exits, keeping the handle lock free meanwhile.
    fn wait(&self) -> Result<ExitStatus, ProcessError> {
        let mut child = {
            let mut handle = self.handle.lock().unwrap();
            match std::mem::replace(&mut *handle, Handle::Waiting) {
                Handle::Owned(child) => child,
                Handle::Exited(status) => {
                    *handle = Handle::Exited(status);
                    return Ok(status);
                }
                other => {
                    *handle = other;
                    return Err(ProcessError::NotLaunched { pid: self.pid });
                }
            }
        };

        let result = child.wait();
        let mut handle = self.handle.lock().unwrap();
        match result {
            Ok(status) => {
                *handle = Handle::Exited(status);
                Ok(status)
            }
            Err(source) => {
                *handle = Handle::Owned(child);
                Err(ProcessError::Wait {
                    pid: self.pid,
                    source,
                })
            }
        }
    }

    /// Whether the OS process has not exited yet.
    pub fn is_alive(&self) -> bool {
        let mut handle = self.handle.lock().unwrap();
        match &mut *handle {
            Handle::Owned(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    *handle = Handle::Exited(status);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::debug!(pid = self.pid, "try_wait failed, probing pid: {}", e);
                    signal::pid_exists(self.pid)
                }
            },
            Handle::Exited(_) => false,
            Handle::Waiting | Handle::Detached => signal::pid_exists(self.pid),
        }
    }

    /// Exit status, once the process has been reaped in this session.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match *self.handle.lock().unwrap() {
            Handle::Exited(status) => Some(status),
            _ => None,
        }
    }

    /// Ask the process (not its group) to exit, then unregister.
    pub fn terminate(&self) -> Result<(), ProcessError> {
        let result = if self.is_alive() {
            tracing::info!(pid = self.pid, "terminating process");
            self.send_terminate()
        } else {
            Ok(())
        };
        self.unregister();
        swallow_already_dead(result)
    }

    #[cfg(unix)]
    fn send_terminate(&self) -> Result<(), ProcessError> {
        signal::terminate_pid(self.pid)
    }

    #[cfg(windows)]
    fn send_terminate(&self) -> Result<(), ProcessError> {
        let mut handle = self.handle.lock().unwrap();
        if let Handle::Owned(child) = &mut *handle {
            return child.kill().map_err(|e| ProcessError::Signal {
                pid: self.pid,
                message: e.to_string(),
            });
        }
        drop(handle);
        signal::terminate_pid(self.pid)
    }

    /// Forcefully kill the process and its group or descendant tree, then
    /// unregister. A process that is already gone is not an error.
    pub fn kill(&self) -> Result<(), ProcessError> {
        tracing::info!(pid = self.pid, command = %self.command, "killing process tree");
        let result = signal::kill_tree(self.pid);
        self.unregister();
        swallow_already_dead(result)
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
    }

    /// `(command, working directory, pid)` for listings.
    pub fn to_display_tuple(&self) -> (String, PathBuf, u32) {
        (self.command.clone(), self.working_dir.clone(), self.pid)
    }

    pub fn to_record(&self) -> ProcessRecord {
        ProcessRecord {
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            pid: self.pid,
        }
    }
}

fn swallow_already_dead(result: Result<(), ProcessError>) -> Result<(), ProcessError> {
    match result {
        Err(ProcessError::AlreadyDead { pid }) => {
            tracing::debug!(pid, "process already exited");
            Ok(())
        }
        other => other,
    }
}

/// `sh -c <command>` on POSIX, `cmd /C <command>` on Windows.
fn shell(command: &str) -> Command {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").raw_arg(command);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}
