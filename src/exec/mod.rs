//! External process lifecycle.
//!
//! - [`process`] wraps one spawned shell command ([`ManagedProcess`]).
//! - [`pump`] drains a child's stdout/stderr, concurrently or in sequence.
//! - [`decoder`] turns raw output lines into clean text.
//! - [`signal`] holds the PID-level liveness probe and kill primitives.
//! - [`dir_guard`] scopes a change of the process-wide working directory.
//! - [`env`] builds the child environment.

pub mod decoder;
pub mod dir_guard;
pub mod env;
pub mod process;
pub mod pump;
pub mod signal;

pub use process::{ManagedProcess, ProcessSpec, SyncRun};
pub use pump::PumpMode;

/// Output of a managed process that ran to completion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}
