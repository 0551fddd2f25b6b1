//! Host-facing facade over the registry and process layer.
//!
//! The host thread never touches process I/O. [`TaskRunner::start`] moves
//! the launch, the stream pumping and the final wait onto a blocking worker
//! thread and hands every output line back through an unbounded channel,
//! which the host drains on its own schedule.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::error::ProcessError;
use crate::exec::{ExecResult, ManagedProcess, ProcessSpec};
use crate::registry::ProcessRegistry;

/// Something a running task reports back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { pid: u32 },
    /// One decoded, `\n`-terminated output line from stdout or stderr.
    Line(String),
}

/// A task executing on a worker thread.
pub struct RunningTask {
    events: UnboundedReceiver<TaskEvent>,
    handle: JoinHandle<Result<ExecResult, ProcessError>>,
}

impl RunningTask {
    /// Next event, or `None` once the worker is done sending.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Forward every output line to `on_line` until the task ends, then wait
    /// for the worker.
    ///
    /// `interrupt` is called to arm an interrupt future (e.g. Ctrl-C). Each
    /// time one resolves the task's process tree is killed, or the kill is
    /// queued until the task reports its pid. A kill that fails is logged and
    /// the next interrupt retries it. Draining always continues to the end.
    pub async fn drive<I, Fut, F>(
        mut self,
        runner: &TaskRunner,
        mut interrupt: I,
        mut on_line: F,
    ) -> anyhow::Result<TaskOutcome>
    where
        I: FnMut() -> Fut,
        Fut: Future,
        F: FnMut(&str),
    {
        let mut armed = Box::pin(interrupt());
        let mut pid = None;
        let mut kill_requested = false;
        let mut killed = false;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(TaskEvent::Started { pid: started }) => {
                        tracing::debug!(pid = started, "task started");
                        pid = Some(started);
                        if kill_requested {
                            killed = runner.kill_logged(started);
                        }
                    }
                    Some(TaskEvent::Line(line)) => on_line(&line),
                    None => break,
                },
                _ = &mut armed, if !killed => {
                    kill_requested = true;
                    match pid {
                        Some(pid) => killed = runner.kill_logged(pid),
                        None => tracing::debug!("interrupt before start, kill queued"),
                    }
                    armed = Box::pin(interrupt());
                }
            }
        }

        let result = self.finish().await?;
        Ok(TaskOutcome {
            result,
            interrupted: kill_requested,
        })
    }

    /// Wait for the worker and return the collected output.
    ///
    /// Events not yet received are discarded.
    pub async fn finish(self) -> anyhow::Result<ExecResult> {
        let result = self.handle.await.context("task worker panicked")?;
        Ok(result?)
    }
}

/// Result of [`RunningTask::drive`].
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub result: ExecResult,
    /// An interrupt fired while the task was running.
    pub interrupted: bool,
}

/// Runs commands as managed processes and manages the registry.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: ProcessRegistry,
    config: Arc<AppConfig>,
}

impl TaskRunner {
    /// Build a runner whose registry follows `config.persist`.
    pub fn new(config: AppConfig) -> Self {
        let registry = if config.persist {
            ProcessRegistry::open(&config.snapshot_path)
        } else {
            ProcessRegistry::in_memory()
        };
        Self::with_registry(registry, config)
    }

    pub fn with_registry(registry: ProcessRegistry, config: AppConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Launch `command` in `working_dir` on a worker thread.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self, command: String, working_dir: PathBuf) -> RunningTask {
        let (tx, events) = mpsc::unbounded_channel();
        let registry = self.registry.clone();
        let spec = ProcessSpec::from_config(working_dir, &self.config.process);

        let handle = tokio::task::spawn_blocking(move || {
            let process = ManagedProcess::launch(&spec, &command, &registry)?;
            let _ = tx.send(TaskEvent::Started { pid: process.pid() });
            process.communicate(move |line: &str| {
                let _ = tx.send(TaskEvent::Line(line.to_string()));
            })
        });

        RunningTask { events, handle }
    }

    /// Reconcile, then list `(command, working directory, pid)` for each
    /// process still running.
    pub fn list_running(&self) -> Vec<(String, PathBuf, u32)> {
        self.registry.refresh();
        self.registry
            .get()
            .iter()
            .map(|p| p.to_display_tuple())
            .collect()
    }

    /// Kill one tracked process tree. Returns false if `pid` is not tracked.
    pub fn kill(&self, pid: u32) -> Result<bool, ProcessError> {
        match self.registry.find(pid) {
            Some(process) => process.kill().map(|()| true),
            None => Ok(false),
        }
    }

    /// [`Self::kill`] with failures logged. Returns whether the tree is gone
    /// or was never tracked.
    fn kill_logged(&self, pid: u32) -> bool {
        match self.kill(pid) {
            Ok(true) => {
                tracing::info!(pid, "task killed");
                true
            }
            Ok(false) => true,
            Err(e) => {
                tracing::warn!(pid, "Failed to kill task: {}", e);
                false
            }
        }
    }

    /// Reconcile, then kill everything still tracked. Returns how many
    /// processes were killed.
    pub fn kill_all(&self) -> usize {
        self.registry.refresh();
        if self.registry.is_empty() {
            return 0;
        }
        let count = self.registry.len();
        self.registry.kill_all();
        count
    }
}
