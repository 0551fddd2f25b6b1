//! Registry of the processes this session believes are running.
//!
//! [`ProcessRegistry`] is cheap to clone; clones share one list. Membership
//! means "launched and not yet reaped or removed", not "confirmed alive":
//! a process that dies outside our control stays listed until
//! [`ProcessRegistry::refresh`] reconciles the list against the OS.
//!
//! **Concurrency model:** one `Mutex` guards the in-memory list, the last
//! command and the snapshot handle together, so every mutation and its
//! snapshot write happen as one critical section. Process I/O and signals
//! never run under this lock; [`ProcessRegistry::each`] iterates a copy.

pub mod snapshot;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use crate::exec::ManagedProcess;

pub use snapshot::{FileSnapshot, NullSnapshot, ProcessRecord, Snapshot};

#[derive(Debug)]
struct RegistryState {
    /// Launch order.
    procs: Vec<Arc<ManagedProcess>>,
    last_command: Option<String>,
    snapshot: Box<dyn Snapshot>,
}

#[derive(Debug)]
struct RegistryInner {
    state: Mutex<RegistryState>,
}

/// Shared collection of live [`ManagedProcess`] entries.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle held by each process so it can unregister itself
/// without keeping the registry alive.
#[derive(Debug, Clone, Default)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<ProcessRegistry> {
        self.inner.upgrade().map(|inner| ProcessRegistry { inner })
    }
}

impl ProcessRegistry {
    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self::with_snapshot(Box::new(NullSnapshot))
    }

    /// Empty registry mirrored to `snapshot`. Existing snapshot content is
    /// not loaded; see [`Self::rehydrate`].
    pub fn with_snapshot(snapshot: Box<dyn Snapshot>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    procs: Vec::new(),
                    last_command: None,
                    snapshot,
                }),
            }),
        }
    }

    /// Registry persisted at `path`, rehydrated from whatever it holds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let registry = Self::with_snapshot(Box::new(FileSnapshot::new(path)));
        registry.rehydrate();
        registry
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Load handle-less entries for every snapshot record not already
    /// present. Returns how many entries were added.
    ///
    /// Snapshot errors are logged and leave the registry unchanged.
    pub fn rehydrate(&self) -> usize {
        let weak = self.downgrade();
        let mut state = self.inner.state.lock().unwrap();
        let records = match state.snapshot.read() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Failed to read process snapshot: {}", e);
                return 0;
            }
        };

        let mut added = 0;
        for record in records {
            if state.procs.iter().any(|p| p.pid() == record.pid) {
                continue;
            }
            state.last_command = Some(record.command.clone());
            state
                .procs
                .push(Arc::new(ManagedProcess::from_record(record, weak.clone())));
            added += 1;
        }

        tracing::debug!(added, "rehydrated processes from snapshot");
        added
    }

    /// Track `process`. Adding the same PID twice is a no-op.
    pub fn add(&self, process: Arc<ManagedProcess>) {
        let record = process.to_record();
        let mut state = self.inner.state.lock().unwrap();

        state.last_command = Some(record.command.clone());
        if !state.procs.iter().any(|p| p.pid() == record.pid) {
            tracing::debug!(pid = record.pid, "registered process");
            state.procs.push(process);
        }

        let result = state.snapshot.update(&mut |mut records| {
            if !records.iter().any(|r| r.pid == record.pid) {
                records.push(record.clone());
            }
            records
        });
        if let Err(e) = result {
            tracing::warn!("Failed to persist process {}: {}", record.pid, e);
        }
    }

    /// Stop tracking `process`. Removing an absent process is a no-op.
    pub fn remove(&self, process: &ManagedProcess) {
        let pid = process.pid();
        let mut state = self.inner.state.lock().unwrap();

        let before = state.procs.len();
        state.procs.retain(|p| p.pid() != pid);
        if state.procs.len() != before {
            tracing::debug!(pid, "unregistered process");
        }

        let result = state.snapshot.update(&mut |records| {
            records.into_iter().filter(|r| r.pid != pid).collect()
        });
        if let Err(e) = result {
            tracing::warn!("Failed to remove process {} from snapshot: {}", pid, e);
        }
    }

    /// Call `f` for each entry of a copy of the current list, so `f` may
    /// add, remove or kill entries.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<ManagedProcess>),
    {
        for process in self.get() {
            f(&process);
        }
    }

    /// Drop every entry whose process has exited. Returns the PIDs removed.
    pub fn refresh(&self) -> Vec<u32> {
        let mut removed = Vec::new();
        self.each(|process| {
            if !process.is_alive() {
                self.remove(process);
                removed.push(process.pid());
            }
        });
        if !removed.is_empty() {
            tracing::debug!(?removed, "pruned exited processes");
        }
        removed
    }

    /// Kill every tracked process tree, then clear the list and snapshot.
    pub fn kill_all(&self) {
        self.each(|process| {
            if let Err(e) = process.kill() {
                tracing::warn!(pid = process.pid(), "Failed to kill process: {}", e);
            }
        });
        self.clear();
    }

    /// Forget every entry without signalling anything.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.procs.clear();
        if let Err(e) = state.snapshot.write(&[]) {
            tracing::warn!("Failed to clear process snapshot: {}", e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().unwrap().procs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().procs.len()
    }

    /// Copy of the current entries in launch order.
    pub fn get(&self) -> Vec<Arc<ManagedProcess>> {
        self.inner.state.lock().unwrap().procs.clone()
    }

    pub fn find(&self, pid: u32) -> Option<Arc<ManagedProcess>> {
        self.inner
            .state
            .lock()
            .unwrap()
            .procs
            .iter()
            .find(|p| p.pid() == pid)
            .cloned()
    }

    /// Most recently launched (or rehydrated) command.
    pub fn last_command(&self) -> Option<String> {
        self.inner.state.lock().unwrap().last_command.clone()
    }

    /// Whether entries are mirrored to a snapshot that currently exists.
    pub fn snapshot_exists(&self) -> bool {
        self.inner.state.lock().unwrap().snapshot.exists()
    }

    /// Delete the snapshot file (if any). In-memory entries are kept.
    pub fn remove_snapshot(&self) {
        if let Err(e) = self.inner.state.lock().unwrap().snapshot.remove() {
            tracing::warn!("Failed to remove process snapshot: {}", e);
        }
    }
}
