//! On-disk mirror of the process registry.
//!
//! The snapshot is a JSON array of [`ProcessRecord`]s. It is read whole,
//! changed in memory and rewritten on every registry mutation. Each write goes
//! to its own uniquely named temp file in the snapshot's directory, which is
//! then renamed over the snapshot, so a crash leaves either the old or the new
//! content. On POSIX, every write, read-modify-write cycle and removal holds an
//! exclusive `flock` on a sidecar lock file so two sessions sharing a snapshot
//! do not lose or tear each other's updates.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// One persisted process. Field names match the historical cache format,
/// including its `workding_dir` spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessRecord {
    #[serde(rename = "last_command")]
    pub command: String,
    #[serde(rename = "workding_dir")]
    pub working_dir: PathBuf,
    pub pid: u32,
}

/// Storage for registry snapshots.
///
/// [`FileSnapshot`] persists; [`NullSnapshot`] accepts every call and stores
/// nothing, so the registry runs the same code with persistence disabled.
pub trait Snapshot: Send + std::fmt::Debug {
    fn exists(&self) -> bool;

    fn read(&self) -> Result<Vec<ProcessRecord>, SnapshotError>;

    fn write(&self, records: &[ProcessRecord]) -> Result<(), SnapshotError>;

    /// Read, transform and rewrite under exclusive access.
    fn update(
        &self,
        change: &mut dyn FnMut(Vec<ProcessRecord>) -> Vec<ProcessRecord>,
    ) -> Result<(), SnapshotError>;

    fn remove(&self) -> Result<(), SnapshotError>;
}

/// Snapshot stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }

    #[cfg(unix)]
    fn sidecar(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn ensure_parent(&self) -> Result<(), SnapshotError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))
            }
            _ => Ok(()),
        }
    }

    #[cfg(unix)]
    fn lock(&self) -> Result<impl Sized, SnapshotError> {
        use nix::fcntl::{Flock, FlockArg};

        self.ensure_parent()?;
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sidecar(".lock"))
            .map_err(|e| self.io_error(e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.io_error(std::io::Error::from(errno)))
    }

    #[cfg(not(unix))]
    fn lock(&self) -> Result<impl Sized, SnapshotError> {
        self.ensure_parent()?;
        Ok(())
    }

    /// Replace the snapshot atomically. Caller holds the lock.
    fn write_locked(&self, records: &[ProcessRecord]) -> Result<(), SnapshotError> {
        let json = serde_json::to_string(records).map_err(|source| SnapshotError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(json.as_bytes()).map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

impl Snapshot for FileSnapshot {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> Result<Vec<ProcessRecord>, SnapshotError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        let text = String::from_utf8_lossy(&bytes);
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|source| SnapshotError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, records: &[ProcessRecord]) -> Result<(), SnapshotError> {
        let _lock = self.lock()?;
        self.write_locked(records)
    }

    fn update(
        &self,
        change: &mut dyn FnMut(Vec<ProcessRecord>) -> Vec<ProcessRecord>,
    ) -> Result<(), SnapshotError> {
        let _lock = self.lock()?;
        let current = match self.read() {
            Ok(records) => records,
            Err(SnapshotError::Parse { path, source }) => {
                tracing::warn!(
                    "Discarding malformed process snapshot at {}: {}",
                    path.display(),
                    source
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        self.write_locked(&change(current))
    }

    fn remove(&self) -> Result<(), SnapshotError> {
        let _lock = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Snapshot that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSnapshot;

impl Snapshot for NullSnapshot {
    fn exists(&self) -> bool {
        false
    }

    fn read(&self) -> Result<Vec<ProcessRecord>, SnapshotError> {
        Ok(Vec::new())
    }

    fn write(&self, _records: &[ProcessRecord]) -> Result<(), SnapshotError> {
        Ok(())
    }

    fn update(
        &self,
        _change: &mut dyn FnMut(Vec<ProcessRecord>) -> Vec<ProcessRecord>,
    ) -> Result<(), SnapshotError> {
        Ok(())
    }

    fn remove(&self) -> Result<(), SnapshotError> {
        Ok(())
    }
}
