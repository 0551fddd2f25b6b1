//! Scoped change of the process-wide working directory.
//!
//! Spawns normally pass their working directory straight to
//! [`std::process::Command::current_dir`]. Some shells resolve relative
//! invocations against the parent's current directory instead, so a launch
//! can opt into changing the real working directory around the spawn call.
//! The working directory is global to the process: every scoped change is
//! serialized through one lock and is undone when the guard drops.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static CWD_LOCK: Mutex<()> = Mutex::new(());

/// Holds the process-wide working directory changed until dropped.
pub struct DirGuard {
    previous: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    /// Change into `path`, remembering the current directory.
    ///
    /// Blocks while another guard is alive.
    pub fn enter(path: &Path) -> std::io::Result<Self> {
        let lock = CWD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(path)?;
        tracing::trace!(from = %previous.display(), to = %path.display(), "changed working directory");
        Ok(Self {
            previous,
            _lock: lock,
        })
    }

    /// Directory that will be restored on drop.
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            tracing::warn!(
                "Failed to restore working directory to {}: {}",
                self.previous.display(),
                e
            );
        }
    }
}

/// Run `body` with the working directory set to `path`, restoring the
/// original directory afterwards whether `body` succeeds, fails or panics.
pub fn with_working_directory<T>(path: &Path, body: impl FnOnce() -> T) -> std::io::Result<T> {
    let _guard = DirGuard::enter(path)?;
    Ok(body())
}
