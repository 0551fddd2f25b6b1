use super::schema::{AppConfig, PartialConfig, ProcessConfig};
use std::path::PathBuf;

/// File name of the gulp error log written next to the gulpfile.
pub const DEFAULT_LOG_FILE: &str = "gulp-runner.log";

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For flags and gulpfile_paths: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            nonblocking: self.nonblocking.or(fallback.nonblocking),
            path: self.path.or(fallback.path),
            chdir_on_spawn: self.chdir_on_spawn.or(fallback.chdir_on_spawn),
            persist: self.persist.or(fallback.persist),
            snapshot_path: self.snapshot_path.or(fallback.snapshot_path),
            gulpfile_paths: self.gulpfile_paths.or(fallback.gulpfile_paths),
            flags: self.flags.or(fallback.flags),
            log_errors: self.log_errors.or(fallback.log_errors),
            log_file: self.log_file.or(fallback.log_file),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    /// `default_snapshot` is used when no snapshot path was configured.
    pub fn finalize(self, default_snapshot: PathBuf) -> AppConfig {
        let defaults = ProcessConfig::default();

        AppConfig {
            process: ProcessConfig {
                nonblocking: self.nonblocking.unwrap_or(defaults.nonblocking),
                path: self.path.filter(|p| !p.is_empty()),
                chdir_on_spawn: self.chdir_on_spawn.unwrap_or(defaults.chdir_on_spawn),
            },
            persist: self.persist.unwrap_or(true),
            snapshot_path: self.snapshot_path.unwrap_or(default_snapshot),
            gulpfile_paths: self.gulpfile_paths.unwrap_or_default(),
            flags: self.flags.unwrap_or_default(),
            log_errors: self.log_errors.unwrap_or(true),
            log_file: self
                .log_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}
