use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The TOML file structure for gulp-runner.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub process: Option<ProcessSection>,
    pub registry: Option<RegistrySection>,
    pub gulp: Option<GulpSection>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessSection {
    pub nonblocking: Option<bool>,
    /// Replaces `PATH` for every child process.
    pub path: Option<String>,
    pub chdir_on_spawn: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RegistrySection {
    pub persist: Option<bool>,
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GulpSection {
    pub gulpfile_paths: Option<Vec<String>>,
    /// Task name -> extra flags appended to `gulp <task>`.
    pub flags: Option<BTreeMap<String, String>>,
    pub log_errors: Option<bool>,
    pub log_file: Option<String>,
}

/// How child processes are spawned and drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub nonblocking: bool,
    pub path: Option<String>,
    pub chdir_on_spawn: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            nonblocking: true,
            path: None,
            chdir_on_spawn: false,
        }
    }
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub process: ProcessConfig,
    pub persist: bool,
    pub snapshot_path: PathBuf,
    pub gulpfile_paths: Vec<String>,
    pub flags: BTreeMap<String, String>,
    pub log_errors: bool,
    /// Relative paths resolve against the gulpfile directory.
    pub log_file: PathBuf,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub nonblocking: Option<bool>,
    pub path: Option<String>,
    pub chdir_on_spawn: Option<bool>,
    pub persist: Option<bool>,
    pub snapshot_path: Option<PathBuf>,
    pub gulpfile_paths: Option<Vec<String>>,
    pub flags: Option<BTreeMap<String, String>>,
    pub log_errors: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl ConfigFile {
    pub fn to_partial(self) -> PartialConfig {
        let process = self.process;
        let registry = self.registry;
        let gulp = self.gulp;

        PartialConfig {
            nonblocking: process.as_ref().and_then(|p| p.nonblocking),
            path: process.as_ref().and_then(|p| p.path.clone()),
            chdir_on_spawn: process.as_ref().and_then(|p| p.chdir_on_spawn),
            persist: registry.as_ref().and_then(|r| r.persist),
            snapshot_path: registry
                .as_ref()
                .and_then(|r| r.snapshot_path.as_ref().map(PathBuf::from)),
            gulpfile_paths: gulp.as_ref().and_then(|g| g.gulpfile_paths.clone()),
            flags: gulp.as_ref().and_then(|g| g.flags.clone()),
            log_errors: gulp.as_ref().and_then(|g| g.log_errors),
            log_file: gulp
                .as_ref()
                .and_then(|g| g.log_file.as_ref().map(PathBuf::from)),
        }
    }
}
