pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use crate::error::ConfigError;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Project-level config file name, looked up in the first project folder.
pub const CONFIG_FILE_NAME: &str = "gulp-runner.toml";

/// Load configuration by merging global, project, explicit-file and CLI sources.
/// Precedence: CLI > --config file > project config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/gulp-runner/gulp-runner.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Project config (<project>/gulp-runner.toml)
    let project = load_project_config(&cli.project_folders()?);

    // Layer 3: Explicit --config file. Unlike the search locations, a file the
    // user named must exist and parse.
    let explicit = match &cli.config {
        Some(path) => read_config_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => PartialConfig::default(),
    };

    // Layer 4: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    let config = cli_partial
        .with_fallback(explicit)
        .with_fallback(project)
        .with_fallback(global)
        .finalize(default_snapshot_path());

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match project_dirs() {
        Some(dirs) => load_toml_file(&dirs.config_dir().join(CONFIG_FILE_NAME)).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load project config from the first project folder.
fn load_project_config(folders: &[PathBuf]) -> PartialConfig {
    folders
        .first()
        .and_then(|folder| load_toml_file(&folder.join(CONFIG_FILE_NAME)))
        .unwrap_or_default()
}

/// Read and parse a TOML config file.
pub fn read_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config_file: ConfigFile = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;
    Ok(config_file.to_partial())
}

/// Load a config file from one of the search locations.
/// Returns None on file-not-found; other errors are logged and ignored.
pub fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match read_config_file(path) {
        Ok(partial) => {
            tracing::info!("Loaded config from {}", path.display());
            Some(partial)
        }
        Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Ignoring config at {}: {}", path.display(), e);
            None
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "gulp-runner")
}

/// Resolve the platform-specific snapshot path.
/// Linux: ~/.local/share/gulp-runner/processes.json
/// macOS: ~/Library/Application Support/gulp-runner/processes.json
fn default_snapshot_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("processes.json"))
        .unwrap_or_else(|| std::env::temp_dir().join("gulp-runner-processes.json"))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    PartialConfig {
        nonblocking: cli.blocking.then_some(false),
        persist: cli.no_persist.then_some(false),
        snapshot_path: cli.snapshot.clone(),
        ..Default::default()
    }
}
