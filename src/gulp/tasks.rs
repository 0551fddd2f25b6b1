//! Listing gulp tasks and building task command lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Local;

use crate::config::AppConfig;
use crate::error::GulpError;
use crate::exec::process::COMMAND_NOT_FOUND;
use crate::exec::{ProcessSpec, SyncRun};

use super::version::GulpVersion;

const LOG_HEADER: &str =
    "Errors from gulp-runner task listing. Each entry shows when it happened and what gulp printed to stderr.";

/// Names of the tasks defined by the gulpfile in `dir`, sorted.
pub fn list_tasks(dir: &Path, config: &AppConfig) -> Result<Vec<String>, GulpError> {
    let spec = ProcessSpec::from_config(dir, &config.process);
    let run = spec.run_synchronously("gulp --tasks-simple")?;
    parse_task_list(dir, config, run)
}

fn parse_task_list(dir: &Path, config: &AppConfig, run: SyncRun) -> Result<Vec<String>, GulpError> {
    if run.exit_code == Some(COMMAND_NOT_FOUND) {
        return Err(GulpError::NodeMissing);
    }
    if run.failed {
        if config.log_errors {
            let log_path = dir.join(&config.log_file);
            if let Err(e) = append_error_log(&log_path, &run.stderr) {
                tracing::warn!("Failed to write gulp error log at {}: {}", log_path.display(), e);
            }
        }
        return Err(GulpError::TaskListing {
            dir: dir.to_path_buf(),
            stderr: run.stderr.trim().to_string(),
        });
    }

    let mut tasks: Vec<String> = run
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    tasks.sort();
    tasks.dedup();
    Ok(tasks)
}

/// Probe `gulp -v` in `dir`.
pub fn probe_version(dir: &Path, config: &AppConfig) -> Result<GulpVersion, GulpError> {
    let spec = ProcessSpec::from_config(dir, &config.process);
    let run = spec.run_synchronously("gulp -v")?;
    if run.exit_code == Some(COMMAND_NOT_FOUND) {
        return Err(GulpError::NodeMissing);
    }
    Ok(GulpVersion::parse(&run.stdout))
}

/// `gulp <task>` plus an explicit flag, or the one configured for the task.
pub fn task_command(task: &str, explicit_flag: Option<&str>, config: &AppConfig) -> String {
    let flag = explicit_flag
        .or_else(|| config.flags.get(task).map(String::as_str))
        .filter(|f| !f.trim().is_empty());
    match flag {
        Some(flag) => format!("gulp {task} {flag}"),
        None => format!("gulp {task}"),
    }
}

/// Append a timestamped stderr dump to the error log, writing a header
/// first when the file is new.
pub fn append_error_log(path: &Path, text: &str) -> std::io::Result<()> {
    let is_new = !path.is_file();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let header = if is_new { LOG_HEADER } else { "" };
    let timestamp = Local::now().format("%m-%d-%Y %H:%M");
    write!(file, "{header}\n\n{timestamp}:\n{text}")?;
    file.flush()
}
