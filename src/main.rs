use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gulp_runner::cli::{Cli, Commands};
use gulp_runner::config::{self, AppConfig};
use gulp_runner::gulp;
use gulp_runner::runner::TaskRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing. Logs go to stderr so task output owns stdout.
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(&cli)?;
    tracing::debug!(
        persist = config.persist,
        snapshot = %config.snapshot_path.display(),
        nonblocking = config.process.nonblocking,
        "Config loaded"
    );

    let folders = cli.project_folders()?;

    match cli.command {
        Commands::Tasks => {
            let dir = gulpfile_dir(&folders, &config)?;
            let tasks = tokio::task::spawn_blocking(move || gulp::list_tasks(&dir, &config))
                .await
                .context("task listing worker panicked")??;
            for task in tasks {
                println!("{task}");
            }
        }
        Commands::Version => {
            let dir = gulpfile_dir(&folders, &config).unwrap_or_else(|_| folders[0].clone());
            let version = tokio::task::spawn_blocking(move || gulp::probe_version(&dir, &config))
                .await
                .context("version probe worker panicked")??;
            println!("CLI version {}", version.cli_version());
            println!("Local version {}", version.local_version());
            println!("Supports --tasks-simple: {}", version.supports_tasks_simple());
        }
        Commands::Run { task, flag } => {
            let dir = gulpfile_dir(&folders, &config)?;
            let command = gulp::task_command(&task, flag.as_deref(), &config);
            println!("Running {task}...");
            let code = run_streaming(TaskRunner::new(config), command, dir).await?;
            std::process::exit(code);
        }
        Commands::Exec { command, cwd } => {
            let dir = cwd.unwrap_or_else(|| folders[0].clone());
            let code = run_streaming(TaskRunner::new(config), command, dir).await?;
            std::process::exit(code);
        }
        Commands::Ps => {
            let runner = TaskRunner::new(config);
            let running = runner.list_running();
            if running.is_empty() {
                println!("No running tasks.");
            }
            for (command, dir, pid) in running {
                println!("{pid}\t{command}\t{}", dir.display());
            }
        }
        Commands::KillAll => {
            let runner = TaskRunner::new(config);
            if runner.kill_all() > 0 {
                println!("All running tasks killed!");
            } else {
                println!("No running tasks.");
            }
        }
    }

    Ok(())
}

/// Directory of the first gulpfile found in the project folders.
fn gulpfile_dir(folders: &[PathBuf], config: &AppConfig) -> anyhow::Result<PathBuf> {
    let gulpfile = gulp::first_gulpfile(folders, &config.gulpfile_paths)?;
    Ok(gulp::working_dir_of(&gulpfile))
}

/// Run `command`, printing output lines as they arrive. Ctrl-C kills the
/// task's process tree. Returns the exit code to terminate with.
async fn run_streaming(runner: TaskRunner, command: String, dir: PathBuf) -> anyhow::Result<i32> {
    let task = runner.start(command, dir);
    let mut stdout = std::io::stdout();

    let outcome = task
        .drive(&runner, tokio::signal::ctrl_c, |line| {
            if let Err(e) = stdout.write_all(line.as_bytes()).and_then(|()| stdout.flush()) {
                tracing::debug!("Failed to write task output: {}", e);
            }
        })
        .await?;

    if outcome.interrupted {
        println!("Task killed.");
    }
    Ok(outcome
        .result
        .exit_code
        .unwrap_or(if outcome.interrupted { 130 } else { 1 }))
}
