use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gulp-runner", version, about = "Discover, run and manage gulp tasks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project folder searched for gulpfile.js (repeatable; default: current directory)
    #[arg(short, long = "project", global = true)]
    pub projects: Vec<PathBuf>,

    /// Path to an extra config file (overrides project and global config)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Process snapshot file (overrides config)
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    /// Do not persist running processes across sessions
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Drain stdout fully before stderr instead of reading both concurrently
    #[arg(long, global = true)]
    pub blocking: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tasks defined by the project's gulpfile
    Tasks,
    /// Run a gulp task, streaming its output
    Run {
        /// Task name (e.g., "build", "watch")
        task: String,

        /// Extra flag appended to the gulp invocation (overrides config flags)
        #[arg(long, allow_hyphen_values = true)]
        flag: Option<String>,
    },
    /// Run an arbitrary shell command under process management
    Exec {
        /// Shell command line
        command: String,

        /// Working directory (default: first project folder)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// List tracked processes that are still running
    Ps,
    /// Kill every tracked process tree
    KillAll,
    /// Show the installed gulp version
    Version,
}

impl Cli {
    /// Project folders to search, defaulting to the current directory.
    pub fn project_folders(&self) -> std::io::Result<Vec<PathBuf>> {
        if self.projects.is_empty() {
            Ok(vec![std::env::current_dir()?])
        } else {
            Ok(self.projects.clone())
        }
    }
}
