use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Errors related to launching and controlling managed processes.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The shell itself could not be started.
    #[error("Failed to spawn `{command}` in {cwd}: {source}")]
    Spawn {
        command: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Kill/terminate targeted a PID that no longer exists.
    #[error("Process {pid} is not running")]
    AlreadyDead { pid: u32 },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("Failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {pid} has no {stream} pipe to read")]
    MissingPipe { pid: u32, stream: &'static str },

    /// Operation needs a live process handle (e.g. `communicate` on a
    /// rehydrated entry).
    #[error("Process {pid} was not launched by this session")]
    NotLaunched { pid: u32 },
}

/// Errors related to the on-disk process snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode snapshot for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors related to gulpfile discovery and task listing.
#[derive(Debug, thiserror::Error)]
pub enum GulpError {
    #[error("gulpfile.js not found in {searched} folder(s)")]
    NoGulpfile { searched: usize },

    #[error(
        "\"node\" command not found. Please be sure to have nodejs installed on your system and in your PATH"
    )]
    NodeMissing,

    #[error("There was an error running gulp in {dir}: {stderr}")]
    TaskListing { dir: PathBuf, stderr: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}
