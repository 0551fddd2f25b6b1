//! Gulp-specific glue over the process layer: finding gulpfiles, listing
//! their tasks and probing the installed CLI.

pub mod discovery;
pub mod tasks;
pub mod version;

pub use discovery::{find_gulpfiles, first_gulpfile, working_dir_of};
pub use tasks::{append_error_log, list_tasks, probe_version, task_command};
pub use version::GulpVersion;
