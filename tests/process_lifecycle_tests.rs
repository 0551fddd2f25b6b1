#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gulp_runner::error::ProcessError;
use gulp_runner::exec::{ManagedProcess, ProcessSpec};
use gulp_runner::registry::ProcessRegistry;
use tempfile::TempDir;

fn setup_workspace() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

// ============================================================
// Launch and communicate
// ============================================================

#[test]
fn test_launch_registers_and_communicate_unregisters() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "echo hello", &registry).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get()[0].pid(), process.pid());

    let result = process.communicate(|_| {}).unwrap();
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));
    assert!(registry.is_empty());
    assert!(!process.is_alive());
    assert!(process.exit_status().is_some_and(|s| s.success()));
}

#[test]
fn test_communicate_streams_lines_from_both_pipes() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());
    let lines = Mutex::new(Vec::new());

    let process =
        ManagedProcess::launch(&spec, "printf 'a\\nb\\n'; printf 'oops\\n' >&2", &registry).unwrap();
    let result = process
        .communicate(|line: &str| lines.lock().unwrap().push(line.to_string()))
        .unwrap();

    let mut lines = lines.into_inner().unwrap();
    lines.sort();
    assert_eq!(lines, vec!["a\n", "b\n", "oops\n"]);
    assert_eq!(result.stdout, "a\nb\n");
    assert_eq!(result.stderr, "oops\n");
}

#[test]
fn test_ansi_sequences_are_stripped() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "printf '\\033[32mOK\\033[0m\\n'", &registry).unwrap();
    let result = process.communicate(|_| {}).unwrap();
    assert_eq!(result.stdout, "OK\n");
}

#[test]
fn test_nonzero_exit_code() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "exit 3", &registry).unwrap();
    let result = process.communicate(|_| {}).unwrap();
    assert_eq!(result.exit_code, Some(3));
    assert!(registry.is_empty());
}

#[test]
fn test_command_is_trimmed() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "true  \n", &registry).unwrap();
    assert_eq!(process.command(), "true");
    assert_eq!(registry.last_command().as_deref(), Some("true"));
    process.communicate(|_| {}).unwrap();
}

#[test]
fn test_second_communicate_is_rejected() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "true", &registry).unwrap();
    process.communicate(|_| {}).unwrap();
    let err = process.communicate(|_| {}).unwrap_err();
    assert!(matches!(err, ProcessError::NotLaunched { .. }));
}

#[test]
fn test_working_directory() {
    let ws = setup_workspace();
    let canonical = std::fs::canonicalize(ws.path()).unwrap();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "pwd", &registry).unwrap();
    assert_eq!(process.working_dir(), ws.path());
    let result = process.communicate(|_| {}).unwrap();
    assert_eq!(result.stdout.trim(), canonical.to_str().unwrap());
}

#[test]
fn test_missing_working_directory_is_spawn_error() {
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(PathBuf::from("/definitely/not/a/real/dir"));

    let err = ManagedProcess::launch(&spec, "true", &registry).unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
    assert!(registry.is_empty());
}

#[test]
fn test_path_override_reaches_child() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let mut spec = ProcessSpec::new(ws.path());
    spec.environment.insert("PATH".into(), "/custom/bin:/usr/bin:/bin".into());
    spec.environment.insert("GULP_RUNNER_TEST".into(), "marker".into());

    let process = ManagedProcess::launch(&spec, "echo $PATH; echo $GULP_RUNNER_TEST", &registry).unwrap();
    let result = process.communicate(|_| {}).unwrap();
    assert_eq!(result.stdout, "/custom/bin:/usr/bin:/bin\nmarker\n");
}

// ============================================================
// Synchronous runs
// ============================================================

#[test]
fn test_run_synchronously_success() {
    let ws = setup_workspace();
    let run = ProcessSpec::new(ws.path()).run_synchronously("echo ready").unwrap();
    assert_eq!(run.stdout, "ready\n");
    assert_eq!(run.exit_code, Some(0));
    assert!(!run.failed);
}

#[test]
fn test_run_synchronously_stderr_marks_failed() {
    let ws = setup_workspace();
    let run = ProcessSpec::new(ws.path())
        .run_synchronously("echo warn >&2")
        .unwrap();
    assert_eq!(run.exit_code, Some(0));
    assert!(run.failed);
    assert_eq!(run.stderr, "warn\n");
}

#[test]
fn test_run_synchronously_command_not_found() {
    let ws = setup_workspace();
    let run = ProcessSpec::new(ws.path())
        .run_synchronously("exit 127")
        .unwrap();
    assert_eq!(run.exit_code, Some(127));
    assert!(run.failed);
}

#[test]
fn test_run_synchronously_spawn_error() {
    let spec = ProcessSpec::new(PathBuf::from("/definitely/not/a/real/dir"));
    let err = spec.run_synchronously("true").unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
}

// ============================================================
// Termination
// ============================================================

#[test]
fn test_kill_unregisters_and_ends_process() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "sleep 60", &registry).unwrap();
    assert!(process.is_alive());

    process.kill().unwrap();
    assert!(registry.is_empty());
    assert!(wait_until(Duration::from_secs(5), || !process.is_alive()));
}

#[test]
fn test_kill_reaches_grandchildren() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    // The shell forks a background sleep and prints its pid.
    let process = ManagedProcess::launch(&spec, "sleep 60 & echo $!; wait", &registry).unwrap();
    let grandchild_pid = Mutex::new(None);
    let (grandchild, result) = std::thread::scope(|scope| {
        let handle = scope.spawn(|| {
            process.communicate(|line: &str| {
                let mut slot = grandchild_pid.lock().unwrap();
                if slot.is_none() {
                    *slot = line.trim().parse::<u32>().ok();
                }
            })
        });

        assert!(wait_until(Duration::from_secs(5), || grandchild_pid.lock().unwrap().is_some()));
        let grandchild = grandchild_pid.lock().unwrap().unwrap();
        process.kill().unwrap();
        (grandchild, handle.join().unwrap())
    });

    assert!(result.is_ok());
    assert!(wait_until(Duration::from_secs(5), || {
        !gulp_runner::exec::signal::pid_exists(grandchild)
    }));
}

#[test]
fn test_terminate_unregisters() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "sleep 60", &registry).unwrap();
    process.terminate().unwrap();
    assert!(registry.is_empty());
    assert!(wait_until(Duration::from_secs(5), || !process.is_alive()));
}

#[test]
fn test_kill_after_exit_is_not_an_error() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let spec = ProcessSpec::new(ws.path());

    let process = ManagedProcess::launch(&spec, "true", &registry).unwrap();
    process.communicate(|_| {}).unwrap();
    assert!(process.kill().is_ok());
    assert!(process.terminate().is_ok());
}
