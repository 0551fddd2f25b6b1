#![cfg(unix)]

use std::collections::HashSet;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gulp_runner::exec::{ManagedProcess, ProcessSpec};
use gulp_runner::registry::{FileSnapshot, ProcessRecord, ProcessRegistry, Snapshot};
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

fn sleeper(registry: &ProcessRegistry, dir: &std::path::Path) -> Arc<ManagedProcess> {
    ManagedProcess::launch(&ProcessSpec::new(dir), "sleep 60", registry).unwrap()
}

// ============================================================
// Reconciliation
// ============================================================

#[test]
fn test_refresh_prunes_process_killed_out_of_band() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let doomed = sleeper(&registry, ws.path());
    let survivor = sleeper(&registry, ws.path());

    let status = Command::new("kill")
        .arg("-9")
        .arg(doomed.pid().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    // Still listed until reconciled.
    assert_eq!(registry.len(), 2);
    assert!(wait_until(Duration::from_secs(5), || !doomed.is_alive()));

    let removed = registry.refresh();
    assert_eq!(removed, vec![doomed.pid()]);
    let pids: Vec<u32> = registry.get().iter().map(|p| p.pid()).collect();
    assert_eq!(pids, vec![survivor.pid()]);

    registry.kill_all();
}

#[test]
fn test_kill_all_empties_registry() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let a = sleeper(&registry, ws.path());
    let b = sleeper(&registry, ws.path());
    assert_eq!(registry.len(), 2);

    registry.kill_all();
    assert!(registry.is_empty());
    assert!(wait_until(Duration::from_secs(5), || !a.is_alive() && !b.is_alive()));
}

#[test]
fn test_kill_all_on_empty_registry() {
    let registry = ProcessRegistry::in_memory();
    registry.kill_all();
    assert!(registry.is_empty());
}

// ============================================================
// Persistence
// ============================================================

#[test]
fn test_snapshot_mirrors_launch_and_exit() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("state").join("processes.json");
    let registry = ProcessRegistry::open(&snapshot_path);
    let reader = FileSnapshot::new(&snapshot_path);

    let process = ManagedProcess::launch(&ProcessSpec::new(ws.path()), "echo hi", &registry).unwrap();
    let records = reader.read().unwrap();
    assert_eq!(
        records,
        vec![ProcessRecord {
            command: "echo hi".into(),
            working_dir: ws.path().to_path_buf(),
            pid: process.pid(),
        }]
    );

    process.communicate(|_| {}).unwrap();
    assert!(reader.read().unwrap().is_empty());
    assert!(registry.snapshot_exists());
}

#[test]
fn test_open_rehydrates_previous_session() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("processes.json");

    let pid = {
        let first = ProcessRegistry::open(&snapshot_path);
        let process = sleeper(&first, ws.path());
        process.pid()
    };

    let second = ProcessRegistry::open(&snapshot_path);
    assert_eq!(second.len(), 1);
    let entry = second.find(pid).unwrap();
    assert!(!entry.has_handle());
    assert_eq!(entry.command(), "sleep 60");
    assert_eq!(entry.working_dir(), ws.path());
    assert_eq!(second.last_command().as_deref(), Some("sleep 60"));
    assert!(entry.is_alive());

    second.kill_all();
    assert!(second.is_empty());
    assert!(FileSnapshot::new(&snapshot_path).read().unwrap().is_empty());
}

#[test]
fn test_rehydrate_skips_known_pids() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("processes.json");
    let registry = ProcessRegistry::open(&snapshot_path);
    let process = sleeper(&registry, ws.path());

    assert_eq!(registry.rehydrate(), 0);
    assert_eq!(registry.len(), 1);

    process.kill().unwrap();
}

#[test]
fn test_refresh_prunes_dead_rehydrated_entries() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("processes.json");

    // A pid that has already exited and been reaped.
    let mut child = Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    FileSnapshot::new(&snapshot_path)
        .write(&[ProcessRecord {
            command: "gulp watch".into(),
            working_dir: ws.path().to_path_buf(),
            pid: dead_pid,
        }])
        .unwrap();

    let registry = ProcessRegistry::open(&snapshot_path);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.refresh(), vec![dead_pid]);
    assert!(registry.is_empty());
    assert!(FileSnapshot::new(&snapshot_path).read().unwrap().is_empty());
}

#[test]
fn test_snapshot_keeps_every_record() {
    let ws = setup_workspace();
    let snapshot = FileSnapshot::new(ws.path().join("processes.json"));
    let records: Vec<ProcessRecord> = [("gulp watch", 101), ("gulp build", 202), ("gulp lint", 303)]
        .into_iter()
        .map(|(command, pid)| ProcessRecord {
            command: command.into(),
            working_dir: ws.path().join(command.replace(' ', "-")),
            pid,
        })
        .collect();

    snapshot.write(&records).unwrap();

    let read: HashSet<ProcessRecord> = snapshot.read().unwrap().into_iter().collect();
    assert_eq!(read, records.into_iter().collect::<HashSet<_>>());
}

#[test]
fn test_adding_same_process_twice_keeps_one_record() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("processes.json");
    let registry = ProcessRegistry::open(&snapshot_path);
    let process = sleeper(&registry, ws.path());

    registry.add(Arc::clone(&process));
    registry.add(Arc::clone(&process));

    assert_eq!(registry.len(), 1);
    let records = FileSnapshot::new(&snapshot_path).read().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, process.pid());

    process.kill().unwrap();
    assert!(FileSnapshot::new(&snapshot_path).read().unwrap().is_empty());
}

#[test]
fn test_remove_snapshot_keeps_memory() {
    let ws = setup_workspace();
    let snapshot_path = ws.path().join("processes.json");
    let registry = ProcessRegistry::open(&snapshot_path);
    let process = sleeper(&registry, ws.path());
    assert!(registry.snapshot_exists());

    registry.remove_snapshot();
    assert!(!registry.snapshot_exists());
    assert_eq!(registry.len(), 1);

    process.kill().unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_in_memory_registry_has_no_snapshot() {
    let ws = setup_workspace();
    let registry = ProcessRegistry::in_memory();
    let process = ManagedProcess::launch(&ProcessSpec::new(ws.path()), "true", &registry).unwrap();
    assert!(!registry.snapshot_exists());
    process.communicate(|_| {}).unwrap();
}
