// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use lockd_core::{LockId, LockLevel, ManagerState, NodeId, ServerThreadId, ThreadId};
use tempfile::TempDir;

use super::*;

fn config(dir: &TempDir) -> Config {
    Config::in_dir(dir.path(), LockManagerConfig::default())
}

#[tokio::test]
async fn startup_binds_socket_and_writes_pid() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    let mut daemon = startup(&config).await.unwrap();

    assert!(config.socket_path.exists());
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    assert_eq!(daemon.manager.state(), ManagerState::Started);

    daemon.shutdown().unwrap();
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    assert_eq!(daemon.manager.state(), ManagerState::Stopped);
}

#[tokio::test]
async fn second_daemon_is_refused_and_leaves_files_alone() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let _daemon = startup(&config).await.unwrap();

    let err = startup(&config).await.err().unwrap();
    assert!(matches!(err, LifecycleError::LockFailed(_)));
    assert!(config.socket_path.exists());
    assert!(config.lock_path.exists());
}

#[tokio::test]
async fn invalid_settings_fail_before_binding() {
    let dir = TempDir::new().unwrap();
    let config = Config::in_dir(
        dir.path(),
        LockManagerConfig::default().with_timer_resolution(Duration::ZERO),
    );

    let err = startup(&config).await.err().unwrap();
    assert!(matches!(err, LifecycleError::Config(_)));
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    std::fs::write(&config.socket_path, b"stale").unwrap();

    let _daemon = startup(&config).await.unwrap();
    assert!(std::os::unix::net::UnixStream::connect(&config.socket_path).is_ok());
}

#[tokio::test]
async fn timers_fire_on_tick() {
    let dir = TempDir::new().unwrap();
    let daemon = startup(&config(&dir)).await.unwrap();
    let lock = LockId::named("a");
    let thread = ServerThreadId::new(NodeId(1), ThreadId(1));

    daemon
        .manager
        .lock(&lock, thread, LockLevel::Write, None)
        .unwrap();
    daemon
        .manager
        .wait(&lock, thread, Some(Duration::from_millis(10)))
        .unwrap();
    assert_eq!(daemon.tick_timers(), 0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(daemon.tick_timers(), 1);
    assert!(daemon.manager.query(&lock).unwrap().is_held_by(thread));
}

#[tokio::test]
async fn maintenance_runs_clean_on_an_idle_table() {
    let dir = TempDir::new().unwrap();
    let daemon = startup(&config(&dir)).await.unwrap();

    let report = daemon.run_maintenance();
    assert!(report.deadlocks.is_empty());
    assert!(daemon.maintenance_interval() >= daemon.config.manager.timer_resolution);
}

#[test]
fn in_dir_keeps_paths_together() {
    let config = Config::in_dir(Path::new("/run/lockd"), LockManagerConfig::default());
    assert_eq!(config.socket_path, PathBuf::from("/run/lockd/lockd.sock"));
    assert_eq!(config.lock_path, PathBuf::from("/run/lockd/daemon.pid"));
    assert_eq!(config.log_path, PathBuf::from("/run/lockd/daemon.log"));
}

#[test]
fn load_reads_manager_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lockd.toml");
    std::fs::write(&path, "timer_resolution = \"20ms\"\n[greedy]\nenabled = false\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.manager.timer_resolution, Duration::from_millis(20));
    assert!(!config.manager.greedy.enabled);
}
