// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use lockd_core::{
    ConfigError, LockError, LockManager, LockManagerConfig, MaintenanceConfig, MaintenanceReport,
    MaintenanceTask, NodeRouter, SystemClock,
};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    pub manager: LockManagerConfig,
}

impl Config {
    /// Resolve paths from the environment and read `config_file` if given
    pub fn load(config_file: Option<&Path>) -> Result<Self, LifecycleError> {
        let manager = match config_file {
            Some(path) => LockManagerConfig::load(path)?,
            None => LockManagerConfig::default(),
        };
        let state_dir = state_dir()?;
        let socket_dir = socket_dir();

        Ok(Self {
            socket_path: socket_dir.join("lockd.sock"),
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            manager,
        })
    }

    /// Keep every path under `dir`
    pub fn in_dir(dir: &Path, manager: LockManagerConfig) -> Self {
        Self {
            socket_path: dir.join("lockd.sock"),
            lock_path: dir.join("daemon.pid"),
            log_path: dir.join("daemon.log"),
            manager,
        }
    }
}

/// Daemon state during operation
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Unix socket listener
    pub listener: UnixListener,
    pub manager: Arc<LockManager<SystemClock>>,
    /// Response routes to connected nodes (the manager's sink)
    pub router: Arc<NodeRouter>,
    pub maintenance: MaintenanceTask,
    /// When daemon started
    pub start_time: Instant,
}

impl DaemonState {
    /// Fire every lock timer that is due
    pub fn tick_timers(&self) -> usize {
        self.manager.fire_due_timers()
    }

    /// Resolve deadlocks and drop idle locks
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = self.maintenance.tick(&self.manager);
        for chain in &report.deadlocks {
            warn!(victim = %chain.victim, links = chain.links.len(), "deadlock resolved");
        }
        report
    }

    /// Period of [`run_maintenance`](Self::run_maintenance), never shorter
    /// than the timer resolution
    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance
            .interval()
            .max(self.config.manager.timer_resolution)
    }

    /// Shutdown the daemon gracefully
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        // Blocked callers on every node see their requests dropped
        self.manager.stop();

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }

        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        // Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock manager error: {0}")]
    Lock(#[from] LockError),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        // The files belong to the daemon that holds the lock
        Err(e @ LifecycleError::LockFailed(_)) => Err(e),
        Err(e) => {
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create directories
    for path in [&config.socket_path, &config.lock_path, &config.log_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // 2. Acquire lock file FIRST - prevents races
    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // 3. Validate settings before binding (fail fast)
    config.manager.validate()?;

    // 4. Start the lock manager; no node state survives a restart
    let router = Arc::new(NodeRouter::new());
    let manager = Arc::new(LockManager::new(
        config.manager.policy(),
        config.manager.clone(),
        SystemClock,
        router.clone(),
    ));
    manager.start()?;

    // 5. Remove stale socket and bind (LAST - only after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    info!(
        policy = ?manager.policy(),
        socket = %config.socket_path.display(),
        "Lock daemon started"
    );

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener,
        manager,
        router,
        maintenance: MaintenanceTask::new(MaintenanceConfig::from_config(&config.manager)),
        start_time: Instant::now(),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }

    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// Get the state directory for lockd
fn state_dir() -> Result<PathBuf, LifecycleError> {
    // Use XDG_STATE_HOME or default to ~/.local/state
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("lockd"));
    }

    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/lockd"))
}

/// Get the socket directory for lockd
///
/// Uses /tmp/lockd by default to keep paths short (macOS SUN_LEN = 104).
/// Can be overridden with LOCKD_SOCKET_DIR for testing.
fn socket_dir() -> PathBuf {
    match std::env::var("LOCKD_SOCKET_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("/tmp/lockd"),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
