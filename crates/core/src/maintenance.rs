// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic maintenance of the lock table
//!
//! Resolves deadlocks once some request has waited long enough to be
//! suspicious, and drops idle locks.

use crate::clock::Clock;
use crate::config::LockManagerConfig;
use crate::deadlock::DeadlockChain;
use crate::manager::LockManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the maintenance task
#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
    /// How often to run maintenance
    pub interval: Duration,
    pub resolve_deadlocks: bool,
    /// Deadlock resolution only runs once a request has been queued this long
    pub pending_threshold: Duration,
    pub evict_idle: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_config(&LockManagerConfig::default())
    }
}

impl MaintenanceConfig {
    pub fn from_config(config: &LockManagerConfig) -> Self {
        Self {
            interval: config.deadlock.scan_interval,
            resolve_deadlocks: config.deadlock.enabled,
            pending_threshold: config.deadlock.pending_threshold,
            evict_idle: true,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_resolve_deadlocks(mut self, enabled: bool) -> Self {
        self.resolve_deadlocks = enabled;
        self
    }

    pub fn with_pending_threshold(mut self, threshold: Duration) -> Self {
        self.pending_threshold = threshold;
        self
    }

    pub fn with_evict_idle(mut self, enabled: bool) -> Self {
        self.evict_idle = enabled;
        self
    }
}

/// What one maintenance cycle did
#[derive(Clone, Debug, Default)]
pub struct MaintenanceReport {
    pub deadlocks: Vec<DeadlockChain>,
    pub evicted: usize,
}

/// Background maintenance for a lock manager
pub struct MaintenanceTask {
    config: MaintenanceConfig,
}

impl MaintenanceTask {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self { config }
    }

    /// Run a single maintenance cycle
    pub fn tick<C: Clock>(&self, manager: &LockManager<C>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        if self.config.resolve_deadlocks {
            let suspicious = manager.snapshots().iter().any(|s| {
                s.oldest_pending()
                    .is_some_and(|queued| queued >= self.config.pending_threshold)
            });
            if suspicious {
                report.deadlocks = manager.resolve_deadlocks();
            }
        }

        if self.config.evict_idle {
            report.evicted = manager.evict_idle();
        }

        if !report.deadlocks.is_empty() || report.evicted > 0 {
            tracing::debug!(
                deadlocks = report.deadlocks.len(),
                evicted = report.evicted,
                "maintenance cycle"
            );
        }
        report
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

/// Aggregate counts over every lock
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub total_locks: usize,
    pub held_locks: usize,
    pub leased_locks: usize,
    pub recalls_in_flight: usize,
    pub demoted_locks: usize,
    pub pending_requests: usize,
    pub waiters: usize,
}

impl LockStats {
    /// Collect statistics from a lock manager
    pub fn collect<C: Clock>(manager: &LockManager<C>) -> Self {
        let mut stats = LockStats::default();

        for snapshot in manager.snapshots() {
            stats.total_locks += 1;
            if !snapshot.holders.is_empty() {
                stats.held_locks += 1;
            }
            if let Some(lease) = &snapshot.lease {
                stats.leased_locks += 1;
                if lease.recall_in_flight {
                    stats.recalls_in_flight += 1;
                }
            }
            if snapshot.demoted {
                stats.demoted_locks += 1;
            }
            stats.pending_requests += snapshot.pending.len();
            stats.waiters += snapshot.waiters.len();
        }

        stats
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
