// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::config::GreedyConfig;
use crate::id::{LockId, NodeId, ServerThreadId, ThreadId};
use crate::level::LockLevel;
use crate::policy::LockPolicy;
use crate::sink::RecordingSink;
use std::sync::Arc;

fn t(node: u64, thread: u64) -> ServerThreadId {
    ServerThreadId::new(NodeId(node), ThreadId(thread))
}

fn started(policy: LockPolicy) -> (LockManager<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let manager = LockManager::new(
        policy,
        LockManagerConfig::default(),
        clock.clone(),
        Arc::new(RecordingSink::new()),
    );
    manager.start().unwrap();
    (manager, clock)
}

fn deadlock(manager: &LockManager<FakeClock>) {
    let (a, b) = (LockId::named("a"), LockId::named("b"));
    manager.lock(&a, t(1, 1), LockLevel::Write, None).unwrap();
    manager.lock(&b, t(2, 1), LockLevel::Write, None).unwrap();
    manager.lock(&b, t(1, 1), LockLevel::Write, None).unwrap();
    manager.lock(&a, t(2, 1), LockLevel::Write, None).unwrap();
}

#[test]
fn maintenance_config_follows_manager_config() {
    let config = MaintenanceConfig::default();
    assert_eq!(config.interval, Duration::from_secs(10));
    assert!(config.resolve_deadlocks);
    assert_eq!(config.pending_threshold, Duration::from_secs(5));
    assert!(config.evict_idle);
}

#[test]
fn maintenance_config_builder() {
    let config = MaintenanceConfig::default()
        .with_interval(Duration::from_secs(60))
        .with_resolve_deadlocks(false)
        .with_pending_threshold(Duration::from_secs(1))
        .with_evict_idle(false);

    assert_eq!(config.interval, Duration::from_secs(60));
    assert!(!config.resolve_deadlocks);
    assert_eq!(config.pending_threshold, Duration::from_secs(1));
    assert!(!config.evict_idle);
}

#[test]
fn young_deadlock_is_left_alone() {
    let (manager, _) = started(LockPolicy::NonGreedy);
    deadlock(&manager);

    let task = MaintenanceTask::new(MaintenanceConfig::default());
    let report = task.tick(&manager);

    assert!(report.deadlocks.is_empty());
    assert_eq!(manager.scan_for_deadlocks().len(), 1);
}

#[test]
fn old_deadlock_is_resolved() {
    let (manager, clock) = started(LockPolicy::NonGreedy);
    deadlock(&manager);
    clock.advance(Duration::from_secs(6));

    let task = MaintenanceTask::new(MaintenanceConfig::default());
    let report = task.tick(&manager);

    assert_eq!(report.deadlocks.len(), 1);
    assert_eq!(report.deadlocks[0].victim, t(1, 1));
    assert!(manager.scan_for_deadlocks().is_empty());
}

#[test]
fn disabled_resolution_skips_deadlocks() {
    let (manager, clock) = started(LockPolicy::NonGreedy);
    deadlock(&manager);
    clock.advance(Duration::from_secs(60));

    let task = MaintenanceTask::new(MaintenanceConfig::default().with_resolve_deadlocks(false));
    assert!(task.tick(&manager).deadlocks.is_empty());
}

#[test]
fn stats_count_leases_and_queues() {
    let (manager, _) = started(LockPolicy::Greedy(GreedyConfig::default()));
    let (a, b) = (LockId::named("a"), LockId::named("b"));

    manager.lock(&a, t(1, 1), LockLevel::Write, None).unwrap();
    manager.lock(&a, t(2, 1), LockLevel::Write, None).unwrap();
    manager.lock(&b, t(3, 1), LockLevel::Write, None).unwrap();

    let stats = LockStats::collect(&manager);
    assert_eq!(
        stats,
        LockStats {
            total_locks: 2,
            held_locks: 2,
            leased_locks: 2,
            recalls_in_flight: 1,
            demoted_locks: 0,
            pending_requests: 1,
            waiters: 0,
        }
    );
}
