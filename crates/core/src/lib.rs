// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! lockd-core: clustered lock manager
//!
//! This crate provides:
//! - The per-lock state machine with greedy leases and recall
//! - The lock manager that owns every lock, its timers and abort table
//! - Cross-node deadlock detection
//! - The node-side lease cache and an in-process client

pub mod abort;
pub mod client_state;
pub mod clock;
pub mod config;
pub mod deadlock;
pub mod effect;
pub mod error;
pub mod id;
pub mod level;
pub mod lock;
pub mod maintenance;
pub mod manager;
pub mod message;
pub mod node;
pub mod policy;
pub mod sink;
pub mod timer;

// Re-exports
pub use abort::{AbortSignal, AbortableOperationManager};
pub use client_state::{ClientStateManager, InMemoryClientState, NoClientState};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, DeadlockConfig, GreedyConfig, LockManagerConfig, RecallMerge};
pub use deadlock::{find_deadlocks, ChainLink, DeadlockChain};
pub use effect::{LockEffect, TimerKey};
pub use error::LockError;
pub use id::{LockId, NodeId, ServerThreadId, ThreadId};
pub use level::{LeaseKind, LockLevel, LockView};
pub use lock::{LockSnapshot, ServerLock};
pub use maintenance::{LockStats, MaintenanceConfig, MaintenanceReport, MaintenanceTask};
pub use manager::{LockManager, ManagerState};
pub use message::{
    ClientMessage, DenyReason, LockResponse, PendingTransfer, WaiterTransfer, WakeReason,
};
pub use node::{CacheEffect, ClientHub, LockClient, NodeLockCache, ThreadHandle};
pub use policy::LockPolicy;
pub use sink::{NodeRouter, ResponseSink};
pub use timer::{LockTimer, TimerState};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use sink::RecordingSink;
