// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-lock state machine
//!
//! A [`ServerLock`] owns the holders, pending requests, waiters and greedy
//! lease of one [`LockId`](crate::id::LockId). Operations mutate it in place
//! and return [`LockEffect`](crate::effect::LockEffect)s for the manager to
//! apply while the lock's mutex is still held.

mod context;
mod server_lock;
mod snapshot;
mod thrash;

pub use context::{Grant, GreedyLease, Request, Waiter};
pub use server_lock::{LockEnv, ServerLock};
pub use snapshot::{LeaseSnapshot, LockSnapshot, PendingSnapshot, WaiterSnapshot};
pub use thrash::ThrashWindow;
