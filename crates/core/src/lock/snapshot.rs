// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time views of a lock for introspection and deadlock detection

use super::context::Grant;
use crate::id::{LockId, NodeId, ServerThreadId};
use crate::level::LockLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    pub thread: ServerThreadId,
    pub level: LockLevel,
    pub seq: u64,
    /// Time spent in the queue so far
    #[serde(with = "humantime_serde")]
    pub queued_for: Duration,
    pub bounded: bool,
    pub reacquire: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterSnapshot {
    pub thread: ServerThreadId,
    pub level: LockLevel,
    pub seq: u64,
    /// Time left before the wait times out
    #[serde(default, with = "humantime_serde")]
    pub remaining: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub node: NodeId,
    pub level: LockLevel,
    pub recall_in_flight: bool,
}

/// Everything known about one lock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub lock: LockId,
    pub holders: Vec<Grant>,
    pub pending: Vec<PendingSnapshot>,
    pub waiters: Vec<WaiterSnapshot>,
    pub lease: Option<LeaseSnapshot>,
    pub demoted: bool,
}

impl LockSnapshot {
    pub fn is_held_by(&self, thread: ServerThreadId) -> bool {
        self.holders.iter().any(|g| g.thread == thread)
    }

    pub fn is_pending(&self, thread: ServerThreadId) -> bool {
        self.pending.iter().any(|p| p.thread == thread)
    }

    pub fn is_waiting(&self, thread: ServerThreadId) -> bool {
        self.waiters.iter().any(|w| w.thread == thread)
    }

    /// Longest time any request has been queued
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.pending.iter().map(|p| p.queued_for).max()
    }
}
