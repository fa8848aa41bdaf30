// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bookkeeping records held by a server lock

use crate::effect::TimerKey;
use crate::id::{NodeId, ServerThreadId};
use crate::level::{LeaseKind, LockLevel};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// An active grant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub thread: ServerThreadId,
    pub level: LockLevel,
    pub lease: LeaseKind,
}

impl Grant {
    pub fn direct(thread: ServerThreadId, level: LockLevel) -> Self {
        Self {
            thread,
            level,
            lease: LeaseKind::Direct,
        }
    }

    /// The grant standing for a node-wide lease
    pub fn greedy(node: NodeId, level: LockLevel) -> Self {
        Self {
            thread: ServerThreadId::lease_holder(node),
            level,
            lease: LeaseKind::Greedy,
        }
    }
}

/// A queued acquire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub thread: ServerThreadId,
    pub level: LockLevel,
    /// Arrival sequence; the queue is ordered by it
    pub seq: u64,
    pub queued_at: Instant,
    /// Set for bounded acquires
    pub timer: Option<TimerKey>,
    /// Re-acquire after leaving the wait set
    pub reacquire: bool,
}

/// A thread in the wait set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Waiter {
    pub thread: ServerThreadId,
    /// Level re-acquired once woken
    pub level: LockLevel,
    pub seq: u64,
    pub deadline: Option<Instant>,
    pub timer: Option<TimerKey>,
}

/// A node-wide delegation of a lock
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GreedyLease {
    pub node: NodeId,
    pub level: LockLevel,
    pub recall_in_flight: bool,
    /// Sequence of the request that triggered the outstanding recall
    pub recall_seq: Option<u64>,
}

impl GreedyLease {
    pub fn new(node: NodeId, level: LockLevel) -> Self {
        Self {
            node,
            level,
            recall_in_flight: false,
            recall_seq: None,
        }
    }
}
