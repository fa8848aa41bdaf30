// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Side effects requested by the lock state machine
//!
//! A `ServerLock` never talks to the network or the timer directly. It returns
//! effects that the manager applies while still holding the lock's mutex.

use crate::id::{LockId, NodeId, ServerThreadId};
use crate::message::LockResponse;
use std::fmt;
use std::time::Duration;

/// Identity of one scheduled timeout
///
/// `seq` is the arrival sequence of the request or waiter that owns the timer,
/// so a timer left over from an earlier wait never matches a later one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub lock: LockId,
    pub thread: ServerThreadId,
    pub seq: u64,
}

impl TimerKey {
    pub fn new(lock: LockId, thread: ServerThreadId, seq: u64) -> Self {
        Self { lock, thread, seq }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.thread, self.lock, self.seq)
    }
}

/// Effects that lock transitions request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEffect {
    /// Deliver a response to a node
    Send { to: NodeId, response: LockResponse },
    /// Arm a timeout
    ScheduleTimer { key: TimerKey, delay: Duration },
    /// Disarm a timeout
    CancelTimer { key: TimerKey },
}

impl LockEffect {
    pub fn send(to: NodeId, response: LockResponse) -> Self {
        LockEffect::Send { to, response }
    }

    /// The response carried by a `Send`, if this is one
    pub fn response(&self) -> Option<&LockResponse> {
        match self {
            LockEffect::Send { response, .. } => Some(response),
            LockEffect::ScheduleTimer { .. } | LockEffect::CancelTimer { .. } => None,
        }
    }
}
