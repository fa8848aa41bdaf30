// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages exchanged between nodes and the lock server
//!
//! Only the logical shape is fixed here; framing belongs to the transport.

use crate::id::{LockId, NodeId, ServerThreadId, ThreadId};
use crate::level::{LeaseKind, LockLevel};
use crate::lock::LockSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request sent by a node to the lock server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Acquire `lock`. `timeout` of `None` blocks indefinitely; zero is a try-lock.
    Lock {
        lock: LockId,
        thread: ServerThreadId,
        level: LockLevel,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
    Unlock {
        lock: LockId,
        thread: ServerThreadId,
    },
    Wait {
        lock: LockId,
        thread: ServerThreadId,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
    Notify {
        lock: LockId,
        thread: ServerThreadId,
        all: bool,
    },
    /// Application-level interrupt of a waiting thread
    Interrupt {
        lock: LockId,
        thread: ServerThreadId,
    },
    /// Lease holder hands the lock back after a recall (or voluntarily)
    RecallComplete {
        lock: LockId,
        node: NodeId,
        #[serde(default)]
        pending: Vec<PendingTransfer>,
        #[serde(default)]
        waiters: Vec<WaiterTransfer>,
    },
    Query {
        lock: LockId,
        node: NodeId,
    },
}

impl ClientMessage {
    pub fn lock(lock: LockId, thread: ServerThreadId, level: LockLevel) -> Self {
        ClientMessage::Lock {
            lock,
            thread,
            level,
            timeout: None,
        }
    }

    pub fn try_lock(
        lock: LockId,
        thread: ServerThreadId,
        level: LockLevel,
        timeout: Duration,
    ) -> Self {
        ClientMessage::Lock {
            lock,
            thread,
            level,
            timeout: Some(timeout),
        }
    }

    pub fn unlock(lock: LockId, thread: ServerThreadId) -> Self {
        ClientMessage::Unlock { lock, thread }
    }

    pub fn wait(lock: LockId, thread: ServerThreadId, timeout: Option<Duration>) -> Self {
        ClientMessage::Wait {
            lock,
            thread,
            timeout,
        }
    }

    pub fn notify(lock: LockId, thread: ServerThreadId, all: bool) -> Self {
        ClientMessage::Notify { lock, thread, all }
    }

    pub fn lock_id(&self) -> &LockId {
        match self {
            ClientMessage::Lock { lock, .. }
            | ClientMessage::Unlock { lock, .. }
            | ClientMessage::Wait { lock, .. }
            | ClientMessage::Notify { lock, .. }
            | ClientMessage::Interrupt { lock, .. }
            | ClientMessage::RecallComplete { lock, .. }
            | ClientMessage::Query { lock, .. } => lock,
        }
    }

    /// Node the message came from
    pub fn node(&self) -> NodeId {
        match self {
            ClientMessage::Lock { thread, .. }
            | ClientMessage::Unlock { thread, .. }
            | ClientMessage::Wait { thread, .. }
            | ClientMessage::Notify { thread, .. }
            | ClientMessage::Interrupt { thread, .. } => thread.node,
            ClientMessage::RecallComplete { node, .. } | ClientMessage::Query { node, .. } => *node,
        }
    }
}

/// A request still queued on the lease holder when it was recalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub thread: ThreadId,
    pub level: LockLevel,
}

/// A thread waiting locally on the lease holder when it was recalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterTransfer {
    pub thread: ThreadId,
    pub level: LockLevel,
    /// Time left before the wait times out
    #[serde(default, with = "humantime_serde")]
    pub remaining: Option<Duration>,
}

/// Why a lock request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Try-lock with no timeout could not be granted at once
    WouldBlock,
    /// Bounded acquire expired while queued
    TimedOut,
}

/// Why a waiting thread left the wait set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    Notified,
    TimedOut,
    Interrupted,
    Aborted,
}

/// Message sent by the lock server to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockResponse {
    Granted {
        lock: LockId,
        thread: ServerThreadId,
        level: LockLevel,
        lease: LeaseKind,
    },
    Denied {
        lock: LockId,
        thread: ServerThreadId,
        level: LockLevel,
        reason: DenyReason,
    },
    /// The thread left the wait set; unless aborted, a `Granted` follows
    WaitWoken {
        lock: LockId,
        thread: ServerThreadId,
        reason: WakeReason,
    },
    /// Acknowledges a notify with the threads it moved out of the wait set
    Notified {
        lock: LockId,
        thread: ServerThreadId,
        waiters: Vec<ServerThreadId>,
    },
    /// Server asks the lease holder to give the lock back
    Recall {
        lock: LockId,
        node: NodeId,
        level: LockLevel,
    },
    /// A queued acquire was aborted; nothing is held
    Aborted {
        lock: LockId,
        thread: ServerThreadId,
    },
    LockInfo {
        lock: LockId,
        snapshot: Option<LockSnapshot>,
    },
    Error {
        thread: Option<ServerThreadId>,
        message: String,
    },
}

impl LockResponse {
    /// The thread this response is addressed to, if it targets one
    pub fn thread(&self) -> Option<ServerThreadId> {
        match self {
            LockResponse::Granted { thread, .. }
            | LockResponse::Denied { thread, .. }
            | LockResponse::WaitWoken { thread, .. }
            | LockResponse::Notified { thread, .. }
            | LockResponse::Aborted { thread, .. } => Some(*thread),
            LockResponse::Error { thread, .. } => *thread,
            LockResponse::Recall { .. } | LockResponse::LockInfo { .. } => None,
        }
    }
}
