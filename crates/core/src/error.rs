// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for lock operations

use crate::id::{LockId, ServerThreadId};
use crate::level::{LockLevel, LockView};
use crate::manager::ManagerState;
use thiserror::Error;

/// Errors returned by lock operations
///
/// Everything except `Aborted` and `NotRunning` is a bug in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("{thread} does not hold {lock} for write")]
    IllegalMonitorState { lock: LockId, thread: ServerThreadId },

    #[error("lock upgrade is not supported: {thread} holds {lock} for read")]
    UpgradeNotSupported { lock: LockId, thread: ServerThreadId },

    #[error("{thread} already holds {lock} for {level}")]
    AlreadyHeld {
        lock: LockId,
        thread: ServerThreadId,
        level: LockLevel,
    },

    #[error("{thread} is already waiting on {lock}")]
    AlreadyWaiting { lock: LockId, thread: ServerThreadId },

    #[error("{lock} is in use as {held:?}, cannot request {requested}")]
    MixedLockView {
        lock: LockId,
        held: LockView,
        requested: LockLevel,
    },

    #[error("operation aborted for {0}")]
    Aborted(ServerThreadId),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("lock manager is not running ({0})")]
    NotRunning(ManagerState),
}
