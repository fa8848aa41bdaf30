// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band termination of blocking lock calls
//!
//! A blocking call brackets itself with [`AbortableOperationManager::begin`]
//! and [`AbortableOperationManager::finish`]. In between, a disconnect handler
//! or the deadlock resolver may call [`AbortableOperationManager::abort`],
//! which wakes the caller's [`AbortSignal`].

use crate::error::LockError;
use crate::id::{NodeId, ServerThreadId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationState {
    Init,
    Aborted,
}

#[derive(Debug)]
struct Entry {
    state: OperationState,
    wake: Arc<Notify>,
}

/// Resolves once the registered operation is aborted
#[derive(Debug, Clone)]
pub struct AbortSignal {
    wake: Arc<Notify>,
}

impl AbortSignal {
    pub async fn aborted(&self) {
        self.wake.notified().await;
    }
}

/// Table of in-flight blocking operations keyed by thread
#[derive(Debug, Default)]
pub struct AbortableOperationManager {
    operations: Mutex<HashMap<ServerThreadId, Entry>>,
}

impl AbortableOperationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocking operation for `thread`
    pub fn begin(&self, thread: ServerThreadId) -> Result<AbortSignal, LockError> {
        let mut operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        if operations.contains_key(&thread) {
            return Err(LockError::Protocol(format!(
                "{} already has an abortable operation",
                thread
            )));
        }
        let wake = Arc::new(Notify::new());
        operations.insert(
            thread,
            Entry {
                state: OperationState::Init,
                wake: Arc::clone(&wake),
            },
        );
        Ok(AbortSignal { wake })
    }

    /// Deregister `thread`; returns whether it was aborted
    pub fn finish(&self, thread: ServerThreadId) -> Result<bool, LockError> {
        let mut operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        match operations.remove(&thread) {
            Some(entry) => Ok(entry.state == OperationState::Aborted),
            None => Err(LockError::Protocol(format!(
                "{} has no abortable operation to finish",
                thread
            ))),
        }
    }

    /// Mark `thread` aborted and wake it. Aborting twice is harmless.
    pub fn abort(&self, thread: ServerThreadId) -> Result<(), LockError> {
        let mut operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = operations.get_mut(&thread) else {
            return Err(LockError::Protocol(format!(
                "{} has no abortable operation to abort",
                thread
            )));
        };
        if entry.state == OperationState::Init {
            entry.state = OperationState::Aborted;
            entry.wake.notify_one();
            tracing::info!(%thread, "operation aborted");
        }
        Ok(())
    }

    pub fn is_aborted(&self, thread: ServerThreadId) -> bool {
        let operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        operations
            .get(&thread)
            .is_some_and(|e| e.state == OperationState::Aborted)
    }

    pub fn is_registered(&self, thread: ServerThreadId) -> bool {
        let operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        operations.contains_key(&thread)
    }

    /// Threads of `node` with a registered operation
    pub fn registered_on(&self, node: NodeId) -> Vec<ServerThreadId> {
        let operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        let mut threads: Vec<_> = operations
            .keys()
            .filter(|t| t.node == node)
            .copied()
            .collect();
        threads.sort();
        threads
    }
}

#[cfg(test)]
#[path = "abort_tests.rs"]
mod tests;
