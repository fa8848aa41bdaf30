// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node object-reachability, consulted before recalling a lease

use crate::id::{LockId, NodeId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Answers whether a node may still hold local state for a lock
///
/// A node that no longer references a lock's object cannot hold it locally,
/// so its lease can be reclaimed without a recall round trip.
pub trait ClientStateManager: Send + Sync {
    fn references(&self, node: NodeId, lock: &LockId) -> bool;
}

/// Assumes every node references everything; always recalls
#[derive(Clone, Copy, Debug, Default)]
pub struct NoClientState;

impl ClientStateManager for NoClientState {
    fn references(&self, _node: NodeId, _lock: &LockId) -> bool {
        true
    }
}

/// Reference table fed by the object layer
///
/// Only object locks are tracked; named and literal locks are always
/// considered referenced.
#[derive(Debug, Default)]
pub struct InMemoryClientState {
    objects: RwLock<HashMap<NodeId, HashSet<u64>>>,
}

impl InMemoryClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reference(&self, node: NodeId, object: u64) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.entry(node).or_default().insert(object);
    }

    pub fn remove_reference(&self, node: NodeId, object: u64) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = objects.get_mut(&node) {
            set.remove(&object);
        }
    }

    pub fn remove_node(&self, node: NodeId) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.remove(&node);
    }
}

impl ClientStateManager for InMemoryClientState {
    fn references(&self, node: NodeId, lock: &LockId) -> bool {
        let Some(object) = lock.object_id() else {
            return true;
        };
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(&node).is_some_and(|set| set.contains(&object))
    }
}
