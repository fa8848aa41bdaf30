// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers shared by every node and the lock server
//!
//! All identifiers are immutable values with a total order. The order of
//! [`ServerThreadId`] is node first, then thread, and is what deadlock
//! resolution uses to pick a victim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide identity of a lock
///
/// The same `LockId` names the same lock on every node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LockId {
    /// Monitor of a shared object, keyed by its object id
    Object(u64),
    /// Explicitly named lock
    Named(String),
    /// Lock on a literal value (interned strings, boxed primitives)
    Literal(String),
}

impl LockId {
    pub fn object(id: u64) -> Self {
        LockId::Object(id)
    }

    pub fn named(name: impl Into<String>) -> Self {
        LockId::Named(name.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        LockId::Literal(value.into())
    }

    /// Object id backing this lock, if it is an object monitor
    pub fn object_id(&self) -> Option<u64> {
        match self {
            LockId::Object(id) => Some(*id),
            LockId::Named(_) | LockId::Literal(_) => None,
        }
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockId::Object(id) => write!(f, "object:{}", id),
            LockId::Named(name) => write!(f, "named:{}", name),
            LockId::Literal(value) => write!(f, "literal:{}", value),
        }
    }
}

/// A client process connected to the server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A thread within one node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// Reserved id standing for the node as a whole; greedy grants are held by it
    pub const NODE: ThreadId = ThreadId(0);

    pub fn is_node(&self) -> bool {
        *self == ThreadId::NODE
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_node() {
            write!(f, "thread-node")
        } else {
            write!(f, "thread-{}", self.0)
        }
    }
}

/// One blocking call site, cluster-wide
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerThreadId {
    pub node: NodeId,
    pub thread: ThreadId,
}

impl ServerThreadId {
    pub fn new(node: NodeId, thread: ThreadId) -> Self {
        Self { node, thread }
    }

    /// The node-level identity that holds a greedy lease
    pub fn lease_holder(node: NodeId) -> Self {
        Self {
            node,
            thread: ThreadId::NODE,
        }
    }

    pub fn is_lease_holder(&self) -> bool {
        self.thread.is_node()
    }
}

impl fmt::Display for ServerThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.thread)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
