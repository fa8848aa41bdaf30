// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery of server responses to nodes

use crate::id::NodeId;
use crate::message::LockResponse;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Outbound channel to connected nodes
///
/// Called while a lock's mutex is held, so implementations must not block.
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, to: NodeId, response: LockResponse);
}

/// Routes responses to per-node unbounded channels
#[derive(Debug, Default)]
pub struct NodeRouter {
    nodes: Mutex<HashMap<NodeId, mpsc::UnboundedSender<LockResponse>>>,
}

impl NodeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node`, replacing any previous channel
    pub fn register(&self, node: NodeId) -> mpsc::UnboundedReceiver<LockResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        if nodes.insert(node, tx).is_some() {
            tracing::warn!(%node, "node re-registered, previous channel dropped");
        }
        rx
    }

    /// Attach `node` only if nothing is attached under that id yet
    pub fn try_register(&self, node: NodeId) -> Option<mpsc::UnboundedReceiver<LockResponse>> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        if nodes.contains_key(&node) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        nodes.insert(node, tx);
        Some(rx)
    }

    pub fn unregister(&self, node: NodeId) {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.remove(&node);
    }

    pub fn is_registered(&self, node: NodeId) -> bool {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.contains_key(&node)
    }
}

impl ResponseSink for NodeRouter {
    fn deliver(&self, to: NodeId, response: LockResponse) {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        match nodes.get(&to) {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!(node = %to, "node channel closed, response dropped");
                }
            }
            None => tracing::debug!(node = %to, "no route to node, response dropped"),
        }
    }
}

/// Records every delivery for inspection in tests
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(NodeId, LockResponse)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything delivered so far
    pub fn take(&self) -> Vec<(NodeId, LockResponse)> {
        let mut delivered = self.delivered.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *delivered)
    }

    /// Drain the responses delivered to `node`, leaving the rest
    pub fn take_for(&self, node: NodeId) -> Vec<LockResponse> {
        let mut delivered = self.delivered.lock().unwrap_or_else(|e| e.into_inner());
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *delivered)
            .into_iter()
            .partition(|(to, _)| *to == node);
        *delivered = rest;
        mine.into_iter().map(|(_, response)| response).collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ResponseSink for RecordingSink {
    fn deliver(&self, to: NodeId, response: LockResponse) {
        let mut delivered = self.delivered.lock().unwrap_or_else(|e| e.into_inner());
        delivered.push((to, response));
    }
}
