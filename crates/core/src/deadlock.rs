// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-node deadlock detection
//!
//! Every queued request is an edge from the waiting thread to each current
//! holder of the lock it waits for. A cycle in that graph is a deadlock.
//! Threads holding through a greedy lease appear only as their node's lease
//! identity, which never waits, so cycles through lease holders are not seen
//! here.

use crate::id::{LockId, ServerThreadId};
use crate::lock::LockSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One edge of a deadlock cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub waiter: ServerThreadId,
    pub waiting_on: LockId,
}

/// A wait-for cycle
///
/// Each link's lock is held by the next link's waiter; the last link's lock
/// is held by the first link's waiter. The first link's waiter is the victim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockChain {
    pub links: Vec<ChainLink>,
    pub victim: ServerThreadId,
}

impl DeadlockChain {
    /// The lock the victim is blocked on
    pub fn victim_lock(&self) -> Option<&LockId> {
        self.links
            .iter()
            .find(|link| link.waiter == self.victim)
            .map(|link| &link.waiting_on)
    }
}

impl fmt::Display for DeadlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, link) in self.links.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{} waits on {}", link.waiter, link.waiting_on)?;
        }
        Ok(())
    }
}

type WaitGraph = BTreeMap<ServerThreadId, (LockId, Vec<ServerThreadId>)>;

fn build_graph(snapshots: &[LockSnapshot]) -> WaitGraph {
    let mut graph = WaitGraph::new();
    for snapshot in snapshots {
        for pending in &snapshot.pending {
            let mut holders: Vec<_> = snapshot
                .holders
                .iter()
                .map(|g| g.thread)
                .filter(|t| *t != pending.thread)
                .collect();
            holders.sort();
            holders.dedup();
            graph
                .entry(pending.thread)
                .or_insert_with(|| (snapshot.lock.clone(), holders));
        }
    }
    graph
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

fn visit(
    node: ServerThreadId,
    graph: &WaitGraph,
    marks: &mut HashMap<ServerThreadId, Visit>,
    path: &mut Vec<ServerThreadId>,
) -> Option<Vec<ServerThreadId>> {
    marks.insert(node, Visit::InProgress);
    path.push(node);

    if let Some((_, targets)) = graph.get(&node) {
        for &next in targets {
            match marks.get(&next) {
                Some(Visit::InProgress) => {
                    let start = path.iter().position(|t| *t == next)?;
                    return Some(path[start..].to_vec());
                }
                Some(Visit::Done) => {}
                None => {
                    if let Some(cycle) = visit(next, graph, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    path.pop();
    marks.insert(node, Visit::Done);
    None
}

fn find_cycle(graph: &WaitGraph) -> Option<Vec<ServerThreadId>> {
    let mut marks = HashMap::new();
    for &start in graph.keys() {
        if marks.contains_key(&start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(start, graph, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Find every deadlock in a consistent set of snapshots
///
/// Cycles are found in thread order; the smallest thread of each cycle is
/// chosen as victim and removed before looking for the next one.
pub fn find_deadlocks(snapshots: &[LockSnapshot]) -> Vec<DeadlockChain> {
    let mut graph = build_graph(snapshots);
    let mut chains = Vec::new();

    while let Some(mut cycle) = find_cycle(&graph) {
        let Some(victim) = cycle.iter().min().copied() else {
            break;
        };
        if let Some(pos) = cycle.iter().position(|t| *t == victim) {
            cycle.rotate_left(pos);
        }

        let links = cycle
            .iter()
            .filter_map(|thread| {
                graph.get(thread).map(|(lock, _)| ChainLink {
                    waiter: *thread,
                    waiting_on: lock.clone(),
                })
            })
            .collect();
        graph.remove(&victim);
        chains.push(DeadlockChain { links, victim });
    }

    chains
}

#[cfg(test)]
#[path = "deadlock_tests.rs"]
mod tests;
