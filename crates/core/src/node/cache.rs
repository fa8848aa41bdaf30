// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Greedy leases as seen from the node that holds them
//!
//! While a node holds a lease its threads lock and unlock locally without
//! talking to the server. When the server recalls the lease the cache stops
//! granting, lets current holders drain, and hands every queued request and
//! waiter back in a `RecallComplete`.

use crate::error::LockError;
use crate::id::{LockId, NodeId, ServerThreadId, ThreadId};
use crate::level::{LeaseKind, LockLevel};
use crate::message::{
    ClientMessage, DenyReason, LockResponse, PendingTransfer, WaiterTransfer, WakeReason,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Side effect of a cache operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEffect {
    /// Response for a thread on this node
    Local(LockResponse),
    /// Message for the lock server
    Server(ClientMessage),
}

#[derive(Debug, Clone)]
struct LocalRequest {
    thread: ThreadId,
    level: LockLevel,
    seq: u64,
}

#[derive(Debug, Clone)]
struct LocalWaiter {
    thread: ThreadId,
    level: LockLevel,
    seq: u64,
    deadline: Option<Instant>,
}

#[derive(Debug)]
struct LocalLease {
    level: LockLevel,
    holders: Vec<(ThreadId, LockLevel)>,
    pending: VecDeque<LocalRequest>,
    waiters: Vec<LocalWaiter>,
    recalled: bool,
    next_seq: u64,
}

impl LocalLease {
    fn new(level: LockLevel) -> Self {
        Self {
            level,
            holders: Vec::new(),
            pending: VecDeque::new(),
            waiters: Vec::new(),
            recalled: false,
            next_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn held_level(&self, thread: ThreadId) -> Option<LockLevel> {
        self.holders
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, level)| *level)
    }

    fn compatible(&self, level: LockLevel) -> bool {
        self.holders
            .iter()
            .all(|(_, held)| held.is_compatible_with(level))
    }

    fn requeue(&mut self, waiter: LocalWaiter) {
        let at = self.pending.partition_point(|r| r.seq < waiter.seq);
        self.pending.insert(
            at,
            LocalRequest {
                thread: waiter.thread,
                level: waiter.level,
                seq: waiter.seq,
            },
        );
    }
}

/// Per-node table of greedy leases
#[derive(Debug)]
pub struct NodeLockCache {
    node: NodeId,
    leases: HashMap<LockId, LocalLease>,
}

impl NodeLockCache {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            leases: HashMap::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Level of the lease held on `lock`, if any
    pub fn lease(&self, lock: &LockId) -> Option<LockLevel> {
        self.leases.get(lock).map(|l| l.level)
    }

    pub fn is_recalled(&self, lock: &LockId) -> bool {
        self.leases.get(lock).is_some_and(|l| l.recalled)
    }

    /// Threads holding `lock` under the local lease
    pub fn local_holders(&self, lock: &LockId) -> Vec<ThreadId> {
        self.leases
            .get(lock)
            .map(|l| l.holders.iter().map(|(t, _)| *t).collect())
            .unwrap_or_default()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Record a greedy grant from the server
    ///
    /// A grant that opens the lease goes straight to the thread. One that
    /// arrives under a lease already held was issued without arbitration,
    /// so it joins the local queue unless it can be granted at once. The
    /// response to deliver is returned; `None` means it was queued and the
    /// grant will come from a later release.
    pub fn lease_granted(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        level: LockLevel,
    ) -> Option<LockResponse> {
        let sid = ServerThreadId::new(self.node, thread);
        let Some(lease) = self.leases.get_mut(lock) else {
            let mut lease = LocalLease::new(level);
            lease.holders.push((thread, level));
            self.leases.insert(lock.clone(), lease);
            debug!(%lock, %thread, %level, "lease opened");
            return Some(granted(lock, sid, level));
        };

        if level.covers(lease.level) {
            lease.level = level;
        }
        if let Some(at) = lease.holders.iter().position(|(t, _)| *t == thread) {
            lease.holders[at].1 = level;
            return Some(granted(lock, sid, level));
        }
        if lease.pending.iter().any(|r| r.thread == thread) {
            debug!(%lock, %thread, "grant for a locally queued thread ignored");
            return None;
        }
        if !lease.recalled && lease.pending.is_empty() && lease.compatible(level) {
            lease.holders.push((thread, level));
            debug!(%lock, %thread, %level, "lease grant recorded");
            return Some(granted(lock, sid, level));
        }
        let seq = lease.next_seq();
        lease.pending.push_back(LocalRequest { thread, level, seq });
        debug!(%lock, %thread, %level, seq, "lease grant queued locally");
        None
    }

    /// Try to acquire under the local lease
    ///
    /// `None` means the server must be asked. An empty effect list means the
    /// request was queued locally and its grant will follow.
    pub fn acquire(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        level: LockLevel,
        try_only: bool,
        now: Instant,
    ) -> Result<Option<Vec<CacheEffect>>, LockError> {
        let node = self.node;
        let Some(lease) = self.leases.get_mut(lock) else {
            return Ok(None);
        };
        let sid = ServerThreadId::new(node, thread);

        if let Some(held) = lease.held_level(thread) {
            return match (held, level) {
                (LockLevel::Write, LockLevel::Read) => {
                    for (t, l) in lease.holders.iter_mut() {
                        if *t == thread {
                            *l = LockLevel::Read;
                        }
                    }
                    let mut effects = vec![CacheEffect::Local(granted(lock, sid, level))];
                    effects.extend(cascade(node, lock, &mut self.leases, now));
                    Ok(Some(effects))
                }
                (LockLevel::Read, LockLevel::Write) => Err(LockError::UpgradeNotSupported {
                    lock: lock.clone(),
                    thread: sid,
                }),
                _ => Err(LockError::AlreadyHeld {
                    lock: lock.clone(),
                    thread: sid,
                    level: held,
                }),
            };
        }
        if lease.waiters.iter().any(|w| w.thread == thread) {
            return Err(LockError::AlreadyWaiting {
                lock: lock.clone(),
                thread: sid,
            });
        }
        if lease.pending.iter().any(|r| r.thread == thread) {
            return Ok(Some(Vec::new()));
        }
        if !lease.recalled && !lease.level.covers(level) {
            return Ok(None);
        }
        if !lease.recalled && lease.pending.is_empty() && lease.compatible(level) {
            lease.holders.push((thread, level));
            return Ok(Some(vec![CacheEffect::Local(granted(lock, sid, level))]));
        }
        if try_only {
            return Ok(Some(vec![CacheEffect::Local(LockResponse::Denied {
                lock: lock.clone(),
                thread: sid,
                level,
                reason: DenyReason::WouldBlock,
            })]));
        }
        let seq = lease.next_seq();
        lease.pending.push_back(LocalRequest { thread, level, seq });
        Ok(Some(Vec::new()))
    }

    /// Release a lock held under the local lease; `None` if the server holds it
    pub fn release(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        now: Instant,
    ) -> Option<Vec<CacheEffect>> {
        let lease = self.leases.get_mut(lock)?;
        let at = lease.holders.iter().position(|(t, _)| *t == thread)?;
        lease.holders.remove(at);
        Some(cascade(self.node, lock, &mut self.leases, now))
    }

    /// Give up the lease on `lock` without being asked
    pub fn surrender(&mut self, lock: &LockId, now: Instant) -> Vec<CacheEffect> {
        self.recall(lock, now)
    }

    /// Handle a recall from the server
    ///
    /// Completes at once when nobody holds the lock locally, otherwise after
    /// the last local holder releases.
    pub fn recall(&mut self, lock: &LockId, now: Instant) -> Vec<CacheEffect> {
        let Some(lease) = self.leases.get_mut(lock) else {
            debug!(%lock, "recall for a lease no longer held");
            return vec![CacheEffect::Server(ClientMessage::RecallComplete {
                lock: lock.clone(),
                node: self.node,
                pending: Vec::new(),
                waiters: Vec::new(),
            })];
        };
        lease.recalled = true;
        cascade(self.node, lock, &mut self.leases, now)
    }

    /// Move a local write holder into the wait set; `None` if the server holds it
    pub fn wait(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        timeout: Option<Duration>,
        now: Instant,
    ) -> Result<Option<Vec<CacheEffect>>, LockError> {
        let Some(lease) = self.leases.get_mut(lock) else {
            return Ok(None);
        };
        let Some(at) = lease.holders.iter().position(|(t, _)| *t == thread) else {
            return Ok(None);
        };
        let (_, level) = lease.holders[at];
        if level != LockLevel::Write {
            return Err(LockError::IllegalMonitorState {
                lock: lock.clone(),
                thread: ServerThreadId::new(self.node, thread),
            });
        }
        lease.holders.remove(at);
        let seq = lease.next_seq();
        lease.waiters.push(LocalWaiter {
            thread,
            level,
            seq,
            deadline: timeout.and_then(|d| now.checked_add(d)),
        });
        Ok(Some(cascade(self.node, lock, &mut self.leases, now)))
    }

    /// Wake one or all local waiters; `None` if the server holds the lock
    pub fn notify(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        all: bool,
    ) -> Result<Option<Vec<CacheEffect>>, LockError> {
        let node = self.node;
        let Some(lease) = self.leases.get_mut(lock) else {
            return Ok(None);
        };
        let sid = ServerThreadId::new(node, thread);
        match lease.held_level(thread) {
            None => return Ok(None),
            Some(LockLevel::Write) => {}
            Some(_) => {
                return Err(LockError::IllegalMonitorState {
                    lock: lock.clone(),
                    thread: sid,
                })
            }
        }

        let count = if all { lease.waiters.len() } else { lease.waiters.len().min(1) };
        let woken: Vec<LocalWaiter> = lease.waiters.drain(..count).collect();
        let mut effects = Vec::with_capacity(woken.len() + 1);
        let mut notified = Vec::with_capacity(woken.len());
        for waiter in woken {
            let waiter_id = ServerThreadId::new(node, waiter.thread);
            notified.push(waiter_id);
            effects.push(CacheEffect::Local(LockResponse::WaitWoken {
                lock: lock.clone(),
                thread: waiter_id,
                reason: WakeReason::Notified,
            }));
            lease.requeue(waiter);
        }
        effects.push(CacheEffect::Local(LockResponse::Notified {
            lock: lock.clone(),
            thread: sid,
            waiters: notified,
        }));
        Ok(Some(effects))
    }

    /// Interrupt a local waiter; `None` if it is not waiting here
    pub fn interrupt(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        now: Instant,
    ) -> Option<Vec<CacheEffect>> {
        let lease = self.leases.get_mut(lock)?;
        let at = lease.waiters.iter().position(|w| w.thread == thread)?;
        let waiter = lease.waiters.remove(at);
        lease.requeue(waiter);
        let mut effects = vec![CacheEffect::Local(LockResponse::WaitWoken {
            lock: lock.clone(),
            thread: ServerThreadId::new(self.node, thread),
            reason: WakeReason::Interrupted,
        })];
        effects.extend(cascade(self.node, lock, &mut self.leases, now));
        Some(effects)
    }

    /// Time out every local waiter whose deadline has passed
    pub fn expire_waiters(&mut self, now: Instant) -> Vec<CacheEffect> {
        let expired: Vec<LockId> = self
            .leases
            .iter()
            .filter(|(_, l)| l.waiters.iter().any(|w| w.deadline.is_some_and(|d| d <= now)))
            .map(|(id, _)| id.clone())
            .collect();

        let mut effects = Vec::new();
        for lock in expired {
            let Some(lease) = self.leases.get_mut(&lock) else {
                continue;
            };
            let (due, kept): (Vec<_>, Vec<_>) = lease
                .waiters
                .drain(..)
                .partition(|w| w.deadline.is_some_and(|d| d <= now));
            lease.waiters = kept;
            for waiter in due {
                effects.push(CacheEffect::Local(LockResponse::WaitWoken {
                    lock: lock.clone(),
                    thread: ServerThreadId::new(self.node, waiter.thread),
                    reason: WakeReason::TimedOut,
                }));
                lease.requeue(waiter);
            }
            effects.extend(cascade(self.node, &lock, &mut self.leases, now));
        }
        effects
    }

    /// Withdraw a queued request or wait of `thread`
    ///
    /// Returns `None` when the thread has nothing queued here, which means
    /// its grant has already been issued or the server owns the request.
    pub fn cancel(
        &mut self,
        lock: &LockId,
        thread: ThreadId,
        now: Instant,
    ) -> Option<Vec<CacheEffect>> {
        let lease = self.leases.get_mut(lock)?;
        if let Some(at) = lease.pending.iter().position(|r| r.thread == thread) {
            lease.pending.remove(at);
        } else if let Some(at) = lease.waiters.iter().position(|w| w.thread == thread) {
            lease.waiters.remove(at);
        } else {
            return None;
        }
        Some(cascade(self.node, lock, &mut self.leases, now))
    }
}

fn granted(lock: &LockId, thread: ServerThreadId, level: LockLevel) -> LockResponse {
    LockResponse::Granted {
        lock: lock.clone(),
        thread,
        level,
        lease: LeaseKind::Greedy,
    }
}

/// Grant what the lease allows, or finish a recall once holders drain
fn cascade(
    node: NodeId,
    lock: &LockId,
    leases: &mut HashMap<LockId, LocalLease>,
    now: Instant,
) -> Vec<CacheEffect> {
    let Some(lease) = leases.get_mut(lock) else {
        return Vec::new();
    };
    let mut effects = Vec::new();

    if !lease.recalled {
        while let Some(head) = lease.pending.front() {
            if !lease.level.covers(head.level) || !lease.compatible(head.level) {
                break;
            }
            let Some(head) = lease.pending.pop_front() else {
                break;
            };
            lease.holders.push((head.thread, head.level));
            effects.push(CacheEffect::Local(granted(
                lock,
                ServerThreadId::new(node, head.thread),
                head.level,
            )));
        }
        return effects;
    }

    if !lease.holders.is_empty() {
        return effects;
    }

    let Some(lease) = leases.remove(lock) else {
        return effects;
    };
    let pending = lease
        .pending
        .iter()
        .map(|r| PendingTransfer {
            thread: r.thread,
            level: r.level,
        })
        .collect();
    let waiters = lease
        .waiters
        .iter()
        .map(|w| WaiterTransfer {
            thread: w.thread,
            level: w.level,
            remaining: w.deadline.map(|d| d.saturating_duration_since(now)),
        })
        .collect();
    debug!(%lock, "lease handed back");
    effects.push(CacheEffect::Server(ClientMessage::RecallComplete {
        lock: lock.clone(),
        node,
        pending,
        waiters,
    }));
    effects
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
