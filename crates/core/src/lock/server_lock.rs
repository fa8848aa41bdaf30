// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Grant, release, wait and notify for one lock

use super::context::{Grant, GreedyLease, Request, Waiter};
use super::snapshot::{LeaseSnapshot, LockSnapshot, PendingSnapshot, WaiterSnapshot};
use super::thrash::ThrashWindow;
use crate::client_state::ClientStateManager;
use crate::config::RecallMerge;
use crate::effect::{LockEffect, TimerKey};
use crate::error::LockError;
use crate::id::{LockId, NodeId, ServerThreadId};
use crate::level::{LeaseKind, LockLevel, LockView};
use crate::message::{DenyReason, LockResponse, PendingTransfer, WaiterTransfer, WakeReason};
use crate::policy::LockPolicy;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Inputs every transition needs besides the lock itself
#[derive(Clone, Copy)]
pub struct LockEnv<'a> {
    pub now: Instant,
    pub policy: &'a LockPolicy,
    pub default_wait_timeout: Option<Duration>,
    pub client_state: &'a dyn ClientStateManager,
}

/// State of one lock on the server
///
/// Invariants kept by every operation:
/// - `pending` is ordered by `seq`, and its head is not compatible with the
///   holders (otherwise it would have been granted);
/// - at most one lease exists, and its only grant is held by the lease
///   holder identity of its node;
/// - a thread appears at most once across holders, pending and waiters.
#[derive(Debug, Clone)]
pub struct ServerLock {
    id: LockId,
    holders: Vec<Grant>,
    pending: VecDeque<Request>,
    waiters: Vec<Waiter>,
    lease: Option<GreedyLease>,
    thrash: ThrashWindow,
    next_seq: u64,
}

impl ServerLock {
    pub fn new(id: LockId) -> Self {
        Self {
            id,
            holders: Vec::new(),
            pending: VecDeque::new(),
            waiters: Vec::new(),
            lease: None,
            thrash: ThrashWindow::default(),
            next_seq: 0,
        }
    }

    pub fn id(&self) -> &LockId {
        &self.id
    }

    pub fn holders(&self) -> &[Grant] {
        &self.holders
    }

    pub fn pending(&self) -> &VecDeque<Request> {
        &self.pending
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    pub fn lease(&self) -> Option<&GreedyLease> {
        self.lease.as_ref()
    }

    pub fn is_demoted(&self, now: Instant) -> bool {
        self.thrash.is_demoted(now)
    }

    pub fn holds(&self, thread: ServerThreadId) -> Option<&Grant> {
        self.holders.iter().find(|g| g.thread == thread)
    }

    pub fn is_pending(&self, thread: ServerThreadId) -> bool {
        self.pending.iter().any(|r| r.thread == thread)
    }

    pub fn is_waiting(&self, thread: ServerThreadId) -> bool {
        self.waiters.iter().any(|w| w.thread == thread)
    }

    /// Whether the lock can be dropped from the table
    pub fn is_idle(&self, now: Instant, thrash_window: Duration) -> bool {
        self.holders.is_empty()
            && self.pending.is_empty()
            && self.waiters.is_empty()
            && self.lease.is_none()
            && !self.thrash.is_live(now, thrash_window)
    }

    /// Acquire at `level`
    ///
    /// `timeout` of `None` queues indefinitely, zero refuses at once when the
    /// lock is unavailable, anything else queues with a deadline.
    pub fn lock(
        &mut self,
        thread: ServerThreadId,
        level: LockLevel,
        timeout: Option<Duration>,
        env: &LockEnv<'_>,
    ) -> Result<Vec<LockEffect>, LockError> {
        if thread.is_lease_holder() {
            return Err(LockError::Protocol(format!(
                "{} is reserved for lease holders",
                thread
            )));
        }
        self.check_view(level)?;
        if self.is_waiting(thread) {
            return Err(LockError::AlreadyWaiting {
                lock: self.id.clone(),
                thread,
            });
        }

        let mut effects = Vec::new();

        if let Some(pos) = self.holders.iter().position(|g| g.thread == thread) {
            let held = self.holders[pos].level;
            return match (held, level) {
                (LockLevel::Write, LockLevel::Read) => {
                    self.holders[pos].level = LockLevel::Read;
                    debug!(lock = %self.id, %thread, "downgraded to read");
                    self.granted(&mut effects, thread, level, LeaseKind::Direct);
                    self.process_pending(env, &mut effects);
                    Ok(effects)
                }
                (LockLevel::Read, LockLevel::Write) => Err(LockError::UpgradeNotSupported {
                    lock: self.id.clone(),
                    thread,
                }),
                _ => Err(LockError::AlreadyHeld {
                    lock: self.id.clone(),
                    thread,
                    level: held,
                }),
            };
        }

        if self.is_pending(thread) {
            warn!(lock = %self.id, %thread, "duplicate lock request ignored");
            return Ok(effects);
        }

        if let Some(lease) = &self.lease {
            if lease.node == thread.node && !lease.recall_in_flight && lease.level.covers(level) {
                debug!(lock = %self.id, %thread, "request covered by standing lease");
                self.granted(&mut effects, thread, level, LeaseKind::Greedy);
                return Ok(effects);
            }
        }

        if level == LockLevel::Concurrent {
            self.holders.push(Grant::direct(thread, level));
            self.granted(&mut effects, thread, level, LeaseKind::Direct);
            return Ok(effects);
        }

        if self.pending.is_empty() && self.is_compatible(level) {
            self.award(thread, level, env, &mut effects);
            return Ok(effects);
        }

        if timeout.is_some_and(|t| t.is_zero()) {
            debug!(lock = %self.id, %thread, %level, "try-lock refused");
            self.send(
                &mut effects,
                thread.node,
                LockResponse::Denied {
                    lock: self.id.clone(),
                    thread,
                    level,
                    reason: DenyReason::WouldBlock,
                },
            );
            let trigger = self.next_seq;
            self.recall_lease(thread, level, trigger, env, &mut effects);
            return Ok(effects);
        }

        let seq = self.take_seq();
        let timer = timeout.map(|delay| {
            let key = TimerKey::new(self.id.clone(), thread, seq);
            effects.push(LockEffect::ScheduleTimer {
                key: key.clone(),
                delay,
            });
            key
        });
        self.pending.push_back(Request {
            thread,
            level,
            seq,
            queued_at: env.now,
            timer,
            reacquire: false,
        });
        debug!(lock = %self.id, %thread, %level, seq, "request queued");

        self.recall_if_contended(env, &mut effects);
        Ok(effects)
    }

    /// Release every grant `thread` holds; unknown callers are ignored
    pub fn unlock(&mut self, thread: ServerThreadId, env: &LockEnv<'_>) -> Vec<LockEffect> {
        let mut effects = Vec::new();
        let before = self.holders.len();
        self.holders.retain(|g| g.thread != thread);

        if self.holders.len() == before {
            warn!(lock = %self.id, %thread, "unlock by non-holder ignored");
            return effects;
        }

        debug!(lock = %self.id, %thread, "released");
        self.process_pending(env, &mut effects);
        effects
    }

    /// Release the caller's write grant and join the wait set
    pub fn wait(
        &mut self,
        thread: ServerThreadId,
        timeout: Option<Duration>,
        env: &LockEnv<'_>,
    ) -> Result<Vec<LockEffect>, LockError> {
        let pos = self.direct_writer(thread)?;
        self.holders.remove(pos);

        let mut effects = Vec::new();
        let seq = self.take_seq();
        let timeout = timeout.or(env.default_wait_timeout);
        let timer = timeout.map(|delay| {
            let key = TimerKey::new(self.id.clone(), thread, seq);
            effects.push(LockEffect::ScheduleTimer {
                key: key.clone(),
                delay,
            });
            key
        });
        self.waiters.push(Waiter {
            thread,
            level: LockLevel::Write,
            seq,
            deadline: timeout.and_then(|d| env.now.checked_add(d)),
            timer,
        });
        debug!(lock = %self.id, %thread, seq, ?timeout, "waiting");

        self.process_pending(env, &mut effects);
        Ok(effects)
    }

    /// Wake the oldest waiter, or all of them
    ///
    /// Woken threads re-enter the queue at the position of their wait.
    pub fn notify(
        &mut self,
        thread: ServerThreadId,
        all: bool,
        env: &LockEnv<'_>,
    ) -> Result<(Vec<ServerThreadId>, Vec<LockEffect>), LockError> {
        self.direct_writer(thread)?;

        let count = if all {
            self.waiters.len()
        } else {
            self.waiters.len().min(1)
        };
        let woken: Vec<Waiter> = self.waiters.drain(..count).collect();

        let mut effects = Vec::new();
        let mut threads = Vec::with_capacity(woken.len());
        for waiter in woken {
            threads.push(waiter.thread);
            self.wake(waiter, WakeReason::Notified, env, &mut effects);
        }
        debug!(lock = %self.id, %thread, woken = threads.len(), "notified");

        self.send(
            &mut effects,
            thread.node,
            LockResponse::Notified {
                lock: self.id.clone(),
                thread,
                waiters: threads.clone(),
            },
        );
        Ok((threads, effects))
    }

    /// Move a waiting thread back to the queue as if notified
    pub fn interrupt(&mut self, thread: ServerThreadId, env: &LockEnv<'_>) -> Vec<LockEffect> {
        let mut effects = Vec::new();
        let Some(pos) = self.waiters.iter().position(|w| w.thread == thread) else {
            debug!(lock = %self.id, %thread, "interrupt of non-waiting thread ignored");
            return effects;
        };
        let waiter = self.waiters.remove(pos);
        self.wake(waiter, WakeReason::Interrupted, env, &mut effects);
        self.process_pending(env, &mut effects);
        effects
    }

    /// Handle an expired timeout; keys with no live owner are ignored
    pub fn timer_fired(&mut self, key: &TimerKey, env: &LockEnv<'_>) -> Vec<LockEffect> {
        let mut effects = Vec::new();

        if let Some(pos) = self
            .waiters
            .iter()
            .position(|w| w.thread == key.thread && w.seq == key.seq)
        {
            let waiter = self.waiters.remove(pos);
            debug!(lock = %self.id, thread = %waiter.thread, "wait timed out");
            self.wake(waiter, WakeReason::TimedOut, env, &mut effects);
            self.process_pending(env, &mut effects);
            return effects;
        }

        let expired = self.pending.iter().position(|r| {
            r.thread == key.thread && r.seq == key.seq && r.timer.as_ref() == Some(key)
        });
        if let Some(request) = expired.and_then(|pos| self.pending.remove(pos)) {
            debug!(lock = %self.id, thread = %request.thread, "bounded acquire timed out");
            self.send(
                &mut effects,
                request.thread.node,
                LockResponse::Denied {
                    lock: self.id.clone(),
                    thread: request.thread,
                    level: request.level,
                    reason: DenyReason::TimedOut,
                },
            );
            self.process_pending(env, &mut effects);
            return effects;
        }

        debug!(lock = %self.id, %key, "stale timer ignored");
        effects
    }

    /// Roll back a blocked thread's request or wait
    ///
    /// Returns `None` when the thread is not blocked on this lock.
    pub fn abort(&mut self, thread: ServerThreadId, env: &LockEnv<'_>) -> Option<Vec<LockEffect>> {
        let mut effects = Vec::new();

        if let Some(pos) = self.pending.iter().position(|r| r.thread == thread) {
            if let Some(request) = self.pending.remove(pos) {
                if let Some(key) = request.timer {
                    effects.push(LockEffect::CancelTimer { key });
                }
            }
            info!(lock = %self.id, %thread, "queued request aborted");
            self.send(
                &mut effects,
                thread.node,
                LockResponse::Aborted {
                    lock: self.id.clone(),
                    thread,
                },
            );
            self.process_pending(env, &mut effects);
            return Some(effects);
        }

        if let Some(pos) = self.waiters.iter().position(|w| w.thread == thread) {
            let waiter = self.waiters.remove(pos);
            info!(lock = %self.id, %thread, "wait aborted");
            self.wake(waiter, WakeReason::Aborted, env, &mut effects);
            self.process_pending(env, &mut effects);
            return Some(effects);
        }

        None
    }

    /// Forget everything `node` had on this lock
    pub fn clear_node(&mut self, node: NodeId, env: &LockEnv<'_>) -> Vec<LockEffect> {
        let mut effects = Vec::new();
        let mut cancelled = Vec::new();

        self.holders.retain(|g| g.thread.node != node);
        self.pending.retain(|r| {
            if r.thread.node != node {
                return true;
            }
            cancelled.extend(r.timer.clone());
            false
        });
        self.waiters.retain(|w| {
            if w.thread.node != node {
                return true;
            }
            cancelled.extend(w.timer.clone());
            false
        });
        effects.extend(cancelled.into_iter().map(|key| LockEffect::CancelTimer { key }));

        if self.lease.as_ref().is_some_and(|l| l.node == node) {
            info!(lock = %self.id, %node, "lease dropped with disconnected node");
            self.lease = None;
        }

        self.process_pending(env, &mut effects);
        effects
    }

    /// Take the lease back from `node`, adopting its local queue and waiters
    pub fn recall_complete(
        &mut self,
        node: NodeId,
        pending: Vec<PendingTransfer>,
        waiters: Vec<WaiterTransfer>,
        env: &LockEnv<'_>,
    ) -> Vec<LockEffect> {
        let mut effects = Vec::new();
        let lease = match &self.lease {
            Some(lease) if lease.node == node => lease.clone(),
            Some(lease) => {
                warn!(lock = %self.id, %node, holder = %lease.node, "recall completion from non-holder ignored");
                return effects;
            }
            None => {
                warn!(lock = %self.id, %node, "recall completion without a lease ignored");
                return effects;
            }
        };
        self.drop_lease(node);

        if lease.recall_in_flight {
            info!(lock = %self.id, %node, "lease recalled");
            if let Some(greedy) = env.policy.greedy_config() {
                if self.thrash.record(env.now, greedy) {
                    info!(lock = %self.id, cool_down = ?greedy.cool_down, "lock demoted to non-greedy");
                }
            }
        } else {
            debug!(lock = %self.id, %node, "lease surrendered");
        }

        for transfer in waiters {
            let thread = ServerThreadId::new(node, transfer.thread);
            if self.knows(thread) {
                debug!(lock = %self.id, %thread, "duplicate transferred waiter skipped");
                continue;
            }
            let seq = self.take_seq();
            let timer = transfer.remaining.map(|delay| {
                let key = TimerKey::new(self.id.clone(), thread, seq);
                effects.push(LockEffect::ScheduleTimer {
                    key: key.clone(),
                    delay,
                });
                key
            });
            self.waiters.push(Waiter {
                thread,
                level: transfer.level,
                seq,
                deadline: transfer.remaining.and_then(|d| env.now.checked_add(d)),
                timer,
            });
        }

        let merge = env
            .policy
            .greedy_config()
            .map(|c| c.recall_merge)
            .unwrap_or_default();
        let interleave_at = match (merge, lease.recall_seq) {
            (RecallMerge::Interleave, Some(seq)) => Some(seq),
            _ => None,
        };
        let mut insert_at = interleave_at.map(|seq| self.pending.partition_point(|r| r.seq < seq));

        for transfer in pending {
            let thread = ServerThreadId::new(node, transfer.thread);
            if self.knows(thread) {
                debug!(lock = %self.id, %thread, "duplicate transferred request skipped");
                continue;
            }
            match (insert_at.as_mut(), interleave_at) {
                (Some(at), Some(seq)) => {
                    self.pending.insert(
                        *at,
                        Request {
                            thread,
                            level: transfer.level,
                            seq,
                            queued_at: env.now,
                            timer: None,
                            reacquire: false,
                        },
                    );
                    *at += 1;
                }
                _ => {
                    let seq = self.take_seq();
                    self.pending.push_back(Request {
                        thread,
                        level: transfer.level,
                        seq,
                        queued_at: env.now,
                        timer: None,
                        reacquire: false,
                    });
                }
            }
        }

        self.process_pending(env, &mut effects);
        effects
    }

    /// Restore a grant held before a server restart
    pub fn reestablish_grant(
        &mut self,
        thread: ServerThreadId,
        level: LockLevel,
        lease: LeaseKind,
    ) -> Result<(), LockError> {
        self.check_view(level)?;
        let grant = match lease {
            LeaseKind::Direct => Grant::direct(thread, level),
            LeaseKind::Greedy => Grant::greedy(thread.node, level),
        };
        if self.holds(grant.thread).is_some() {
            if lease == LeaseKind::Greedy {
                return Ok(());
            }
            return Err(LockError::AlreadyHeld {
                lock: self.id.clone(),
                thread,
                level,
            });
        }
        if !self.is_compatible(level) {
            return Err(LockError::Protocol(format!(
                "reestablished {} grant on {} conflicts with existing holders",
                level, self.id
            )));
        }
        if lease == LeaseKind::Greedy {
            if let Some(existing) = &self.lease {
                return Err(LockError::Protocol(format!(
                    "{} already leased to {}",
                    self.id, existing.node
                )));
            }
            self.lease = Some(GreedyLease::new(thread.node, level));
        }
        debug!(lock = %self.id, thread = %grant.thread, %level, "grant reestablished");
        self.holders.push(grant);
        Ok(())
    }

    /// Restore a wait registered before a server restart
    pub fn reestablish_wait(
        &mut self,
        thread: ServerThreadId,
        level: LockLevel,
        timeout: Option<Duration>,
        env: &LockEnv<'_>,
    ) -> Result<Vec<LockEffect>, LockError> {
        self.check_view(level)?;
        if self.knows(thread) {
            return Err(LockError::AlreadyWaiting {
                lock: self.id.clone(),
                thread,
            });
        }
        let mut effects = Vec::new();
        let seq = self.take_seq();
        let timer = timeout.map(|delay| {
            let key = TimerKey::new(self.id.clone(), thread, seq);
            effects.push(LockEffect::ScheduleTimer {
                key: key.clone(),
                delay,
            });
            key
        });
        self.waiters.push(Waiter {
            thread,
            level,
            seq,
            deadline: timeout.and_then(|d| env.now.checked_add(d)),
            timer,
        });
        debug!(lock = %self.id, %thread, "wait reestablished");
        Ok(effects)
    }

    pub fn snapshot(&self, now: Instant) -> LockSnapshot {
        LockSnapshot {
            lock: self.id.clone(),
            holders: self.holders.clone(),
            pending: self
                .pending
                .iter()
                .map(|r| PendingSnapshot {
                    thread: r.thread,
                    level: r.level,
                    seq: r.seq,
                    queued_for: now.saturating_duration_since(r.queued_at),
                    bounded: r.timer.is_some(),
                    reacquire: r.reacquire,
                })
                .collect(),
            waiters: self
                .waiters
                .iter()
                .map(|w| WaiterSnapshot {
                    thread: w.thread,
                    level: w.level,
                    seq: w.seq,
                    remaining: w.deadline.map(|d| d.saturating_duration_since(now)),
                })
                .collect(),
            lease: self.lease.as_ref().map(|l| LeaseSnapshot {
                node: l.node,
                level: l.level,
                recall_in_flight: l.recall_in_flight,
            }),
            demoted: self.thrash.is_demoted(now),
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn view(&self) -> Option<LockView> {
        self.holders
            .iter()
            .map(|g| g.level)
            .chain(self.pending.iter().map(|r| r.level))
            .chain(self.waiters.iter().map(|w| w.level))
            .next()
            .map(LockLevel::view)
    }

    fn check_view(&self, level: LockLevel) -> Result<(), LockError> {
        match self.view() {
            Some(held) if held != level.view() => Err(LockError::MixedLockView {
                lock: self.id.clone(),
                held,
                requested: level,
            }),
            _ => Ok(()),
        }
    }

    fn knows(&self, thread: ServerThreadId) -> bool {
        self.holds(thread).is_some() || self.is_pending(thread) || self.is_waiting(thread)
    }

    fn is_compatible(&self, level: LockLevel) -> bool {
        self.holders.iter().all(|g| g.level.is_compatible_with(level))
    }

    /// Index of `thread`'s direct write grant
    fn direct_writer(&self, thread: ServerThreadId) -> Result<usize, LockError> {
        self.holders
            .iter()
            .position(|g| {
                g.thread == thread && g.level == LockLevel::Write && g.lease == LeaseKind::Direct
            })
            .ok_or_else(|| LockError::IllegalMonitorState {
                lock: self.id.clone(),
                thread,
            })
    }

    fn send(&self, effects: &mut Vec<LockEffect>, to: NodeId, response: LockResponse) {
        effects.push(LockEffect::send(to, response));
    }

    fn granted(
        &self,
        effects: &mut Vec<LockEffect>,
        thread: ServerThreadId,
        level: LockLevel,
        lease: LeaseKind,
    ) {
        self.send(
            effects,
            thread.node,
            LockResponse::Granted {
                lock: self.id.clone(),
                thread,
                level,
                lease,
            },
        );
    }

    /// Record a grant for a request that is compatible with the holders
    fn award(
        &mut self,
        thread: ServerThreadId,
        level: LockLevel,
        env: &LockEnv<'_>,
        effects: &mut Vec<LockEffect>,
    ) {
        let uncontended = self.holders.is_empty()
            && self.waiters.is_empty()
            && self.pending.is_empty()
            && self.lease.is_none();

        if uncontended
            && env
                .policy
                .may_lease(level, self.thrash.demoted_until(), env.now)
        {
            self.holders.push(Grant::greedy(thread.node, level));
            self.lease = Some(GreedyLease::new(thread.node, level));
            info!(lock = %self.id, node = %thread.node, %level, "greedy lease awarded");
            self.granted(effects, thread, level, LeaseKind::Greedy);
        } else {
            self.holders.push(Grant::direct(thread, level));
            debug!(lock = %self.id, %thread, %level, "granted");
            self.granted(effects, thread, level, LeaseKind::Direct);
        }
    }

    /// Take a waiter out of the wait set and, unless aborted, requeue it
    fn wake(
        &mut self,
        waiter: Waiter,
        reason: WakeReason,
        env: &LockEnv<'_>,
        effects: &mut Vec<LockEffect>,
    ) {
        if reason != WakeReason::TimedOut {
            if let Some(key) = waiter.timer.clone() {
                effects.push(LockEffect::CancelTimer { key });
            }
        }
        self.send(
            effects,
            waiter.thread.node,
            LockResponse::WaitWoken {
                lock: self.id.clone(),
                thread: waiter.thread,
                reason,
            },
        );
        if reason == WakeReason::Aborted {
            return;
        }

        let at = self.pending.partition_point(|r| r.seq < waiter.seq);
        self.pending.insert(
            at,
            Request {
                thread: waiter.thread,
                level: waiter.level,
                seq: waiter.seq,
                queued_at: env.now,
                timer: None,
                reacquire: true,
            },
        );
    }

    /// Grant from the head of the queue until it blocks
    fn process_pending(&mut self, env: &LockEnv<'_>, effects: &mut Vec<LockEffect>) {
        while let Some(head) = self.pending.front() {
            if !self.is_compatible(head.level) {
                break;
            }
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            if let Some(key) = request.timer {
                effects.push(LockEffect::CancelTimer { key });
            }
            self.award(request.thread, request.level, env, effects);
        }
        self.recall_if_contended(env, effects);
    }

    fn recall_if_contended(&mut self, env: &LockEnv<'_>, effects: &mut Vec<LockEffect>) {
        let Some(head) = self.pending.front() else {
            return;
        };
        let (thread, level, seq) = (head.thread, head.level, head.seq);
        self.recall_lease(thread, level, seq, env, effects);
    }

    /// Ask the lease holder to give the lock back if the lease blocks `requester`
    fn recall_lease(
        &mut self,
        requester: ServerThreadId,
        level: LockLevel,
        trigger_seq: u64,
        env: &LockEnv<'_>,
        effects: &mut Vec<LockEffect>,
    ) {
        let (node, leased) = match &self.lease {
            Some(lease) if !lease.recall_in_flight => (lease.node, lease.level),
            _ => return,
        };
        if requester.node != node && leased.is_compatible_with(level) {
            return;
        }

        if !env.client_state.references(node, &self.id) {
            info!(lock = %self.id, %node, "lease reclaimed from node without a reference");
            self.drop_lease(node);
            self.process_pending(env, effects);
            return;
        }

        if let Some(lease) = self.lease.as_mut() {
            lease.recall_in_flight = true;
            lease.recall_seq = Some(trigger_seq);
        }
        info!(lock = %self.id, %node, %requester, "recalling lease");
        self.send(
            effects,
            node,
            LockResponse::Recall {
                lock: self.id.clone(),
                node,
                level: leased,
            },
        );
    }

    fn drop_lease(&mut self, node: NodeId) {
        let holder = ServerThreadId::lease_holder(node);
        self.holders.retain(|g| g.thread != holder);
        self.lease = None;
    }
}

#[cfg(test)]
#[path = "server_lock_tests.rs"]
mod tests;
