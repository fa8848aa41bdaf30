// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The lock manager: table of server locks plus timers, aborts and delivery
//!
//! Lock order is table guard, then one lock's mutex, then the timer. No path
//! holds two lock mutexes at once. Effects of an operation are applied while
//! the lock's mutex is held, so responses for one lock reach each node in
//! the order the lock produced them.

use crate::abort::AbortableOperationManager;
use crate::client_state::{ClientStateManager, NoClientState};
use crate::clock::Clock;
use crate::config::LockManagerConfig;
use crate::deadlock::{find_deadlocks, DeadlockChain};
use crate::effect::LockEffect;
use crate::error::LockError;
use crate::id::{LockId, NodeId, ServerThreadId};
use crate::level::{LeaseKind, LockLevel};
use crate::lock::{LockEnv, LockSnapshot, ServerLock};
use crate::message::{ClientMessage, LockResponse, PendingTransfer, WaiterTransfer};
use crate::policy::LockPolicy;
use crate::sink::ResponseSink;
use crate::timer::LockTimer;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of the manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Accepting reestablished state; node requests are queued
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Starting => write!(f, "starting"),
            ManagerState::Started => write!(f, "started"),
            ManagerState::Stopping => write!(f, "stopping"),
            ManagerState::Stopped => write!(f, "stopped"),
        }
    }
}

type LockTable = HashMap<LockId, Arc<Mutex<ServerLock>>>;

/// Server-side arbiter for every clustered lock
pub struct LockManager<C: Clock> {
    clock: C,
    policy: LockPolicy,
    config: LockManagerConfig,
    sink: Arc<dyn ResponseSink>,
    client_state: Arc<dyn ClientStateManager>,
    aborts: Arc<AbortableOperationManager>,
    locks: RwLock<LockTable>,
    timer: Mutex<LockTimer<C>>,
    state: Mutex<ManagerState>,
    startup_queue: Mutex<Vec<ClientMessage>>,
}

impl<C: Clock> LockManager<C> {
    pub fn new(
        policy: LockPolicy,
        config: LockManagerConfig,
        clock: C,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            timer: Mutex::new(LockTimer::new(clock.clone())),
            clock,
            policy,
            config,
            sink,
            client_state: Arc::new(NoClientState),
            aborts: Arc::new(AbortableOperationManager::new()),
            locks: RwLock::new(HashMap::new()),
            state: Mutex::new(ManagerState::Starting),
            startup_queue: Mutex::new(Vec::new()),
        }
    }

    pub fn with_client_state(mut self, client_state: Arc<dyn ClientStateManager>) -> Self {
        self.client_state = client_state;
        self
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Abort table shared with in-process blocking callers
    pub fn aborts(&self) -> Arc<AbortableOperationManager> {
        Arc::clone(&self.aborts)
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Lifecycle ===

    /// Leave the starting phase: arm timers and replay queued requests
    pub fn start(&self) -> Result<(), LockError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ManagerState::Starting {
                return Err(LockError::NotRunning(*state));
            }
            *state = ManagerState::Started;
        }
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .start();

        let queued = std::mem::take(
            &mut *self
                .startup_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        info!(replayed = queued.len(), "lock manager started");
        for message in queued {
            // Failures are reported to the node by dispatch
            let _ = self.dispatch_message(message);
        }
        Ok(())
    }

    /// Drop every lock and timer; later requests fail with `NotRunning`
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, ManagerState::Stopping | ManagerState::Stopped) {
                return;
            }
            *state = ManagerState::Stopping;
        }

        let dropped = {
            let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
            let count = locks.len();
            locks.clear();
            count
        };
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shutdown();
        self.startup_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ManagerState::Stopped;
        info!(dropped, "lock manager stopped");
    }

    /// Restore a grant a node held before the server restarted
    pub fn reestablish_lock(
        &self,
        id: &LockId,
        thread: ServerThreadId,
        level: LockLevel,
        lease: LeaseKind,
    ) -> Result<(), LockError> {
        self.require_starting()?;
        self.apply(id, true, |lock, _| {
            lock.reestablish_grant(thread, level, lease)?;
            Ok(((), Vec::new()))
        })
        .map(|_| ())
    }

    /// Restore a wait a node had registered before the server restarted
    pub fn reestablish_wait(
        &self,
        id: &LockId,
        thread: ServerThreadId,
        level: LockLevel,
        timeout: Option<Duration>,
    ) -> Result<(), LockError> {
        self.require_starting()?;
        self.apply(id, true, |lock, env| {
            Ok(((), lock.reestablish_wait(thread, level, timeout, env)?))
        })
        .map(|_| ())
    }

    // === Node requests ===

    /// Handle one message from a node
    ///
    /// While starting the message is queued for replay. Errors are logged,
    /// reported to the sending node and returned.
    pub fn handle(&self, message: ClientMessage) -> Result<(), LockError> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ManagerState::Started => {}
                ManagerState::Starting => {
                    debug!(lock = %message.lock_id(), "queued until start");
                    self.startup_queue
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(message);
                    return Ok(());
                }
                ManagerState::Stopping | ManagerState::Stopped => {
                    return Err(LockError::NotRunning(*state));
                }
            }
        }
        self.dispatch_message(message)
    }

    fn dispatch_message(&self, message: ClientMessage) -> Result<(), LockError> {
        let node = message.node();
        let span = tracing::debug_span!("lock_message", lock = %message.lock_id(), %node);
        let _guard = span.enter();

        let thread = match &message {
            ClientMessage::Lock { thread, .. }
            | ClientMessage::Unlock { thread, .. }
            | ClientMessage::Wait { thread, .. }
            | ClientMessage::Notify { thread, .. }
            | ClientMessage::Interrupt { thread, .. } => Some(*thread),
            ClientMessage::RecallComplete { .. } | ClientMessage::Query { .. } => None,
        };

        let result = match message {
            ClientMessage::Lock {
                lock,
                thread,
                level,
                timeout,
            } => self.lock(&lock, thread, level, timeout),
            ClientMessage::Unlock { lock, thread } => self.unlock(&lock, thread),
            ClientMessage::Wait {
                lock,
                thread,
                timeout,
            } => self.wait(&lock, thread, timeout),
            ClientMessage::Notify { lock, thread, all } => {
                self.notify(&lock, thread, all).map(|_| ())
            }
            ClientMessage::Interrupt { lock, thread } => self.interrupt(&lock, thread),
            ClientMessage::RecallComplete {
                lock,
                node,
                pending,
                waiters,
            } => self.recall_complete(&lock, node, pending, waiters),
            ClientMessage::Query { lock, node } => {
                let snapshot = self.query(&lock);
                self.sink
                    .deliver(node, LockResponse::LockInfo { lock, snapshot });
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!(error = %e, "lock request rejected");
            self.sink.deliver(
                node,
                LockResponse::Error {
                    thread,
                    message: e.to_string(),
                },
            );
        }
        result
    }

    pub fn lock(
        &self,
        id: &LockId,
        thread: ServerThreadId,
        level: LockLevel,
        timeout: Option<Duration>,
    ) -> Result<(), LockError> {
        self.apply(id, true, |lock, env| {
            Ok(((), lock.lock(thread, level, timeout, env)?))
        })
        .map(|_| ())
    }

    pub fn unlock(&self, id: &LockId, thread: ServerThreadId) -> Result<(), LockError> {
        self.apply(id, false, |lock, env| Ok(((), lock.unlock(thread, env))))
            .map(|_| ())
    }

    pub fn wait(
        &self,
        id: &LockId,
        thread: ServerThreadId,
        timeout: Option<Duration>,
    ) -> Result<(), LockError> {
        let done = self.apply(id, false, |lock, env| {
            Ok(((), lock.wait(thread, timeout, env)?))
        })?;
        done.ok_or_else(|| LockError::IllegalMonitorState {
            lock: id.clone(),
            thread,
        })
    }

    /// Returns the threads moved out of the wait set
    pub fn notify(
        &self,
        id: &LockId,
        thread: ServerThreadId,
        all: bool,
    ) -> Result<Vec<ServerThreadId>, LockError> {
        let woken = self.apply(id, false, |lock, env| lock.notify(thread, all, env))?;
        woken.ok_or_else(|| LockError::IllegalMonitorState {
            lock: id.clone(),
            thread,
        })
    }

    pub fn interrupt(&self, id: &LockId, thread: ServerThreadId) -> Result<(), LockError> {
        self.apply(id, false, |lock, env| Ok(((), lock.interrupt(thread, env))))
            .map(|_| ())
    }

    pub fn recall_complete(
        &self,
        id: &LockId,
        node: NodeId,
        pending: Vec<PendingTransfer>,
        waiters: Vec<WaiterTransfer>,
    ) -> Result<(), LockError> {
        let done = self.apply(id, false, |lock, env| {
            Ok(((), lock.recall_complete(node, pending, waiters, env)))
        })?;
        if done.is_none() {
            warn!(lock = %id, %node, "recall completion for unknown lock ignored");
        }
        Ok(())
    }

    // === Failure handling ===

    /// Remove every trace of `node` and abort its blocked callers
    pub fn node_disconnected(&self, node: NodeId) {
        let cleared = self.for_each_lock(|lock, env| lock.clear_node(node, env));
        for thread in self.aborts.registered_on(node) {
            if let Err(e) = self.aborts.abort(thread) {
                debug!(%thread, error = %e, "abort raced with finish");
            }
        }
        info!(%node, locks = cleared, "node disconnected");
    }

    /// Abort `thread`'s blocked request or wait
    ///
    /// Looks only at `hint` when given. Returns whether anything was rolled
    /// back on the server.
    pub fn abort_thread(&self, thread: ServerThreadId, hint: Option<&LockId>) -> bool {
        let ids = match hint {
            Some(id) => vec![id.clone()],
            None => self.lock_ids(),
        };

        let mut found = false;
        for id in ids {
            let rolled_back = self.apply(&id, false, |lock, env| {
                let effects = lock.abort(thread, env);
                let found = effects.is_some();
                Ok((found, effects.unwrap_or_default()))
            });
            if matches!(rolled_back, Ok(Some(true))) {
                found = true;
                break;
            }
        }

        if self.aborts.is_registered(thread) {
            if let Err(e) = self.aborts.abort(thread) {
                debug!(%thread, error = %e, "abort raced with finish");
            }
        }
        found
    }

    /// Find deadlocks on a consistent view of every lock
    pub fn scan_for_deadlocks(&self) -> Vec<DeadlockChain> {
        find_deadlocks(&self.snapshots())
    }

    /// Abort one victim per deadlock cycle
    pub fn resolve_deadlocks(&self) -> Vec<DeadlockChain> {
        let chains = self.scan_for_deadlocks();
        for chain in &chains {
            warn!(victim = %chain.victim, cycle = %chain, "deadlock detected, aborting victim");
            self.abort_thread(chain.victim, chain.victim_lock());
        }
        chains
    }

    /// Fire every timer that is due; returns how many fired
    pub fn fire_due_timers(&self) -> usize {
        let due = self.timer.lock().unwrap_or_else(|e| e.into_inner()).poll();
        let count = due.len();
        for key in due {
            let fired = self.apply(&key.lock, false, |lock, env| {
                Ok(((), lock.timer_fired(&key, env)))
            });
            if !matches!(fired, Ok(Some(()))) {
                debug!(%key, "timer for evicted lock ignored");
            }
        }
        count
    }

    /// Earliest pending timer deadline
    pub fn next_timer_deadline(&self) -> Option<std::time::Instant> {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_deadline()
    }

    // === Introspection ===

    pub fn query(&self, id: &LockId) -> Option<LockSnapshot> {
        let now = self.clock.now();
        let locks = self.locks.read().unwrap_or_else(|e| e.into_inner());
        let entry = locks.get(id)?;
        let lock = entry.lock().unwrap_or_else(|e| e.into_inner());
        Some(lock.snapshot(now))
    }

    /// Snapshot every lock under the exclusive table guard, ordered by id
    pub fn snapshots(&self) -> Vec<LockSnapshot> {
        let now = self.clock.now();
        let locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<_> = locks
            .values()
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).snapshot(now))
            .collect();
        snapshots.sort_by(|a, b| a.lock.cmp(&b.lock));
        snapshots
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop every idle lock; returns how many were dropped
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.thrash_window();
        let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, entry| {
            !entry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_idle(now, window)
        });
        before - locks.len()
    }

    // === Internals ===

    fn require_starting(&self) -> Result<(), LockError> {
        match self.state() {
            ManagerState::Starting => Ok(()),
            other => Err(LockError::Protocol(format!(
                "state can only be reestablished while starting, manager is {}",
                other
            ))),
        }
    }

    fn thrash_window(&self) -> Duration {
        self.policy
            .greedy_config()
            .map(|c| c.thrash_window)
            .unwrap_or(Duration::ZERO)
    }

    fn env(&self) -> LockEnv<'_> {
        LockEnv {
            now: self.clock.now(),
            policy: &self.policy,
            default_wait_timeout: self.config.default_wait_timeout,
            client_state: self.client_state.as_ref(),
        }
    }

    fn lock_ids(&self) -> Vec<LockId> {
        let locks = self.locks.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = locks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `op` on the lock for `id` under a table guard
    ///
    /// Returns `Ok(None)` when the lock does not exist and `create` is false.
    /// A created lock is inserted and operated on under the same exclusive
    /// guard, so eviction cannot drop it in between. The lock is evicted
    /// afterwards if the operation left it idle.
    fn apply<T>(
        &self,
        id: &LockId,
        create: bool,
        op: impl FnOnce(&mut ServerLock, &LockEnv<'_>) -> Result<(T, Vec<LockEffect>), LockError>,
    ) -> Result<Option<T>, LockError> {
        let (value, idle) = {
            let locks = self.locks.read().unwrap_or_else(|e| e.into_inner());
            let existing = locks.get(id).map(Arc::clone);
            match existing {
                Some(entry) => self.run_locked(&entry, op)?,
                None if !create => return Ok(None),
                None => {
                    drop(locks);
                    let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
                    let entry = locks
                        .entry(id.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(ServerLock::new(id.clone()))));
                    self.run_locked(entry, op)?
                }
            }
        };

        if idle {
            self.evict(id);
        }
        Ok(Some(value))
    }

    /// Run `op` under the lock's mutex and report whether it left the lock idle
    fn run_locked<T>(
        &self,
        entry: &Mutex<ServerLock>,
        op: impl FnOnce(&mut ServerLock, &LockEnv<'_>) -> Result<(T, Vec<LockEffect>), LockError>,
    ) -> Result<(T, bool), LockError> {
        let mut lock = entry.lock().unwrap_or_else(|e| e.into_inner());
        let env = self.env();
        let (value, effects) = op(&mut lock, &env)?;
        self.apply_effects(effects);
        Ok((value, lock.is_idle(env.now, self.thrash_window())))
    }

    /// Run `op` on every lock; returns how many locks were visited
    fn for_each_lock(
        &self,
        mut op: impl FnMut(&mut ServerLock, &LockEnv<'_>) -> Vec<LockEffect>,
    ) -> usize {
        let count = {
            let locks = self.locks.read().unwrap_or_else(|e| e.into_inner());
            for entry in locks.values() {
                let mut lock = entry.lock().unwrap_or_else(|e| e.into_inner());
                let env = self.env();
                let effects = op(&mut lock, &env);
                self.apply_effects(effects);
            }
            locks.len()
        };
        self.evict_idle();
        count
    }

    fn evict(&self, id: &LockId) {
        let now = self.clock.now();
        let window = self.thrash_window();
        let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
        let idle = locks.get(id).is_some_and(|entry| {
            entry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_idle(now, window)
        });
        if idle {
            locks.remove(id);
            debug!(lock = %id, "idle lock evicted");
        }
    }

    fn apply_effects(&self, effects: Vec<LockEffect>) {
        if effects.is_empty() {
            return;
        }
        let mut timer = None;
        for effect in effects {
            match effect {
                LockEffect::Send { to, response } => self.sink.deliver(to, response),
                LockEffect::ScheduleTimer { key, delay } => timer
                    .get_or_insert_with(|| self.timer.lock().unwrap_or_else(|e| e.into_inner()))
                    .schedule(key, delay),
                LockEffect::CancelTimer { key } => timer
                    .get_or_insert_with(|| self.timer.lock().unwrap_or_else(|e| e.into_inner()))
                    .cancel(&key),
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
