// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process node client
//!
//! A [`LockClient`] stands in for one node of the cluster. Each application
//! thread gets a [`ThreadHandle`] with its own inbox; blocking calls send a
//! request (to the local lease cache or the server) and then wait on the
//! inbox for the answer. Responses are routed into inboxes synchronously by
//! [`ClientHub`], so an `Aborted` response is always in the inbox before the
//! matching abort signal fires.

use super::cache::{CacheEffect, NodeLockCache};
use crate::abort::AbortSignal;
use crate::clock::Clock;
use crate::error::LockError;
use crate::id::{LockId, NodeId, ServerThreadId, ThreadId};
use crate::level::{LeaseKind, LockLevel};
use crate::manager::LockManager;
use crate::message::{ClientMessage, LockResponse, WakeReason};
use crate::sink::ResponseSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Routes server responses to the in-process clients of each node
#[derive(Default)]
pub struct ClientHub {
    clients: RwLock<HashMap<NodeId, Arc<ClientCore>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, core: Arc<ClientCore>) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(core.node, core);
    }

    fn unregister(&self, node: NodeId) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.remove(&node);
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.contains_key(&node)
    }
}

impl ResponseSink for ClientHub {
    fn deliver(&self, to: NodeId, response: LockResponse) {
        let core = {
            let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
            clients.get(&to).cloned()
        };
        match core {
            Some(core) => core.on_response(response),
            None => debug!(node = %to, "response for disconnected node dropped"),
        }
    }
}

/// State shared by a client, its thread handles and its recall task
struct ClientCore {
    node: NodeId,
    cache: Mutex<NodeLockCache>,
    inboxes: Mutex<HashMap<ThreadId, mpsc::UnboundedSender<LockResponse>>>,
    recalls: mpsc::UnboundedSender<LockId>,
}

impl ClientCore {
    fn cache(&self) -> MutexGuard<'_, NodeLockCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called from inside the server, so it never calls back into it
    fn on_response(&self, response: LockResponse) {
        match response {
            LockResponse::Recall { lock, .. } => {
                if self.recalls.send(lock).is_err() {
                    debug!(node = %self.node, "recall after client shut down");
                }
            }
            LockResponse::LockInfo { lock, .. } => {
                debug!(node = %self.node, %lock, "unsolicited lock info dropped");
            }
            LockResponse::Granted {
                lock,
                thread,
                level,
                lease: LeaseKind::Greedy,
            } => {
                let grant = self.cache().lease_granted(&lock, thread.thread, level);
                if let Some(grant) = grant {
                    self.route(grant);
                }
            }
            response => self.route(response),
        }
    }

    fn route(&self, response: LockResponse) {
        let Some(thread) = response.thread() else {
            debug!(node = %self.node, ?response, "response without a thread dropped");
            return;
        };
        let inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        match inboxes.get(&thread.thread) {
            Some(inbox) => {
                if inbox.send(response).is_err() {
                    debug!(%thread, "inbox closed");
                }
            }
            None => debug!(%thread, "response for unknown thread dropped"),
        }
    }
}

fn apply_effects<C: Clock>(
    core: &ClientCore,
    manager: &LockManager<C>,
    effects: Vec<CacheEffect>,
) {
    for effect in effects {
        match effect {
            CacheEffect::Local(response) => core.route(response),
            CacheEffect::Server(message) => {
                if let Err(e) = manager.handle(message) {
                    warn!(node = %core.node, error = %e, "lease hand-back rejected");
                }
            }
        }
    }
}

/// One node's connection to an in-process lock manager
pub struct LockClient<C: Clock> {
    core: Arc<ClientCore>,
    manager: Arc<LockManager<C>>,
    hub: Arc<ClientHub>,
    recall_task: JoinHandle<()>,
}

impl<C: Clock> LockClient<C> {
    /// Register `node` with `hub` and start answering recalls
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(node: NodeId, manager: Arc<LockManager<C>>, hub: Arc<ClientHub>) -> Self {
        let (recalls, mut recall_rx) = mpsc::unbounded_channel::<LockId>();
        let core = Arc::new(ClientCore {
            node,
            cache: Mutex::new(NodeLockCache::new(node)),
            inboxes: Mutex::new(HashMap::new()),
            recalls,
        });
        hub.register(Arc::clone(&core));

        let task_core = Arc::clone(&core);
        let task_manager = Arc::clone(&manager);
        let recall_task = tokio::spawn(async move {
            while let Some(lock) = recall_rx.recv().await {
                let effects = task_core.cache().recall(&lock, task_manager.clock().now());
                debug!(node = %task_core.node, %lock, "recall answered");
                apply_effects(&task_core, &task_manager, effects);
            }
        });

        Self {
            core,
            manager,
            hub,
            recall_task,
        }
    }

    pub fn node(&self) -> NodeId {
        self.core.node
    }

    /// Open an inbox for `thread`
    pub fn thread(&self, thread: ThreadId) -> Result<ThreadHandle<C>, LockError> {
        let id = ServerThreadId::new(self.core.node, thread);
        if thread.is_node() {
            return Err(LockError::Protocol(format!("{} is reserved", id)));
        }
        let (tx, inbox) = mpsc::unbounded_channel();
        {
            let mut inboxes = self.core.inboxes.lock().unwrap_or_else(|e| e.into_inner());
            if inboxes.contains_key(&thread) {
                return Err(LockError::Protocol(format!("{} already has a handle", id)));
            }
            inboxes.insert(thread, tx);
        }
        Ok(ThreadHandle {
            id,
            core: Arc::clone(&self.core),
            manager: Arc::clone(&self.manager),
            inbox,
        })
    }

    /// Level of the greedy lease this node holds on `lock`
    pub fn lease(&self, lock: &LockId) -> Option<LockLevel> {
        self.core.cache().lease(lock)
    }

    /// Interrupt `thread` if it is waiting on `lock`
    pub fn interrupt(&self, lock: &LockId, thread: ThreadId) -> Result<(), LockError> {
        let local = self.core.cache().interrupt(lock, thread, self.manager.clock().now());
        match local {
            Some(effects) => {
                apply_effects(&self.core, &self.manager, effects);
                Ok(())
            }
            None => self.manager.handle(ClientMessage::Interrupt {
                lock: lock.clone(),
                thread: ServerThreadId::new(self.core.node, thread),
            }),
        }
    }

    /// Hand the lease on `lock` back to the server if nobody uses it
    pub fn surrender(&self, lock: &LockId) {
        let effects = self.core.cache().surrender(lock, self.manager.clock().now());
        apply_effects(&self.core, &self.manager, effects);
    }

    /// Leave the cluster; the server forgets everything this node held
    pub fn disconnect(self) {
        self.hub.unregister(self.core.node);
        self.recall_task.abort();
        self.manager.node_disconnected(self.core.node);
    }
}

enum Event {
    Response(LockResponse),
    Deadline,
    Aborted,
}

async fn sleep_or_pending(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One application thread on a node
pub struct ThreadHandle<C: Clock> {
    id: ServerThreadId,
    core: Arc<ClientCore>,
    manager: Arc<LockManager<C>>,
    inbox: mpsc::UnboundedReceiver<LockResponse>,
}

impl<C: Clock> ThreadHandle<C> {
    pub fn id(&self) -> ServerThreadId {
        self.id
    }

    /// Block until `lock` is held at `level`
    pub async fn lock(&mut self, lock: &LockId, level: LockLevel) -> Result<(), LockError> {
        let signal = self.begin()?;
        let result = self.acquire(lock, level, None, signal).await;
        self.finish();
        result.map(|_| ())
    }

    /// Acquire within `timeout`; zero never queues. Returns whether it was granted.
    pub async fn try_lock(
        &mut self,
        lock: &LockId,
        level: LockLevel,
        timeout: Duration,
    ) -> Result<bool, LockError> {
        let signal = self.begin()?;
        let result = self.acquire(lock, level, Some(timeout), signal).await;
        self.finish();
        result
    }

    pub fn unlock(&mut self, lock: &LockId) -> Result<(), LockError> {
        let local = self
            .core
            .cache()
            .release(lock, self.id.thread, self.manager.clock().now());
        match local {
            Some(effects) => {
                apply_effects(&self.core, &self.manager, effects);
                Ok(())
            }
            None => self.request(ClientMessage::unlock(lock.clone(), self.id)),
        }
    }

    /// Give up `lock` until notified, interrupted or timed out, then take it back
    pub async fn wait(
        &mut self,
        lock: &LockId,
        timeout: Option<Duration>,
    ) -> Result<WakeReason, LockError> {
        let signal = self.begin()?;
        let result = self.wait_inner(lock, timeout, signal).await;
        self.finish();
        result
    }

    /// Wake one (or every) waiter; returns the threads woken
    pub async fn notify(
        &mut self,
        lock: &LockId,
        all: bool,
    ) -> Result<Vec<ServerThreadId>, LockError> {
        let local = self.core.cache().notify(lock, self.id.thread, all)?;
        match local {
            Some(effects) => apply_effects(&self.core, &self.manager, effects),
            None => self.request(ClientMessage::notify(lock.clone(), self.id, all))?,
        }
        loop {
            let Some(response) = self.inbox.recv().await else {
                return Err(self.closed());
            };
            match response {
                LockResponse::Notified {
                    lock: ref l,
                    waiters,
                    ..
                } if l == lock => return Ok(waiters),
                LockResponse::Error { message, .. } => return Err(LockError::Protocol(message)),
                other => debug!(thread = %self.id, ?other, "stale response skipped"),
            }
        }
    }

    fn begin(&self) -> Result<AbortSignal, LockError> {
        self.manager.aborts().begin(self.id)
    }

    fn finish(&self) {
        if let Err(e) = self.manager.aborts().finish(self.id) {
            warn!(thread = %self.id, error = %e, "abortable operation vanished");
        }
    }

    async fn acquire(
        &mut self,
        lock: &LockId,
        level: LockLevel,
        timeout: Option<Duration>,
        signal: AbortSignal,
    ) -> Result<bool, LockError> {
        let try_only = timeout == Some(Duration::ZERO);
        let local = self.core.cache().acquire(
            lock,
            self.id.thread,
            level,
            try_only,
            self.manager.clock().now(),
        )?;
        // A server grant covered by this node's lease can still be queued
        // locally, so the deadline also runs for requests sent to the server
        let mut deadline =
            timeout.and_then(|d| tokio::time::Instant::now().checked_add(d));
        match local {
            Some(effects) => apply_effects(&self.core, &self.manager, effects),
            None => self.request(ClientMessage::Lock {
                lock: lock.clone(),
                thread: self.id,
                level,
                timeout,
            })?,
        }

        loop {
            match self.next_event(deadline, &signal).await? {
                Event::Response(response) => match response {
                    LockResponse::Granted { lock: ref l, .. } if l == lock => return Ok(true),
                    LockResponse::Denied { lock: ref l, .. } if l == lock => return Ok(false),
                    LockResponse::Aborted { lock: ref l, .. } if l == lock => {
                        return Err(LockError::Aborted(self.id))
                    }
                    LockResponse::Error { message, .. } => {
                        return Err(LockError::Protocol(message))
                    }
                    other => debug!(thread = %self.id, ?other, "stale response skipped"),
                },
                Event::Deadline => {
                    deadline = None;
                    let withdrawn = self
                        .core
                        .cache()
                        .cancel(lock, self.id.thread, self.manager.clock().now());
                    if let Some(effects) = withdrawn {
                        apply_effects(&self.core, &self.manager, effects);
                        return Ok(false);
                    }
                    // Already granted, or handed to the server by a recall
                }
                Event::Aborted => return self.roll_back(lock),
            }
        }
    }

    async fn wait_inner(
        &mut self,
        lock: &LockId,
        timeout: Option<Duration>,
        signal: AbortSignal,
    ) -> Result<WakeReason, LockError> {
        let local = self
            .core
            .cache()
            .wait(lock, self.id.thread, timeout, self.manager.clock().now())?;
        let mut deadline = match local {
            Some(effects) => {
                apply_effects(&self.core, &self.manager, effects);
                timeout.and_then(|d| tokio::time::Instant::now().checked_add(d))
            }
            None => {
                self.request(ClientMessage::wait(lock.clone(), self.id, timeout))?;
                None
            }
        };

        let mut woken = None;
        loop {
            match self.next_event(deadline, &signal).await? {
                Event::Response(response) => match response {
                    LockResponse::WaitWoken {
                        lock: ref l,
                        reason: WakeReason::Aborted,
                        ..
                    } if l == lock => return Err(LockError::Aborted(self.id)),
                    LockResponse::WaitWoken {
                        lock: ref l,
                        reason,
                        ..
                    } if l == lock => woken = Some(reason),
                    LockResponse::Granted { lock: ref l, .. } if l == lock => {
                        if let Some(reason) = woken {
                            return Ok(reason);
                        }
                        debug!(thread = %self.id, "grant before wake skipped");
                    }
                    LockResponse::Aborted { lock: ref l, .. } if l == lock => {
                        return Err(LockError::Aborted(self.id))
                    }
                    LockResponse::Error { message, .. } => {
                        return Err(LockError::Protocol(message))
                    }
                    other => debug!(thread = %self.id, ?other, "stale response skipped"),
                },
                Event::Deadline => {
                    deadline = None;
                    let effects = self.core.cache().expire_waiters(self.manager.clock().now());
                    apply_effects(&self.core, &self.manager, effects);
                }
                Event::Aborted => return self.roll_back(lock),
            }
        }
    }

    async fn next_event(
        &mut self,
        deadline: Option<tokio::time::Instant>,
        signal: &AbortSignal,
    ) -> Result<Event, LockError> {
        let id = self.id;
        tokio::select! {
            biased;
            response = self.inbox.recv() => match response {
                Some(response) => Ok(Event::Response(response)),
                None => Err(LockError::Protocol(format!("{} inbox closed", id))),
            },
            _ = sleep_or_pending(deadline) => Ok(Event::Deadline),
            _ = signal.aborted() => Ok(Event::Aborted),
        }
    }

    /// Undo a blocked request after an abort and report it
    fn roll_back<T>(&mut self, lock: &LockId) -> Result<T, LockError> {
        let withdrawn = self
            .core
            .cache()
            .cancel(lock, self.id.thread, self.manager.clock().now());
        match withdrawn {
            Some(effects) => apply_effects(&self.core, &self.manager, effects),
            None => {
                self.manager.abort_thread(self.id, Some(lock));
            }
        }

        // A grant that raced the abort is given straight back
        while let Ok(response) = self.inbox.try_recv() {
            match response {
                LockResponse::Granted { lock: ref l, .. } if l == lock => {
                    if let Err(e) = self.unlock(lock) {
                        warn!(thread = %self.id, error = %e, "release after abort failed");
                    }
                }
                other => debug!(thread = %self.id, ?other, "dropped after abort"),
            }
        }
        Err(LockError::Aborted(self.id))
    }

    /// Send a request to the server; on rejection drop its error report
    fn request(&mut self, message: ClientMessage) -> Result<(), LockError> {
        let result = self.manager.handle(message);
        if result.is_err() {
            while let Ok(response) = self.inbox.try_recv() {
                debug!(thread = %self.id, ?response, "drained after rejection");
            }
        }
        result
    }

    fn closed(&self) -> LockError {
        LockError::Protocol(format!("{} inbox closed", self.id))
    }
}

impl<C: Clock> Drop for ThreadHandle<C> {
    fn drop(&mut self) {
        let mut inboxes = self.core.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        inboxes.remove(&self.id.thread);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
