// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for integration tests

#![allow(dead_code)]

use lockd_core::{
    CacheEffect, ClientMessage, FakeClock, LeaseKind, LockId, LockLevel, LockManager,
    LockManagerConfig, LockPolicy, LockResponse, NodeId, NodeLockCache, ResponseSink,
    ServerThreadId, ThreadId,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Sink that keeps every response for inspection
#[derive(Default)]
pub struct Collector {
    responses: Mutex<Vec<(NodeId, LockResponse)>>,
}

impl Collector {
    pub fn take(&self) -> Vec<(NodeId, LockResponse)> {
        std::mem::take(&mut *self.responses.lock().unwrap())
    }

    pub fn take_for(&self, node: NodeId) -> Vec<LockResponse> {
        let mut responses = self.responses.lock().unwrap();
        let (mine, rest) = std::mem::take(&mut *responses)
            .into_iter()
            .partition(|(to, _)| *to == node);
        *responses = rest;
        mine.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl ResponseSink for Collector {
    fn deliver(&self, to: NodeId, response: LockResponse) {
        self.responses.lock().unwrap().push((to, response));
    }
}

pub fn t(node: u64, thread: u64) -> ServerThreadId {
    ServerThreadId::new(NodeId(node), ThreadId(thread))
}

pub fn started(
    policy: LockPolicy,
) -> (LockManager<FakeClock>, Arc<Collector>, FakeClock) {
    let clock = FakeClock::new();
    let sink = Arc::new(Collector::default());
    let manager = LockManager::new(
        policy,
        LockManagerConfig::default(),
        clock.clone(),
        sink.clone(),
    );
    manager.start().unwrap();
    (manager, sink, clock)
}

pub fn granted(responses: &[LockResponse], thread: ServerThreadId) -> Option<LeaseKind> {
    responses.iter().find_map(|r| match r {
        LockResponse::Granted {
            thread: t, lease, ..
        } if *t == thread => Some(*lease),
        _ => None,
    })
}

/// A node driven synchronously: lease cache in front of a shared manager
///
/// Every call settles the resulting message exchange before returning, and
/// grants observed along the way are appended to `grants`.
pub struct SyncNode<'a> {
    pub node: NodeId,
    pub cache: NodeLockCache,
    pub manager: &'a LockManager<FakeClock>,
    pub sink: &'a Collector,
    pub grants: Vec<(ThreadId, LockLevel)>,
    pub server_messages: usize,
}

impl<'a> SyncNode<'a> {
    pub fn new(node: NodeId, manager: &'a LockManager<FakeClock>, sink: &'a Collector) -> Self {
        Self {
            node,
            cache: NodeLockCache::new(node),
            manager,
            sink,
            grants: Vec::new(),
            server_messages: 0,
        }
    }

    pub fn lock(&mut self, lock: &LockId, thread: ThreadId, level: LockLevel) {
        match self.cache.acquire(lock, thread, level, false, Instant::now()).unwrap() {
            Some(effects) => self.apply(effects),
            None => self.send(ClientMessage::lock(
                lock.clone(),
                ServerThreadId::new(self.node, thread),
                level,
            )),
        }
        self.settle();
    }

    pub fn unlock(&mut self, lock: &LockId, thread: ThreadId) {
        match self.cache.release(lock, thread, Instant::now()) {
            Some(effects) => self.apply(effects),
            None => self.send(ClientMessage::unlock(
                lock.clone(),
                ServerThreadId::new(self.node, thread),
            )),
        }
        self.settle();
    }

    fn send(&mut self, message: ClientMessage) {
        self.server_messages += 1;
        self.manager.handle(message).unwrap();
    }

    fn apply(&mut self, effects: Vec<CacheEffect>) {
        for effect in effects {
            match effect {
                CacheEffect::Local(response) => self.observe(response),
                CacheEffect::Server(message) => self.send(message),
            }
        }
    }

    fn observe(&mut self, response: LockResponse) {
        if let LockResponse::Granted { thread, level, .. } = response {
            self.grants.push((thread.thread, level));
        }
    }

    /// Process everything the server has sent this node
    pub fn settle(&mut self) {
        loop {
            let responses = self.sink.take_for(self.node);
            if responses.is_empty() {
                return;
            }
            for response in responses {
                match response {
                    LockResponse::Recall { ref lock, .. } => {
                        let effects = self.cache.recall(lock, Instant::now());
                        self.apply(effects);
                    }
                    LockResponse::Granted {
                        ref lock,
                        thread,
                        level,
                        lease: LeaseKind::Greedy,
                    } => {
                        if let Some(grant) = self.cache.lease_granted(lock, thread.thread, level) {
                            self.observe(grant);
                        }
                    }
                    other => self.observe(other),
                }
            }
        }
    }
}
