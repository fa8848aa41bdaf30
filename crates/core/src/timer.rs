// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeouts for bounded waits and bounded acquires
//!
//! The timer can be fed before it is started: requests replayed during server
//! startup schedule their timeouts immediately, and `start` converts them into
//! deadlines, crediting the time they spent queued.

use crate::clock::Clock;
use crate::effect::TimerKey;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Observable phase of a [`LockTimer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    NotStarted,
    Started,
    Shutdown,
}

#[derive(Debug, Clone)]
struct Queued {
    key: TimerKey,
    delay: Duration,
    queued_at: Instant,
}

/// Armed deadlines, ordered by time with ties broken by key
///
/// Both indexes hold exactly the armed timers.
#[derive(Debug, Default)]
struct Deadlines {
    by_time: BTreeSet<(Instant, TimerKey)>,
    by_key: HashMap<TimerKey, Instant>,
}

impl Deadlines {
    /// Arm `key` to fire `delay` after `now`, replacing any earlier arming
    ///
    /// A delay past the clock's range never fires.
    fn arm(&mut self, key: TimerKey, now: Instant, delay: Duration) {
        self.disarm(&key);
        let Some(fire_at) = now.checked_add(delay) else {
            tracing::debug!(%key, ?delay, "timeout out of range, never fires");
            return;
        };
        self.by_time.insert((fire_at, key.clone()));
        self.by_key.insert(key, fire_at);
    }

    fn disarm(&mut self, key: &TimerKey) {
        if let Some(fire_at) = self.by_key.remove(key) {
            self.by_time.remove(&(fire_at, key.clone()));
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        let (fire_at, _) = self.by_time.first()?;
        if *fire_at > now {
            return None;
        }
        let (_, key) = self.by_time.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }

    fn next(&self) -> Option<Instant> {
        self.by_time.first().map(|(fire_at, _)| *fire_at)
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}

#[derive(Debug)]
enum Phase {
    NotStarted { queued: Vec<Queued> },
    Started { deadlines: Deadlines },
    Shutdown,
}

/// Timeout scheduler keyed by [`TimerKey`]
#[derive(Debug)]
pub struct LockTimer<C: Clock> {
    clock: C,
    phase: Phase,
}

impl<C: Clock> LockTimer<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            phase: Phase::NotStarted { queued: Vec::new() },
        }
    }

    pub fn state(&self) -> TimerState {
        match self.phase {
            Phase::NotStarted { .. } => TimerState::NotStarted,
            Phase::Started { .. } => TimerState::Started,
            Phase::Shutdown => TimerState::Shutdown,
        }
    }

    /// Arm a timeout `delay` from now. Ignored after shutdown.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        let now = self.clock.now();
        match &mut self.phase {
            Phase::NotStarted { queued } => {
                queued.retain(|q| q.key != key);
                queued.push(Queued {
                    key,
                    delay,
                    queued_at: now,
                });
            }
            Phase::Started { deadlines } => deadlines.arm(key, now, delay),
            Phase::Shutdown => {
                tracing::debug!(%key, "timer shut down, schedule ignored");
            }
        }
    }

    /// Disarm a timeout; unknown keys are ignored
    pub fn cancel(&mut self, key: &TimerKey) {
        match &mut self.phase {
            Phase::NotStarted { queued } => queued.retain(|q| &q.key != key),
            Phase::Started { deadlines } => deadlines.disarm(key),
            Phase::Shutdown => {}
        }
    }

    /// Begin firing; queued timeouts keep only their remaining delay
    pub fn start(&mut self) {
        let Phase::NotStarted { queued } = &mut self.phase else {
            return;
        };
        let queued = std::mem::take(queued);
        let now = self.clock.now();

        let mut deadlines = Deadlines::default();
        for q in queued {
            let waited = now.saturating_duration_since(q.queued_at);
            deadlines.arm(q.key, now, q.delay.saturating_sub(waited));
        }

        tracing::debug!(count = deadlines.len(), "lock timer started");
        self.phase = Phase::Started { deadlines };
    }

    /// Drain every timeout due at the current time, earliest first
    pub fn poll(&mut self) -> Vec<TimerKey> {
        let now = self.clock.now();
        let Phase::Started { deadlines } = &mut self.phase else {
            return Vec::new();
        };

        let mut due = Vec::new();
        while let Some(key) = deadlines.pop_due(now) {
            due.push(key);
        }
        due
    }

    /// Earliest armed deadline, if started
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Started { deadlines } => deadlines.next(),
            Phase::NotStarted { .. } | Phase::Shutdown => None,
        }
    }

    /// Number of armed or queued timeouts
    pub fn len(&self) -> usize {
        match &self.phase {
            Phase::NotStarted { queued } => queued.len(),
            Phase::Started { deadlines } => deadlines.len(),
            Phase::Shutdown => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every timeout and refuse new ones. Idempotent.
    pub fn shutdown(&mut self) {
        if !matches!(self.phase, Phase::Shutdown) {
            tracing::debug!(discarded = self.len(), "lock timer shut down");
            self.phase = Phase::Shutdown;
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
