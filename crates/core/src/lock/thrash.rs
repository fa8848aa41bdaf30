// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recall frequency tracking for greedy demotion

use crate::config::GreedyConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window of completed recalls on one lock
#[derive(Clone, Debug, Default)]
pub struct ThrashWindow {
    recalls: VecDeque<Instant>,
    demoted_until: Option<Instant>,
}

impl ThrashWindow {
    /// Record a completed recall; returns true if the lock was just demoted
    pub fn record(&mut self, now: Instant, config: &GreedyConfig) -> bool {
        self.prune(now, config.thrash_window);
        self.recalls.push_back(now);

        if self.recalls.len() > config.thrash_threshold as usize {
            self.recalls.clear();
            self.demoted_until = Some(now + config.cool_down);
            return true;
        }
        false
    }

    pub fn demoted_until(&self) -> Option<Instant> {
        self.demoted_until
    }

    pub fn is_demoted(&self, now: Instant) -> bool {
        self.demoted_until.is_some_and(|until| now < until)
    }

    /// Recalls counted in the window ending at `now`
    pub fn recent(&self, now: Instant, window: Duration) -> usize {
        self.recalls
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < window)
            .count()
    }

    /// Whether the window still carries state worth keeping
    pub fn is_live(&self, now: Instant, window: Duration) -> bool {
        self.is_demoted(now) || self.recent(now, window) > 0
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.recalls.front() {
            if now.saturating_duration_since(*oldest) < window {
                break;
            }
            self.recalls.pop_front();
        }
    }
}
