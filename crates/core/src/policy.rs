// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock caching policy

use crate::config::GreedyConfig;
use crate::level::LockLevel;
use std::time::Instant;

/// How the server arbitrates locks
///
/// Constructed once and handed to the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockPolicy {
    /// Every operation is arbitrated on the server
    NonGreedy,
    /// Uncontended grants become leases held by the requesting node
    Greedy(GreedyConfig),
}

impl LockPolicy {
    pub fn from_config(config: &GreedyConfig) -> Self {
        if config.enabled {
            LockPolicy::Greedy(config.clone())
        } else {
            LockPolicy::NonGreedy
        }
    }

    pub fn greedy_config(&self) -> Option<&GreedyConfig> {
        match self {
            LockPolicy::NonGreedy => None,
            LockPolicy::Greedy(config) => Some(config),
        }
    }

    /// Whether a grant at `level` may become a lease
    ///
    /// `demoted_until` is the end of the lock's thrash cool-down, if any.
    pub fn may_lease(&self, level: LockLevel, demoted_until: Option<Instant>, now: Instant) -> bool {
        match self {
            LockPolicy::NonGreedy => false,
            LockPolicy::Greedy(_) => {
                level != LockLevel::Concurrent && demoted_until.is_none_or(|until| now >= until)
            }
        }
    }
}
