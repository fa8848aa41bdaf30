// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock levels and lease kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Level at which a lock is requested or held
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockLevel {
    /// Shared with other readers
    Read,
    /// Exclusive against every other holder
    Write,
    /// Never blocks; used by self-synchronizing clustered structures
    Concurrent,
}

/// Which family of levels a lock is currently used with
///
/// Concurrent and read/write requests must not be mixed on one lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockView {
    Exclusive,
    Concurrent,
}

impl LockLevel {
    /// Whether a holder at `self` can coexist with a holder at `other`
    pub fn is_compatible_with(self, other: LockLevel) -> bool {
        match (self, other) {
            (LockLevel::Read, LockLevel::Read) => true,
            (LockLevel::Concurrent, LockLevel::Concurrent) => true,
            (LockLevel::Read, _) | (LockLevel::Write, _) | (LockLevel::Concurrent, _) => false,
        }
    }

    /// Whether a lease at `self` lets its node grant `requested` locally
    pub fn covers(self, requested: LockLevel) -> bool {
        match (self, requested) {
            (LockLevel::Write, LockLevel::Write | LockLevel::Read) => true,
            (LockLevel::Read, LockLevel::Read) => true,
            (LockLevel::Write | LockLevel::Read, LockLevel::Concurrent) => false,
            (LockLevel::Read, LockLevel::Write) => false,
            (LockLevel::Concurrent, _) => false,
        }
    }

    pub fn view(self) -> LockView {
        match self {
            LockLevel::Read | LockLevel::Write => LockView::Exclusive,
            LockLevel::Concurrent => LockView::Concurrent,
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockLevel::Read => write!(f, "read"),
            LockLevel::Write => write!(f, "write"),
            LockLevel::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// How a grant was made
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseKind {
    /// Arbitrated by the server for one thread
    Direct,
    /// Delegated to the requesting node until recalled
    Greedy,
}
