// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager configuration
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration.

use crate::policy::LockPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where a merged recall places the holder's pending requests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallMerge {
    /// Behind everything already queued on the server
    #[default]
    Append,
    /// Ahead of the request that triggered the recall
    Interleave,
}

/// Greedy lease settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyConfig {
    pub enabled: bool,
    /// Recalls tolerated within `thrash_window` before the lock is demoted
    pub thrash_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub thrash_window: Duration,
    /// How long a demoted lock stays non-greedy
    #[serde(with = "humantime_serde")]
    pub cool_down: Duration,
    pub recall_merge: RecallMerge,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thrash_threshold: 4,
            thrash_window: Duration::from_secs(10),
            cool_down: Duration::from_secs(60),
            recall_merge: RecallMerge::Append,
        }
    }
}

impl GreedyConfig {
    pub fn with_thrash_threshold(mut self, threshold: u32) -> Self {
        self.thrash_threshold = threshold;
        self
    }

    pub fn with_thrash_window(mut self, window: Duration) -> Self {
        self.thrash_window = window;
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn with_recall_merge(mut self, merge: RecallMerge) -> Self {
        self.recall_merge = merge;
        self
    }
}

/// Deadlock scan settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockConfig {
    pub enabled: bool,
    /// How often the maintenance task runs
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
    /// A scan only runs once some request has been pending this long
    #[serde(with = "humantime_serde")]
    pub pending_threshold: Duration,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: Duration::from_secs(10),
            pending_threshold: Duration::from_secs(5),
        }
    }
}

/// Top-level lock manager configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    pub greedy: GreedyConfig,
    /// Applied to waits that carry no timeout of their own
    #[serde(with = "humantime_serde")]
    pub default_wait_timeout: Option<Duration>,
    pub deadlock: DeadlockConfig,
    /// Granularity at which the daemon fires due timers
    #[serde(with = "humantime_serde")]
    pub timer_resolution: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            greedy: GreedyConfig::default(),
            default_wait_timeout: None,
            deadlock: DeadlockConfig::default(),
            timer_resolution: Duration::from_millis(50),
        }
    }
}

impl LockManagerConfig {
    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LockManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_resolution.is_zero() {
            return Err(ConfigError::Invalid(
                "timer_resolution must be positive".to_string(),
            ));
        }
        if self.greedy.enabled && self.greedy.thrash_window.is_zero() {
            return Err(ConfigError::Invalid(
                "greedy.thrash_window must be positive".to_string(),
            ));
        }
        if self.deadlock.enabled && self.deadlock.scan_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "deadlock.scan_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The lock policy these settings select
    pub fn policy(&self) -> LockPolicy {
        LockPolicy::from_config(&self.greedy)
    }

    pub fn with_greedy(mut self, greedy: GreedyConfig) -> Self {
        self.greedy = greedy;
        self
    }

    pub fn without_greedy(mut self) -> Self {
        self.greedy.enabled = false;
        self
    }

    pub fn with_default_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    pub fn with_deadlock(mut self, deadlock: DeadlockConfig) -> Self {
        self.deadlock = deadlock;
        self
    }

    pub fn with_timer_resolution(mut self, resolution: Duration) -> Self {
        self.timer_resolution = resolution;
        self
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
