// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node side of the protocol: lease cache and in-process client

mod cache;
mod client;

pub use cache::{CacheEffect, NodeLockCache};
pub use client::{ClientHub, LockClient, ThreadHandle};
