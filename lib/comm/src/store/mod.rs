// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared store client contract.
//!
//! The rendezvous protocol keeps all of its coordination state in a shared
//! key-value store so that ranks in different processes can coordinate
//! without shared memory. The backend is external (etcd, a TCP store, ...);
//! this module defines the contract the protocol consumes plus an
//! in-process implementation for tests and single-node deployments.

use std::time::Duration;

use crate::{CommError, Result};

mod memory;
pub use memory::MemoryStore;

/// Client for a shared key-value store.
///
/// Implementations must be externally thread-safe: the rendezvous protocol
/// may drive concurrent rounds over a single client from multiple threads.
///
/// Counter keys (`add`) hold the decimal string form of the counter so that
/// `get` on them stays printable.
pub trait Store: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read the value under `key`. Fails with [`CommError::KeyNotFound`]
    /// if the key is absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// True iff every key in `keys` is present.
    fn check(&self, keys: &[String]) -> Result<bool>;

    /// Atomically add `delta` to the counter under `key`, creating it at
    /// `delta` if absent. Returns the post-increment value.
    fn add(&self, key: &str, delta: i64) -> Result<i64>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete_key(&self, key: &str) -> Result<()>;

    /// Block the calling thread until every key in `keys` is present.
    fn wait(&self, keys: &[String]) -> Result<()>;

    /// Like [`Store::wait`], but gives up after `timeout` with
    /// [`CommError::Timeout`].
    fn wait_timeout(&self, keys: &[String], timeout: Duration) -> Result<()>;
}

/// Parse a counter value previously written by [`Store::add`].
pub(crate) fn parse_counter(key: &str, raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CommError::Protocol(format!("key '{key}' does not hold a counter")))
}
