// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Out-of-band allgather rendezvous over a shared store.
//!
//! Before a collective library can wire up its data plane, every rank must
//! learn every other rank's endpoint address. This module implements that
//! exchange as a non-blocking, poll-driven allgather built from nothing but
//! the [`Store`] primitives, in three phases:
//!
//! 1. **submit**: publish this rank's bytes under a per-rank key.
//! 2. **poll**: check whether all `world_size` keys exist; once they do,
//!    read each in ascending rank order into the caller's receive buffer.
//!    Repeated polls after completion are no-ops with zero store traffic.
//! 3. **release**: a reference-counted barrier: the last rank to arrive
//!    deletes the round's shared keys and raises a per-rank free flag;
//!    every other rank waits on its own flag. Each rank removes its own
//!    flag on the way out, leaving the round's namespace fully vacated.
//!
//! The caller of these operations is the library's internal progress
//! mechanism: `submit` and `poll` must return immediately, and polling
//! cadence belongs to the caller. The only blocking step is the store-side
//! wait inside `release`, which blocks the calling rank's thread alone.
//! All coordination state lives in the store, so one [`StoreExchange`] can
//! drive concurrent rounds from multiple threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;
use crate::{CommError, Result};

/// Result of polling an in-flight allgather round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllgatherStatus {
    /// At least one rank has not yet published its message.
    InProgress,
    /// All messages were gathered into the receive buffer.
    Done,
}

#[derive(Debug)]
enum RoundState {
    Posted,
    Complete,
    Failed(String),
}

/// One in-flight allgather round.
///
/// Created by [`OobAllgather::allgather`], advanced by [`OobAllgather::test`],
/// consumed by [`OobAllgather::free`]. Holds borrows of the caller-owned
/// send and receive buffers for the duration of the round.
#[derive(Debug)]
pub struct AllgatherRequest<'a> {
    rank: u32,
    world_size: u32,
    recv: &'a mut [u8],
    msg_len: usize,
    namespace: String,
    state: RoundState,
}

impl AllgatherRequest<'_> {
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// Key namespace of this round; unique per round under one exchange.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, RoundState::Complete)
    }
}

/// The three-operation OOB interface handed to the collective library as
/// its address-exchange mechanism.
///
/// The library drives a round by calling `allgather` once, `test` until it
/// stops reporting [`AllgatherStatus::InProgress`], and finally `free`.
/// `allgather` and `test` never block; `free` may block on the store until
/// every rank has finished the round.
pub trait OobAllgather: Send + Sync {
    /// Publish `send` and open a round gathering into `recv`, which must be
    /// sized `world_size * send.len()`.
    fn allgather<'a>(&self, send: &'a [u8], recv: &'a mut [u8])
        -> Result<AllgatherRequest<'a>>;

    /// Poll the round once. Idempotent after returning
    /// [`AllgatherStatus::Done`]; sticky after a failure.
    fn test(&self, request: &mut AllgatherRequest<'_>) -> Result<AllgatherStatus>;

    /// Tear the round down, blocking until its store keys are vacated.
    fn free(&self, request: AllgatherRequest<'_>) -> Result<()>;
}

/// Store-backed [`OobAllgather`] implementation.
///
/// Rounds are namespaced `"{prefix}/ag{n}"` with `n` from a local counter.
/// Ranks issue collective setup calls in an identical order (a requirement
/// the surrounding library already imposes), so the counter agrees across
/// ranks without further coordination.
pub struct StoreExchange {
    store: Arc<dyn Store>,
    rank: u32,
    world_size: u32,
    prefix: String,
    round: AtomicU64,
    release_timeout: Option<Duration>,
}

impl StoreExchange {
    pub fn new(
        store: Arc<dyn Store>,
        rank: u32,
        world_size: u32,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(CommError::InvalidArgument(format!(
                "rank {rank} out of range for world size {world_size}"
            )));
        }
        Ok(Self {
            store,
            rank,
            world_size,
            prefix: prefix.into(),
            round: AtomicU64::new(0),
            release_timeout: None,
        })
    }

    /// Bound the release-phase wait. Without a bound the wait is indefinite,
    /// matching the historical behavior: a hung peer blocks every other
    /// rank's release.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = Some(timeout);
        self
    }

    /// Apply configured options (the release-phase wait bound).
    pub fn with_options(mut self, config: &crate::config::CommConfig) -> Self {
        self.release_timeout = config.release_timeout();
        self
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    fn data_key(namespace: &str, rank: u32) -> String {
        format!("{namespace}/teamr{rank}")
    }

    fn done_key(namespace: &str) -> String {
        format!("{namespace}/ag_done")
    }

    fn free_key(namespace: &str, rank: u32) -> String {
        format!("{namespace}/ag_free{rank}")
    }

    /// Gather every rank's value, in ascending rank order. Values are
    /// staged and only copied into `recv` once all reads succeeded, so a
    /// failed poll leaves the receive buffer untouched.
    fn gather_into(&self, request: &mut AllgatherRequest<'_>) -> Result<()> {
        let mut staged = Vec::with_capacity(request.world_size as usize);
        for r in 0..request.world_size {
            let key = Self::data_key(&request.namespace, r);
            let value = self
                .store
                .get(&key)
                .map_err(|e| CommError::store("get", &key, e))?;
            if value.len() != request.msg_len {
                return Err(CommError::Protocol(format!(
                    "rank {r} published {} bytes, expected {}",
                    value.len(),
                    request.msg_len
                )));
            }
            staged.push(value);
        }
        for (r, value) in staged.iter().enumerate() {
            let offset = r * request.msg_len;
            request.recv[offset..offset + request.msg_len].copy_from_slice(value);
        }
        Ok(())
    }
}

impl OobAllgather for StoreExchange {
    fn allgather<'a>(
        &self,
        send: &'a [u8],
        recv: &'a mut [u8],
    ) -> Result<AllgatherRequest<'a>> {
        let expected = send.len() * self.world_size as usize;
        if recv.len() != expected {
            return Err(CommError::InvalidArgument(format!(
                "recv buffer holds {} bytes, need {} ({} ranks x {} bytes)",
                recv.len(),
                expected,
                self.world_size,
                send.len()
            )));
        }

        let round = self.round.fetch_add(1, Ordering::Relaxed);
        let namespace = format!("{}/ag{round}", self.prefix);
        let key = Self::data_key(&namespace, self.rank);
        self.store
            .set(&key, send)
            .map_err(|e| CommError::store("set", &key, e))?;

        tracing::debug!(
            rank = self.rank,
            world_size = self.world_size,
            namespace = %namespace,
            msg_len = send.len(),
            "posted oob allgather"
        );

        Ok(AllgatherRequest {
            rank: self.rank,
            world_size: self.world_size,
            recv,
            msg_len: send.len(),
            namespace,
            state: RoundState::Posted,
        })
    }

    fn test(&self, request: &mut AllgatherRequest<'_>) -> Result<AllgatherStatus> {
        match &request.state {
            RoundState::Complete => return Ok(AllgatherStatus::Done),
            RoundState::Failed(reason) => {
                return Err(CommError::Protocol(format!(
                    "allgather round {} previously failed: {reason}",
                    request.namespace
                )));
            }
            RoundState::Posted => {}
        }

        let keys: Vec<String> = (0..request.world_size)
            .map(|r| Self::data_key(&request.namespace, r))
            .collect();
        let all_present = self
            .store
            .check(&keys)
            .map_err(|e| CommError::store("check", request.namespace.clone(), e))?;
        if !all_present {
            return Ok(AllgatherStatus::InProgress);
        }

        if let Err(e) = self.gather_into(request) {
            request.state = RoundState::Failed(e.to_string());
            return Err(e);
        }

        request.state = RoundState::Complete;
        tracing::debug!(
            rank = request.rank,
            namespace = %request.namespace,
            "oob allgather complete"
        );
        Ok(AllgatherStatus::Done)
    }

    fn free(&self, request: AllgatherRequest<'_>) -> Result<()> {
        let namespace = &request.namespace;
        let done_key = Self::done_key(namespace);
        let num_done = self
            .store
            .add(&done_key, 1)
            .map_err(|e| CommError::store("add", &done_key, e))?;

        if num_done == request.world_size as i64 {
            // Last rank out: every peer has confirmed it no longer needs
            // the shared keys, so deleting them here cannot race a reader.
            self.store
                .delete_key(&done_key)
                .map_err(|e| CommError::store("delete", &done_key, e))?;
            for r in 0..request.world_size {
                let key = Self::data_key(namespace, r);
                self.store
                    .delete_key(&key)
                    .map_err(|e| CommError::store("delete", &key, e))?;
            }
            for r in 0..request.world_size {
                let key = Self::free_key(namespace, r);
                self.store
                    .add(&key, 1)
                    .map_err(|e| CommError::store("add", &key, e))?;
            }
            tracing::debug!(rank = request.rank, namespace = %namespace, "released round as last rank");
        } else {
            let key = Self::free_key(namespace, request.rank);
            let keys = vec![key.clone()];
            match self.release_timeout {
                Some(timeout) => self
                    .store
                    .wait_timeout(&keys, timeout)
                    .map_err(|e| match e {
                        CommError::Timeout { .. } => e,
                        other => CommError::store("wait", &key, other),
                    })?,
                None => self
                    .store
                    .wait(&keys)
                    .map_err(|e| CommError::store("wait", &key, e))?,
            }
        }

        // Both paths drop their own free flag last; once every rank has
        // done so, no key of this round remains in the store.
        let own_free = Self::free_key(namespace, request.rank);
        self.store
            .delete_key(&own_free)
            .map_err(|e| CommError::store("delete", &own_free, e))?;
        Ok(())
    }
}
