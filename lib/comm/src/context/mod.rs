// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Communication context lifecycle.
//!
//! [`CommContext`] owns the two opaque resources a collective library hands
//! out, the library handle and the context handle, and sequences them
//! through the only legal path:
//!
//! ```text
//! Uninitialized -> LibInitialized -> ContextReady -> Destroyed
//! ```
//!
//! Construction failure at any step unwinds everything acquired so far, in
//! reverse order, before the error propagates; teardown releases the
//! context strictly before the library. Context creation is where the OOB
//! rendezvous happens: the library receives the three-operation
//! [`OobAllgather`] capability and drives it from its own progress
//! machinery to exchange endpoint addresses.

use std::fmt;

use crate::config::CommConfig;
use crate::logging::Phase;
use crate::rendezvous::OobAllgather;
use crate::{CommError, Result};

mod mock;
pub use mock::{MockCollectiveLib, MockContext, MockCounters, MockLib, MockRequest};

/// Thread support level reported by a collective library build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadMode {
    /// Single-threaded access only.
    Single,
    /// Concurrent access serialized by the caller.
    Serialized,
    /// Fully multithread-safe.
    Multi,
}

/// Parameters for library initialization.
#[derive(Debug, Clone)]
pub struct LibParams {
    pub thread_mode: ThreadMode,
    pub estimated_num_eps: usize,
}

/// Parameters for context creation.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub estimated_num_eps: usize,
    pub oob_rank: u32,
    pub oob_world_size: u32,
}

/// Contract of the external collective library.
///
/// Handles are opaque associated types owned exclusively by the caller; the
/// library is only ever asked to create, progress, and destroy them. The
/// trait is the seam the lifecycle tests mock.
pub trait CollectiveLib: Send + Sync {
    type Lib: Send;
    type Context: Send;
    type Request: Send;

    /// Maximum thread support the library was built with.
    fn max_thread_mode(&self) -> ThreadMode;

    fn lib_init(&self, params: &LibParams) -> Result<Self::Lib>;

    /// Create a context, using `oob` as the address-exchange mechanism.
    /// The library calls `oob.allgather` once, `oob.test` until it resolves,
    /// and `oob.free` before returning.
    fn context_create(
        &self,
        lib: &mut Self::Lib,
        params: &ContextParams,
        oob: &dyn OobAllgather,
    ) -> Result<Self::Context>;

    /// Drive the context's internal event loop once. Bounded time.
    fn context_progress(&self, context: &mut Self::Context) -> Result<()>;

    /// Finalize one outstanding asynchronous operation handle.
    fn request_free(&self, request: Self::Request) -> Result<()>;

    fn context_destroy(&self, context: Self::Context) -> Result<()>;

    fn lib_finalize(&self, lib: Self::Lib) -> Result<()>;
}

/// Lifecycle state of a [`CommContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    LibInitialized,
    ContextReady,
    Destroyed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Uninitialized => write!(f, "Uninitialized"),
            ContextState::LibInitialized => write!(f, "LibInitialized"),
            ContextState::ContextReady => write!(f, "ContextReady"),
            ContextState::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// One initialized, ready-to-use communication domain.
pub struct CommContext<L: CollectiveLib> {
    driver: L,
    config: CommConfig,
    state: ContextState,
    world_size: u32,
    lib: Option<L::Lib>,
    context: Option<L::Context>,
}

impl<L: CollectiveLib> CommContext<L> {
    pub fn new(driver: L) -> Self {
        Self::with_config(driver, CommConfig::default())
    }

    pub fn with_config(driver: L, config: CommConfig) -> Self {
        Self {
            driver,
            config,
            state: ContextState::Uninitialized,
            world_size: 0,
            lib: None,
            context: None,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// The live context handle, present only in `ContextReady`.
    pub fn context(&self) -> Option<&L::Context> {
        self.context.as_ref()
    }

    fn expect_state(&self, expected: ContextState) -> Result<()> {
        if self.state != expected {
            return Err(CommError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Initialize the collective library sized for `world_size` endpoints.
    ///
    /// Requires a fully multithread-safe library build: the context is
    /// progressed from a thread pool that may also drive other contexts.
    /// The capability check runs before any resource is acquired.
    pub fn initialize(&mut self, world_size: u32) -> Result<()> {
        self.expect_state(ContextState::Uninitialized)?;
        if world_size == 0 {
            return Err(CommError::InvalidArgument(
                "world size must be at least 1".to_string(),
            ));
        }

        let mode = self.driver.max_thread_mode();
        if mode != ThreadMode::Multi {
            return Err(CommError::Config(format!(
                "collective library reports thread mode {mode:?}, \
                 multithreading support is required; check library build options"
            )));
        }

        let params = LibParams {
            thread_mode: ThreadMode::Multi,
            estimated_num_eps: world_size as usize,
        };
        let lib = self.driver.lib_init(&params)?;
        self.lib = Some(lib);
        self.world_size = world_size;
        self.state = ContextState::LibInitialized;
        tracing::info!(phase = %Phase::Init, world_size, "collective library initialized");
        Ok(())
    }

    /// Create the communication context, exchanging endpoint addresses
    /// through `exchange`.
    ///
    /// On failure the library handle acquired by [`CommContext::initialize`]
    /// is finalized before the error is reported, leaving the lifecycle in
    /// `Destroyed` with no leaked resources.
    pub fn create_context(&mut self, rank: u32, exchange: &dyn OobAllgather) -> Result<()> {
        self.expect_state(ContextState::LibInitialized)?;
        if rank >= self.world_size {
            return Err(CommError::InvalidArgument(format!(
                "rank {rank} out of range for world size {}",
                self.world_size
            )));
        }

        let params = ContextParams {
            estimated_num_eps: self
                .config
                .estimated_num_eps
                .unwrap_or(self.world_size as usize),
            oob_rank: rank,
            oob_world_size: self.world_size,
        };

        let lib = self.lib.as_mut().expect("lib present in LibInitialized");
        match self.driver.context_create(lib, &params, exchange) {
            Ok(context) => {
                self.context = Some(context);
                self.state = ContextState::ContextReady;
                tracing::info!(phase = %Phase::Ready, rank, world_size = self.world_size, "context created");
                Ok(())
            }
            Err(e) => {
                // ordered rollback: the lib handle must not outlive a failed
                // context creation
                let lib = self.lib.take().expect("lib present in LibInitialized");
                if let Err(fin) = self.driver.lib_finalize(lib) {
                    tracing::error!(
                        phase = %Phase::Teardown,
                        error = %fin,
                        "failed to finalize library while unwinding context creation"
                    );
                }
                self.state = ContextState::Destroyed;
                Err(CommError::Resource {
                    what: "context",
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Drive the context's event loop once.
    pub fn progress(&mut self) -> Result<()> {
        self.expect_state(ContextState::ContextReady)?;
        let context = self.context.as_mut().expect("context present in ContextReady");
        self.driver.context_progress(context)
    }

    /// Finalize one outstanding operation handle. Distinct from teardown.
    pub fn release_request(&self, request: L::Request) -> Result<()> {
        self.expect_state(ContextState::ContextReady)?;
        self.driver.request_free(request)
    }

    /// Release the context, then the library, strictly in that order.
    /// Idempotent: a no-op once `Destroyed`.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == ContextState::Destroyed {
            return Ok(());
        }

        let mut first_err: Option<CommError> = None;
        if let Some(context) = self.context.take() {
            if let Err(e) = self.driver.context_destroy(context) {
                tracing::error!(phase = %Phase::Teardown, error = %e, "failed to destroy context");
                first_err = Some(e);
            }
        }
        if let Some(lib) = self.lib.take() {
            if let Err(e) = self.driver.lib_finalize(lib) {
                tracing::error!(phase = %Phase::Teardown, error = %e, "failed to finalize library");
                first_err.get_or_insert(e);
            }
        }
        self.state = ContextState::Destroyed;
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl<L: CollectiveLib> Drop for CommContext<L> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::error!(phase = %Phase::Teardown, error = %e, "teardown failed in drop");
        }
    }
}
