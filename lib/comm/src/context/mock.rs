// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mock collective library for lifecycle and bootstrap tests.
//!
//! `context_create` behaves like a real library's: it drives the supplied
//! OOB capability through a full submit/poll/release round to gather every
//! rank's endpoint bytes, and fails if the exchange fails. Failure-injection
//! switches and operation counters let tests assert rollback ordering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::rendezvous::{AllgatherStatus, OobAllgather};
use crate::{CommError, Result};

use super::{CollectiveLib, ContextParams, LibParams, ThreadMode};

/// How long `context_create` keeps polling the OOB exchange before giving
/// up on absent peers.
const OOB_DEADLINE: Duration = Duration::from_secs(10);

/// Operation counters, shared with the tests that own the mock.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub lib_inits: AtomicUsize,
    pub lib_finalizes: AtomicUsize,
    pub context_creates: AtomicUsize,
    pub context_destroys: AtomicUsize,
    pub progress_calls: AtomicUsize,
    pub request_frees: AtomicUsize,
}

impl MockCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Opaque library handle handed out by the mock.
pub struct MockLib {
    pub estimated_num_eps: usize,
}

/// Opaque context handle; carries the endpoints gathered during creation.
pub struct MockContext {
    pub rank: u32,
    pub estimated_num_eps: usize,
    pub peer_endpoints: Vec<Vec<u8>>,
}

/// Opaque in-flight operation handle.
pub struct MockRequest;

pub struct MockCollectiveLib {
    endpoint: Vec<u8>,
    thread_mode: ThreadMode,
    fail_lib_init: bool,
    fail_context_create: bool,
    counters: Arc<MockCounters>,
}

impl MockCollectiveLib {
    /// `endpoint` is the address blob this rank publishes during the OOB
    /// exchange; all ranks must publish blobs of equal length.
    pub fn new(endpoint: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            thread_mode: ThreadMode::Multi,
            fail_lib_init: false,
            fail_context_create: false,
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Report a different thread support level (capability-check tests).
    pub fn with_thread_mode(mut self, mode: ThreadMode) -> Self {
        self.thread_mode = mode;
        self
    }

    pub fn fail_lib_init(mut self) -> Self {
        self.fail_lib_init = true;
        self
    }

    pub fn fail_context_create(mut self) -> Self {
        self.fail_context_create = true;
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        self.counters.clone()
    }
}

impl CollectiveLib for MockCollectiveLib {
    type Lib = MockLib;
    type Context = MockContext;
    type Request = MockRequest;

    fn max_thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    fn lib_init(&self, params: &LibParams) -> Result<MockLib> {
        MockCounters::bump(&self.counters.lib_inits);
        if self.fail_lib_init {
            return Err(CommError::Resource {
                what: "library",
                reason: "injected lib_init failure".to_string(),
            });
        }
        Ok(MockLib {
            estimated_num_eps: params.estimated_num_eps,
        })
    }

    fn context_create(
        &self,
        _lib: &mut MockLib,
        params: &ContextParams,
        oob: &dyn OobAllgather,
    ) -> Result<MockContext> {
        MockCounters::bump(&self.counters.context_creates);
        if self.fail_context_create {
            return Err(CommError::Resource {
                what: "context",
                reason: "injected context_create failure".to_string(),
            });
        }

        let msg_len = self.endpoint.len();
        let mut recv = vec![0u8; msg_len * params.oob_world_size as usize];
        let mut request = oob.allgather(&self.endpoint, &mut recv)?;
        let deadline = Instant::now() + OOB_DEADLINE;
        while oob.test(&mut request)? == AllgatherStatus::InProgress {
            if Instant::now() > deadline {
                return Err(CommError::Resource {
                    what: "context",
                    reason: "oob allgather did not complete".to_string(),
                });
            }
            std::thread::yield_now();
        }
        oob.free(request)?;

        let peer_endpoints = if msg_len == 0 {
            vec![Vec::new(); params.oob_world_size as usize]
        } else {
            recv.chunks(msg_len).map(|c| c.to_vec()).collect()
        };
        Ok(MockContext {
            rank: params.oob_rank,
            estimated_num_eps: params.estimated_num_eps,
            peer_endpoints,
        })
    }

    fn context_progress(&self, _context: &mut MockContext) -> Result<()> {
        MockCounters::bump(&self.counters.progress_calls);
        Ok(())
    }

    fn request_free(&self, _request: MockRequest) -> Result<()> {
        MockCounters::bump(&self.counters.request_frees);
        Ok(())
    }

    fn context_destroy(&self, _context: MockContext) -> Result<()> {
        MockCounters::bump(&self.counters.context_destroys);
        Ok(())
    }

    fn lib_finalize(&self, _lib: MockLib) -> Result<()> {
        MockCounters::bump(&self.counters.lib_finalizes);
        Ok(())
    }
}
