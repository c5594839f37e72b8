// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the bootstrap path.
//!
//! Rendezvous-phase errors propagate immediately to the caller of the phase
//! that hit them; they are never retried inside the protocol. Lifecycle
//! errors during construction unwind already-acquired resources in reverse
//! order before propagating.

use std::time::Duration;

use thiserror::Error;

use crate::context::ContextState;

/// Errors that can occur while bootstrapping a communication context.
#[derive(Debug, Error)]
pub enum CommError {
    /// Capability or thread-mode mismatch. Fatal; raised before any
    /// resource is acquired.
    #[error("configuration error: {0}")]
    Config(String),

    /// A store primitive failed during a rendezvous phase.
    #[error("store {op} failed for key '{key}': {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: Box<CommError>,
    },

    /// Library or context handle creation failed.
    #[error("failed to create {what}: {reason}")]
    Resource { what: &'static str, reason: String },

    /// Operation invoked in a state the lifecycle does not permit.
    #[error("invalid context state: expected {expected}, got {actual}")]
    InvalidState {
        expected: ContextState,
        actual: ContextState,
    },

    /// Caller violated an operation precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A peer violated the exchange contract (e.g. published a message of
    /// the wrong length).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Bounded release wait expired before the free signal appeared.
    #[error("timed out after {waited:?} waiting for key '{key}'")]
    Timeout { key: String, waited: Duration },

    /// Store lookup for an absent key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Store backend I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommError {
    /// Wrap a store backend failure with the operation and key it hit.
    pub(crate) fn store(op: &'static str, key: impl Into<String>, source: CommError) -> Self {
        CommError::Store {
            op,
            key: key.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommError>;
