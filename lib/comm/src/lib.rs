// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Store-mediated bootstrap for collective communication contexts.
//!
//! Before a fixed set of distributed processes ("ranks") can run any
//! data-plane collective, each one must create a communication context
//! wired to every peer's endpoint address. This crate provides the
//! control-plane handshake that precedes those collectives:
//!
//! - [`rendezvous`]: a non-blocking, poll-driven out-of-band allgather
//!   built on a shared key-value store, with reference-counted cleanup that
//!   leaves the store fully vacated after every round.
//! - [`context`]: the lifecycle state machine owning library and context
//!   handles, with ordered rollback on construction failure and ordered,
//!   idempotent teardown.
//! - [`store`]: the store client contract the protocol consumes, plus an
//!   in-process implementation.
//! - [`trace`]: per-participant structured recording of collective calls.
//!
//! The data-plane collectives themselves, and the collective library's
//! internals, are out of scope; the library is abstracted behind
//! [`context::CollectiveLib`] and drives the rendezvous as its
//! address-exchange callback set.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod rendezvous;
pub mod store;
pub mod trace;

pub use config::CommConfig;
pub use context::{CollectiveLib, CommContext, ContextState, ThreadMode};
pub use error::{CommError, Result};
pub use rendezvous::{AllgatherRequest, AllgatherStatus, OobAllgather, StoreExchange};
pub use store::{MemoryStore, Store};
pub use trace::CommTraceRecorder;
