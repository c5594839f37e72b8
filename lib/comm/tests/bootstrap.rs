// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end bootstrap across multiple ranks.
//!
//! Each rank runs on its own thread against one shared in-process store:
//! initialize the library, create a context (which drives the OOB
//! allgather of endpoint addresses), progress it, tear it down. Every rank
//! must observe the identical, rank-ordered endpoint set, and the store
//! must be empty once all ranks are done.

use std::sync::Arc;

use quorum_comm::context::{CommContext, ContextState, MockCollectiveLib};
use quorum_comm::{CommConfig, MemoryStore, StoreExchange};

fn endpoint(rank: u32) -> Vec<u8> {
    format!("tcp://10.0.0.{rank}:5000").into_bytes()
}

fn bootstrap_world(world_size: u32) -> Vec<Vec<Vec<u8>>> {
    let store = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for rank in 0..world_size {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            let exchange =
                StoreExchange::new(store, rank, world_size, "bootstrap").unwrap();
            let driver = MockCollectiveLib::new(endpoint(rank));
            let mut ctx = CommContext::new(driver);

            ctx.initialize(world_size).unwrap();
            ctx.create_context(rank, &exchange).unwrap();
            assert_eq!(ctx.state(), ContextState::ContextReady);

            let peers = ctx.context().unwrap().peer_endpoints.clone();

            for _ in 0..3 {
                ctx.progress().unwrap();
            }
            ctx.destroy().unwrap();
            assert_eq!(ctx.state(), ContextState::Destroyed);

            peers
        }));
    }
    let gathered: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(store.is_empty(), "bootstrap left rendezvous keys behind");
    gathered
}

#[test]
fn test_bootstrap_single_rank() {
    let gathered = bootstrap_world(1);
    assert_eq!(gathered[0], vec![endpoint(0)]);
}

#[test]
fn test_bootstrap_four_ranks_gather_identical_endpoints() {
    let world_size = 4;
    let expected: Vec<Vec<u8>> = (0..world_size).map(endpoint).collect();
    for (rank, peers) in bootstrap_world(world_size).into_iter().enumerate() {
        assert_eq!(peers, expected, "rank {rank} gathered a different endpoint set");
    }
}

#[test]
fn test_back_to_back_worlds_share_a_store() {
    // Two consecutive bootstraps over the same store and namespace only
    // work because each round vacates its keys completely.
    let store = Arc::new(MemoryStore::new());
    for _ in 0..2 {
        let world_size = 3;
        let mut handles = Vec::new();
        for rank in 0..world_size {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let exchange =
                    StoreExchange::new(store, rank, world_size, "shared").unwrap();
                let driver = MockCollectiveLib::new(endpoint(rank));
                let mut ctx = CommContext::new(driver);
                ctx.initialize(world_size).unwrap();
                ctx.create_context(rank, &exchange).unwrap();
                ctx.destroy().unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(store.is_empty());
    }
}

#[test]
fn test_bootstrap_with_configured_endpoint_estimate() {
    let store = Arc::new(MemoryStore::new());
    let config = CommConfig {
        estimated_num_eps: Some(64),
        release_timeout_ms: Some(5_000),
        ..Default::default()
    };
    let exchange = StoreExchange::new(store, 0, 1, "cfg")
        .unwrap()
        .with_options(&config);
    let driver = MockCollectiveLib::new(endpoint(0));
    let mut ctx = CommContext::with_config(driver, config);
    ctx.initialize(1).unwrap();
    ctx.create_context(0, &exchange).unwrap();
    let mock_ctx = ctx.context().unwrap();
    assert_eq!(mock_ctx.estimated_num_eps, 64);
    assert_eq!(mock_ctx.peer_endpoints.len(), 1);
    ctx.destroy().unwrap();
}
