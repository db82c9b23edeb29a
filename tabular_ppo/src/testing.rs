//! Shared fixtures for unit tests.

use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};

use crate::environment::{TransitionTable, VectorizedWorld};

pub type InnerBackend = NdArray<f32>;
pub type TestBackend = Autodiff<InnerBackend>;

/// s0 --a0--> s1 (reward 1, terminal); s0 --a1--> s0 (reward 0).
///
/// s1 is absorbing and terminal for both actions.
pub fn two_state_table() -> TransitionTable {
    TransitionTable::builder(2, 2)
        .deterministic(0, 0, 1, 1.0, true)
        .deterministic(0, 1, 0, 0.0, false)
        .deterministic(1, 0, 1, 0.0, true)
        .deterministic(1, 1, 1, 0.0, true)
        .build()
        .unwrap()
}

/// Noisy corridor of `n` states.
///
/// Action 0 moves right with probability 0.7 and otherwise stays, action 1
/// moves left. Any action in the last state pays 1 and ends the episode.
pub fn corridor_table(n: u32) -> TransitionTable {
    assert!(n >= 2);
    let last = n - 1;
    let mut builder = TransitionTable::builder(n as usize, 2);
    for s in 0..last {
        builder = builder
            .stochastic(s, 0, [(s + 1, 0.7), (s, 0.3)], 0.0, false)
            .deterministic(s, 1, s.saturating_sub(1), 0.0, false);
    }
    builder
        .deterministic(last, 0, last, 1.0, true)
        .deterministic(last, 1, last, 1.0, true)
        .build()
        .unwrap()
}

pub fn world(
    table: TransitionTable,
    num_worlds: usize,
    max_ep_len: usize,
    seed: u64,
) -> VectorizedWorld {
    VectorizedWorld::new(Arc::new(table), num_worlds, max_ep_len, seed).unwrap()
}
