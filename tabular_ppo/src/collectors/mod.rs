//! Trajectory collection.
//!
//! A collector drives a [`VectorizedWorld`] with a policy for exactly
//! `horizon` lockstep steps and returns the filled [`RolloutBuffer`]. Each
//! step calls `act` once and `step` once for the batch (or once per shard).
//!
//! ```text
//!   observe ──► policy.act ──► world.step ──► push_step
//!      ▲                                          │
//!      └──────────────── horizon times ───────────┘
//!   observe ──► policy.values ──► last_values
//! ```
//!
//! [`SerialCollector`] is the reference implementation; [`ParallelCollector`]
//! steps disjoint shards on a rayon pool and must produce the same buffer for
//! the same seed.

mod parallel;
mod serial;


use burn::tensor::backend::Backend;
use thiserror::Error;

use crate::buffers::RolloutBuffer;
use crate::environment::{StepBatch, VectorizedWorld, WorldError};
use crate::policy::Policy;

pub use parallel::ParallelCollector;
pub use serial::SerialCollector;

/// Failure of one collection cycle. No partial buffer is produced.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("world step failed: {0}")]
    World(#[from] WorldError),

    #[error("collector worker for shard {shard} panicked: {message}")]
    WorkerPanicked { shard: usize, message: String },

    #[error("failed to build collector thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("collection horizon must be positive")]
    ZeroHorizon,
}

/// Produces one rollout per call.
pub trait TrajectoryCollector {
    fn collect<B: Backend, P: Policy<B>>(
        &self,
        world: &mut VectorizedWorld,
        policy: &P,
        horizon: usize,
    ) -> Result<RolloutBuffer, CollectError>;
}

/// V(next_state) for truncated instances, 0 elsewhere.
///
/// Only truncated rows are evaluated.
pub(crate) fn truncation_bootstrap<B: Backend, P: Policy<B>>(
    policy: &P,
    step: &StepBatch,
) -> Vec<f32> {
    let mut bootstrap = vec![0.0f32; step.len()];
    let truncated: Vec<usize> = step
        .truncations
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| t.then_some(i))
        .collect();
    if truncated.is_empty() {
        return bootstrap;
    }

    let next_states: Vec<u32> = truncated.iter().map(|&i| step.next_states[i]).collect();
    for (i, v) in truncated.into_iter().zip(policy.values(&next_states)) {
        bootstrap[i] = v;
    }
    bootstrap
}
