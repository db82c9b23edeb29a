//! Shard-parallel collector.
//!
//! The world is split into one contiguous shard per worker. Every step runs
//! `act` + `step` on all shards inside the rayon pool; the join of the
//! parallel iterator is the per-step barrier, so no shard can run ahead.
//! Each shard holds its own clone of the policy, taken once per collection.
//!
//! A failing or panicking shard aborts the cycle. Shards that already
//! stepped are left advanced; callers that want to retry restore the world
//! from a snapshot.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{truncation_bootstrap, CollectError, TrajectoryCollector};
use crate::buffers::RolloutBuffer;
use crate::environment::{VectorizedWorld, WorldShard};
use crate::policy::Policy;

/// Collector that steps world shards concurrently on a dedicated pool.
#[derive(Debug)]
pub struct ParallelCollector {
    pool: ThreadPool,
    n_workers: usize,
}

impl ParallelCollector {
    /// Build a collector with `n_workers` threads (at least one).
    pub fn new(n_workers: usize) -> Result<Self, CollectError> {
        let n_workers = n_workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .thread_name(|i| format!("ppo-collector-{}", i))
            .build()?;
        Ok(Self { pool, n_workers })
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Run `f` once on every worker and wait for all of them.
    fn run_on_shards<W, F>(&self, workers: &mut [W], f: F) -> Result<(), CollectError>
    where
        W: Send,
        F: Fn(&mut W) -> Result<(), CollectError> + Send + Sync,
    {
        let results: Vec<Result<(), CollectError>> = self.pool.install(|| {
            workers
                .par_iter_mut()
                .enumerate()
                .map(|(shard, worker)| {
                    panic::catch_unwind(AssertUnwindSafe(|| f(worker))).unwrap_or_else(|payload| {
                        Err(CollectError::WorkerPanicked {
                            shard,
                            message: panic_message(payload.as_ref()),
                        })
                    })
                })
                .collect()
        });

        results.into_iter().collect()
    }
}

struct ShardWorker<'w, P> {
    shard: WorldShard<'w>,
    policy: P,
    buffer: RolloutBuffer,
}

fn step_shard<B: Backend, P: Policy<B>>(worker: &mut ShardWorker<'_, P>) -> Result<(), CollectError> {
    let states = worker.shard.observe();
    let act = worker.policy.act(&states, worker.shard.action_rngs_mut());
    let step = worker.shard.step(&act.actions)?;
    let bootstrap = truncation_bootstrap(&worker.policy, &step);
    worker.buffer.push_step(&states, &act, &step, &bootstrap);
    Ok(())
}

fn finish_shard<B: Backend, P: Policy<B>>(worker: &mut ShardWorker<'_, P>) -> Result<(), CollectError> {
    let states = worker.shard.observe();
    worker.buffer.set_last_values(worker.policy.values(&states));
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl TrajectoryCollector for ParallelCollector {
    fn collect<B: Backend, P: Policy<B>>(
        &self,
        world: &mut VectorizedWorld,
        policy: &P,
        horizon: usize,
    ) -> Result<RolloutBuffer, CollectError> {
        if horizon == 0 {
            return Err(CollectError::ZeroHorizon);
        }

        let mut workers: Vec<ShardWorker<'_, P>> = world
            .shards_mut(self.n_workers)
            .into_iter()
            .map(|shard| {
                let n = shard.len();
                ShardWorker {
                    shard,
                    policy: policy.clone(),
                    buffer: RolloutBuffer::new(n, horizon),
                }
            })
            .collect();
        tracing::trace!(shards = workers.len(), horizon, "parallel collection started");

        for _ in 0..horizon {
            self.run_on_shards(&mut workers, step_shard::<B, P>)?;
        }
        self.run_on_shards(&mut workers, finish_shard::<B, P>)?;

        let parts = workers.into_iter().map(|w| w.buffer).collect();
        Ok(RolloutBuffer::merge_shards(parts))
    }
}
