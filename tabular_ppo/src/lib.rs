//! # Tabular PPO: Proximal Policy Optimization on Vectorized Tabular Worlds
//!
//! Trains actor-critic policies with PPO on batches of independent,
//! identically configured tabular MDP instances.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           PPOTrainer                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  TransitionTable ──▶ VectorizedWorld (N instances, per-instance  │
//! │                           │           RNG streams)               │
//! │                           ▼                                      │
//! │   TrajectoryCollector (serial | parallel shards on rayon)        │
//! │        │  inference policy (no autodiff)                         │
//! │        ▼                                                         │
//! │   RolloutBuffer [horizon × N] ──▶ GAE ──▶ minibatches            │
//! │                                              │                   │
//! │                                              ▼                   │
//! │             Policy (tabular | deep) ◀── clipped PPO loss + Adam  │
//! │                                                                  │
//! │   Checkpointer (atomic directories)    MetricsLogger (console,   │
//! │                                         CSV)                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tabular_ppo::{PPOTrainer, PPOTrainingParameters, ParallelCollector, TabularPolicyConfig};
//!
//! let params = PPOTrainingParameters::new()
//!     .with_num_worlds(1024)
//!     .with_update_timestep(1024 * 64)
//!     .build()?;
//! let seed = params.resolved_seed();
//!
//! let table = Arc::new(TransitionTable::from_json_file("maze.json")?);
//! let mut world = VectorizedWorld::new(table.clone(), params.num_worlds, params.max_ep_len, seed)?;
//! let policy = TabularPolicyConfig::new(table.num_states(), table.num_actions()).init::<B>(&device);
//!
//! let mut trainer = PPOTrainer::new(
//!     params.clone(),
//!     policy,
//!     ParallelCollector::new(8)?,
//!     params.create_optimizer(),
//!     params.create_optimizer(),
//!     seed,
//! )?;
//! trainer.train(&mut world)?;
//! ```

pub mod algorithms;
pub mod buffers;
pub mod checkpoint;
pub mod collectors;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod runners;

#[cfg(test)]
pub(crate) mod testing;

pub use algorithms::{compute_advantages, normalize_advantages, Advantages, LossStats};
pub use buffers::RolloutBuffer;
pub use checkpoint::{Checkpointer, CheckpointerConfig};
pub use collectors::{CollectError, ParallelCollector, SerialCollector, TrajectoryCollector};
pub use environment::{StepBatch, TransitionTable, VectorizedWorld, WorldError};
pub use error::{Result, TrainError};
pub use metrics::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, TrainingRecord};
pub use policy::{
    ActorCritic, DeepPolicy, DeepPolicyConfig, Policy, PolicyFactory, StateEncoding,
    TabularPolicy, TabularPolicyConfig,
};
pub use runners::{
    ConfigError, HorizonRounding, PPOTrainer, PPOTrainingParameters, StopSignal, TrainingSummary,
};
