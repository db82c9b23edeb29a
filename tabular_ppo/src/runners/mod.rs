//! PPO training runner.
//!
//! - [`PPOTrainingParameters`]: validated hyperparameters.
//! - [`PPOTrainer`]: the collect / advantage / optimize / checkpoint loop.
//!
//! # Example
//!
//! ```ignore
//! let params = PPOTrainingParameters::new().with_num_worlds(64).build()?;
//! let seed = params.resolved_seed();
//! let mut world = VectorizedWorld::new(table, params.num_worlds, params.max_ep_len, seed)?;
//!
//! let trainer = PPOTrainer::new(
//!     params.clone(),
//!     policy,
//!     ParallelCollector::new(8)?,
//!     params.create_optimizer(),
//!     params.create_optimizer(),
//!     seed,
//! )?;
//! let summary = trainer.with_checkpointer(checkpointer).train(&mut world)?;
//! ```

pub mod ppo_config;
pub mod ppo_trainer;

#[cfg(test)]
mod tests;

pub use ppo_config::{ConfigError, HorizonRounding, PPOTrainingParameters};
pub use ppo_trainer::{
    IterationReport, PPOTrainer, RunState, StopReason, StopSignal, TrainerPhase, TrainingSummary,
};
