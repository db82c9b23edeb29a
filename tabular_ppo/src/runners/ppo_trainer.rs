//! PPO training loop.
//!
//! ```text
//!              ┌───────────────────────────────────────────────┐
//!              │                 one iteration                 │
//!              │                                               │
//!  world ──▶ Collecting ──▶ ComputingAdvantages ──▶ Optimizing ──▶ Checkpointing
//!              │  (retry once)                    K epochs ×     │
//!              │                                  minibatches    │
//!              └───────────────────────────────────────────────┘
//!                               │
//!         budget reached / stop requested ──▶ final checkpoint ──▶ Terminated
//! ```
//!
//! Collection runs on the inner (non-autodiff) version of the policy; only
//! the optimization phase builds a graph.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::algorithms::{
    compute_advantages, normalize_advantages, ppo_loss, Advantages, LossStats, PpoLossCoefficients,
};
use crate::buffers::{extract_minibatch, generate_minibatches, RolloutBuffer};
use crate::checkpoint::Checkpointer;
use crate::collectors::TrajectoryCollector;
use crate::environment::VectorizedWorld;
use crate::error::{Result, TrainError};
use crate::metrics::{MetricsLogger, TrainingRecord};
use crate::policy::{ActorCritic, Policy, PolicyGradients};

use super::ppo_config::{ConfigError, PPOTrainingParameters};

/// Where the trainer currently is within an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    Idle,
    Collecting,
    ComputingAdvantages,
    Optimizing,
    Checkpointing,
    Terminated,
}

/// Resumable training counters, stored in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Completed iterations.
    pub iteration: u64,
    /// Environment steps consumed (all instances).
    pub total_steps: u64,
    /// Step count that triggers the next periodic checkpoint.
    pub next_checkpoint_at: u64,
    pub seed: u64,
    /// Minibatch shuffling stream.
    pub shuffle_rng: Xoshiro256StarStar,
}

impl RunState {
    pub fn new(seed: u64, save_model_freq: u64) -> Self {
        // Two long jumps: disjoint from the world's env and action streams
        let mut shuffle_rng = Xoshiro256StarStar::seed_from_u64(seed);
        shuffle_rng.long_jump();
        shuffle_rng.long_jump();

        Self {
            iteration: 0,
            total_steps: 0,
            next_checkpoint_at: save_model_freq,
            seed,
            shuffle_rng,
        }
    }
}

/// Cooperative stop flag, checked at phase boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why `train` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetReached,
    StopRequested,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub record: TrainingRecord,
    /// Minibatch updates applied (skipped ones excluded).
    pub updates: usize,
    /// Whether the first collection attempt failed.
    pub collection_retried: bool,
    /// Periodic checkpoint written this iteration.
    pub checkpoint: Option<PathBuf>,
}

/// Outcome of a `train` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub iterations: u64,
    pub total_steps: u64,
    pub stop_reason: StopReason,
    pub final_checkpoint: Option<PathBuf>,
}

struct OptimizeOutcome {
    losses: LossStats,
    updates: usize,
    skipped: usize,
}

/// PPO trainer over a [`VectorizedWorld`].
///
/// Generic over the policy variant `P`, the collection strategy `C` and the
/// optimizer type `O`, which is used twice: once for the actor parameter
/// group and once for the critic group. Policies with shared parameters
/// only use the actor optimizer.
pub struct PPOTrainer<B: AutodiffBackend, P, C, O> {
    params: PPOTrainingParameters,
    coefficients: PpoLossCoefficients,
    policy: P,
    actor_optim: O,
    critic_optim: O,
    collector: C,
    checkpointer: Option<Checkpointer>,
    logger: Option<Box<dyn MetricsLogger>>,
    stop: StopSignal,
    state: RunState,
    phase: TrainerPhase,
    last_checkpoint_steps: Option<u64>,
    _backend: PhantomData<B>,
}

impl<B, P, C, O> PPOTrainer<B, P, C, O>
where
    B: AutodiffBackend,
    P: ActorCritic<B>,
    P::InnerModule: Policy<B::InnerBackend>,
    C: TrajectoryCollector,
    O: Optimizer<P, B>,
{
    /// Validate `params` and build a trainer.
    ///
    /// Optimizers usually come from [`PPOTrainingParameters::create_optimizer`].
    pub fn new(
        params: PPOTrainingParameters,
        policy: P,
        collector: C,
        actor_optim: O,
        critic_optim: O,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        let coefficients = PpoLossCoefficients {
            clip_ratio: params.eps_clip,
            value_loss_coef: params.value_loss_coef,
            entropy_coef: params.entropy_coef,
            value_clip: params.value_clip,
        };
        let state = RunState::new(seed, params.save_model_freq as u64);

        Ok(Self {
            params,
            coefficients,
            policy,
            actor_optim,
            critic_optim,
            collector,
            checkpointer: None,
            logger: None,
            stop: StopSignal::new(),
            state,
            phase: TrainerPhase::Idle,
            last_checkpoint_steps: None,
            _backend: PhantomData,
        })
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricsLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Restore policy, optimizer states and counters from a checkpoint.
    ///
    /// `path` is a checkpoint directory or a checkpoint root. World state is
    /// not part of a checkpoint; training continues on the world passed to
    /// the next `train` call.
    pub fn resume_from(self, path: &Path) -> Result<Self> {
        let device = self.policy.device();
        let Self {
            params,
            coefficients,
            policy,
            actor_optim,
            critic_optim,
            collector,
            checkpointer,
            logger,
            stop,
            state: _,
            phase,
            last_checkpoint_steps: _,
            _backend,
        } = self;

        let loaded = Checkpointer::load::<B, P, O, O, RunState>(
            path,
            policy,
            actor_optim,
            critic_optim,
            &device,
        )?;
        info!(
            path = %loaded.path.display(),
            env_steps = loaded.env_steps,
            iteration = loaded.state.iteration,
            "resumed from checkpoint"
        );

        Ok(Self {
            params,
            coefficients,
            policy: loaded.policy,
            actor_optim: loaded.actor_optim,
            critic_optim: loaded.critic_optim,
            collector,
            checkpointer,
            logger,
            stop,
            state: loaded.state,
            phase,
            last_checkpoint_steps: Some(loaded.env_steps),
            _backend,
        })
    }

    /// Handle that stops training at the next phase boundary.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn params(&self) -> &PPOTrainingParameters {
        &self.params
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn into_policy(self) -> P {
        self.policy
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    /// Train until `max_training_timesteps` or a stop request.
    pub fn train(&mut self, world: &mut VectorizedWorld) -> Result<TrainingSummary> {
        self.check_world(world)?;

        let budget = self.params.max_training_timesteps as u64;
        info!(
            num_worlds = world.num_worlds(),
            horizon = self.params.horizon(),
            budget,
            start_steps = self.state.total_steps,
            "training started"
        );

        let stop_reason = loop {
            if self.stop.is_stop_requested() {
                break StopReason::StopRequested;
            }
            if self.state.total_steps >= budget {
                break StopReason::BudgetReached;
            }
            let report = self.train_iteration(world)?;
            debug!(
                iteration = report.record.iteration,
                env_steps = report.record.env_steps,
                updates = report.updates,
                "iteration complete"
            );
        };

        self.phase = TrainerPhase::Checkpointing;
        let final_checkpoint = if self.last_checkpoint_steps == Some(self.state.total_steps) {
            None
        } else {
            self.save_checkpoint()
        };
        if let Some(logger) = self.logger.as_mut() {
            logger.flush();
        }
        self.phase = TrainerPhase::Terminated;

        info!(
            iterations = self.state.iteration,
            total_steps = self.state.total_steps,
            reason = ?stop_reason,
            "training finished"
        );
        Ok(TrainingSummary {
            iterations: self.state.iteration,
            total_steps: self.state.total_steps,
            stop_reason,
            final_checkpoint,
        })
    }

    /// Run one collect / advantage / optimize / checkpoint cycle.
    pub fn train_iteration(&mut self, world: &mut VectorizedWorld) -> Result<IterationReport> {
        self.check_world(world)?;

        self.phase = TrainerPhase::Collecting;
        let (buffer, collection_retried) = self.collect_with_retry(world)?;
        self.state.total_steps += buffer.len() as u64;

        self.phase = TrainerPhase::ComputingAdvantages;
        let mut advantages =
            compute_advantages(&buffer, self.params.gamma, self.params.gae_lambda);
        if self.params.normalize_advantages {
            normalize_advantages(&mut advantages.advantages);
        }

        self.phase = TrainerPhase::Optimizing;
        let outcome = self.optimize(&buffer, &advantages)?;
        self.state.iteration += 1;

        self.phase = TrainerPhase::Checkpointing;
        let checkpoint = self.periodic_checkpoint();

        let record = TrainingRecord {
            iteration: self.state.iteration,
            env_steps: self.state.total_steps,
            episodes: buffer.finished_episodes().len(),
            mean_episode_return: buffer.mean_episode_return(),
            mean_episode_length: buffer.mean_episode_length(),
            losses: outcome.losses,
            skipped_minibatches: outcome.skipped,
        };
        if let Some(logger) = self.logger.as_mut() {
            logger.log(&record);
        }
        self.phase = TrainerPhase::Idle;

        Ok(IterationReport {
            record,
            updates: outcome.updates,
            collection_retried,
            checkpoint,
        })
    }

    fn check_world(&self, world: &VectorizedWorld) -> Result<()> {
        if world.num_worlds() != self.params.num_worlds {
            return Err(ConfigError::WorldSizeMismatch {
                world: world.num_worlds(),
                config: self.params.num_worlds,
            }
            .into());
        }
        if self.policy.n_actions() > world.num_actions() {
            return Err(ConfigError::PolicyActionSpace {
                policy_actions: self.policy.n_actions(),
                world_actions: world.num_actions(),
            }
            .into());
        }
        Ok(())
    }

    /// Collect one rollout, retrying once from the pre-collection world
    /// state. A second failure is fatal.
    fn collect_with_retry(&self, world: &mut VectorizedWorld) -> Result<(RolloutBuffer, bool)> {
        let horizon = self.params.horizon();
        let inference = self.policy.valid();
        let snapshot = world.clone();

        match self
            .collector
            .collect::<B::InnerBackend, _>(world, &inference, horizon)
        {
            Ok(buffer) => Ok((buffer, false)),
            Err(first) => {
                warn!(
                    error = %first,
                    iteration = self.state.iteration + 1,
                    "trajectory collection failed, retrying from the pre-collection state"
                );
                *world = snapshot;
                let buffer = self
                    .collector
                    .collect::<B::InnerBackend, _>(world, &inference, horizon)
                    .map_err(TrainError::Collection)?;
                Ok((buffer, true))
            }
        }
    }

    /// K epochs over shuffled minibatches of the rollout.
    fn optimize(&mut self, buffer: &RolloutBuffer, advantages: &Advantages) -> Result<OptimizeOutcome> {
        let total = buffer.len();
        let device = self.policy.device();
        let tensor = |values: &[f32]| Tensor::<B, 1>::from_floats(values, &device);

        let mut policy = self.policy.clone();
        let mut stats = Vec::new();
        let mut skipped = 0;

        for epoch in 0..self.params.k_epochs {
            let minibatches = generate_minibatches(
                total,
                self.params.update_batch_size,
                &mut self.state.shuffle_rng,
            );

            for indices in &minibatches {
                let data = extract_minibatch(buffer, advantages, indices);
                let evaluation = policy.evaluate(&data.states, &data.actions);
                let loss = ppo_loss(
                    evaluation,
                    tensor(&data.old_log_probs),
                    tensor(&data.old_values),
                    tensor(&data.advantages),
                    tensor(&data.returns),
                    &self.coefficients,
                );

                if !loss.stats.is_finite() {
                    skipped += 1;
                    warn!(
                        epoch,
                        minibatch_size = data.len(),
                        "non-finite loss, skipping minibatch update"
                    );
                    continue;
                }

                let grads = policy.split_gradients(loss.total.backward());
                if !grads.is_finite::<B, P>(&policy) {
                    skipped += 1;
                    warn!(
                        epoch,
                        minibatch_size = data.len(),
                        "non-finite gradient, skipping minibatch update"
                    );
                    continue;
                }

                policy = match grads {
                    PolicyGradients::Separate { actor, critic } => {
                        let policy = self.actor_optim.step(self.params.lr_actor, policy, actor);
                        self.critic_optim.step(self.params.lr_critic, policy, critic)
                    }
                    PolicyGradients::Shared(grads) => {
                        self.actor_optim.step(self.params.lr_actor, policy, grads)
                    }
                };
                stats.push(loss.stats);
            }
        }
        self.policy = policy;

        if stats.is_empty() && skipped > 0 {
            return Err(TrainError::NumericalInstability {
                iteration: self.state.iteration + 1,
                skipped,
            });
        }

        Ok(OptimizeOutcome {
            losses: LossStats::mean(&stats),
            updates: stats.len(),
            skipped,
        })
    }

    fn periodic_checkpoint(&mut self) -> Option<PathBuf> {
        if self.state.total_steps < self.state.next_checkpoint_at {
            return None;
        }
        let freq = self.params.save_model_freq as u64;
        while self.state.next_checkpoint_at <= self.state.total_steps {
            self.state.next_checkpoint_at += freq;
        }
        self.save_checkpoint()
    }

    /// A failed save is logged and training continues.
    fn save_checkpoint(&mut self) -> Option<PathBuf> {
        let checkpointer = self.checkpointer.as_ref()?;
        let env_steps = self.state.total_steps;

        match checkpointer.save::<B, P, O, O, RunState>(
            env_steps,
            &self.policy,
            &self.actor_optim,
            &self.critic_optim,
            &self.state,
        ) {
            Ok(path) => {
                info!(path = %path.display(), env_steps, "checkpoint saved");
                self.last_checkpoint_steps = Some(env_steps);
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, env_steps, "checkpoint failed, continuing training");
                None
            }
        }
    }
}
