//! End-to-end tests of the PPO training loop on small tables.

use std::sync::atomic::{AtomicUsize, Ordering};

use burn::module::{Module, Param};
use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use tempfile::tempdir;

use crate::checkpoint::{Checkpointer, CheckpointerConfig};
use crate::buffers::RolloutBuffer;
use crate::collectors::{CollectError, ParallelCollector, SerialCollector, TrajectoryCollector};
use crate::environment::VectorizedWorld;
use crate::error::TrainError;
use crate::metrics::{MetricsLogger, TrainingRecord};
use crate::policy::{
    to_host, ActorCritic, DeepPolicy, DeepPolicyConfig, Policy, PolicyGradients, PolicyOutput,
    TabularPolicy, TabularPolicyConfig,
};
use crate::runners::{
    ConfigError, PPOTrainer, PPOTrainingParameters, StopReason, StopSignal, TrainerPhase,
};
use crate::testing::{corridor_table, two_state_table, world, TestBackend};

type Tabular = TabularPolicy<TestBackend>;

fn params(num_worlds: usize, update_timestep: usize, batch: usize) -> PPOTrainingParameters {
    PPOTrainingParameters::new()
        .with_num_worlds(num_worlds)
        .with_update_timestep(update_timestep)
        .with_update_batch_size(batch)
        .with_max_ep_len(10)
        .with_k_epochs(1)
        .with_max_training_timesteps(update_timestep)
        .with_save_model_freq(1_000_000)
}

fn tabular_trainer<C: TrajectoryCollector>(
    params: PPOTrainingParameters,
    n_states: usize,
    collector: C,
    seed: u64,
) -> PPOTrainer<TestBackend, Tabular, C, impl Optimizer<Tabular, TestBackend>> {
    let policy = TabularPolicyConfig::new(n_states, 2).init::<TestBackend>(&Default::default());
    let actor = params.create_optimizer::<TestBackend, Tabular>();
    let critic = params.create_optimizer::<TestBackend, Tabular>();
    PPOTrainer::new(params, policy, collector, actor, critic, seed).unwrap()
}

fn host_params(policy: &Tabular) -> (Vec<f32>, Vec<f32>) {
    (
        to_host(policy.actor.logits.val()),
        to_host(policy.critic.values.val()),
    )
}

// ============================================================================
// Update Schedule
// ============================================================================

/// INTENT: a minibatch as large as the buffer gives one update per epoch.
#[test]
fn test_single_minibatch_when_batch_equals_buffer() {
    let p = params(4, 8, 8);
    let mut trainer = tabular_trainer(p.clone(), 2, SerialCollector::new(), 1);
    let mut w = world(two_state_table(), 4, 10, 1);

    let report = trainer.train_iteration(&mut w).unwrap();
    assert_eq!(report.updates, 1);
    assert_eq!(report.record.iteration, 1);
    assert_eq!(report.record.env_steps, 8);
    assert_eq!(trainer.phase(), TrainerPhase::Idle);

    let mut trainer = tabular_trainer(p.with_k_epochs(3), 2, SerialCollector::new(), 1);
    assert_eq!(trainer.train_iteration(&mut w).unwrap().updates, 3);
}

/// INTENT: the last minibatch of an epoch holds the remainder.
#[test]
fn test_updates_per_iteration() {
    let p = params(4, 8, 3).with_k_epochs(2);
    assert_eq!(p.minibatches_per_epoch(), 3);

    let mut trainer = tabular_trainer(p, 2, SerialCollector::new(), 2);
    let mut w = world(two_state_table(), 4, 10, 2);
    let report = trainer.train_iteration(&mut w).unwrap();
    assert_eq!(report.updates, 6);
    assert_eq!(report.record.skipped_minibatches, 0);
    assert!(report.record.losses.is_finite());
}

#[test]
fn test_world_must_match_num_worlds() {
    let mut trainer = tabular_trainer(params(4, 8, 8), 2, SerialCollector::new(), 1);
    let mut w = world(two_state_table(), 3, 10, 1);

    assert!(matches!(
        trainer.train(&mut w),
        Err(TrainError::Config(ConfigError::WorldSizeMismatch {
            world: 3,
            config: 4
        }))
    ));
}

#[test]
fn test_invalid_params_are_rejected() {
    let p = params(4, 8, 16);
    let policy = TabularPolicyConfig::new(2, 2).init::<TestBackend>(&Default::default());
    let result = PPOTrainer::<TestBackend, _, _, _>::new(
        p.clone(),
        policy,
        SerialCollector::new(),
        p.create_optimizer::<TestBackend, Tabular>(),
        p.create_optimizer::<TestBackend, Tabular>(),
        0,
    );
    assert!(matches!(
        result,
        Err(TrainError::Config(ConfigError::BatchLargerThanBuffer { .. }))
    ));
}

// ============================================================================
// Learning
// ============================================================================

/// INTENT: on s0, action 0 pays 1 and ends the episode while action 1 pays
/// nothing; the trained policy picks action 0 almost surely.
#[test]
fn test_two_state_policy_converges() {
    let p = params(16, 128, 32)
        .with_k_epochs(4)
        .with_lr_actor(0.05)
        .with_lr_critic(0.05)
        .with_entropy_coef(0.0)
        .with_max_training_timesteps(128 * 25);
    let mut trainer = tabular_trainer(p, 2, SerialCollector::new(), 11);
    let mut w = world(two_state_table(), 16, 10, 11);

    let summary = trainer.train(&mut w).unwrap();

    assert_eq!(summary.iterations, 25);
    assert_eq!(summary.total_steps, 128 * 25);
    assert_eq!(summary.stop_reason, StopReason::BudgetReached);
    assert_eq!(summary.final_checkpoint, None);
    assert_eq!(trainer.phase(), TrainerPhase::Terminated);

    let p_a0 = trainer.policy().action_probs(0)[0];
    assert!(p_a0 > 0.9, "P(a0|s0) = {}", p_a0);
}

/// INTENT: the collection strategy does not change what is learned.
#[test]
fn test_parallel_training_matches_serial() {
    let p = params(6, 36, 12).with_k_epochs(2).with_max_training_timesteps(72);

    let mut serial = tabular_trainer(p.clone(), 6, SerialCollector::new(), 5);
    let mut parallel = tabular_trainer(p, 6, ParallelCollector::new(4).unwrap(), 5);
    let mut a = world(corridor_table(6), 6, 10, 5);
    let mut b = world(corridor_table(6), 6, 10, 5);

    serial.train(&mut a).unwrap();
    parallel.train(&mut b).unwrap();

    assert_eq!(host_params(serial.policy()), host_params(parallel.policy()));
    assert_eq!(a.observe(), b.observe());
}

/// INTENT: shared and separate parameter groups both train.
#[test]
fn test_deep_policy_trains() {
    let table = corridor_table(4);
    let p = params(4, 16, 8).with_k_epochs(2);

    for shared in [false, true] {
        let policy = DeepPolicyConfig::new(2)
            .with_hidden_sizes(vec![8])
            .with_shared_trunk(shared)
            .init::<TestBackend>(&table, &Default::default())
            .unwrap();
        let mut trainer = PPOTrainer::<TestBackend, _, _, _>::new(
            p.clone(),
            policy,
            SerialCollector::new(),
            p.create_optimizer::<TestBackend, DeepPolicy<TestBackend>>(),
            p.create_optimizer::<TestBackend, DeepPolicy<TestBackend>>(),
            3,
        )
        .unwrap();
        let mut w = world(corridor_table(4), 4, 10, 3);

        let report = trainer.train_iteration(&mut w).unwrap();
        assert_eq!(report.updates, 4);
        assert!(report.record.losses.is_finite());
    }
}

// ============================================================================
// Failure Handling
// ============================================================================

/// Fails the first `failures` collections after advancing the world.
struct FlakyCollector {
    failures: AtomicUsize,
}

impl FlakyCollector {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
        }
    }
}

impl TrajectoryCollector for FlakyCollector {
    fn collect<B: Backend, P: Policy<B>>(
        &self,
        world: &mut VectorizedWorld,
        policy: &P,
        horizon: usize,
    ) -> Result<RolloutBuffer, CollectError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            SerialCollector::new().collect::<B, P>(world, policy, 1)?;
            return Err(CollectError::WorkerPanicked {
                shard: 0,
                message: "injected failure".to_string(),
            });
        }
        SerialCollector::new().collect::<B, P>(world, policy, horizon)
    }
}

/// INTENT: one failed collection is retried from the pre-collection world
/// state, so the iteration matches an undisturbed one.
#[test]
fn test_failed_collection_is_retried_once() {
    let p = params(4, 16, 8).with_k_epochs(2);

    let mut reference = tabular_trainer(p.clone(), 6, SerialCollector::new(), 9);
    let mut flaky = tabular_trainer(p, 6, FlakyCollector::new(1), 9);
    let mut a = world(corridor_table(6), 4, 10, 9);
    let mut b = world(corridor_table(6), 4, 10, 9);

    let expected = reference.train_iteration(&mut a).unwrap();
    let report = flaky.train_iteration(&mut b).unwrap();

    assert!(!expected.collection_retried);
    assert!(report.collection_retried);
    assert_eq!(report.record, expected.record);
    assert_eq!(host_params(flaky.policy()), host_params(reference.policy()));
    assert_eq!(a.observe(), b.observe());
}

#[test]
fn test_second_collection_failure_is_fatal() {
    let mut trainer = tabular_trainer(params(4, 16, 8), 6, FlakyCollector::new(2), 9);
    let mut w = world(corridor_table(6), 4, 10, 9);

    assert!(matches!(
        trainer.train(&mut w),
        Err(TrainError::Collection(CollectError::WorkerPanicked { .. }))
    ));
    assert_eq!(trainer.run_state().iteration, 0);
}

/// INTENT: non-finite losses skip their update; an iteration with no
/// finite loss at all is an error.
#[test]
fn test_all_non_finite_losses_is_instability() {
    let p = params(4, 8, 4).with_k_epochs(2);
    let mut trainer = {
        let device = Default::default();
        let mut policy = TabularPolicyConfig::new(2, 2).init::<TestBackend>(&device);
        policy.critic.values = Param::from_tensor(Tensor::from_floats([f32::NAN, 0.0], &device));
        PPOTrainer::<TestBackend, _, _, _>::new(
            p.clone(),
            policy,
            SerialCollector::new(),
            p.create_optimizer::<TestBackend, Tabular>(),
            p.create_optimizer::<TestBackend, Tabular>(),
            4,
        )
        .unwrap()
    };
    let mut w = world(two_state_table(), 4, 10, 4);

    assert!(matches!(
        trainer.train_iteration(&mut w),
        Err(TrainError::NumericalInstability {
            iteration: 1,
            skipped: 4
        })
    ));
}

/// INTENT: minibatches with a non-finite loss are skipped while the rest
/// of the iteration still updates the policy.
#[test]
fn test_some_non_finite_losses_are_skipped() {
    // Horizon 1: every record starts in s0. Instances that reach s1 bootstrap
    // from its NaN value, the ones that stay in s0 keep a finite return.
    let p = params(16, 16, 1).with_normalize_advantages(false);
    let device = Default::default();
    let mut policy = TabularPolicyConfig::new(6, 2).init::<TestBackend>(&device);
    policy.critic.values = Param::from_tensor(Tensor::from_floats(
        [0.5, f32::NAN, 0.0, 0.0, 0.0, 0.0],
        &device,
    ));
    let before = host_params(&policy);

    let mut trainer = PPOTrainer::<TestBackend, _, _, _>::new(
        p.clone(),
        policy,
        SerialCollector::new(),
        p.create_optimizer::<TestBackend, Tabular>(),
        p.create_optimizer::<TestBackend, Tabular>(),
        5,
    )
    .unwrap();
    let mut w = world(corridor_table(6), 16, 10, 5);

    let report = trainer.train_iteration(&mut w).unwrap();
    assert!(report.record.skipped_minibatches > 0);
    assert!(report.updates > 0);
    assert_eq!(report.updates + report.record.skipped_minibatches, 16);
    assert!(report.record.losses.is_finite());

    let (logits, values) = host_params(trainer.policy());
    assert_ne!(values[0], before.1[0]);
    assert_ne!(logits, before.0);
    assert!(logits.iter().all(|l| l.is_finite()));
}

/// Tabular policy whose critic gradients are always NaN.
#[derive(Module, Debug)]
struct NanCriticGradients<B: Backend> {
    inner: TabularPolicy<B>,
}

impl<B: Backend> Policy<B> for NanCriticGradients<B> {
    fn n_actions(&self) -> usize {
        self.inner.n_actions()
    }

    fn device(&self) -> B::Device {
        self.inner.device()
    }

    fn forward(&self, states: &[u32]) -> PolicyOutput<B> {
        self.inner.forward(states)
    }
}

impl<B: AutodiffBackend> ActorCritic<B> for NanCriticGradients<B> {
    fn split_gradients(&self, grads: B::Gradients) -> PolicyGradients {
        match self.inner.split_gradients(grads) {
            PolicyGradients::Separate { actor, mut critic } => {
                let values = &self.inner.critic.values;
                critic.register::<B::InnerBackend, 1>(
                    values.id,
                    values.val().inner().mul_scalar(f32::NAN),
                );
                PolicyGradients::Separate { actor, critic }
            }
            shared => shared,
        }
    }
}

/// INTENT: a finite loss with non-finite gradients never reaches the
/// optimizer.
#[test]
fn test_non_finite_gradients_skip_update() {
    let p = params(4, 8, 4).with_k_epochs(2);
    let policy = NanCriticGradients {
        inner: TabularPolicyConfig::new(2, 2).init::<TestBackend>(&Default::default()),
    };
    let mut trainer = PPOTrainer::<TestBackend, _, _, _>::new(
        p.clone(),
        policy,
        SerialCollector::new(),
        p.create_optimizer::<TestBackend, NanCriticGradients<TestBackend>>(),
        p.create_optimizer::<TestBackend, NanCriticGradients<TestBackend>>(),
        4,
    )
    .unwrap();
    let mut w = world(two_state_table(), 4, 10, 4);

    assert!(matches!(
        trainer.train_iteration(&mut w),
        Err(TrainError::NumericalInstability {
            iteration: 1,
            skipped: 4
        })
    ));
    let (logits, values) = host_params(&trainer.policy().inner);
    assert_eq!(logits, vec![0.0; 4]);
    assert_eq!(values, vec![0.0; 2]);
}

// ============================================================================
// Stop Signal
// ============================================================================

/// Requests a stop once a given iteration has been logged.
struct StopAfter {
    signal: StopSignal,
    iteration: u64,
}

impl MetricsLogger for StopAfter {
    fn log(&mut self, record: &TrainingRecord) {
        if record.iteration >= self.iteration {
            self.signal.request_stop();
        }
    }

    fn flush(&mut self) {}
}

#[test]
fn test_stop_signal_ends_training_at_iteration_boundary() {
    let p = params(4, 8, 8).with_max_training_timesteps(8 * 100);
    let trainer = tabular_trainer(p, 2, SerialCollector::new(), 1);
    let signal = trainer.stop_signal();
    let mut trainer = trainer.with_logger(Box::new(StopAfter {
        signal,
        iteration: 2,
    }));
    let mut w = world(two_state_table(), 4, 10, 1);

    let summary = trainer.train(&mut w).unwrap();
    assert_eq!(summary.stop_reason, StopReason::StopRequested);
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.total_steps, 16);
}

#[test]
fn test_stop_before_start_still_writes_final_checkpoint() {
    let dir = tempdir().unwrap();
    let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
    let mut trainer =
        tabular_trainer(params(4, 8, 8), 2, SerialCollector::new(), 1).with_checkpointer(checkpointer);
    trainer.stop_signal().request_stop();

    let summary = trainer.train(&mut world(two_state_table(), 4, 10, 1)).unwrap();
    assert_eq!(summary.iterations, 0);
    assert_eq!(
        summary.final_checkpoint,
        Some(dir.path().join("checkpoint_0000000000"))
    );
}

// ============================================================================
// Checkpointing
// ============================================================================

/// INTENT: a checkpoint that cannot be written is logged, not fatal.
#[test]
fn test_failed_checkpoint_does_not_stop_training() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ckpts");
    let checkpointer = Checkpointer::new(CheckpointerConfig::new(&root)).unwrap();
    std::fs::remove_dir_all(&root).unwrap();
    std::fs::write(&root, b"not a directory").unwrap();

    let p = params(4, 8, 8)
        .with_save_model_freq(8)
        .with_max_training_timesteps(24);
    let mut trainer =
        tabular_trainer(p, 2, SerialCollector::new(), 3).with_checkpointer(checkpointer);

    let summary = trainer.train(&mut world(two_state_table(), 4, 10, 3)).unwrap();
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.total_steps, 24);
    assert_eq!(summary.stop_reason, StopReason::BudgetReached);
    assert_eq!(summary.final_checkpoint, None);
    assert_eq!(trainer.phase(), TrainerPhase::Terminated);
    assert!(root.is_file());
}

/// INTENT: checkpoints land every `save_model_freq` steps, and a trainer
/// resumed from the latest one makes exactly the same next update.
#[test]
fn test_resume_reproduces_next_update() {
    let dir = tempdir().unwrap();
    let p = params(4, 16, 8)
        .with_k_epochs(2)
        .with_save_model_freq(16)
        .with_max_training_timesteps(32);

    let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
    let mut original =
        tabular_trainer(p.clone(), 6, SerialCollector::new(), 21).with_checkpointer(checkpointer.clone());
    let mut w = world(corridor_table(6), 4, 10, 21);

    let summary = original.train(&mut w).unwrap();
    // The periodic checkpoint at 32 steps doubles as the final one
    assert_eq!(summary.final_checkpoint, None);
    let steps: Vec<u64> = checkpointer
        .list_checkpoints()
        .unwrap()
        .iter()
        .map(|c| c.env_steps)
        .collect();
    assert_eq!(steps, vec![16, 32]);

    let mut resumed = tabular_trainer(p, 6, SerialCollector::new(), 999)
        .resume_from(dir.path())
        .unwrap();
    assert_eq!(resumed.run_state(), original.run_state());
    assert_eq!(host_params(resumed.policy()), host_params(original.policy()));

    let mut a = w.clone();
    let mut b = w.clone();
    let left = original.train_iteration(&mut a).unwrap();
    let right = resumed.train_iteration(&mut b).unwrap();

    assert_eq!(left.record.losses, right.record.losses);
    assert_eq!(host_params(resumed.policy()), host_params(original.policy()));
}
