//! Hyperparameters for PPO training on vectorized tabular worlds.
//!
//! All values are checked by [`PPOTrainingParameters::validate`] before any
//! simulation starts; the trainer refuses to run with an invalid config.

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A count parameter must be positive.
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: usize },

    /// A parameter is outside its valid range.
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },

    /// A rate must be finite and positive.
    #[error("{field} must be finite and > 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    /// A loss coefficient must be finite and non-negative.
    #[error("{field} must be finite and >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    /// `update_timestep / num_worlds` rounds to zero steps.
    #[error("update_timestep ({update_timestep}) gives a zero-step horizon for {num_worlds} worlds")]
    HorizonTooShort {
        update_timestep: usize,
        num_worlds: usize,
    },

    /// A minibatch cannot be larger than the rollout buffer.
    #[error("update_batch_size ({update_batch_size}) exceeds the rollout buffer size ({buffer_size})")]
    BatchLargerThanBuffer {
        update_batch_size: usize,
        buffer_size: usize,
    },

    #[error("policy has {policy_actions} actions but the world only has {world_actions}")]
    PolicyActionSpace {
        policy_actions: usize,
        world_actions: usize,
    },

    #[error("policy covers {policy_states} states but the world has {world_states}")]
    PolicyStateSpace {
        policy_states: usize,
        world_states: usize,
    },

    #[error("table feature encoding requested but the transition table has no features")]
    MissingFeatures,

    #[error("world has {world} instances, config expects num_worlds = {config}")]
    WorldSizeMismatch { world: usize, config: usize },
}

/// How `update_timestep / num_worlds` is turned into a horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonRounding {
    /// Collect at most `update_timestep` steps.
    Floor,
    /// Collect at least `update_timestep` steps.
    #[default]
    Ceil,
}

/// PPO training parameters.
///
/// Field names follow the training-script vocabulary; `K_epochs` is accepted
/// as an alias of `k_epochs` when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOTrainingParameters {
    /// Stop once this many environment steps have been collected.
    pub max_training_timesteps: usize,
    /// Episode time limit, in transitions.
    pub max_ep_len: usize,
    /// Environment steps collected per iteration (across all worlds).
    pub update_timestep: usize,
    /// Optimization passes over each rollout.
    #[serde(alias = "K_epochs")]
    pub k_epochs: usize,
    /// PPO clipping ratio, in (0, 1).
    pub eps_clip: f32,
    /// Discount factor.
    pub gamma: f32,
    /// GAE lambda; 1.0 gives plain discounted returns.
    pub gae_lambda: f32,
    /// Learning rate of the actor (or of all parameters when shared).
    pub lr_actor: f64,
    /// Learning rate of the critic.
    pub lr_critic: f64,
    /// Minibatch size.
    pub update_batch_size: usize,
    /// Number of parallel world instances.
    pub num_worlds: usize,
    /// Weight of the value loss.
    pub value_loss_coef: f32,
    /// Weight of the entropy bonus.
    pub entropy_coef: f32,
    /// Optional PPO2-style value clipping range.
    pub value_clip: Option<f32>,
    /// Normalize advantages over the whole rollout.
    pub normalize_advantages: bool,
    /// Maximum gradient norm (None = no clipping).
    pub max_grad_norm: Option<f32>,
    pub horizon_rounding: HorizonRounding,
    /// Environment steps between checkpoints.
    pub save_model_freq: usize,
    /// Iterations between console records.
    pub print_freq: usize,
    /// Iterations between file log records.
    pub log_freq: usize,
    /// Seed for worlds and minibatch shuffling (0 = random).
    pub random_seed: u64,
}

impl Default for PPOTrainingParameters {
    fn default() -> Self {
        Self {
            max_training_timesteps: 100_000_000,
            max_ep_len: 200,
            update_timestep: 4096 * 200,
            k_epochs: 10,
            eps_clip: 0.2,
            gamma: 0.95,
            gae_lambda: 1.0,
            lr_actor: 3e-4,
            lr_critic: 1e-3,
            update_batch_size: 4096 * 8,
            num_worlds: 4096,
            value_loss_coef: 0.5,
            entropy_coef: 0.01,
            value_clip: None,
            normalize_advantages: true,
            max_grad_norm: None,
            horizon_rounding: HorizonRounding::Ceil,
            save_model_freq: 20_000,
            print_freq: 1,
            log_freq: 1,
            random_seed: 0,
        }
    }
}

impl PPOTrainingParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps per world per iteration.
    pub fn horizon(&self) -> usize {
        if self.num_worlds == 0 {
            return 0;
        }
        match self.horizon_rounding {
            HorizonRounding::Floor => self.update_timestep / self.num_worlds,
            HorizonRounding::Ceil => self.update_timestep.div_ceil(self.num_worlds),
        }
    }

    /// Records in one rollout buffer.
    pub fn buffer_size(&self) -> usize {
        self.horizon() * self.num_worlds
    }

    /// Minibatches per epoch (the last one may be smaller).
    pub fn minibatches_per_epoch(&self) -> usize {
        self.buffer_size().div_ceil(self.update_batch_size.max(1))
    }

    /// Resolve `random_seed = 0` to a fresh random seed.
    pub fn resolved_seed(&self) -> u64 {
        if self.random_seed == 0 {
            fastrand::u64(1..)
        } else {
            self.random_seed
        }
    }

    /// Validate all configuration parameters.
    ///
    /// # Validation Rules
    /// - counts must be > 0
    /// - eps_clip in (0, 1); gamma and gae_lambda in [0, 1]
    /// - learning rates finite and > 0; loss coefficients finite and >= 0
    /// - the horizon must be at least one step
    /// - update_batch_size <= buffer size
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("max_training_timesteps", self.max_training_timesteps),
            ("max_ep_len", self.max_ep_len),
            ("update_timestep", self.update_timestep),
            ("k_epochs", self.k_epochs),
            ("update_batch_size", self.update_batch_size),
            ("num_worlds", self.num_worlds),
            ("save_model_freq", self.save_model_freq),
            ("print_freq", self.print_freq),
            ("log_freq", self.log_freq),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        check_range("eps_clip", self.eps_clip, self.eps_clip > 0.0 && self.eps_clip < 1.0, "(0, 1)")?;
        check_range("gamma", self.gamma, (0.0..=1.0).contains(&self.gamma), "[0, 1]")?;
        check_range(
            "gae_lambda",
            self.gae_lambda,
            (0.0..=1.0).contains(&self.gae_lambda),
            "[0, 1]",
        )?;

        check_positive("lr_actor", self.lr_actor)?;
        check_positive("lr_critic", self.lr_critic)?;
        check_non_negative("value_loss_coef", self.value_loss_coef as f64)?;
        check_non_negative("entropy_coef", self.entropy_coef as f64)?;
        if let Some(clip) = self.value_clip {
            check_positive("value_clip", clip as f64)?;
        }
        if let Some(norm) = self.max_grad_norm {
            check_positive("max_grad_norm", norm as f64)?;
        }

        if self.horizon() == 0 {
            return Err(ConfigError::HorizonTooShort {
                update_timestep: self.update_timestep,
                num_worlds: self.num_worlds,
            });
        }
        let buffer_size = self.buffer_size();
        if self.update_batch_size > buffer_size {
            return Err(ConfigError::BatchLargerThanBuffer {
                update_batch_size: self.update_batch_size,
                buffer_size,
            });
        }

        Ok(())
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Create an Adam optimizer, with gradient clipping if configured.
    pub fn create_optimizer<B, M>(&self) -> impl Optimizer<M, B>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut adam_config = AdamConfig::new().with_epsilon(1e-5);

        if let Some(max_norm) = self.max_grad_norm {
            adam_config =
                adam_config.with_grad_clipping(Some(GradientClippingConfig::Norm(max_norm)));
        }

        adam_config.init()
    }

    pub fn with_max_training_timesteps(mut self, steps: usize) -> Self {
        self.max_training_timesteps = steps;
        self
    }

    pub fn with_max_ep_len(mut self, len: usize) -> Self {
        self.max_ep_len = len;
        self
    }

    pub fn with_update_timestep(mut self, steps: usize) -> Self {
        self.update_timestep = steps;
        self
    }

    pub fn with_k_epochs(mut self, epochs: usize) -> Self {
        self.k_epochs = epochs;
        self
    }

    pub fn with_eps_clip(mut self, eps: f32) -> Self {
        self.eps_clip = eps;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_gae_lambda(mut self, lambda: f32) -> Self {
        self.gae_lambda = lambda;
        self
    }

    pub fn with_lr_actor(mut self, lr: f64) -> Self {
        self.lr_actor = lr;
        self
    }

    pub fn with_lr_critic(mut self, lr: f64) -> Self {
        self.lr_critic = lr;
        self
    }

    pub fn with_update_batch_size(mut self, size: usize) -> Self {
        self.update_batch_size = size;
        self
    }

    pub fn with_num_worlds(mut self, n: usize) -> Self {
        self.num_worlds = n;
        self
    }

    pub fn with_value_loss_coef(mut self, coef: f32) -> Self {
        self.value_loss_coef = coef;
        self
    }

    pub fn with_entropy_coef(mut self, coef: f32) -> Self {
        self.entropy_coef = coef;
        self
    }

    pub fn with_value_clip(mut self, clip: Option<f32>) -> Self {
        self.value_clip = clip;
        self
    }

    pub fn with_normalize_advantages(mut self, normalize: bool) -> Self {
        self.normalize_advantages = normalize;
        self
    }

    pub fn with_max_grad_norm(mut self, norm: Option<f32>) -> Self {
        self.max_grad_norm = norm;
        self
    }

    pub fn with_horizon_rounding(mut self, rounding: HorizonRounding) -> Self {
        self.horizon_rounding = rounding;
        self
    }

    pub fn with_save_model_freq(mut self, steps: usize) -> Self {
        self.save_model_freq = steps;
        self
    }

    pub fn with_print_freq(mut self, iterations: usize) -> Self {
        self.print_freq = iterations;
        self
    }

    pub fn with_log_freq(mut self, iterations: usize) -> Self {
        self.log_freq = iterations;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

fn check_range(
    field: &'static str,
    value: f32,
    inside: bool,
    range: &'static str,
) -> Result<(), ConfigError> {
    if !value.is_finite() || !inside {
        return Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            range,
        });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NotPositive { field, value });
    }
    Ok(())
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Negative { field, value });
    }
    Ok(())
}
