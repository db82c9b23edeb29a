//! Advantage and return estimation for fixed-horizon rollouts.
//!
//! Advantages follow Generalized Advantage Estimation with a distinction the
//! plain formulation lacks: an episode can end in three ways inside a rollout.
//!
//! - terminal transition: the bootstrap value is 0
//! - time-limit truncation: the bootstrap value is V(s') of the real
//!   post-transition state, stored at collection time
//! - horizon end: the bootstrap value is V of the state the instance observes
//!   after the last collected step
//!
//! With `gae_lambda = 1.0` the advantage is the discounted return minus the
//! collection-time value estimate.
//!
//! ## Formula
//!
//! δ_t = r_t + γ · next_value_t − V(s_t)
//! A_t = δ_t + γλ · A_{t+1}   (A_{t+1} = 0 across an episode boundary)

use crate::buffers::RolloutBuffer;

/// Normalization epsilon added to the variance.
pub const NORMALIZE_EPS: f32 = 1e-8;

/// Per-record advantages and value targets, aligned with the rollout buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advantages {
    pub advantages: Vec<f32>,
    /// Value targets: `advantage + collection-time value`.
    pub returns: Vec<f32>,
}

impl Advantages {
    pub fn len(&self) -> usize {
        self.advantages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advantages.is_empty()
    }
}

/// Compute advantages and returns for one instance's trajectory.
///
/// # Arguments
///
/// * `rewards` - rewards received [T]
/// * `values` - collection-time value estimates V(s_t) [T]
/// * `terminals` - terminal transition flags [T]
/// * `truncations` - time-limit truncation flags [T]
/// * `bootstrap_values` - V(s_{t+1}) for truncated steps [T]
/// * `last_value` - V of the state observed after step T-1
/// * `gamma` - discount factor
/// * `gae_lambda` - GAE λ parameter
#[allow(clippy::too_many_arguments)]
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    terminals: &[bool],
    truncations: &[bool],
    bootstrap_values: &[f32],
    last_value: f32,
    gamma: f32,
    gae_lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let n = rewards.len();
    assert_eq!(values.len(), n);
    assert_eq!(terminals.len(), n);
    assert_eq!(truncations.len(), n);
    assert_eq!(bootstrap_values.len(), n);

    let mut advantages = vec![0.0f32; n];
    let mut returns = vec![0.0f32; n];

    let mut gae = 0.0f32;
    let mut next_value = last_value;

    for t in (0..n).rev() {
        let (bootstrap, carry) = if terminals[t] {
            (0.0, 0.0)
        } else if truncations[t] {
            (bootstrap_values[t], 0.0)
        } else {
            (next_value, 1.0)
        };

        let delta = rewards[t] + gamma * bootstrap - values[t];
        gae = delta + gamma * gae_lambda * carry * gae;

        advantages[t] = gae;
        returns[t] = gae + values[t];
        next_value = values[t];
    }

    (advantages, returns)
}

/// Compute advantages for every record of a step-major rollout buffer.
///
/// Each instance is an independent backward recursion; the result uses the
/// buffer's layout (`t * n_envs + i`).
pub fn compute_advantages(buffer: &RolloutBuffer, gamma: f32, gae_lambda: f32) -> Advantages {
    let n_envs = buffer.n_envs;
    let total = buffer.len();
    let mut out = Advantages {
        advantages: vec![0.0; total],
        returns: vec![0.0; total],
    };
    if n_envs == 0 || total == 0 {
        return out;
    }

    let steps = total / n_envs;
    debug_assert_eq!(buffer.last_values.len(), n_envs);

    let column = |data: &[f32], env: usize| -> Vec<f32> {
        (0..steps).map(|t| data[t * n_envs + env]).collect()
    };
    let flags = |data: &[bool], env: usize| -> Vec<bool> {
        (0..steps).map(|t| data[t * n_envs + env]).collect()
    };

    for env in 0..n_envs {
        let (env_advantages, env_returns) = compute_gae(
            &column(&buffer.rewards, env),
            &column(&buffer.values, env),
            &flags(&buffer.terminals, env),
            &flags(&buffer.truncations, env),
            &column(&buffer.bootstrap_values, env),
            buffer.last_values.get(env).copied().unwrap_or(0.0),
            gamma,
            gae_lambda,
        );

        for t in 0..steps {
            let idx = t * n_envs + env;
            out.advantages[idx] = env_advantages[t];
            out.returns[idx] = env_returns[t];
        }
    }

    out
}

/// Normalize advantages to zero mean and unit variance in place.
///
/// An empty slice is left alone and a single element becomes 0.
pub fn normalize_advantages(advantages: &mut [f32]) {
    match advantages.len() {
        0 => {}
        1 => advantages[0] = 0.0,
        len => {
            let n = len as f32;
            let mean = advantages.iter().sum::<f32>() / n;
            let variance = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
            let std = (variance + NORMALIZE_EPS).sqrt();

            for a in advantages.iter_mut() {
                *a = (*a - mean) / std;
            }
        }
    }
}
