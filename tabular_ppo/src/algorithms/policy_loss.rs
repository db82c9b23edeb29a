//! PPO loss functions.
//!
//! Tensor versions are differentiated by the trainer; scalar versions mirror
//! them on host slices and are used for diagnostics and tests.
//!
//! # Numerical Stability
//!
//! Importance ratios are computed as `exp(log_ratio)` with the log ratio
//! clamped to [-20, 20].

use burn::tensor::{backend::Backend, Tensor};

use crate::policy::{to_host, Evaluation};

/// Maximum log ratio before exp().
pub const MAX_LOG_RATIO: f32 = 20.0;

fn clamp_log_ratio(log_ratio: f32) -> f32 {
    if log_ratio.is_finite() {
        log_ratio.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
    } else {
        0.0
    }
}

/// Clipped surrogate loss on host slices.
///
/// Returns `-mean(min(r·A, clip(r, 1-ε, 1+ε)·A))`.
pub fn ppo_clip_loss_scalar(
    log_probs: &[f32],
    old_log_probs: &[f32],
    advantages: &[f32],
    clip_ratio: f32,
) -> f32 {
    let n = log_probs.len();
    assert_eq!(old_log_probs.len(), n);
    assert_eq!(advantages.len(), n);
    if n == 0 {
        return 0.0;
    }

    let objective: f32 = log_probs
        .iter()
        .zip(old_log_probs)
        .zip(advantages)
        .map(|((&lp, &old), &adv)| {
            let ratio = clamp_log_ratio(lp - old).exp();
            let clipped = ratio.clamp(1.0 - clip_ratio, 1.0 + clip_ratio);
            (ratio * adv).min(clipped * adv)
        })
        .sum();

    -objective / n as f32
}

/// Clipped surrogate loss.
///
/// * `log_probs` - current policy log probs [batch]
/// * `old_log_probs` - collection-time log probs, no gradient [batch]
/// * `advantages` - advantages, no gradient [batch]
pub fn ppo_clip_loss<B: Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_ratio: f32,
) -> Tensor<B, 1> {
    let ratio = (log_probs - old_log_probs)
        .clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
        .exp();
    let clipped_ratio = ratio.clone().clamp(1.0 - clip_ratio, 1.0 + clip_ratio);

    let surr1 = ratio * advantages.clone();
    let surr2 = clipped_ratio * advantages;

    -surr1.min_pair(surr2).mean()
}

/// Value regression loss, optionally clipped around the collection-time value.
pub fn value_loss<B: Backend>(
    values: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    clip_value: Option<f32>,
) -> Tensor<B, 1> {
    match clip_value {
        Some(clip) => {
            let values_clipped =
                old_values.clone() + (values.clone() - old_values).clamp(-clip, clip);
            let loss1 = (values - returns.clone()).powf_scalar(2.0);
            let loss2 = (values_clipped - returns).powf_scalar(2.0);
            loss1.max_pair(loss2).mean()
        }
        None => (values - returns).powf_scalar(2.0).mean(),
    }
}

/// Mean squared error on host slices.
pub fn value_loss_scalar(values: &[f32], returns: &[f32]) -> f32 {
    let n = values.len();
    assert_eq!(returns.len(), n);
    if n == 0 {
        return 0.0;
    }

    let sse: f32 = values
        .iter()
        .zip(returns)
        .map(|(v, r)| (v - r).powi(2))
        .sum();
    sse / n as f32
}

/// Entropy of a categorical distribution given its log probabilities.
pub fn entropy_scalar(log_probs: &[f32]) -> f32 {
    log_probs.iter().map(|&lp| -lp.exp() * lp).sum()
}

/// Weights of the combined PPO objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpoLossCoefficients {
    pub clip_ratio: f32,
    pub value_loss_coef: f32,
    pub entropy_coef: f32,
    pub value_clip: Option<f32>,
}

/// Host-side summary of one loss evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub total_loss: f32,
    /// Mean of `old_log_prob - log_prob`.
    pub approx_kl: f32,
    /// Fraction of samples whose ratio left `[1-ε, 1+ε]`.
    pub clip_fraction: f32,
}

impl LossStats {
    pub fn is_finite(&self) -> bool {
        self.total_loss.is_finite()
    }

    /// Element-wise mean of a set of stats.
    pub fn mean(stats: &[LossStats]) -> LossStats {
        if stats.is_empty() {
            return LossStats::default();
        }
        let n = stats.len() as f32;
        let sum = |f: fn(&LossStats) -> f32| stats.iter().map(f).sum::<f32>() / n;
        LossStats {
            policy_loss: sum(|s| s.policy_loss),
            value_loss: sum(|s| s.value_loss),
            entropy: sum(|s| s.entropy),
            total_loss: sum(|s| s.total_loss),
            approx_kl: sum(|s| s.approx_kl),
            clip_fraction: sum(|s| s.clip_fraction),
        }
    }
}

/// Combined loss tensor plus its host summary.
pub struct PpoLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub stats: LossStats,
}

/// Combined PPO loss:
/// `policy_loss + value_loss_coef · value_loss − entropy_coef · entropy`.
pub fn ppo_loss<B: Backend>(
    evaluation: Evaluation<B>,
    old_log_probs: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    coefficients: &PpoLossCoefficients,
) -> PpoLoss<B> {
    let Evaluation {
        log_probs,
        entropy,
        values,
    } = evaluation;

    let log_ratio = log_probs.clone() - old_log_probs.clone();
    let approx_kl = -log_ratio.clone().mean();
    let clip_fraction = log_ratio
        .clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
        .exp()
        .sub_scalar(1.0)
        .abs()
        .greater_elem(coefficients.clip_ratio)
        .float()
        .mean();

    let policy_loss = ppo_clip_loss(log_probs, old_log_probs, advantages, coefficients.clip_ratio);
    let value_loss = value_loss(values, old_values, returns, coefficients.value_clip);
    let entropy = entropy.mean();

    let total = policy_loss.clone() + value_loss.clone().mul_scalar(coefficients.value_loss_coef)
        - entropy.clone().mul_scalar(coefficients.entropy_coef);

    let first = |t: Tensor<B, 1>| to_host(t).first().copied().unwrap_or(f32::NAN);
    let stats = LossStats {
        policy_loss: first(policy_loss),
        value_loss: first(value_loss),
        entropy: first(entropy),
        total_loss: first(total.clone()),
        approx_kl: first(approx_kl),
        clip_fraction: first(clip_fraction),
    };

    PpoLoss { total, stats }
}
