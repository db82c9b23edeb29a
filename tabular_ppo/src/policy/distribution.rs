//! Categorical action distribution helpers.
//!
//! Sampling happens on the host with the caller's per-instance RNGs so that
//! the sampled action for instance `i` depends only on instance `i`'s stream.
//! Log probabilities and entropy are computed from `log_softmax`, which keeps
//! collection-time and optimization-time log probs bit-identical for
//! unchanged parameters.

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Int, Tensor};
use rand::Rng;

/// Policy head output for a batch of states.
#[derive(Debug, Clone)]
pub struct PolicyOutput<B: Backend> {
    /// Unnormalized log probabilities: [batch, n_actions]
    pub logits: Tensor<B, 2>,
    /// State values: [batch]
    pub values: Tensor<B, 1>,
}

impl<B: Backend> PolicyOutput<B> {
    pub fn new(logits: Tensor<B, 2>, values: Tensor<B, 1>) -> Self {
        Self { logits, values }
    }

    pub fn batch_size(&self) -> usize {
        self.logits.dims()[0]
    }

    pub fn n_actions(&self) -> usize {
        self.logits.dims()[1]
    }

    /// Normalized log probabilities: [batch, n_actions]
    pub fn log_probs(&self) -> Tensor<B, 2> {
        log_softmax(self.logits.clone(), 1)
    }

    /// Log probability of the given action per row: [batch]
    pub fn log_prob_of(&self, actions: &[u32]) -> Tensor<B, 1> {
        let batch_size = actions.len();
        let device = self.logits.device();
        let indices: Vec<i32> = actions.iter().map(|&a| a as i32).collect();
        let indices: Tensor<B, 2, Int> =
            Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device).reshape([batch_size, 1]);

        self.log_probs().gather(1, indices).flatten(0, 1)
    }

    /// Entropy per row: [batch]
    pub fn entropy(&self) -> Tensor<B, 1> {
        let log_probs = self.log_probs();
        let probs = log_probs.clone().exp();
        // H = -sum(p * log(p))
        let neg_entropy: Tensor<B, 2> = (probs * log_probs).sum_dim(1);
        -neg_entropy.flatten(0, 1)
    }
}

/// Draw one action per row of a flattened `[batch, n_actions]` log-prob matrix.
///
/// Returns `(actions, log_probs)` where `log_probs[i]` is read from the same
/// matrix. Row `i` consumes exactly one draw from `rngs[i]`.
pub fn sample_categorical<R: Rng>(
    log_probs: &[f32],
    n_actions: usize,
    rngs: &mut [R],
) -> (Vec<u32>, Vec<f32>) {
    let batch_size = rngs.len();
    debug_assert_eq!(log_probs.len(), batch_size * n_actions);

    let mut actions = Vec::with_capacity(batch_size);
    let mut chosen_log_probs = Vec::with_capacity(batch_size);

    for (i, rng) in rngs.iter_mut().enumerate() {
        let row = &log_probs[i * n_actions..(i + 1) * n_actions];
        let u: f32 = rng.gen();

        let mut cumsum = 0.0f32;
        let mut selected = n_actions - 1;
        for (a, lp) in row.iter().enumerate() {
            cumsum += lp.exp();
            // The last action also absorbs rounding error in the total mass
            if u < cumsum {
                selected = a;
                break;
            }
        }

        actions.push(selected as u32);
        chosen_log_probs.push(row[selected]);
    }

    (actions, chosen_log_probs)
}

/// Index tensor for a batch of state ids.
pub fn state_indices<B: Backend>(states: &[u32], device: &B::Device) -> Tensor<B, 1, Int> {
    let indices: Vec<i32> = states.iter().map(|&s| s as i32).collect();
    Tensor::from_ints(indices.as_slice(), device)
}

/// Copy a float tensor to the host.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
