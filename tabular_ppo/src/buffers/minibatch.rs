//! Minibatch generation and extraction.

use rand::seq::SliceRandom;
use rand::Rng;

use super::RolloutBuffer;
use crate::algorithms::Advantages;

/// Indices of one minibatch into a rollout buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MinibatchIndices {
    pub indices: Vec<usize>,
}

impl MinibatchIndices {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Shuffle `0..total` and split it into minibatches of `minibatch_size`.
///
/// The last minibatch holds the remainder and may be smaller.
pub fn generate_minibatches<R: Rng + ?Sized>(
    total: usize,
    minibatch_size: usize,
    rng: &mut R,
) -> Vec<MinibatchIndices> {
    let mut indices: Vec<usize> = (0..total).collect();
    indices.shuffle(rng);

    indices
        .chunks(minibatch_size.max(1))
        .map(|chunk| MinibatchIndices::new(chunk.to_vec()))
        .collect()
}

/// Host-side data of one minibatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinibatchData {
    pub states: Vec<u32>,
    pub actions: Vec<u32>,
    pub old_log_probs: Vec<f32>,
    pub old_values: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

impl MinibatchData {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Gather the records of a minibatch.
pub fn extract_minibatch(
    buffer: &RolloutBuffer,
    advantages: &Advantages,
    indices: &MinibatchIndices,
) -> MinibatchData {
    let n = indices.len();
    let mut data = MinibatchData {
        states: Vec::with_capacity(n),
        actions: Vec::with_capacity(n),
        old_log_probs: Vec::with_capacity(n),
        old_values: Vec::with_capacity(n),
        advantages: Vec::with_capacity(n),
        returns: Vec::with_capacity(n),
    };

    for &idx in &indices.indices {
        data.states.push(buffer.states[idx]);
        data.actions.push(buffer.actions[idx]);
        data.old_log_probs.push(buffer.log_probs[idx]);
        data.old_values.push(buffer.values[idx]);
        data.advantages.push(advantages.advantages[idx]);
        data.returns.push(advantages.returns[idx]);
    }

    data
}
