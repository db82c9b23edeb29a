//! Rollout storage and minibatching.

pub mod minibatch;
pub mod rollout_buffer;


pub use minibatch::{extract_minibatch, generate_minibatches, MinibatchData, MinibatchIndices};
pub use rollout_buffer::RolloutBuffer;
