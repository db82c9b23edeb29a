//! Advantage estimation and PPO losses.

pub mod gae;
pub mod policy_loss;

#[cfg(test)]
mod tests;

pub use gae::{compute_advantages, compute_gae, normalize_advantages, Advantages};
pub use policy_loss::{
    entropy_scalar, ppo_clip_loss, ppo_clip_loss_scalar, ppo_loss, value_loss, value_loss_scalar,
    LossStats, PpoLoss, PpoLossCoefficients,
};
