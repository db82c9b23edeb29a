//! Tests for advantage estimation and the PPO losses.
//!
//! - `gae_tests`: bootstrap rules at terminals, truncations and the horizon
//! - `policy_loss_tests`: clipping behaviour and gradients
