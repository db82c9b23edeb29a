//! Construction-time selection of the policy variant.

use burn::tensor::backend::Backend;

use super::{DeepPolicy, DeepPolicyConfig, Policy, TabularPolicy, TabularPolicyConfig};
use crate::environment::TransitionTable;
use crate::runners::ConfigError;

/// Builds a policy shaped for a transition table.
pub trait PolicyFactory<B: Backend> {
    type Policy: Policy<B>;

    fn build(&self, table: &TransitionTable, device: &B::Device) -> Result<Self::Policy, ConfigError>;
}

fn check_actions(n_actions: usize, table: &TransitionTable) -> Result<(), ConfigError> {
    if n_actions == 0 {
        return Err(ConfigError::InvalidCount {
            field: "n_actions",
            value: 0,
        });
    }
    if n_actions > table.num_actions() {
        return Err(ConfigError::PolicyActionSpace {
            policy_actions: n_actions,
            world_actions: table.num_actions(),
        });
    }
    Ok(())
}

impl<B: Backend> PolicyFactory<B> for TabularPolicyConfig {
    type Policy = TabularPolicy<B>;

    fn build(&self, table: &TransitionTable, device: &B::Device) -> Result<Self::Policy, ConfigError> {
        check_actions(self.n_actions, table)?;
        if self.n_states != table.num_states() {
            return Err(ConfigError::PolicyStateSpace {
                policy_states: self.n_states,
                world_states: table.num_states(),
            });
        }
        Ok(self.init(device))
    }
}

impl<B: Backend> PolicyFactory<B> for DeepPolicyConfig {
    type Policy = DeepPolicy<B>;

    fn build(&self, table: &TransitionTable, device: &B::Device) -> Result<Self::Policy, ConfigError> {
        check_actions(self.n_actions, table)?;
        if self.hidden_sizes.iter().any(|&h| h == 0) {
            return Err(ConfigError::InvalidCount {
                field: "hidden_sizes",
                value: 0,
            });
        }
        // Only table-provided features can be missing
        self.init(table, device).ok_or(ConfigError::MissingFeatures)
    }
}
