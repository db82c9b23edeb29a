//! Tabular actor-critic: one categorical distribution and one value per state.
//!
//! Parameter count is `n_states * n_actions + n_states`. Logits start at
//! zero (uniform policy) and values at zero.

use burn::module::{Module, Param};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use super::{state_indices, ActorCritic, Policy, PolicyGradients, PolicyOutput};

/// Logit table: [n_states, n_actions]
#[derive(Module, Debug)]
pub struct TabularActor<B: Backend> {
    pub logits: Param<Tensor<B, 2>>,
}

/// Value table: [n_states]
#[derive(Module, Debug)]
pub struct TabularCritic<B: Backend> {
    pub values: Param<Tensor<B, 1>>,
}

/// Tabular policy with separate actor and critic parameters.
#[derive(Module, Debug)]
pub struct TabularPolicy<B: Backend> {
    pub actor: TabularActor<B>,
    pub critic: TabularCritic<B>,
    n_states: usize,
    n_actions: usize,
}

/// Configuration for [`TabularPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct TabularPolicyConfig {
    pub n_states: usize,
    pub n_actions: usize,
}

impl TabularPolicyConfig {
    pub fn new(n_states: usize, n_actions: usize) -> Self {
        Self { n_states, n_actions }
    }

    /// Create a uniform policy with zero value estimates.
    pub fn init<B: Backend>(&self, device: &B::Device) -> TabularPolicy<B> {
        let logits = Tensor::zeros([self.n_states, self.n_actions], device);
        let values = Tensor::zeros([self.n_states], device);

        TabularPolicy {
            actor: TabularActor {
                logits: Param::from_tensor(logits),
            },
            critic: TabularCritic {
                values: Param::from_tensor(values),
            },
            n_states: self.n_states,
            n_actions: self.n_actions,
        }
    }
}

impl<B: Backend> TabularPolicy<B> {
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Action probabilities of one state.
    pub fn action_probs(&self, state: u32) -> Vec<f32> {
        let output = self.forward(&[state]);
        super::to_host(output.log_probs().exp())
    }
}

impl<B: Backend> Policy<B> for TabularPolicy<B> {
    fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn device(&self) -> B::Device {
        self.critic.values.val().device()
    }

    fn forward(&self, states: &[u32]) -> PolicyOutput<B> {
        let indices = state_indices::<B>(states, &self.device());
        let logits = self.actor.logits.val().select(0, indices.clone());
        let values = self.critic.values.val().select(0, indices);
        PolicyOutput::new(logits, values)
    }
}

impl<B: AutodiffBackend> ActorCritic<B> for TabularPolicy<B> {
    fn split_gradients(&self, mut grads: B::Gradients) -> PolicyGradients {
        let actor = GradientsParams::from_module(&mut grads, &self.actor);
        let critic = GradientsParams::from_module(&mut grads, &self.critic);
        PolicyGradients::Separate { actor, critic }
    }
}
