//! Actor-critic policies over discrete states.
//!
//! Every policy maps a batch of state ids to a categorical distribution over
//! actions and a scalar value estimate. The training core is generic over
//! [`Policy`] / [`ActorCritic`] and never inspects which variant it holds:
//!
//! - [`TabularPolicy`]: one logit row and one value per state.
//! - [`DeepPolicy`]: MLPs over a fixed state feature encoding.
//!
//! Variants are chosen at construction through [`PolicyFactory`].

mod deep;
mod distribution;
mod factory;
mod tabular;


use burn::module::{AutodiffModule, Module, ModuleVisitor, Param};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use crate::environment::InstanceRng;

pub use deep::{DeepPolicy, DeepPolicyConfig, Mlp, StateEncoder, StateEncoding};
pub use distribution::{sample_categorical, state_indices, to_host, PolicyOutput};
pub use factory::PolicyFactory;
pub use tabular::{TabularActor, TabularCritic, TabularPolicy, TabularPolicyConfig};

/// Sampled actions for a batch of states (host side, no gradients).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActOutput {
    pub actions: Vec<u32>,
    /// Log probability of each sampled action.
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
}

/// Differentiable re-evaluation of stored `(state, action)` pairs.
#[derive(Debug, Clone)]
pub struct Evaluation<B: Backend> {
    pub log_probs: Tensor<B, 1>,
    pub entropy: Tensor<B, 1>,
    pub values: Tensor<B, 1>,
}

/// Shared contract of all policy variants.
///
/// `evaluate` must be a pure function of the current parameters: it is the
/// function the optimizer differentiates through.
pub trait Policy<B: Backend>: Module<B> {
    /// Size of the action space (fixed at construction).
    fn n_actions(&self) -> usize;

    /// Device holding the parameters.
    fn device(&self) -> B::Device;

    /// Logits and values for a batch of states.
    fn forward(&self, states: &[u32]) -> PolicyOutput<B>;

    /// Sample one action per state, drawing from `rngs[i]` for state `i`.
    fn act(&self, states: &[u32], rngs: &mut [InstanceRng]) -> ActOutput {
        debug_assert_eq!(states.len(), rngs.len());
        if states.is_empty() {
            return ActOutput::default();
        }

        let output = self.forward(states);
        let log_probs = to_host(output.log_probs());
        let (actions, log_probs) = sample_categorical(&log_probs, self.n_actions(), rngs);

        ActOutput {
            actions,
            log_probs,
            values: to_host(output.values),
        }
    }

    /// Log probability, entropy and value of given `(state, action)` pairs.
    fn evaluate(&self, states: &[u32], actions: &[u32]) -> Evaluation<B> {
        let output = self.forward(states);
        Evaluation {
            log_probs: output.log_prob_of(actions),
            entropy: output.entropy(),
            values: output.values,
        }
    }

    /// Value estimates only.
    fn values(&self, states: &[u32]) -> Vec<f32> {
        if states.is_empty() {
            return Vec::new();
        }
        to_host(self.forward(states).values)
    }
}

/// Gradients grouped by optimizer.
pub enum PolicyGradients {
    /// Actor and critic own disjoint parameters.
    Separate {
        actor: GradientsParams,
        critic: GradientsParams,
    },
    /// Parameters shared between policy and value heads.
    Shared(GradientsParams),
}

impl PolicyGradients {
    /// Whether every gradient registered for `module`'s parameters is finite.
    pub fn is_finite<B: AutodiffBackend, M: AutodiffModule<B>>(&self, module: &M) -> bool {
        match self {
            PolicyGradients::Separate { actor, critic } => {
                all_finite::<B, M>(module, actor) && all_finite::<B, M>(module, critic)
            }
            PolicyGradients::Shared(grads) => all_finite::<B, M>(module, grads),
        }
    }
}

fn all_finite<B: AutodiffBackend, M: AutodiffModule<B>>(module: &M, grads: &GradientsParams) -> bool {
    let mut visitor = FiniteGradients { grads, finite: true };
    module.visit(&mut visitor);
    visitor.finite
}

struct FiniteGradients<'a> {
    grads: &'a GradientsParams,
    finite: bool,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for FiniteGradients<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if !self.finite {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.finite = to_host(grad).iter().all(|g| g.is_finite());
        }
    }
}

/// Trainable policy.
pub trait ActorCritic<B: AutodiffBackend>: Policy<B> + AutodiffModule<B> {
    /// Split the gradients of a backward pass into optimizer groups.
    fn split_gradients(&self, grads: B::Gradients) -> PolicyGradients;
}
