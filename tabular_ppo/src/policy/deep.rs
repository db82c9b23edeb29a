//! Deep actor-critic over a fixed state feature encoding.
//!
//! State ids are mapped to feature vectors by a frozen lookup table
//! ([`StateEncoder`]); actor and critic MLPs run on top, optionally behind a
//! shared trunk. With a shared trunk, all parameters form a single optimizer
//! group.

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::optim::GradientsParams;
use burn::tensor::activation::tanh;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use super::{state_indices, ActorCritic, Policy, PolicyGradients, PolicyOutput};
use crate::environment::TransitionTable;

/// How states are turned into network inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEncoding {
    /// Identity features, dimension = number of states.
    OneHot,
    /// Bits of the state id, dimension = ceil(log2(n_states)).
    Binary,
    /// Feature vectors provided by the transition table.
    Table,
}

impl StateEncoding {
    /// Feature matrix `[n_states, dim]`, flattened, and its width.
    pub fn feature_matrix(&self, table: &TransitionTable) -> Option<(Vec<f32>, usize)> {
        let n = table.num_states();
        match self {
            StateEncoding::OneHot => {
                let mut flat = vec![0.0f32; n * n];
                for s in 0..n {
                    flat[s * n + s] = 1.0;
                }
                Some((flat, n))
            }
            StateEncoding::Binary => {
                let bits = binary_width(n);
                let mut flat = Vec::with_capacity(n * bits);
                for s in 0..n {
                    flat.extend((0..bits).map(|b| ((s >> b) & 1) as f32));
                }
                Some((flat, bits))
            }
            StateEncoding::Table => {
                let dim = table.feature_dim()?;
                let flat = (0..n as u32)
                    .flat_map(|s| table.features(s).unwrap_or_default().iter().copied())
                    .collect();
                Some((flat, dim))
            }
        }
    }
}

fn binary_width(n_states: usize) -> usize {
    let mut bits = 1;
    while (1usize << bits) < n_states {
        bits += 1;
    }
    bits
}

/// Frozen lookup from state id to feature vector.
#[derive(Module, Debug)]
pub struct StateEncoder<B: Backend> {
    features: Param<Tensor<B, 2>>,
}

impl<B: Backend> StateEncoder<B> {
    pub fn new(flat: &[f32], n_states: usize, dim: usize, device: &B::Device) -> Self {
        let features = Tensor::<B, 1>::from_floats(flat, device).reshape([n_states, dim]);
        Self {
            features: Param::from_tensor(features),
        }
        .no_grad()
    }

    pub fn dim(&self) -> usize {
        self.features.val().dims()[1]
    }

    /// Features of a batch of states: [batch, dim]
    pub fn encode(&self, states: &[u32]) -> Tensor<B, 2> {
        let features = self.features.val();
        let indices = state_indices::<B>(states, &features.device());
        features.select(0, indices)
    }
}

/// Fully connected network with tanh between layers.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> Mlp<B> {
    /// Layer widths `[input, hidden.., output]`.
    pub fn new(widths: &[usize], device: &B::Device) -> Self {
        let layers = widths
            .windows(2)
            .map(|w| LinearConfig::new(w[0], w[1]).init(device))
            .collect();
        Self { layers }
    }

    /// Apply all layers; tanh after every layer except the last.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        self.layers.iter().enumerate().fold(x, |x, (i, layer)| {
            let x = layer.forward(x);
            if i < last {
                tanh(x)
            } else {
                x
            }
        })
    }

    /// Same as `forward` but also applies tanh after the last layer.
    pub fn forward_hidden(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        tanh(self.forward(x))
    }
}

/// Configuration for [`DeepPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeepPolicyConfig {
    pub n_actions: usize,
    pub hidden_sizes: Vec<usize>,
    pub encoding: StateEncoding,
    /// Share one hidden trunk between actor and critic.
    pub shared_trunk: bool,
}

impl DeepPolicyConfig {
    pub fn new(n_actions: usize) -> Self {
        Self {
            n_actions,
            hidden_sizes: vec![64, 64],
            encoding: StateEncoding::OneHot,
            shared_trunk: false,
        }
    }

    pub fn with_hidden_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_sizes = sizes;
        self
    }

    pub fn with_encoding(mut self, encoding: StateEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_shared_trunk(mut self, shared: bool) -> Self {
        self.shared_trunk = shared;
        self
    }

    /// Build the network. Returns `None` when the encoding needs table
    /// features the table does not provide.
    pub fn init<B: Backend>(&self, table: &TransitionTable, device: &B::Device) -> Option<DeepPolicy<B>> {
        let (flat, dim) = self.encoding.feature_matrix(table)?;
        let encoder = StateEncoder::new(&flat, table.num_states(), dim, device);

        let (trunk, head_input) = if self.shared_trunk && !self.hidden_sizes.is_empty() {
            let widths: Vec<usize> = std::iter::once(dim)
                .chain(self.hidden_sizes.iter().copied())
                .collect();
            let last = *widths.last().unwrap_or(&dim);
            (Some(Mlp::new(&widths, device)), last)
        } else {
            (None, dim)
        };

        let head_widths = |out: usize| -> Vec<usize> {
            if trunk.is_some() {
                vec![head_input, out]
            } else {
                std::iter::once(head_input)
                    .chain(self.hidden_sizes.iter().copied())
                    .chain(std::iter::once(out))
                    .collect()
            }
        };
        let actor = Mlp::new(&head_widths(self.n_actions), device);
        let critic = Mlp::new(&head_widths(1), device);

        Some(DeepPolicy {
            encoder,
            trunk,
            actor,
            critic,
            n_actions: self.n_actions,
        })
    }
}

/// MLP actor-critic over encoded states.
#[derive(Module, Debug)]
pub struct DeepPolicy<B: Backend> {
    encoder: StateEncoder<B>,
    trunk: Option<Mlp<B>>,
    actor: Mlp<B>,
    critic: Mlp<B>,
    n_actions: usize,
}

impl<B: Backend> DeepPolicy<B> {
    pub fn has_shared_trunk(&self) -> bool {
        self.trunk.is_some()
    }

    pub fn feature_dim(&self) -> usize {
        self.encoder.dim()
    }
}

impl<B: Backend> Policy<B> for DeepPolicy<B> {
    fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn device(&self) -> B::Device {
        self.encoder.features.val().device()
    }

    fn forward(&self, states: &[u32]) -> PolicyOutput<B> {
        let mut x = self.encoder.encode(states);
        if let Some(trunk) = &self.trunk {
            x = trunk.forward_hidden(x);
        }
        let logits = self.actor.forward(x.clone());
        let values = self.critic.forward(x).flatten(0, 1);
        PolicyOutput::new(logits, values)
    }
}

impl<B: AutodiffBackend> ActorCritic<B> for DeepPolicy<B> {
    fn split_gradients(&self, mut grads: B::Gradients) -> PolicyGradients {
        if self.trunk.is_some() {
            // The encoder is frozen, so it contributes no gradients
            return PolicyGradients::Shared(GradientsParams::from_grads(grads, self));
        }
        let actor = GradientsParams::from_module(&mut grads, &self.actor);
        let critic = GradientsParams::from_module(&mut grads, &self.critic);
        PolicyGradients::Separate { actor, critic }
    }
}
