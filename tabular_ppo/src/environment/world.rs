//! Batch of independent tabular world instances stepped in lockstep.
//!
//! State is kept in struct-of-arrays form so the batch can be split into
//! disjoint [`WorldShard`]s that step concurrently. Each instance owns two
//! random streams: one for stochastic transitions and one handed to the
//! policy for action sampling. Streams are derived from a single seed with
//! `jump()`, so every instance draws the same numbers no matter how the batch
//! is partitioned.

use std::sync::Arc;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use super::{TransitionTable, WorldError};

/// Per-instance random stream.
pub type InstanceRng = Xoshiro256StarStar;

/// An episode that ended during a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinishedEpisode {
    /// Global instance index.
    pub instance: usize,
    /// Undiscounted sum of rewards.
    pub episode_return: f32,
    /// Number of transitions in the episode.
    pub length: u32,
    /// Ended by the time limit rather than a terminal transition.
    pub truncated: bool,
}

/// Result of one lockstep transition.
#[derive(Debug, Clone, Default)]
pub struct StepBatch {
    /// State reached by each instance's transition (before any reset).
    pub next_states: Vec<u32>,
    /// Reward of each transition.
    pub rewards: Vec<f32>,
    /// Transition was terminal.
    pub terminals: Vec<bool>,
    /// Episode hit `max_ep_len` without a terminal transition.
    pub truncations: Vec<bool>,
    /// Episodes completed on this step.
    pub finished: Vec<FinishedEpisode>,
}

impl StepBatch {
    fn with_capacity(n: usize) -> Self {
        Self {
            next_states: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            terminals: Vec::with_capacity(n),
            truncations: Vec::with_capacity(n),
            finished: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Done flags (terminal OR truncated).
    pub fn dones(&self) -> Vec<bool> {
        self.terminals
            .iter()
            .zip(self.truncations.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

/// N instances of one tabular world.
#[derive(Debug, Clone)]
pub struct VectorizedWorld {
    table: Arc<TransitionTable>,
    max_ep_len: u32,
    states: Vec<u32>,
    steps: Vec<u32>,
    returns: Vec<f32>,
    pending_reset: Vec<bool>,
    env_rngs: Vec<InstanceRng>,
    action_rngs: Vec<InstanceRng>,
}

impl VectorizedWorld {
    /// Create `num_worlds` instances, all at the table's initial state.
    ///
    /// `max_ep_len` caps the number of transitions per episode; reaching it
    /// marks the transition as truncated.
    pub fn new(
        table: Arc<TransitionTable>,
        num_worlds: usize,
        max_ep_len: usize,
        seed: u64,
    ) -> Result<Self, WorldError> {
        if num_worlds == 0 {
            return Err(WorldError::NoInstances);
        }
        if max_ep_len == 0 || max_ep_len > u32::MAX as usize {
            return Err(WorldError::InvalidEpisodeLimit { max_ep_len });
        }

        let (env_rngs, action_rngs) = derive_streams(seed, num_worlds);
        let initial = table.initial_state();

        Ok(Self {
            table,
            max_ep_len: max_ep_len as u32,
            states: vec![initial; num_worlds],
            steps: vec![0; num_worlds],
            returns: vec![0.0; num_worlds],
            pending_reset: vec![false; num_worlds],
            env_rngs,
            action_rngs,
        })
    }

    pub fn num_worlds(&self) -> usize {
        self.states.len()
    }

    pub fn num_states(&self) -> usize {
        self.table.num_states()
    }

    pub fn num_actions(&self) -> usize {
        self.table.num_actions()
    }

    pub fn max_ep_len(&self) -> usize {
        self.max_ep_len as usize
    }

    pub fn table(&self) -> &Arc<TransitionTable> {
        &self.table
    }

    /// Re-initialize every instance to the start state.
    ///
    /// Random streams are not rewound.
    pub fn reset(&mut self) -> Vec<u32> {
        let initial = self.table.initial_state();
        self.states.fill(initial);
        self.steps.fill(0);
        self.returns.fill(0.0);
        self.pending_reset.fill(false);
        self.states.clone()
    }

    /// States the next action batch applies to.
    pub fn observe(&self) -> Vec<u32> {
        observe(&self.states, &self.pending_reset, self.table.initial_state())
    }

    /// Step counters of the current episodes.
    pub fn episode_steps(&self) -> &[u32] {
        &self.steps
    }

    /// Instances that will be reset before their next transition.
    pub fn pending_resets(&self) -> &[bool] {
        &self.pending_reset
    }

    /// Action-sampling streams, one per instance.
    pub fn action_rngs_mut(&mut self) -> &mut [InstanceRng] {
        &mut self.action_rngs
    }

    /// Advance every instance by one transition.
    pub fn step(&mut self, actions: &[u32]) -> Result<StepBatch, WorldError> {
        self.full_shard().step(actions)
    }

    /// Split into at most `n_shards` disjoint views of contiguous instances.
    pub fn shards_mut(&mut self, n_shards: usize) -> Vec<WorldShard<'_>> {
        let chunk = self.states.len().div_ceil(n_shards.max(1));
        let table = &*self.table;
        let max_ep_len = self.max_ep_len;

        self.states
            .chunks_mut(chunk)
            .zip(self.steps.chunks_mut(chunk))
            .zip(self.returns.chunks_mut(chunk))
            .zip(self.pending_reset.chunks_mut(chunk))
            .zip(self.env_rngs.chunks_mut(chunk))
            .zip(self.action_rngs.chunks_mut(chunk))
            .enumerate()
            .map(
                |(k, (((((states, steps), returns), pending_reset), env_rngs), action_rngs))| {
                    WorldShard {
                        table,
                        max_ep_len,
                        offset: k * chunk,
                        states,
                        steps,
                        returns,
                        pending_reset,
                        env_rngs,
                        action_rngs,
                    }
                },
            )
            .collect()
    }

    fn full_shard(&mut self) -> WorldShard<'_> {
        WorldShard {
            table: &self.table,
            max_ep_len: self.max_ep_len,
            offset: 0,
            states: &mut self.states,
            steps: &mut self.steps,
            returns: &mut self.returns,
            pending_reset: &mut self.pending_reset,
            env_rngs: &mut self.env_rngs,
            action_rngs: &mut self.action_rngs,
        }
    }
}

/// Mutable view over a contiguous range of instances.
pub struct WorldShard<'a> {
    table: &'a TransitionTable,
    max_ep_len: u32,
    offset: usize,
    states: &'a mut [u32],
    steps: &'a mut [u32],
    returns: &'a mut [f32],
    pending_reset: &'a mut [bool],
    env_rngs: &'a mut [InstanceRng],
    action_rngs: &'a mut [InstanceRng],
}

impl<'a> WorldShard<'a> {
    /// Global index of the first instance in this shard.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn observe(&self) -> Vec<u32> {
        observe(&*self.states, &*self.pending_reset, self.table.initial_state())
    }

    pub fn action_rngs_mut(&mut self) -> &mut [InstanceRng] {
        &mut *self.action_rngs
    }

    /// Advance every instance of the shard by one transition.
    ///
    /// Actions are checked before any instance moves, so an error leaves the
    /// shard unchanged.
    pub fn step(&mut self, actions: &[u32]) -> Result<StepBatch, WorldError> {
        let n = self.len();
        if actions.len() != n {
            return Err(WorldError::ActionCountMismatch {
                expected: n,
                got: actions.len(),
            });
        }
        let num_actions = self.table.num_actions();
        if let Some((i, &action)) = actions
            .iter()
            .enumerate()
            .find(|&(_, &a)| a as usize >= num_actions)
        {
            return Err(WorldError::InvalidAction {
                instance: self.offset + i,
                action,
                num_actions,
            });
        }

        let initial = self.table.initial_state();
        let mut batch = StepBatch::with_capacity(n);

        for i in 0..n {
            if self.pending_reset[i] {
                self.states[i] = initial;
                self.steps[i] = 0;
                self.returns[i] = 0.0;
                self.pending_reset[i] = false;
            }

            let entry = self.table.entry(self.states[i], actions[i]);
            let next_state = entry.sample(&mut self.env_rngs[i]);

            self.states[i] = next_state;
            self.steps[i] += 1;
            self.returns[i] += entry.reward;

            let terminal = entry.terminal;
            let truncated = !terminal && self.steps[i] >= self.max_ep_len;
            if terminal || truncated {
                self.pending_reset[i] = true;
                batch.finished.push(FinishedEpisode {
                    instance: self.offset + i,
                    episode_return: self.returns[i],
                    length: self.steps[i],
                    truncated,
                });
            }

            batch.next_states.push(next_state);
            batch.rewards.push(entry.reward);
            batch.terminals.push(terminal);
            batch.truncations.push(truncated);
        }

        Ok(batch)
    }
}

fn observe(states: &[u32], pending_reset: &[bool], initial: u32) -> Vec<u32> {
    states
        .iter()
        .zip(pending_reset.iter())
        .map(|(&s, &pending)| if pending { initial } else { s })
        .collect()
}

/// Environment and action streams for `n` instances.
///
/// Instance `i` gets the base stream advanced by `i` jumps (2^128 draws
/// each). Action streams start from a long jump (2^192) so they never overlap
/// the environment streams.
fn derive_streams(seed: u64, n: usize) -> (Vec<InstanceRng>, Vec<InstanceRng>) {
    let mut env_base = InstanceRng::seed_from_u64(seed);
    let mut action_base = env_base.clone();
    action_base.long_jump();

    let mut env_rngs = Vec::with_capacity(n);
    let mut action_rngs = Vec::with_capacity(n);
    for _ in 0..n {
        env_rngs.push(env_base.clone());
        env_base.jump();
        action_rngs.push(action_base.clone());
        action_base.jump();
    }
    (env_rngs, action_rngs)
}
