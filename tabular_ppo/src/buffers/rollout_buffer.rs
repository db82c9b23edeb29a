//! Fixed-horizon rollout storage.
//!
//! Records are stored step-major: all instances at step 0, then all at step
//! 1, and so on (`index = t * n_envs + i`). A buffer is filled by exactly one
//! collection cycle and consumed by exactly one optimization phase.

use crate::environment::{FinishedEpisode, StepBatch};
use crate::policy::ActOutput;

/// Rollout of `horizon` steps over `n_envs` instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutBuffer {
    pub n_envs: usize,
    pub horizon: usize,
    step_count: usize,

    /// State each action was taken in.
    pub states: Vec<u32>,
    pub actions: Vec<u32>,
    /// Log probability of the action at collection time.
    pub log_probs: Vec<f32>,
    pub rewards: Vec<f32>,
    /// Value estimate at collection time.
    pub values: Vec<f32>,
    pub terminals: Vec<bool>,
    /// Time-limit truncations (not terminal).
    pub truncations: Vec<bool>,
    /// V(next_state) for truncated records, 0 elsewhere.
    pub bootstrap_values: Vec<f32>,

    /// Value of the state each instance observes after the last step.
    pub last_values: Vec<f32>,

    finished: Vec<FinishedEpisode>,
    finished_at: Vec<usize>,
}

impl RolloutBuffer {
    /// Create an empty buffer with room for `horizon * n_envs` records.
    pub fn new(n_envs: usize, horizon: usize) -> Self {
        let capacity = n_envs * horizon;
        Self {
            n_envs,
            horizon,
            step_count: 0,
            states: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity),
            log_probs: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            terminals: Vec::with_capacity(capacity),
            truncations: Vec::with_capacity(capacity),
            bootstrap_values: Vec::with_capacity(capacity),
            last_values: Vec::new(),
            finished: Vec::new(),
            finished_at: Vec::new(),
        }
    }

    /// Append one lockstep step for all instances.
    ///
    /// `bootstrap_values[i]` is only read for truncated transitions.
    pub fn push_step(
        &mut self,
        states: &[u32],
        act: &ActOutput,
        step: &StepBatch,
        bootstrap_values: &[f32],
    ) {
        debug_assert!(!self.is_full(), "rollout buffer overflow");
        debug_assert_eq!(states.len(), self.n_envs);
        debug_assert_eq!(act.actions.len(), self.n_envs);
        debug_assert_eq!(step.len(), self.n_envs);

        self.states.extend_from_slice(states);
        self.actions.extend_from_slice(&act.actions);
        self.log_probs.extend_from_slice(&act.log_probs);
        self.values.extend_from_slice(&act.values);
        self.rewards.extend_from_slice(&step.rewards);
        self.terminals.extend_from_slice(&step.terminals);
        self.truncations.extend_from_slice(&step.truncations);
        self.bootstrap_values.extend(
            step.truncations
                .iter()
                .zip(bootstrap_values.iter())
                .map(|(&truncated, &v)| if truncated { v } else { 0.0 }),
        );

        for episode in &step.finished {
            self.finished.push(*episode);
            self.finished_at.push(self.step_count);
        }
        self.step_count += 1;
    }

    /// Set the horizon bootstrap values, one per instance.
    pub fn set_last_values(&mut self, last_values: Vec<f32>) {
        debug_assert_eq!(last_values.len(), self.n_envs);
        self.last_values = last_values;
    }

    /// Stitch per-shard buffers (ordered by instance offset) into one.
    ///
    /// The result is laid out exactly as if all instances had been collected
    /// in a single buffer.
    pub fn merge_shards(parts: Vec<RolloutBuffer>) -> RolloutBuffer {
        let n_envs = parts.iter().map(|p| p.n_envs).sum();
        let horizon = parts.first().map(|p| p.horizon).unwrap_or(0);
        debug_assert!(parts.iter().all(|p| p.step_count == horizon));

        let mut merged = RolloutBuffer::new(n_envs, horizon);
        let mut episode_cursor = vec![0usize; parts.len()];

        for t in 0..horizon {
            for (k, part) in parts.iter().enumerate() {
                let rows = t * part.n_envs..(t + 1) * part.n_envs;
                merged.states.extend_from_slice(&part.states[rows.clone()]);
                merged.actions.extend_from_slice(&part.actions[rows.clone()]);
                merged.log_probs.extend_from_slice(&part.log_probs[rows.clone()]);
                merged.rewards.extend_from_slice(&part.rewards[rows.clone()]);
                merged.values.extend_from_slice(&part.values[rows.clone()]);
                merged.terminals.extend_from_slice(&part.terminals[rows.clone()]);
                merged.truncations.extend_from_slice(&part.truncations[rows.clone()]);
                merged
                    .bootstrap_values
                    .extend_from_slice(&part.bootstrap_values[rows]);

                let cursor = &mut episode_cursor[k];
                while *cursor < part.finished.len() && part.finished_at[*cursor] == t {
                    merged.finished.push(part.finished[*cursor]);
                    merged.finished_at.push(t);
                    *cursor += 1;
                }
            }
            merged.step_count += 1;
        }

        merged.last_values = parts
            .iter()
            .flat_map(|p| p.last_values.iter().copied())
            .collect();
        merged
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Steps pushed so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn is_full(&self) -> bool {
        self.step_count >= self.horizon
    }

    /// Record index of instance `env` at step `t`.
    #[inline]
    pub fn index(&self, t: usize, env: usize) -> usize {
        t * self.n_envs + env
    }

    /// Done flags (terminal OR truncated).
    pub fn dones(&self) -> Vec<bool> {
        self.terminals
            .iter()
            .zip(self.truncations.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }

    /// Episodes that ended during this rollout, in step order.
    pub fn finished_episodes(&self) -> &[FinishedEpisode] {
        &self.finished
    }

    /// Mean undiscounted return of finished episodes.
    pub fn mean_episode_return(&self) -> Option<f32> {
        if self.finished.is_empty() {
            return None;
        }
        let total: f32 = self.finished.iter().map(|e| e.episode_return).sum();
        Some(total / self.finished.len() as f32)
    }

    /// Mean length of finished episodes.
    pub fn mean_episode_length(&self) -> Option<f32> {
        if self.finished.is_empty() {
            return None;
        }
        let total: f32 = self.finished.iter().map(|e| e.length as f32).sum();
        Some(total / self.finished.len() as f32)
    }
}
