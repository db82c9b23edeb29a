//! Vectorized tabular environments.
//!
//! A [`TransitionTable`] describes the world; a [`VectorizedWorld`] runs N
//! independent copies of it in lockstep, auto-resetting instances whose
//! previous transition ended the episode.
//!
//! ```rust,ignore
//! let table = TransitionTable::builder(2, 2)
//!     .deterministic(0, 0, 1, 1.0, true)
//!     .deterministic(0, 1, 0, 0.0, false)
//!     .deterministic(1, 0, 1, 0.0, true)
//!     .deterministic(1, 1, 1, 0.0, true)
//!     .build()?;
//!
//! let mut world = VectorizedWorld::new(Arc::new(table), 4096, 200, 42)?;
//! let states = world.observe();
//! let batch = world.step(&actions)?;
//! ```

mod transition_table;
mod world;

#[cfg(test)]
mod tests;

use thiserror::Error;

pub use transition_table::{
    Outcome, TransitionEntry, TransitionRecord, TransitionTable, TransitionTableBuilder,
    TransitionTableFile, PROBABILITY_TOLERANCE,
};
pub use world::{FinishedEpisode, InstanceRng, StepBatch, VectorizedWorld, WorldShard};

/// Errors raised while building or stepping a world.
///
/// Everything except the action variants is detected at construction time.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("transition table needs at least one state and one action, got {num_states} states and {num_actions} actions")]
    EmptyTable { num_states: usize, num_actions: usize },

    #[error("initial state {state} is out of range for {num_states} states")]
    InitialStateOutOfRange { state: u32, num_states: usize },

    #[error("transition key (state {state}, action {action}) is out of range")]
    KeyOutOfRange { state: u32, action: u32 },

    #[error("duplicate transition for state {state}, action {action}")]
    DuplicateTransition { state: u32, action: u32 },

    #[error("missing transition for state {state}, action {action}")]
    MissingTransition { state: u32, action: u32 },

    #[error("state {state}, action {action} has no outcomes")]
    NoOutcomes { state: u32, action: u32 },

    #[error("state {state}, action {action} leads to state {next_state}, but the table has {num_states} states")]
    NextStateOutOfRange {
        state: u32,
        action: u32,
        next_state: u32,
        num_states: usize,
    },

    #[error("invalid probability {probability} for state {state}, action {action}")]
    InvalidProbability {
        state: u32,
        action: u32,
        probability: f32,
    },

    #[error("outcome probabilities for state {state}, action {action} sum to {sum}, expected 1")]
    ProbabilitySum { state: u32, action: u32, sum: f32 },

    #[error("non-finite reward {reward} for state {state}, action {action}")]
    NonFiniteReward { state: u32, action: u32, reward: f32 },

    #[error("no transition is marked terminal")]
    NoTerminalTransition,

    #[error("expected {expected} feature vectors, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("feature vector of state {state} has length {got}, expected {expected}")]
    FeatureLength {
        state: u32,
        expected: usize,
        got: usize,
    },

    #[error("feature vector of state {state} contains a non-finite value")]
    NonFiniteFeature { state: u32 },

    #[error("a world needs at least one instance")]
    NoInstances,

    #[error("max_ep_len must be in [1, u32::MAX], got {max_ep_len}")]
    InvalidEpisodeLimit { max_ep_len: usize },

    #[error("expected {expected} actions, got {got}")]
    ActionCountMismatch { expected: usize, got: usize },

    #[error("action {action} of instance {instance} is out of range for {num_actions} actions")]
    InvalidAction {
        instance: usize,
        action: u32,
        num_actions: usize,
    },

    #[error("failed to read transition table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse transition table: {0}")]
    Parse(#[from] serde_json::Error),
}
