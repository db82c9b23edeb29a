//! Immutable transition model shared by every world instance.
//!
//! A table maps each `(state, action)` pair to a [`TransitionEntry`]: the
//! distribution over next states, the reward and whether the transition ends
//! the episode. Tables are validated once when built; a table that exists is
//! always well formed, so stepping never fails on table contents.
//!
//! ## File format
//!
//! ```json
//! {
//!   "num_states": 2,
//!   "num_actions": 2,
//!   "initial_state": 0,
//!   "transitions": [
//!     { "state": 0, "action": 0, "outcomes": [{ "next_state": 1, "probability": 1.0 }],
//!       "reward": 1.0, "terminal": true }
//!   ],
//!   "features": [[1.0, 0.0], [0.0, 1.0]]
//! }
//! ```

use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::WorldError;

/// Allowed deviation of an outcome distribution's total mass from 1.
pub const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// One reachable next state and its probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub next_state: u32,
    pub probability: f32,
}

/// Transition for a single `(state, action)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEntry {
    /// Next-state distribution (non-empty, sums to 1).
    pub outcomes: Vec<Outcome>,
    /// Reward received on taking the transition.
    pub reward: f32,
    /// Whether the transition ends the episode.
    pub terminal: bool,
}

impl TransitionEntry {
    /// Whether the next state is fully determined.
    pub fn is_deterministic(&self) -> bool {
        self.outcomes.len() == 1
    }

    /// Sample the next state.
    ///
    /// Deterministic entries do not consume randomness.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> u32 {
        if self.is_deterministic() {
            return self.outcomes[0].next_state;
        }

        let u: f32 = rng.gen();
        let mut cumsum = 0.0f32;
        let mut chosen = self.outcomes[0].next_state;
        for outcome in &self.outcomes {
            if outcome.probability <= 0.0 {
                continue;
            }
            chosen = outcome.next_state;
            cumsum += outcome.probability;
            if u < cumsum {
                return chosen;
            }
        }
        // Rounding left `u` above the accumulated mass
        chosen
    }
}

/// Serialized form of a single transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub state: u32,
    pub action: u32,
    pub outcomes: Vec<Outcome>,
    pub reward: f32,
    #[serde(default)]
    pub terminal: bool,
}

/// Serialized form of a whole table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionTableFile {
    pub num_states: usize,
    pub num_actions: usize,
    #[serde(default)]
    pub initial_state: u32,
    pub transitions: Vec<TransitionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<Vec<f32>>>,
}

/// Validated, read-only transition model.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    num_states: usize,
    num_actions: usize,
    initial_state: u32,
    /// Indexed by `state * num_actions + action`.
    entries: Vec<TransitionEntry>,
    /// Flattened `[num_states, feature_dim]`.
    features: Option<Vec<f32>>,
    feature_dim: usize,
}

impl TransitionTable {
    /// Start building a table with the given dimensions.
    pub fn builder(num_states: usize, num_actions: usize) -> TransitionTableBuilder {
        TransitionTableBuilder::new(num_states, num_actions)
    }

    /// Parse and validate a table from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, WorldError> {
        let file: TransitionTableFile = serde_json::from_str(json)?;
        Self::from_file_format(file)
    }

    /// Load and validate a table from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validate a deserialized table.
    pub fn from_file_format(file: TransitionTableFile) -> Result<Self, WorldError> {
        let mut builder = TransitionTableBuilder::new(file.num_states, file.num_actions)
            .initial_state(file.initial_state);
        for record in file.transitions {
            builder = builder.stochastic(
                record.state,
                record.action,
                record.outcomes.iter().map(|o| (o.next_state, o.probability)),
                record.reward,
                record.terminal,
            );
        }
        if let Some(features) = file.features {
            builder = builder.features(features);
        }
        builder.build()
    }

    /// Convert back into the serialized form.
    pub fn to_file_format(&self) -> TransitionTableFile {
        let transitions = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| TransitionRecord {
                state: (idx / self.num_actions) as u32,
                action: (idx % self.num_actions) as u32,
                outcomes: entry.outcomes.clone(),
                reward: entry.reward,
                terminal: entry.terminal,
            })
            .collect();

        let features = self.features.as_ref().map(|flat| {
            flat.chunks(self.feature_dim)
                .map(|row| row.to_vec())
                .collect()
        });

        TransitionTableFile {
            num_states: self.num_states,
            num_actions: self.num_actions,
            initial_state: self.initial_state,
            transitions,
            features,
        }
    }

    /// Write the table as pretty-printed JSON.
    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<(), WorldError> {
        let json = serde_json::to_string_pretty(&self.to_file_format())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// State every episode starts in.
    pub fn initial_state(&self) -> u32 {
        self.initial_state
    }

    /// Lookup `(state, action) -> outcomes`.
    ///
    /// # Panics
    ///
    /// Panics if `state` or `action` is out of range.
    #[inline]
    pub fn entry(&self, state: u32, action: u32) -> &TransitionEntry {
        &self.entries[state as usize * self.num_actions + action as usize]
    }

    /// Per-state feature vector, if the table provides one.
    pub fn features(&self, state: u32) -> Option<&[f32]> {
        let dim = self.feature_dim;
        self.features
            .as_ref()
            .map(|flat| &flat[state as usize * dim..(state as usize + 1) * dim])
    }

    /// Length of the per-state feature vectors, if present.
    pub fn feature_dim(&self) -> Option<usize> {
        self.features.as_ref().map(|_| self.feature_dim)
    }

    /// Number of `(state, action)` pairs that end an episode.
    pub fn terminal_count(&self) -> usize {
        self.entries.iter().filter(|e| e.terminal).count()
    }
}

/// Incremental constructor for [`TransitionTable`].
///
/// All checks are deferred to [`build`](Self::build) so that errors report
/// the first offending entry regardless of insertion order.
#[derive(Debug, Clone)]
pub struct TransitionTableBuilder {
    num_states: usize,
    num_actions: usize,
    initial_state: u32,
    records: Vec<(u32, u32, TransitionEntry)>,
    features: Option<Vec<Vec<f32>>>,
}

impl TransitionTableBuilder {
    pub fn new(num_states: usize, num_actions: usize) -> Self {
        Self {
            num_states,
            num_actions,
            initial_state: 0,
            records: Vec::new(),
            features: None,
        }
    }

    /// Set the start state (default 0).
    pub fn initial_state(mut self, state: u32) -> Self {
        self.initial_state = state;
        self
    }

    /// Add a transition with a single next state.
    pub fn deterministic(
        self,
        state: u32,
        action: u32,
        next_state: u32,
        reward: f32,
        terminal: bool,
    ) -> Self {
        self.stochastic(state, action, [(next_state, 1.0)], reward, terminal)
    }

    /// Add a transition with a next-state distribution of `(next_state, probability)`.
    pub fn stochastic(
        mut self,
        state: u32,
        action: u32,
        outcomes: impl IntoIterator<Item = (u32, f32)>,
        reward: f32,
        terminal: bool,
    ) -> Self {
        let outcomes = outcomes
            .into_iter()
            .map(|(next_state, probability)| Outcome {
                next_state,
                probability,
            })
            .collect();
        self.records.push((
            state,
            action,
            TransitionEntry {
                outcomes,
                reward,
                terminal,
            },
        ));
        self
    }

    /// Attach one feature vector per state.
    pub fn features(mut self, features: Vec<Vec<f32>>) -> Self {
        self.features = Some(features);
        self
    }

    /// Validate and freeze the table.
    pub fn build(self) -> Result<TransitionTable, WorldError> {
        let Self {
            num_states,
            num_actions,
            initial_state,
            records,
            features,
        } = self;

        if num_states == 0 || num_actions == 0 {
            return Err(WorldError::EmptyTable {
                num_states,
                num_actions,
            });
        }
        if initial_state as usize >= num_states {
            return Err(WorldError::InitialStateOutOfRange {
                state: initial_state,
                num_states,
            });
        }

        let mut slots: Vec<Option<TransitionEntry>> = vec![None; num_states * num_actions];
        for (state, action, entry) in records {
            if state as usize >= num_states || action as usize >= num_actions {
                return Err(WorldError::KeyOutOfRange { state, action });
            }
            validate_entry(state, action, &entry, num_states)?;

            let slot = &mut slots[state as usize * num_actions + action as usize];
            if slot.is_some() {
                return Err(WorldError::DuplicateTransition { state, action });
            }
            *slot = Some(entry);
        }

        let mut entries = Vec::with_capacity(slots.len());
        for (idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(WorldError::MissingTransition {
                        state: (idx / num_actions) as u32,
                        action: (idx % num_actions) as u32,
                    })
                }
            }
        }

        if !entries.iter().any(|e| e.terminal) {
            return Err(WorldError::NoTerminalTransition);
        }

        let (features, feature_dim) = match features {
            Some(rows) => {
                let (flat, dim) = flatten_features(rows, num_states)?;
                (Some(flat), dim)
            }
            None => (None, 0),
        };

        Ok(TransitionTable {
            num_states,
            num_actions,
            initial_state,
            entries,
            features,
            feature_dim,
        })
    }
}

fn validate_entry(
    state: u32,
    action: u32,
    entry: &TransitionEntry,
    num_states: usize,
) -> Result<(), WorldError> {
    if entry.outcomes.is_empty() {
        return Err(WorldError::NoOutcomes { state, action });
    }
    if !entry.reward.is_finite() {
        return Err(WorldError::NonFiniteReward {
            state,
            action,
            reward: entry.reward,
        });
    }

    let mut total = 0.0f32;
    for outcome in &entry.outcomes {
        if outcome.next_state as usize >= num_states {
            return Err(WorldError::NextStateOutOfRange {
                state,
                action,
                next_state: outcome.next_state,
                num_states,
            });
        }
        if !outcome.probability.is_finite() || outcome.probability < 0.0 {
            return Err(WorldError::InvalidProbability {
                state,
                action,
                probability: outcome.probability,
            });
        }
        total += outcome.probability;
    }

    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(WorldError::ProbabilitySum {
            state,
            action,
            sum: total,
        });
    }
    Ok(())
}

fn flatten_features(rows: Vec<Vec<f32>>, num_states: usize) -> Result<(Vec<f32>, usize), WorldError> {
    if rows.len() != num_states {
        return Err(WorldError::FeatureCount {
            expected: num_states,
            got: rows.len(),
        });
    }
    let dim = rows[0].len();
    if dim == 0 {
        return Err(WorldError::FeatureLength {
            state: 0,
            expected: 1,
            got: 0,
        });
    }

    let mut flat = Vec::with_capacity(num_states * dim);
    for (state, row) in rows.into_iter().enumerate() {
        if row.len() != dim {
            return Err(WorldError::FeatureLength {
                state: state as u32,
                expected: dim,
                got: row.len(),
            });
        }
        if row.iter().any(|x| !x.is_finite()) {
            return Err(WorldError::NonFiniteFeature { state: state as u32 });
        }
        flat.extend(row);
    }
    Ok((flat, dim))
}
