//! World construction and stepping tests.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use super::*;
use crate::testing::{corridor_table, two_state_table, world};

// ============================================================================
// Table validation
// ============================================================================

#[test]
fn test_builder_accepts_well_formed_table() {
    let table = two_state_table();

    assert_eq!(table.num_states(), 2);
    assert_eq!(table.num_actions(), 2);
    assert_eq!(table.initial_state(), 0);
    assert_eq!(table.terminal_count(), 3);
    assert!(table.entry(0, 0).terminal);
    assert_eq!(table.entry(0, 1).outcomes[0].next_state, 0);
    assert!(table.feature_dim().is_none());
}

#[test]
fn test_missing_transition_is_rejected() {
    let result = TransitionTable::builder(2, 2)
        .deterministic(0, 0, 1, 1.0, true)
        .deterministic(0, 1, 0, 0.0, false)
        .deterministic(1, 0, 1, 0.0, true)
        .build();

    assert!(matches!(
        result,
        Err(WorldError::MissingTransition { state: 1, action: 1 })
    ));
}

#[test]
fn test_next_state_out_of_range_is_rejected() {
    let result = TransitionTable::builder(1, 1)
        .deterministic(0, 0, 3, 0.0, true)
        .build();

    assert!(matches!(
        result,
        Err(WorldError::NextStateOutOfRange { next_state: 3, .. })
    ));
}

#[test]
fn test_probabilities_must_sum_to_one() {
    let result = TransitionTable::builder(2, 1)
        .stochastic(0, 0, [(0, 0.5), (1, 0.4)], 0.0, true)
        .deterministic(1, 0, 1, 0.0, true)
        .build();

    match result {
        Err(WorldError::ProbabilitySum { state, action, sum }) => {
            assert_eq!((state, action), (0, 0));
            assert!((sum - 0.9).abs() < 1e-5);
        }
        other => panic!("expected ProbabilitySum, got {:?}", other),
    }
}

#[test]
fn test_negative_probability_is_rejected() {
    let result = TransitionTable::builder(2, 1)
        .stochastic(0, 0, [(0, 1.5), (1, -0.5)], 0.0, true)
        .deterministic(1, 0, 1, 0.0, true)
        .build();

    assert!(matches!(result, Err(WorldError::InvalidProbability { .. })));
}

#[test]
fn test_table_without_terminal_marking_is_rejected() {
    let result = TransitionTable::builder(1, 2)
        .deterministic(0, 0, 0, 0.0, false)
        .deterministic(0, 1, 0, 0.0, false)
        .build();

    assert!(matches!(result, Err(WorldError::NoTerminalTransition)));
}

#[test]
fn test_duplicate_and_out_of_range_keys_are_rejected() {
    let duplicate = TransitionTable::builder(1, 1)
        .deterministic(0, 0, 0, 0.0, true)
        .deterministic(0, 0, 0, 1.0, true)
        .build();
    assert!(matches!(
        duplicate,
        Err(WorldError::DuplicateTransition { state: 0, action: 0 })
    ));

    let out_of_range = TransitionTable::builder(1, 1)
        .deterministic(0, 2, 0, 0.0, true)
        .build();
    assert!(matches!(
        out_of_range,
        Err(WorldError::KeyOutOfRange { state: 0, action: 2 })
    ));
}

#[test]
fn test_initial_state_must_exist() {
    let result = TransitionTable::builder(1, 1)
        .initial_state(1)
        .deterministic(0, 0, 0, 0.0, true)
        .build();

    assert!(matches!(
        result,
        Err(WorldError::InitialStateOutOfRange { state: 1, num_states: 1 })
    ));
}

#[test]
fn test_ragged_features_are_rejected() {
    let result = TransitionTable::builder(2, 1)
        .deterministic(0, 0, 1, 0.0, false)
        .deterministic(1, 0, 1, 0.0, true)
        .features(vec![vec![0.0, 1.0], vec![1.0]])
        .build();

    assert!(matches!(
        result,
        Err(WorldError::FeatureLength { state: 1, expected: 2, got: 1 })
    ));
}

#[test]
fn test_json_table_matches_builder() {
    let json = r#"{
        "num_states": 2,
        "num_actions": 2,
        "transitions": [
            { "state": 0, "action": 0, "outcomes": [{ "next_state": 1, "probability": 1.0 }], "reward": 1.0, "terminal": true },
            { "state": 0, "action": 1, "outcomes": [{ "next_state": 0, "probability": 1.0 }], "reward": 0.0 },
            { "state": 1, "action": 0, "outcomes": [{ "next_state": 1, "probability": 1.0 }], "reward": 0.0, "terminal": true },
            { "state": 1, "action": 1, "outcomes": [{ "next_state": 1, "probability": 1.0 }], "reward": 0.0, "terminal": true }
        ],
        "features": [[1.0, 0.0], [0.0, 1.0]]
    }"#;

    let table = TransitionTable::from_json_str(json).unwrap();
    assert_eq!(table.feature_dim(), Some(2));
    assert_eq!(table.features(1), Some(&[0.0, 1.0][..]));

    let expected = two_state_table();
    for s in 0..2 {
        for a in 0..2 {
            assert_eq!(table.entry(s, a), expected.entry(s, a));
        }
    }
}

#[test]
fn test_json_file_write_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corridor.json");

    let table = corridor_table(5);
    table.write_json_file(&path).unwrap();
    let loaded = TransitionTable::from_json_file(&path).unwrap();

    assert_eq!(loaded, table);
}

#[test]
fn test_malformed_json_is_parse_error() {
    let result = TransitionTable::from_json_str("{ \"num_states\": 2 ");
    assert!(matches!(result, Err(WorldError::Parse(_))));
}

#[test]
fn test_stochastic_sampling_follows_probabilities() {
    let table = corridor_table(3);
    let entry = table.entry(0, 0);
    let mut rng = Xoshiro256StarStar::seed_from_u64(7);

    let n = 20_000;
    let moved = (0..n).filter(|_| entry.sample(&mut rng) == 1).count();
    let freq = moved as f32 / n as f32;

    assert!((freq - 0.7).abs() < 0.02, "expected ~0.7, got {}", freq);
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
fn test_world_rejects_zero_instances_and_zero_episode_limit() {
    let table = Arc::new(two_state_table());
    assert!(matches!(
        VectorizedWorld::new(table.clone(), 0, 10, 0),
        Err(WorldError::NoInstances)
    ));
    assert!(matches!(
        VectorizedWorld::new(table, 4, 0, 0),
        Err(WorldError::InvalidEpisodeLimit { max_ep_len: 0 })
    ));
}

#[test]
fn test_terminal_instance_is_reset_before_next_action() {
    let mut world = world(two_state_table(), 2, 100, 0);

    let batch = world.step(&[0, 1]).unwrap();
    assert_eq!(batch.next_states, vec![1, 0]);
    assert_eq!(batch.rewards, vec![1.0, 0.0]);
    assert_eq!(batch.terminals, vec![true, false]);
    assert_eq!(batch.dones(), vec![true, false]);
    assert_eq!(batch.finished.len(), 1);
    assert_eq!(batch.finished[0].instance, 0);
    assert_eq!(batch.finished[0].episode_return, 1.0);
    assert_eq!(batch.finished[0].length, 1);

    // Instance 0 is pending reset: it observes the start state
    assert_eq!(world.pending_resets(), &[true, false]);
    assert_eq!(world.observe(), vec![0, 0]);

    // Its next transition starts from the reset state, not from s1
    let batch = world.step(&[1, 0]).unwrap();
    assert_eq!(batch.next_states, vec![0, 1]);
    assert_eq!(batch.terminals, vec![false, true]);
    assert_eq!(world.episode_steps(), &[1, 2]);
}

#[test]
fn test_time_limit_truncates_without_terminal_flag() {
    let mut world = world(two_state_table(), 1, 3, 0);

    for _ in 0..2 {
        let batch = world.step(&[1]).unwrap();
        assert_eq!(batch.dones(), vec![false]);
    }
    let batch = world.step(&[1]).unwrap();
    assert_eq!(batch.terminals, vec![false]);
    assert_eq!(batch.truncations, vec![true]);
    assert!(batch.finished[0].truncated);
    assert_eq!(batch.finished[0].length, 3);

    let batch = world.step(&[1]).unwrap();
    assert_eq!(batch.truncations, vec![false]);
    assert_eq!(world.episode_steps(), &[1]);
}

#[test]
fn test_invalid_action_leaves_world_unchanged() {
    let mut world = world(two_state_table(), 3, 10, 0);
    world.step(&[1, 1, 1]).unwrap();
    let before = world.observe();

    let result = world.step(&[0, 2, 0]);
    assert!(matches!(
        result,
        Err(WorldError::InvalidAction { instance: 1, action: 2, num_actions: 2 })
    ));
    assert_eq!(world.observe(), before);
    assert_eq!(world.episode_steps(), &[1, 1, 1]);

    assert!(matches!(
        world.step(&[0]),
        Err(WorldError::ActionCountMismatch { expected: 3, got: 1 })
    ));
}

#[test]
fn test_reset_restores_start_state() {
    let mut world = world(corridor_table(4), 8, 50, 3);
    for _ in 0..5 {
        world.step(&[0; 8]).unwrap();
    }

    let states = world.reset();
    assert_eq!(states, vec![0; 8]);
    assert!(world.episode_steps().iter().all(|&s| s == 0));
    assert!(world.pending_resets().iter().all(|&p| !p));
}

/// Every episode ends within `max_ep_len` transitions, whatever the actions.
#[test]
fn test_episodes_always_end_within_limit() {
    let max_ep_len = 12;
    let n = 64;
    let mut world = world(corridor_table(6), n, max_ep_len, 11);
    let mut rng = Xoshiro256StarStar::seed_from_u64(5);
    let mut since_done = vec![0usize; n];

    for _ in 0..500 {
        let actions: Vec<u32> = (0..n).map(|_| rng.gen_range(0..2)).collect();
        let batch = world.step(&actions).unwrap();
        for (i, done) in batch.dones().into_iter().enumerate() {
            since_done[i] += 1;
            assert!(since_done[i] <= max_ep_len);
            if done {
                since_done[i] = 0;
            }
        }
    }
}

/// Stepping shard by shard gives the same trajectories as stepping the
/// whole batch, because each instance draws from its own stream.
#[test]
fn test_sharded_stepping_matches_full_batch() {
    let n = 37;
    let mut whole = world(corridor_table(5), n, 20, 99);
    let mut sharded = whole.clone();
    let mut rng = Xoshiro256StarStar::seed_from_u64(1);

    for _ in 0..60 {
        let actions: Vec<u32> = (0..n).map(|_| rng.gen_range(0..2)).collect();
        let expected = whole.step(&actions).unwrap();

        let mut next_states = Vec::new();
        let mut terminals = Vec::new();
        for mut shard in sharded.shards_mut(4) {
            let range = shard.offset()..shard.offset() + shard.len();
            let batch = shard.step(&actions[range]).unwrap();
            next_states.extend(batch.next_states);
            terminals.extend(batch.terminals);
        }

        assert_eq!(next_states, expected.next_states);
        assert_eq!(terminals, expected.terminals);
    }
    assert_eq!(sharded.observe(), whole.observe());
}

#[test]
fn test_shards_cover_all_instances() {
    let mut world = world(two_state_table(), 10, 5, 0);
    let shards = world.shards_mut(3);

    let sizes: Vec<usize> = shards.iter().map(|s| s.len()).collect();
    let offsets: Vec<usize> = shards.iter().map(|s| s.offset()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(offsets, vec![0, 4, 8]);

    // More shards than instances collapses to one instance per shard
    assert_eq!(world.shards_mut(32).len(), 10);
}

#[test]
fn test_instance_streams_are_independent() {
    let mut world = world(corridor_table(10), 2, 100, 4);
    let mut diverged = false;
    for _ in 0..30 {
        let batch = world.step(&[0, 0]).unwrap();
        if batch.next_states[0] != batch.next_states[1] {
            diverged = true;
        }
    }
    assert!(diverged, "instances with identical actions should not move in lockstep");
}
