use burn::tensor::backend::Backend;

use super::{truncation_bootstrap, CollectError, TrajectoryCollector};
use crate::buffers::RolloutBuffer;
use crate::environment::VectorizedWorld;
use crate::policy::Policy;

/// Single-threaded collector over the whole batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCollector;

impl SerialCollector {
    pub fn new() -> Self {
        Self
    }
}

impl TrajectoryCollector for SerialCollector {
    fn collect<B: Backend, P: Policy<B>>(
        &self,
        world: &mut VectorizedWorld,
        policy: &P,
        horizon: usize,
    ) -> Result<RolloutBuffer, CollectError> {
        if horizon == 0 {
            return Err(CollectError::ZeroHorizon);
        }

        let mut buffer = RolloutBuffer::new(world.num_worlds(), horizon);
        for _ in 0..horizon {
            let states = world.observe();
            let act = policy.act(&states, world.action_rngs_mut());
            let step = world.step(&act.actions)?;
            let bootstrap = truncation_bootstrap(policy, &step);
            buffer.push_step(&states, &act, &step, &bootstrap);
        }
        buffer.set_last_values(policy.values(&world.observe()));

        Ok(buffer)
    }
}
