//! Top-level training error.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::collectors::CollectError;
use crate::environment::WorldError;
use crate::runners::ConfigError;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid world: {0}")]
    World(#[from] WorldError),

    #[error("trajectory collection failed after retry: {0}")]
    Collection(#[from] CollectError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("numerical instability in iteration {iteration}: all {skipped} minibatch updates had non-finite losses or gradients")]
    NumericalInstability { iteration: u64, skipped: usize },
}

pub type Result<T, E = TrainError> = std::result::Result<T, E>;
