//! Run checkpoints.
//!
//! A checkpoint captures everything needed to continue a run: policy
//! parameters, both optimizer states and the trainer's run state.
//!
//! ```rust,ignore
//! let checkpointer = Checkpointer::new(CheckpointerConfig::new("./checkpoints").with_keep_last_n(3))?;
//! checkpointer.save(env_steps, &policy, &actor_optim, &critic_optim, &run_state)?;
//!
//! let restored = Checkpointer::load::<B, _, _, _, RunState>(path, policy, actor_optim, critic_optim, &device)?;
//! ```

pub mod checkpointer;


pub use checkpointer::{
    CheckpointError, CheckpointInfo, Checkpointer, CheckpointerConfig, LoadedCheckpoint,
};
