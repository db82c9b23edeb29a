//! Directory checkpoints of a training run.
//!
//! Layout under the checkpoint root:
//!
//! ```text
//! checkpoint_0000040960/
//!     policy.bin          policy parameters
//!     actor_optim.bin     actor optimizer state
//!     critic_optim.bin    critic optimizer state
//!     run_state.json      counters, RNG state, timestamp
//! latest.json             name of the newest complete checkpoint
//! ```
//!
//! A checkpoint is written into a hidden temporary directory and renamed into
//! place, and `latest.json` is replaced the same way, so a crash never leaves
//! a half-written checkpoint behind the pointer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const TEMP_PREFIX: &str = ".tmp_";
const POLICY_FILE: &str = "policy";
const ACTOR_OPTIM_FILE: &str = "actor_optim";
const CRITIC_OPTIM_FILE: &str = "critic_optim";
const RUN_STATE_FILE: &str = "run_state.json";
const LATEST_FILE: &str = "latest.json";

/// Configuration for the checkpointer.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointerConfig {
    /// Root directory holding checkpoint directories.
    pub checkpoint_dir: PathBuf,
    /// Number of recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./checkpoints"),
            keep_last_n: 5,
        }
    }
}

impl CheckpointerConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),

    #[error("checkpoint recorder error: {0}")]
    Recorder(String),

    #[error("invalid checkpoint metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("no checkpoint found in {0}")]
    NoCheckpoints(PathBuf),

    #[error("{0} is not a checkpoint directory")]
    NotACheckpoint(PathBuf),
}

/// Location and env-step count of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub env_steps: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunStateFile<S> {
    env_steps: u64,
    created_at: String,
    state: S,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    checkpoint: String,
    env_steps: u64,
}

/// Everything restored from a checkpoint.
pub struct LoadedCheckpoint<M, OA, OC, S> {
    pub policy: M,
    pub actor_optim: OA,
    pub critic_optim: OC,
    pub state: S,
    pub env_steps: u64,
    pub path: PathBuf,
}

/// Writes, finds and loads checkpoints under one root directory.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    config: CheckpointerConfig,
    recorder: BinFileRecorder<FullPrecisionSettings>,
}

fn recorder_error(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Recorder(e.to_string())
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = path.with_file_name(format!("{}{}", TEMP_PREFIX, file_name));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn parse_steps(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()
}

impl Checkpointer {
    /// Create the root directory if needed.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(Self {
            config,
            recorder: BinFileRecorder::<FullPrecisionSettings>::new(),
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    /// Directory name of the checkpoint taken at `env_steps`.
    pub fn checkpoint_name(env_steps: u64) -> String {
        format!("{}{:010}", CHECKPOINT_PREFIX, env_steps)
    }

    /// Write a complete checkpoint and point `latest.json` at it.
    pub fn save<B, M, OA, OC, S>(
        &self,
        env_steps: u64,
        policy: &M,
        actor_optim: &OA,
        critic_optim: &OC,
        state: &S,
    ) -> Result<PathBuf, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        OA: Optimizer<M, B>,
        OC: Optimizer<M, B>,
        S: Serialize,
    {
        let name = Self::checkpoint_name(env_steps);
        let root = &self.config.checkpoint_dir;
        let final_dir = root.join(&name);
        let tmp_dir = root.join(format!("{}{}", TEMP_PREFIX, name));

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let written = self
            .write_files::<B, M, OA, OC, S>(
                &tmp_dir,
                env_steps,
                policy,
                actor_optim,
                critic_optim,
                state,
            )
            .and_then(|()| {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir)?;
                }
                fs::rename(&tmp_dir, &final_dir)?;
                Ok(())
            });
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(e);
        }

        let pointer = LatestPointer {
            checkpoint: name,
            env_steps,
        };
        write_atomic(&root.join(LATEST_FILE), &serde_json::to_vec_pretty(&pointer)?)?;

        if let Err(e) = self.prune() {
            tracing::warn!(error = %e, "failed to prune old checkpoints");
        }
        tracing::debug!(path = %final_dir.display(), env_steps, "checkpoint written");
        Ok(final_dir)
    }

    fn write_files<B, M, OA, OC, S>(
        &self,
        dir: &Path,
        env_steps: u64,
        policy: &M,
        actor_optim: &OA,
        critic_optim: &OC,
        state: &S,
    ) -> Result<(), CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        OA: Optimizer<M, B>,
        OC: Optimizer<M, B>,
        S: Serialize,
    {
        policy
            .clone()
            .save_file(dir.join(POLICY_FILE), &self.recorder)
            .map_err(recorder_error)?;
        Recorder::<B>::record(
            &self.recorder,
            actor_optim.to_record(),
            dir.join(ACTOR_OPTIM_FILE),
        )
        .map_err(recorder_error)?;
        Recorder::<B>::record(
            &self.recorder,
            critic_optim.to_record(),
            dir.join(CRITIC_OPTIM_FILE),
        )
        .map_err(recorder_error)?;

        let run_state = RunStateFile {
            env_steps,
            created_at: Utc::now().to_rfc3339(),
            state,
        };
        fs::write(dir.join(RUN_STATE_FILE), serde_json::to_vec_pretty(&run_state)?)?;
        Ok(())
    }

    /// Restore a checkpoint into the given templates.
    ///
    /// `path` is a checkpoint directory or a checkpoint root (the latest
    /// checkpoint under it is used).
    pub fn load<B, M, OA, OC, S>(
        path: &Path,
        policy: M,
        actor_optim: OA,
        critic_optim: OC,
        device: &B::Device,
    ) -> Result<LoadedCheckpoint<M, OA, OC, S>, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        OA: Optimizer<M, B>,
        OC: Optimizer<M, B>,
        S: DeserializeOwned,
    {
        let dir = if path.join(RUN_STATE_FILE).is_file() {
            path.to_path_buf()
        } else if path.is_dir() {
            let root = Checkpointer {
                config: CheckpointerConfig::new(path),
                recorder: BinFileRecorder::new(),
            };
            root.latest()?
                .ok_or_else(|| CheckpointError::NoCheckpoints(path.to_path_buf()))?
                .path
        } else {
            return Err(CheckpointError::NotACheckpoint(path.to_path_buf()));
        };

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let policy = policy
            .load_file(dir.join(POLICY_FILE), &recorder, device)
            .map_err(recorder_error)?;
        let actor_record: OA::Record =
            Recorder::<B>::load(&recorder, dir.join(ACTOR_OPTIM_FILE), device)
                .map_err(recorder_error)?;
        let critic_record: OC::Record =
            Recorder::<B>::load(&recorder, dir.join(CRITIC_OPTIM_FILE), device)
                .map_err(recorder_error)?;

        let file = fs::File::open(dir.join(RUN_STATE_FILE))?;
        let run_state: RunStateFile<S> = serde_json::from_reader(io::BufReader::new(file))?;

        Ok(LoadedCheckpoint {
            policy,
            actor_optim: actor_optim.load_record(actor_record),
            critic_optim: critic_optim.load_record(critic_record),
            state: run_state.state,
            env_steps: run_state.env_steps,
            path: dir,
        })
    }

    /// Newest complete checkpoint, following `latest.json` when it is valid.
    pub fn latest(&self) -> Result<Option<CheckpointInfo>, CheckpointError> {
        let root = &self.config.checkpoint_dir;
        if let Ok(bytes) = fs::read(root.join(LATEST_FILE)) {
            if let Ok(pointer) = serde_json::from_slice::<LatestPointer>(&bytes) {
                let path = root.join(&pointer.checkpoint);
                if path.join(RUN_STATE_FILE).is_file() {
                    return Ok(Some(CheckpointInfo {
                        path,
                        env_steps: pointer.env_steps,
                    }));
                }
            }
            tracing::warn!(root = %root.display(), "stale latest.json, scanning checkpoint directory");
        }
        Ok(self.list_checkpoints()?.pop())
    }

    /// Complete checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut checkpoints: Vec<CheckpointInfo> = fs::read_dir(&self.config.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let env_steps = parse_steps(path.file_name()?.to_str()?)?;
                path.join(RUN_STATE_FILE)
                    .is_file()
                    .then_some(CheckpointInfo { path, env_steps })
            })
            .collect();

        checkpoints.sort_by_key(|c| c.env_steps);
        Ok(checkpoints)
    }

    fn prune(&self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        let checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(self.config.keep_last_n);
        for old in &checkpoints[..excess] {
            fs::remove_dir_all(&old.path)?;
        }
        Ok(())
    }
}
