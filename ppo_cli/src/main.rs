//! Train a PPO agent on a tabular world described by a JSON transition table.
//!
//! ```text
//! tabular-ppo --table maze.json --config ppo.json --workers 8 --log-csv train.csv
//! tabular-ppo --table maze.json --resume ./checkpoints
//! tabular-ppo --table maze.json --actions 3
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, ValueEnum};
use tracing::info;

use tabular_ppo::policy::{ActorCritic, Policy, PolicyFactory};
use tabular_ppo::{
    Checkpointer, CheckpointerConfig, ConsoleLogger, CsvLogger, DeepPolicyConfig, MultiLogger,
    PPOTrainer, PPOTrainingParameters, ParallelCollector, SerialCollector, StateEncoding,
    TabularPolicyConfig, TrainingSummary, TrajectoryCollector, TransitionTable, VectorizedWorld,
};

#[cfg(not(feature = "wgpu"))]
type Backend = Autodiff<burn::backend::NdArray<f32>>;
#[cfg(feature = "wgpu")]
type Backend = Autodiff<burn::backend::Wgpu>;

type InnerBackend = <Backend as AutodiffBackend>::InnerBackend;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum PolicyKind {
    /// One logit row and one value per state.
    Tabular,
    /// MLP actor and critic over a state encoding.
    Deep,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum EncodingArg {
    OneHot,
    Binary,
    /// Feature vectors stored in the transition table.
    Table,
}

impl From<EncodingArg> for StateEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::OneHot => StateEncoding::OneHot,
            EncodingArg::Binary => StateEncoding::Binary,
            EncodingArg::Table => StateEncoding::Table,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tabular-ppo", about = "PPO training on vectorized tabular worlds")]
struct Args {
    /// Transition table JSON file.
    #[arg(long)]
    table: PathBuf,

    /// Training parameters as JSON; missing fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PolicyKind::Tabular)]
    policy: PolicyKind,

    /// Actions the policy chooses from (default: all actions of the table).
    #[arg(long)]
    actions: Option<usize>,

    /// Hidden layer widths of the deep policy.
    #[arg(long, value_delimiter = ',', default_values_t = vec![64, 64])]
    hidden: Vec<usize>,

    #[arg(long, value_enum, default_value_t = EncodingArg::OneHot)]
    encoding: EncodingArg,

    /// Share the hidden trunk between actor and critic (deep policy only).
    #[arg(long)]
    shared_trunk: bool,

    /// Collector threads; 1 collects on the calling thread.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value = "./checkpoints")]
    checkpoint_dir: PathBuf,

    /// Checkpoints to keep (0 = all).
    #[arg(long, default_value_t = 5)]
    keep_checkpoints: usize,

    /// Also write training records to this CSV file.
    #[arg(long)]
    log_csv: Option<PathBuf>,

    /// Checkpoint directory or checkpoint root to resume from.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Override `num_worlds`.
    #[arg(long)]
    num_worlds: Option<usize>,

    /// Override `max_training_timesteps`.
    #[arg(long)]
    max_training_timesteps: Option<usize>,

    /// Override `random_seed` (0 = random).
    #[arg(long)]
    seed: Option<u64>,
}

fn load_params(args: &Args) -> Result<PPOTrainingParameters> {
    let mut params = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PPOTrainingParameters::default(),
    };

    if let Some(n) = args.num_worlds {
        params.num_worlds = n;
    }
    if let Some(steps) = args.max_training_timesteps {
        params.max_training_timesteps = steps;
    }
    if let Some(seed) = args.seed {
        params.random_seed = seed;
    }
    Ok(params.build()?)
}

fn train<P, C>(
    args: &Args,
    params: &PPOTrainingParameters,
    seed: u64,
    world: &mut VectorizedWorld,
    policy: P,
    collector: C,
) -> Result<TrainingSummary>
where
    P: ActorCritic<Backend>,
    P::InnerModule: Policy<InnerBackend>,
    C: TrajectoryCollector,
{
    let checkpointer = Checkpointer::new(
        CheckpointerConfig::new(&args.checkpoint_dir).with_keep_last_n(args.keep_checkpoints),
    )?;

    let mut logger = MultiLogger::new().add(ConsoleLogger::new(params.print_freq as u64));
    if let Some(path) = &args.log_csv {
        let csv = CsvLogger::new(path, params.log_freq as u64)
            .with_context(|| format!("creating log file {}", path.display()))?;
        logger = logger.add(csv);
    }

    let mut trainer = PPOTrainer::<Backend, _, _, _>::new(
        params.clone(),
        policy,
        collector,
        params.create_optimizer::<Backend, P>(),
        params.create_optimizer::<Backend, P>(),
        seed,
    )?
    .with_checkpointer(checkpointer)
    .with_logger(Box::new(logger));

    if let Some(path) = &args.resume {
        trainer = trainer
            .resume_from(path)
            .with_context(|| format!("resuming from {}", path.display()))?;
    }

    Ok(trainer.train(world)?)
}

fn train_with_collector<P>(
    args: &Args,
    params: &PPOTrainingParameters,
    seed: u64,
    world: &mut VectorizedWorld,
    policy: P,
) -> Result<TrainingSummary>
where
    P: ActorCritic<Backend>,
    P::InnerModule: Policy<InnerBackend>,
{
    if args.workers > 1 {
        let collector = ParallelCollector::new(args.workers)?;
        train(args, params, seed, world, policy, collector)
    } else {
        train(args, params, seed, world, policy, SerialCollector::new())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let params = load_params(&args)?;
    let seed = params.resolved_seed();

    let table = Arc::new(
        TransitionTable::from_json_file(&args.table)
            .with_context(|| format!("loading transition table {}", args.table.display()))?,
    );
    info!(
        states = table.num_states(),
        actions = table.num_actions(),
        num_worlds = params.num_worlds,
        horizon = params.horizon(),
        seed,
        "loaded transition table"
    );

    let mut world = VectorizedWorld::new(table.clone(), params.num_worlds, params.max_ep_len, seed)?;
    let device = Default::default();

    let n_actions = args.actions.unwrap_or(table.num_actions());
    let summary = match args.policy {
        PolicyKind::Tabular => {
            let config = TabularPolicyConfig::new(table.num_states(), n_actions);
            let policy = PolicyFactory::<Backend>::build(&config, &table, &device)?;
            train_with_collector(&args, &params, seed, &mut world, policy)?
        }
        PolicyKind::Deep => {
            let config = DeepPolicyConfig::new(n_actions)
                .with_hidden_sizes(args.hidden.clone())
                .with_encoding(args.encoding.into())
                .with_shared_trunk(args.shared_trunk);
            let policy = PolicyFactory::<Backend>::build(&config, &table, &device)?;
            train_with_collector(&args, &params, seed, &mut world, policy)?
        }
    };

    info!(
        iterations = summary.iterations,
        total_steps = summary.total_steps,
        reason = ?summary.stop_reason,
        "done"
    );
    if let Some(path) = summary.final_checkpoint {
        info!(path = %path.display(), "final checkpoint");
    }
    Ok(())
}
