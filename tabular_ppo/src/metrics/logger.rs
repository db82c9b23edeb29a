//! Training loggers.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::algorithms::LossStats;

/// Summary of one training iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingRecord {
    /// 1-based iteration index.
    pub iteration: u64,
    /// Environment steps consumed so far (all instances).
    pub env_steps: u64,
    /// Episodes completed during this iteration's rollout.
    pub episodes: usize,
    /// `None` when no episode finished during the rollout.
    pub mean_episode_return: Option<f32>,
    pub mean_episode_length: Option<f32>,
    /// Mean over the applied minibatch updates.
    pub losses: LossStats,
    /// Minibatches skipped because of a non-finite loss.
    pub skipped_minibatches: usize,
}

fn fmt_opt(value: Option<f32>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

/// Logging backend.
pub trait MetricsLogger: Send {
    fn log(&mut self, record: &TrainingRecord);

    fn flush(&mut self);
}

/// Console logger with aligned columns.
pub struct ConsoleLogger {
    print_freq: u64,
    start_time: Instant,
    show_header: bool,
}

impl ConsoleLogger {
    /// Print every `print_freq` iterations.
    pub fn new(print_freq: u64) -> Self {
        Self {
            print_freq: print_freq.max(1),
            start_time: Instant::now(),
            show_header: true,
        }
    }

    pub fn should_print(&self, iteration: u64) -> bool {
        iteration % self.print_freq == 0
    }

    fn print_header(&self) {
        println!(
            "{:>8} {:>12} {:>8} {:>10} {:>8} {:>10} {:>10} {:>8} {:>10}",
            "Iter", "EnvSteps", "Episodes", "Return", "Length", "Policy", "Value", "Entropy", "SPS"
        );
        println!("{}", "-".repeat(92));
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, record: &TrainingRecord) {
        if !self.should_print(record.iteration) {
            return;
        }
        if self.show_header {
            self.print_header();
            self.show_header = false;
        }

        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sps = if elapsed > 0.0 {
            record.env_steps as f32 / elapsed
        } else {
            0.0
        };

        println!(
            "{:>8} {:>12} {:>8} {:>10} {:>8} {:>10.4} {:>10.4} {:>8.4} {:>10.0}",
            record.iteration,
            record.env_steps,
            record.episodes,
            fmt_opt(record.mean_episode_return, 3),
            fmt_opt(record.mean_episode_length, 1),
            record.losses.policy_loss,
            record.losses.value_loss,
            record.losses.entropy,
            sps
        );
    }

    fn flush(&mut self) {
        let _ = io::stdout().flush();
    }
}

pub const CSV_HEADER: &str = "iteration,env_steps,episodes,mean_episode_return,mean_episode_length,\
policy_loss,value_loss,entropy,total_loss,approx_kl,clip_fraction,skipped_minibatches,elapsed_secs";

/// CSV file logger.
pub struct CsvLogger {
    writer: BufWriter<File>,
    log_freq: u64,
    start_time: Instant,
}

impl CsvLogger {
    /// Create (truncate) `path` and write the header.
    pub fn new(path: impl AsRef<Path>, log_freq: u64) -> io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", CSV_HEADER)?;

        Ok(Self {
            writer,
            log_freq: log_freq.max(1),
            start_time: Instant::now(),
        })
    }

    fn write_record(&mut self, record: &TrainingRecord) -> io::Result<()> {
        let losses = &record.losses;
        writeln!(
            self.writer,
            "{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.4},{},{:.2}",
            record.iteration,
            record.env_steps,
            record.episodes,
            fmt_opt(record.mean_episode_return, 4),
            fmt_opt(record.mean_episode_length, 2),
            losses.policy_loss,
            losses.value_loss,
            losses.entropy,
            losses.total_loss,
            losses.approx_kl,
            losses.clip_fraction,
            record.skipped_minibatches,
            self.start_time.elapsed().as_secs_f32()
        )
    }
}

impl MetricsLogger for CsvLogger {
    fn log(&mut self, record: &TrainingRecord) {
        if record.iteration % self.log_freq != 0 {
            return;
        }
        if let Err(e) = self.write_record(record) {
            tracing::warn!(error = %e, "failed to write training record");
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Writes to every contained logger.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, record: &TrainingRecord) {
        for logger in &mut self.loggers {
            logger.log(record);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}
