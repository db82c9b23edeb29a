//! Training records and loggers.
//!
//! The trainer emits one [`TrainingRecord`] per iteration; loggers decide how
//! often and where to write it.
//!
//! - [`ConsoleLogger`]: aligned table on stdout every `print_freq` iterations
//! - [`CsvLogger`]: CSV file every `log_freq` iterations
//! - [`MultiLogger`]: fan-out to several loggers

pub mod logger;

pub use logger::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, TrainingRecord};
