//! Runner test suite.
//!
//! - `config_tests`: defaults, derived sizes and validation
//! - `trainer_tests`: the training loop end to end on small tables

mod trainer_tests;
