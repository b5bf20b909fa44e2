//! SHA Tuner - Successive halving hyperparameter search for RL training jobs.
//!
//! This crate generates a population of randomly perturbed training
//! configurations from a template and a rule set, trains each for a small
//! step budget, scores the resulting training curves with a heuristic and
//! repeatedly keeps the better half at double the budget until one
//! configuration remains.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Tuner specification, randomization rules and metric types
//! - `tuning`: Rule resolution, scoring, population storage and the scheduler

pub mod schema;
pub mod tuning;

// Re-export commonly used types
pub use schema::{TunerSpec, load_template};
pub use tuning::{ShaScheduler, TunerError, TuningResult};
