//! Schema module - Tuner specification, randomization rules and metric types.

mod metrics;
mod rules;
mod tuner;

pub use metrics::*;
pub use rules::*;
pub use tuner::*;
