//! Successive halving search over training configurations.
//!
//! # Overview
//!
//! The tuning system consists of:
//!
//! - **Randomization** (`randomize`): Seeded rule resolution against a template
//! - **Log Parsing** (`log_parser`): Metric lines from trainer output
//! - **Heuristic** (`heuristic`): Run history to a single fitness number
//! - **Population** (`population`): Candidate files, scores and promotion
//! - **Trainer** (`trainer`): The external training process seam
//! - **Workspace** (`workspace`): Per-run experiment directories
//! - **Search** (`search`): The successive halving scheduler
//!
//! # Example
//!
//! ```rust,no_run
//! use sha_tuner::schema::{TunerSpec, load_template};
//! use sha_tuner::tuning::{ExperimentWorkspace, PopulationStore, ProcessTrainer, ShaScheduler};
//!
//! let spec = TunerSpec::load("tuner_config.yaml")?;
//! let template = load_template(&spec.template.path)?;
//!
//! let workspace = ExperimentWorkspace::create_next("experiments")?;
//! let store = PopulationStore::create(&workspace.population_dir)?;
//! let trainer = ProcessTrainer::new(spec.trainer.clone()).with_results_dir(&workspace.results_dir);
//!
//! let mut scheduler = ShaScheduler::from_spec(&spec, template, store, trainer)?
//!     .with_run_prefix(workspace.run_prefix());
//! let result = scheduler.run_with_callback(|report| {
//!     println!("Generation {}: {} survivors", report.generation, report.survivors.len());
//! })?;
//!
//! println!("Best configuration found: {}", result.winner);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Rule Types
//!
//! - `static`: Literal value
//! - `uniform`: Continuous uniform in `[min, max]`
//! - `log`: Log-uniform in `[min, max]`
//! - `discrete`: One of `choices`
//! - `doubling`: Power of two between `min` and `max`
//! - `default`: Template value unchanged

mod heuristic;
mod log_parser;
mod population;
mod randomize;
mod search;
mod trainer;
mod workspace;

pub use heuristic::{HeuristicScorer, ScoreBreakdown};
pub use log_parser::LogParser;
pub use population::{CandidateId, PopulationEntry, PopulationStore, PromotionError, StoreError};
pub use randomize::{ConfigValidationError, RuleEngine, RuleRng, doubling_exponents};
pub use search::{
    CandidateOutcome, GenerationReport, PromotionFailure, SchedulerPhase, ShaScheduler,
    TunerError, TuningResult,
};
pub use trainer::{ProcessTrainer, Trainer, TrainerError, TrainingRequest};
pub use workspace::ExperimentWorkspace;
