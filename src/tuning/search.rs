//! Successive halving search over training configurations.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use serde_yaml::Value;

use crate::schema::{AlgorithmRules, RuleError, SpecError, TemplateLayout, TunerSpec};

use super::heuristic::{HeuristicScorer, ScoreBreakdown};
use super::log_parser::LogParser;
use super::population::{CandidateId, PopulationStore, StoreError};
use super::randomize::{ConfigValidationError, RuleEngine, RuleRng};
use super::trainer::{Trainer, TrainingRequest};

/// Where the scheduler is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerPhase {
    /// Initial population not yet written.
    Building,
    /// Training and scoring generation `g`.
    Evaluating(usize),
    /// Sorting and halving generation `g`.
    Ranking(usize),
    /// Doubling survivor budgets after generation `g`.
    Promoting(usize),
    /// One candidate left.
    Terminal,
}

/// Result of training and scoring one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub id: CandidateId,
    /// Step budget the candidate trained with, if it could be read.
    pub step_budget: Option<u64>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Number of metric lines found in the training log.
    pub samples: usize,
    /// Trainer failure, if any. Failed candidates score `-inf`.
    pub error: Option<String>,
}

/// A survivor whose budget could not be doubled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionFailure {
    pub candidate: CandidateId,
    pub reason: String,
}

/// Summary of one generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub generation: usize,
    /// Budget every candidate of this generation trained with, barring
    /// earlier promotion failures.
    pub step_budget: u64,
    /// Outcomes, best first.
    pub ranked: Vec<CandidateOutcome>,
    pub survivors: Vec<CandidateId>,
    pub eliminated: Vec<CandidateId>,
    pub promotion_failures: Vec<PromotionFailure>,
    pub elapsed_seconds: f64,
}

/// Final outcome of a tuning run.
#[derive(Debug, Clone, Serialize)]
pub struct TuningResult {
    pub winner: CandidateId,
    pub config_path: PathBuf,
    /// Winner's step budget after the last promotion.
    pub step_budget: Option<u64>,
    pub generations: usize,
    pub reports: Vec<GenerationReport>,
}

impl TuningResult {
    /// Write the result as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Drives successive halving: build, then evaluate, rank, halve and promote
/// until one candidate remains.
pub struct ShaScheduler<T: Trainer> {
    rules: AlgorithmRules,
    engine: RuleEngine,
    store: PopulationStore,
    trainer: T,
    parser: LogParser,
    scorer: HeuristicScorer,
    pool: Option<rayon::ThreadPool>,
    run_prefix: String,
    phase: SchedulerPhase,
    generation: usize,
    step_budget: u64,
    reports: Vec<GenerationReport>,
}

impl<T: Trainer> ShaScheduler<T> {
    /// Create a scheduler over an empty population store.
    pub fn new(
        rules: AlgorithmRules,
        engine: RuleEngine,
        store: PopulationStore,
        trainer: T,
    ) -> Result<Self, TunerError> {
        if rules.population_size == 0 {
            return Err(TunerError::EmptyPopulation);
        }

        let pool = if rules.max_parallel > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(rules.max_parallel)
                    .thread_name(|i| format!("sha-eval-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            step_budget: rules.starting_steps,
            rules,
            engine,
            store,
            trainer,
            parser: LogParser::new(),
            scorer: HeuristicScorer::new(),
            pool,
            run_prefix: "tuning".to_string(),
            phase: SchedulerPhase::Building,
            generation: 0,
            reports: Vec::new(),
        })
    }

    /// Create a scheduler from a validated spec and a loaded template.
    pub fn from_spec(
        spec: &TunerSpec,
        template: Value,
        store: PopulationStore,
        trainer: T,
    ) -> Result<Self, TunerError> {
        spec.validate()?;
        let rules = spec.rule_set()?;
        let engine = RuleEngine::new(template, rules, spec.template.layout.clone())?;
        Self::new(spec.algorithm_rules.clone(), engine, store, trainer)
    }

    /// Prefix for trainer run ids (`{prefix}_gen{g}_{candidate}`).
    pub fn with_run_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.run_prefix = prefix.into();
        self
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Generation that will be evaluated next.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn store(&self) -> &PopulationStore {
        &self.store
    }

    fn layout(&self) -> &TemplateLayout {
        self.engine.layout()
    }

    /// Generate and persist the initial population.
    ///
    /// Every configuration is resolved before any file is written, so a rule
    /// error leaves the population directory untouched.
    pub fn build(&mut self) -> Result<(), TunerError> {
        if self.phase != SchedulerPhase::Building {
            return Ok(());
        }

        let mut rng = RuleRng::new(self.rules.random_seed);
        let configs = self.engine.resolve_population(
            &mut rng,
            self.rules.population_size,
            self.rules.starting_steps,
        )?;
        for config in &configs {
            self.store.insert(config)?;
        }

        log::info!(
            "Built population of {} candidates in {}",
            self.store.len(),
            self.store.dir().display()
        );

        self.generation = 1;
        self.store.advance_generation(self.generation);
        self.phase = if self.store.len() <= 1 {
            SchedulerPhase::Terminal
        } else {
            SchedulerPhase::Evaluating(self.generation)
        };
        Ok(())
    }

    fn request(&self, candidate: CandidateId) -> TrainingRequest {
        TrainingRequest {
            candidate,
            generation: self.generation,
            config_path: self.store.config_path(candidate),
            run_id: format!("{}_gen{}_{}", self.run_prefix, self.generation, candidate),
            seed: self.rules.random_seed,
        }
    }

    fn evaluate_one(&self, request: &TrainingRequest) -> CandidateOutcome {
        let step_budget = self
            .store
            .read_step_budget(request.candidate, self.layout())
            .ok();

        match self.trainer.train(request) {
            Ok(output) => {
                let history = self.parser.parse(&output);
                let breakdown = self.scorer.breakdown(&history);
                let score = breakdown.total();
                log::info!(
                    "{} scored {:.4} over {} samples",
                    request.candidate,
                    score,
                    history.len()
                );
                CandidateOutcome {
                    id: request.candidate,
                    step_budget,
                    score,
                    breakdown,
                    samples: history.len(),
                    error: None,
                }
            }
            Err(e) => {
                log::warn!("Training {} failed: {e}", request.run_id);
                CandidateOutcome {
                    id: request.candidate,
                    step_budget,
                    score: f64::NEG_INFINITY,
                    breakdown: ScoreBreakdown::default(),
                    samples: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Train and score every live candidate. Returns outcomes in store order.
    fn evaluate_population(&self) -> Vec<CandidateOutcome> {
        let requests: Vec<TrainingRequest> =
            self.store.ids().into_iter().map(|id| self.request(id)).collect();

        match &self.pool {
            Some(pool) => pool.install(|| {
                requests
                    .par_iter()
                    .map(|request| self.evaluate_one(request))
                    .collect::<Vec<_>>()
            }),
            None => requests
                .iter()
                .map(|request| self.evaluate_one(request))
                .collect(),
        }
    }

    /// Run one generation. Returns `None` once a single candidate remains.
    pub fn step_generation(&mut self) -> Result<Option<GenerationReport>, TunerError> {
        self.build()?;
        if self.store.len() <= 1 {
            self.phase = SchedulerPhase::Terminal;
            return Ok(None);
        }

        let start = Instant::now();
        let generation = self.generation;
        log::info!(
            "Generation {generation}: evaluating {} candidates at {} steps",
            self.store.len(),
            self.step_budget
        );

        self.phase = SchedulerPhase::Evaluating(generation);
        let outcomes = self.evaluate_population();

        // Scores land only after every candidate of the generation finished.
        let scores: Vec<(CandidateId, f64)> = outcomes.iter().map(|o| (o.id, o.score)).collect();
        self.store.record_scores(&scores);

        self.phase = SchedulerPhase::Ranking(generation);
        self.store.rank();
        let ranked: Vec<CandidateOutcome> = self
            .store
            .entries()
            .iter()
            .filter_map(|entry| {
                outcomes.iter().find(|o| o.id == entry.id).map(|o| CandidateOutcome {
                    score: entry.score,
                    ..o.clone()
                })
            })
            .collect();
        let eliminated: Vec<CandidateId> = self.store.halve().iter().map(|e| e.id).collect();
        let survivors = self.store.ids();

        self.phase = SchedulerPhase::Promoting(generation);
        let mut promotion_failures = Vec::new();
        for &id in &survivors {
            match self.store.promote(id, self.engine.layout()) {
                Ok(budget) => log::debug!("{id} promoted to {budget} steps"),
                Err(e) => {
                    log::warn!("Failed to promote {id}: {e}");
                    promotion_failures.push(PromotionFailure {
                        candidate: id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = GenerationReport {
            generation,
            step_budget: self.step_budget,
            ranked,
            survivors,
            eliminated,
            promotion_failures,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };

        self.generation += 1;
        self.step_budget = self.step_budget.saturating_mul(2);
        self.store.advance_generation(self.generation);
        self.phase = if self.store.len() <= 1 {
            SchedulerPhase::Terminal
        } else {
            SchedulerPhase::Evaluating(self.generation)
        };

        Ok(Some(report))
    }

    /// Run to completion, calling `callback` after every generation.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<TuningResult, TunerError>
    where
        F: FnMut(&GenerationReport),
    {
        while let Some(report) = self.step_generation()? {
            callback(&report);
            self.reports.push(report);
        }

        let winner = self.store.winner().ok_or(TunerError::EmptyPopulation)?.id;
        let step_budget = self.store.read_step_budget(winner, self.layout()).ok();
        log::info!(
            "Best configuration found: {winner} after {} generations",
            self.reports.len()
        );

        Ok(TuningResult {
            winner,
            config_path: self.store.config_path(winner),
            step_budget,
            generations: self.reports.len(),
            reports: self.reports.clone(),
        })
    }

    /// Run to completion.
    pub fn run(&mut self) -> Result<TuningResult, TunerError> {
        self.run_with_callback(|_| {})
    }
}

/// Errors that stop a tuning run.
#[derive(Debug, thiserror::Error)]
pub enum TunerError {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to build evaluation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Population is empty")]
    EmptyPopulation,
}
