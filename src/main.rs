//! SHA Tuner CLI - Run a successive halving search from a YAML tuner spec.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use sha_tuner::{
    schema::{EXAMPLE_SPEC, TunerSpec, load_template},
    tuning::{ExperimentWorkspace, PopulationStore, ProcessTrainer, ShaScheduler},
};

#[derive(Parser)]
#[command(
    name = "sha-tuner",
    version,
    about = "Successive halving hyperparameter search for RL training jobs"
)]
struct Cli {
    /// Path to the tuner specification (YAML)
    #[arg(required_unless_present = "example")]
    spec: Option<PathBuf>,
    /// Print an example tuner specification and exit
    #[arg(long)]
    example: bool,
    /// Directory holding the experiment_N workspaces
    #[arg(long, default_value = "experiments")]
    experiments_dir: PathBuf,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if cli.example {
        print!("{EXAMPLE_SPEC}");
        return;
    }

    let Some(spec_path) = cli.spec else {
        eprintln!("Error: a tuner spec path is required");
        std::process::exit(1);
    };

    // Load configuration
    let spec = TunerSpec::load(&spec_path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    spec.validate().unwrap_or_else(|e| {
        eprintln!("Error: invalid tuner spec: {}", e);
        std::process::exit(1);
    });

    let template = load_template(&spec.template.path).unwrap_or_else(|e| {
        eprintln!("Error loading training template: {}", e);
        std::process::exit(1);
    });

    let workspace = ExperimentWorkspace::create_next(&cli.experiments_dir).unwrap_or_else(|e| {
        eprintln!("Error creating experiment directory: {}", e);
        std::process::exit(1);
    });

    let store = PopulationStore::create(&workspace.population_dir).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let trainer =
        ProcessTrainer::new(spec.trainer.clone()).with_results_dir(&workspace.results_dir);

    let mut scheduler = ShaScheduler::from_spec(&spec, template, store, trainer)
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        })
        .with_run_prefix(workspace.run_prefix());

    let rules = &spec.algorithm_rules;
    println!("SHA Tuner");
    println!("=========");
    println!("Experiment: {}", workspace.dir.display());
    println!("Population: {}", rules.population_size);
    println!("Starting steps: {}", rules.starting_steps);
    println!("Seed: {}", rules.random_seed);
    println!("Parallel runs: {}", rules.max_parallel);
    println!();

    let start = Instant::now();
    let result = scheduler
        .run_with_callback(|report| {
            let best = report.ranked.first();
            println!(
                "Generation {}: {} candidates at {} steps, best {} ({:.4}), {} survive",
                report.generation,
                report.ranked.len(),
                report.step_budget,
                best.map(|o| o.id.to_string()).unwrap_or_default(),
                best.map(|o| o.score).unwrap_or(f64::NAN),
                report.survivors.len()
            );
            for failure in &report.promotion_failures {
                println!("  promotion failed for {}: {}", failure.candidate, failure.reason);
            }
        })
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    let summary_path = workspace.summary_path();
    if let Err(e) = result.save(&summary_path) {
        eprintln!("Warning: failed to write {}: {}", summary_path.display(), e);
    }

    println!();
    println!(
        "Finished {} generations in {:.1}s",
        result.generations,
        start.elapsed().as_secs_f64()
    );
    println!("Best configuration found: {}", result.winner.file_name());
    println!("  {}", result.config_path.display());
}
