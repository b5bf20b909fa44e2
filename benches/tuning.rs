//! Benchmarks for scoring and candidate generation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_yaml::{Mapping, Value};

use sha_tuner::{
    schema::{MetricSample, RuleSet, TemplateLayout},
    tuning::{HeuristicScorer, LogParser, RuleEngine, RuleRng},
};

const TEMPLATE: &str = r#"
behaviors:
  SoccerTwos:
    trainer_type: poca
    max_steps: 50000
    hyperparameters:
      batch_size: 2048
      buffer_size: 20480
      learning_rate: 0.0003
      beta: 0.005
      epsilon: 0.2
      learning_rate_schedule: constant
    network_settings:
      hidden_units: 512
      num_layers: 2
    reward_signals:
      extrinsic:
        gamma: 0.99
        strength: 1.0
"#;

const RULES: &str = r#"
hyperparameters:
  batch_size: { type: doubling, min: 512, max: 4096 }
  buffer_size: { type: doubling, min: 10240, max: 102400 }
  learning_rate: { type: log, min: 0.00001, max: 0.001 }
  beta: { type: uniform, min: 0.001, max: 0.01 }
  epsilon: { type: default }
  learning_rate_schedule: { type: discrete, choices: [constant, linear] }
network_settings:
  hidden_units: { type: doubling, min: 128, max: 1024 }
  num_layers: { type: discrete, choices: [1, 2, 3] }
reward_signals:
  extrinsic:
    gamma: { type: uniform, min: 0.95, max: 0.995 }
"#;

fn history(len: usize) -> Vec<MetricSample> {
    (0..len)
        .map(|i| MetricSample {
            step: (i as u64 + 1) * 10_000,
            elapsed_time: i as f64 * 30.0,
            mean_reward: (i as f64 * 0.1).sin(),
            mean_group_reward: (i as f64 * 0.05).cos() - 0.5,
        })
        .collect()
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("heuristic_score");
    let scorer = HeuristicScorer::new();

    for len in [10, 100, 1000, 10000] {
        let history = history(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &history, |b, history| {
            b.iter(|| scorer.score(black_box(history)));
        });
    }

    group.finish();
}

fn bench_parse_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_log");
    let parser = LogParser::new();

    for lines in [100, 1000] {
        let log: String = (0..lines)
            .map(|i| {
                if i % 4 == 0 {
                    format!(
                        "[INFO] SoccerTwos. Step: {}. Time Elapsed: {:.3} s. Mean Reward: {:.3}. Mean Group Reward: {:.3}. Training.\n",
                        i * 1000,
                        i as f64 * 1.5,
                        (i as f64 * 0.01).sin(),
                        -0.25
                    )
                } else {
                    "[INFO] Exported results/SoccerTwos/checkpoint.onnx\n".to_string()
                }
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(lines), &log, |b, log| {
            b.iter(|| parser.parse(black_box(log)));
        });
    }

    group.finish();
}

fn bench_resolve_population(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_population");

    let template: Value = serde_yaml::from_str(TEMPLATE).unwrap();
    let rules: Mapping = serde_yaml::from_str(RULES).unwrap();
    let engine = RuleEngine::new(
        template,
        RuleSet::from_mapping(&rules).unwrap(),
        TemplateLayout::default(),
    )
    .unwrap();

    for size in [8, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut rng = RuleRng::new(42);
                engine
                    .resolve_population(&mut rng, black_box(size), 50_000)
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_score, bench_parse_log, bench_resolve_population);
criterion_main!(benches);
