//! Tuner specification types.
//!
//! A tuner spec is a YAML document with two required sections,
//! `algorithm_rules` and `randomization_rules`, and two optional ones:
//! `template` (where the training template lives and which keys the tuner
//! touches) and `trainer` (how the external training process is launched).

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::rules::{RuleError, RuleSet};

/// Top-level tuner specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerSpec {
    /// Successive halving parameters.
    pub algorithm_rules: AlgorithmRules,
    /// Category -> parameter -> rule, kept raw until [`TunerSpec::rule_set`].
    pub randomization_rules: Mapping,
    /// Template location and layout.
    #[serde(default)]
    pub template: TemplateConfig,
    /// External trainer invocation.
    #[serde(default)]
    pub trainer: TrainerConfig,
}

/// Parameters of the successive halving run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmRules {
    /// Seed for candidate sampling; also handed to every trainer invocation.
    pub random_seed: u64,
    /// Step budget of every candidate in the first generation.
    pub starting_steps: u64,
    /// Number of candidates generated up front.
    pub population_size: usize,
    /// Reserved. Budgets always double between generations.
    #[serde(default)]
    pub steps_increase: Option<u64>,
    /// Trainer invocations allowed to run at once during evaluation.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    1
}

/// Where the training template lives and how it is laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Path to the template YAML file.
    #[serde(default = "default_template_path")]
    pub path: PathBuf,
    /// Key paths into the template.
    #[serde(flatten)]
    pub layout: TemplateLayout,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            path: default_template_path(),
            layout: TemplateLayout::default(),
        }
    }
}

fn default_template_path() -> PathBuf {
    PathBuf::from("tuner_config/training_template/training_template_config.yaml")
}

/// Key paths locating the tunable section and the step budget field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLayout {
    /// Path to the section whose sub-sections are randomization categories.
    #[serde(default = "default_tunable_path")]
    pub tunable_path: Vec<String>,
    /// Full path to the numeric step budget field.
    #[serde(default = "default_step_budget_path")]
    pub step_budget_path: Vec<String>,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self {
            tunable_path: default_tunable_path(),
            step_budget_path: default_step_budget_path(),
        }
    }
}

fn default_tunable_path() -> Vec<String> {
    vec!["behaviors".to_string(), "SoccerTwos".to_string()]
}

fn default_step_budget_path() -> Vec<String> {
    vec![
        "behaviors".to_string(),
        "SoccerTwos".to_string(),
        "max_steps".to_string(),
    ]
}

impl TemplateLayout {
    /// Build a layout from dotted paths, e.g. `"behaviors.Agent"`.
    pub fn from_dotted(tunable: &str, step_budget: &str) -> Self {
        let split = |s: &str| -> Vec<String> { s.split('.').map(str::to_string).collect() };
        Self {
            tunable_path: split(tunable),
            step_budget_path: split(step_budget),
        }
    }

    /// Dotted form of the tunable path, for diagnostics.
    pub fn tunable_display(&self) -> String {
        self.tunable_path.join(".")
    }

    /// Dotted form of the step budget path, for diagnostics.
    pub fn step_budget_display(&self) -> String {
        self.step_budget_path.join(".")
    }

    /// Mutable access to the tunable section of a configuration.
    pub fn tunable_section_mut<'a>(&self, config: &'a mut Value) -> Option<&'a mut Mapping> {
        descend_mut(config, &self.tunable_path)?.as_mapping_mut()
    }

    /// The step budget field of a configuration, if present.
    pub fn step_budget<'a>(&self, config: &'a Value) -> Option<&'a Value> {
        self.step_budget_path
            .iter()
            .try_fold(config, |node, key| node.get(key.as_str()))
    }

    /// Set the step budget, inserting the field if its parent section exists.
    ///
    /// Returns `false` when the parent section is missing.
    pub fn set_step_budget(&self, config: &mut Value, budget: u64) -> bool {
        let Some((field, parent_path)) = self.step_budget_path.split_last() else {
            return false;
        };
        match descend_mut(config, parent_path).and_then(Value::as_mapping_mut) {
            Some(parent) => {
                parent.insert(Value::from(field.as_str()), Value::from(budget));
                true
            }
            None => false,
        }
    }
}

fn descend_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(root, |node, key| node.get_mut(key.as_str()))
}

/// How the external trainer is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Trainer executable.
    #[serde(default = "default_trainer_program")]
    pub program: String,
    /// Extra flags passed after the config path, run id and seed.
    #[serde(default = "default_trainer_args")]
    pub args: Vec<String>,
    /// Environment build passed as `--env=<path>`.
    #[serde(default)]
    pub env: Option<PathBuf>,
    /// Kill a training run that outlives this many seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: default_trainer_program(),
            args: default_trainer_args(),
            env: None,
            timeout_seconds: None,
        }
    }
}

fn default_trainer_program() -> String {
    "mlagents-learn".to_string()
}

fn default_trainer_args() -> Vec<String> {
    vec!["--no-graphics".to_string()]
}

/// Example tuner specification printed by `sha-tuner --example`.
pub const EXAMPLE_SPEC: &str = r#"algorithm_rules:
  random_seed: 42
  starting_steps: 50000
  population_size: 8
  steps_increase: 2
  max_parallel: 1

randomization_rules:
  hyperparameters:
    batch_size:
      type: doubling
      min: 512
      max: 4096
    learning_rate:
      type: log
      min: 0.00001
      max: 0.001
    beta:
      type: uniform
      min: 0.001
      max: 0.01
    learning_rate_schedule:
      type: discrete
      choices: [constant, linear]
    epsilon:
      type: default
  network_settings:
    num_layers:
      type: static
      value: 2
  reward_signals:
    extrinsic:
      gamma:
        type: uniform
        min: 0.95
        max: 0.995

template:
  path: tuner_config/training_template/training_template_config.yaml
  tunable_path: [behaviors, SoccerTwos]
  step_budget_path: [behaviors, SoccerTwos, max_steps]

trainer:
  program: mlagents-learn
  args: [--no-graphics]
  timeout_seconds: 86400
"#;

impl TunerSpec {
    /// Load a tuner spec from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        load_yaml(path.as_ref())
    }

    /// Parse a tuner spec from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SpecError> {
        serde_yaml::from_str(yaml).map_err(|source| SpecError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Parse the randomization rules into a typed rule set.
    pub fn rule_set(&self) -> Result<RuleSet, RuleError> {
        RuleSet::from_mapping(&self.randomization_rules)
    }

    /// Validate algorithm rules and template layout.
    pub fn validate(&self) -> Result<(), SpecError> {
        let rules = &self.algorithm_rules;
        if rules.population_size == 0 {
            return Err(SpecError::EmptyPopulation);
        }
        if rules.starting_steps == 0 {
            return Err(SpecError::InvalidStartingSteps);
        }
        if rules.max_parallel == 0 {
            return Err(SpecError::InvalidParallelism);
        }
        if self.template.layout.tunable_path.is_empty() {
            return Err(SpecError::EmptyLayoutPath("tunable_path"));
        }
        if self.template.layout.step_budget_path.is_empty() {
            return Err(SpecError::EmptyLayoutPath("step_budget_path"));
        }
        if self.trainer.program.trim().is_empty() {
            return Err(SpecError::EmptyTrainerProgram);
        }
        Ok(())
    }
}

/// Load the training template referenced by a spec.
pub fn load_template<P: AsRef<Path>>(path: P) -> Result<Value, SpecError> {
    load_yaml(path.as_ref())
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, SpecError> {
    let contents = fs::read_to_string(path).map_err(|source| SpecError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| SpecError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors loading or validating a tuner spec or template.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("File '{}' could not be read: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Population size must be at least 1")]
    EmptyPopulation,
    #[error("Starting steps must be positive")]
    InvalidStartingSteps,
    #[error("max_parallel must be at least 1")]
    InvalidParallelism,
    #[error("Template {0} must not be empty")]
    EmptyLayoutPath(&'static str),
    #[error("Trainer program must not be empty")]
    EmptyTrainerProgram,
}
