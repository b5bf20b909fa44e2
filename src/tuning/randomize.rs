//! Rule-driven randomization of training configurations.
//!
//! Provides the seeded sampler and the engine that resolves a rule set
//! against the training template.

use rand::prelude::*;
use serde_yaml::{Mapping, Value};

use crate::schema::{RandomizationRule, RuleNode, RuleSet, TemplateLayout};

/// Random number generator wrapper for rule sampling.
///
/// Every draw for a population comes from one of these, so a population is a
/// pure function of (template, rules, seed).
pub struct RuleRng {
    rng: StdRng,
}

impl RuleRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Resolve one rule to a value. `None` means keep the template value.
    pub fn sample(&mut self, rule: &RandomizationRule) -> Option<Value> {
        match rule {
            RandomizationRule::Static { value } => Some(value.clone()),
            RandomizationRule::Uniform { min, max } => Some(Value::from(self.uniform(*min, *max))),
            RandomizationRule::Log { min, max } => Some(Value::from(self.log_uniform(*min, *max))),
            RandomizationRule::Discrete { choices } => choices.choose(&mut self.rng).cloned(),
            RandomizationRule::Doubling { min, max } => Some(self.doubling(*min, *max)),
            RandomizationRule::Default => None,
        }
    }

    /// Uniform random in `[min, max]`.
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        self.rng.gen_range(min..=max)
    }

    /// Log-uniform random in `[min, max]`.
    pub fn log_uniform(&mut self, min: f64, max: f64) -> f64 {
        let exponent = self.uniform(min.log10(), max.log10());
        10f64.powf(exponent).clamp(min, max)
    }

    /// Power of two with exponent drawn from `[floor(log2 min), floor(log2 max)]`.
    pub fn doubling(&mut self, min: f64, max: f64) -> Value {
        let (lo, hi) = doubling_exponents(min, max);
        let exponent = self.rng.gen_range(lo..=hi);
        match u32::try_from(exponent).ok().and_then(|e| 2u64.checked_pow(e)) {
            Some(power) => Value::from(power),
            None => Value::from(2f64.powi(exponent)),
        }
    }
}

/// Exponent range of a `doubling` rule.
pub fn doubling_exponents(min: f64, max: f64) -> (i32, i32) {
    (min.log2().floor() as i32, max.log2().floor() as i32)
}

/// Resolves a rule set against a template.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    template: Value,
    rules: RuleSet,
    layout: TemplateLayout,
}

impl RuleEngine {
    /// Create an engine, checking that the template has the tunable section.
    pub fn new(
        template: Value,
        rules: RuleSet,
        layout: TemplateLayout,
    ) -> Result<Self, ConfigValidationError> {
        let mut scratch = template.clone();
        if layout.tunable_section_mut(&mut scratch).is_none() {
            return Err(ConfigValidationError::MissingSection {
                path: layout.tunable_display(),
            });
        }
        Ok(Self {
            template,
            rules,
            layout,
        })
    }

    /// The unmodified template.
    pub fn template(&self) -> &Value {
        &self.template
    }

    /// Template layout in use.
    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    /// Produce one candidate configuration with the given step budget.
    pub fn resolve(
        &self,
        rng: &mut RuleRng,
        step_budget: u64,
    ) -> Result<Value, ConfigValidationError> {
        let mut config = self.template.clone();

        let section = self.layout.tunable_section_mut(&mut config).ok_or_else(|| {
            ConfigValidationError::MissingSection {
                path: self.layout.tunable_display(),
            }
        })?;

        for (category, params) in self.rules.categories() {
            let target = section.get_mut(category).ok_or_else(|| {
                ConfigValidationError::UnknownCategory {
                    category: category.to_string(),
                }
            })?;
            let target = target
                .as_mapping_mut()
                .ok_or_else(|| ConfigValidationError::NotASection {
                    path: category.to_string(),
                })?;
            apply_entries(target, params, category, rng)?;
        }

        // Training length is owned by the scheduler, never by a rule.
        if !self.layout.set_step_budget(&mut config, step_budget) {
            return Err(ConfigValidationError::MissingSection {
                path: self.layout.step_budget_display(),
            });
        }

        Ok(config)
    }

    /// Produce `count` candidates in order from one RNG stream.
    pub fn resolve_population(
        &self,
        rng: &mut RuleRng,
        count: usize,
        step_budget: u64,
    ) -> Result<Vec<Value>, ConfigValidationError> {
        (0..count).map(|_| self.resolve(rng, step_budget)).collect()
    }
}

fn apply_entries(
    section: &mut Mapping,
    entries: &[(String, RuleNode)],
    section_path: &str,
    rng: &mut RuleRng,
) -> Result<(), ConfigValidationError> {
    for (param, node) in entries {
        let slot = section.get_mut(param.as_str()).ok_or_else(|| {
            ConfigValidationError::UnknownParameter {
                section: section_path.to_string(),
                parameter: param.clone(),
            }
        })?;
        let path = format!("{section_path}.{param}");

        match node {
            RuleNode::Group(children) => {
                let nested = slot
                    .as_mapping_mut()
                    .ok_or_else(|| ConfigValidationError::NotASection { path: path.clone() })?;
                apply_entries(nested, children, &path, rng)?;
            }
            RuleNode::Rule(rule) => {
                if let Some(value) = rng.sample(rule) {
                    log::debug!("{path} = {value:?}");
                    *slot = value;
                }
            }
        }
    }
    Ok(())
}

/// A rule set that does not fit the template.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Section '{path}' not found in template")]
    MissingSection { path: String },
    #[error("Unknown category in randomization_rules: {category}")]
    UnknownCategory { category: String },
    #[error("Unknown parameter '{parameter}' in '{section}'")]
    UnknownParameter { section: String, parameter: String },
    #[error("'{path}' has nested rules but is not a section in the template")]
    NotASection { path: String },
}
