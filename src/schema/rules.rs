//! Randomization rule types.
//!
//! Rules arrive as YAML:
//!
//! ```yaml
//! hyperparameters:
//!   learning_rate: { type: log, min: 0.00001, max: 0.001 }
//! reward_signals:
//!   extrinsic:
//!     gamma: { type: uniform, min: 0.95, max: 0.995 }
//! ```
//!
//! A mapping with a `type` key is a leaf rule. A mapping without one is a
//! group of rules for a nested template section, unless it carries a rule
//! field (`value`, `min`, `max`, `choices`), in which case it is a leaf that
//! lost its tag and is rejected.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Keys that only make sense on a leaf rule.
const RULE_FIELDS: [&str; 4] = ["value", "min", "max", "choices"];

/// Recognized values of the `type` tag.
const RULE_TYPES: [&str; 6] = ["static", "uniform", "log", "discrete", "doubling", "default"];

/// How a single parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RandomizationRule {
    /// Assign the literal value.
    Static { value: Value },
    /// Continuous uniform draw in `[min, max]`.
    Uniform { min: f64, max: f64 },
    /// Log-uniform draw in `[min, max]`.
    Log { min: f64, max: f64 },
    /// One element of `choices`, uniformly.
    Discrete { choices: Vec<Value> },
    /// A power of two with exponent in `[floor(log2 min), floor(log2 max)]`.
    Doubling { min: f64, max: f64 },
    /// Keep the template value.
    Default,
}

impl RandomizationRule {
    /// Check bounds and choices.
    pub fn validate(&self, path: &str) -> Result<(), RuleError> {
        let invalid = |reason: String| RuleError::InvalidRule {
            path: path.to_string(),
            reason,
        };
        match self {
            Self::Uniform { min, max } => check_bounds(*min, *max).map_err(invalid),
            Self::Log { min, max } | Self::Doubling { min, max } => {
                check_bounds(*min, *max).map_err(invalid)?;
                if *min <= 0.0 {
                    return Err(invalid(format!("min ({min}) must be positive")));
                }
                Ok(())
            }
            Self::Discrete { choices } if choices.is_empty() => {
                Err(invalid("choices must not be empty".to_string()))
            }
            Self::Static { .. } | Self::Discrete { .. } | Self::Default => Ok(()),
        }
    }
}

fn check_bounds(min: f64, max: f64) -> Result<(), String> {
    if !min.is_finite() || !max.is_finite() {
        return Err(format!("bounds ({min}, {max}) must be finite"));
    }
    if min > max {
        return Err(format!("min ({min}) > max ({max})"));
    }
    if !(max - min).is_finite() {
        return Err(format!("range ({min}, {max}) is too wide to sample"));
    }
    Ok(())
}

/// A leaf rule or a group of rules for a nested section.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Rule(RandomizationRule),
    Group(Vec<(String, RuleNode)>),
}

/// Parsed `randomization_rules`, in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleSet {
    categories: Vec<(String, Vec<(String, RuleNode)>)>,
}

impl RuleSet {
    /// Parse the raw `randomization_rules` mapping.
    pub fn from_mapping(rules: &Mapping) -> Result<Self, RuleError> {
        let mut categories = Vec::with_capacity(rules.len());
        for (key, params) in rules {
            let category = key_name(key, "randomization_rules")?;
            let params = params.as_mapping().ok_or_else(|| RuleError::InvalidRule {
                path: category.clone(),
                reason: "a category must map parameter names to rules".to_string(),
            })?;
            let entries = parse_entries(params, &category)?;
            categories.push((category, entries));
        }
        Ok(Self { categories })
    }

    /// Categories and their parameter rules.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[(String, RuleNode)])> {
        self.categories
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// True when no category has rules.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn parse_entries(mapping: &Mapping, parent: &str) -> Result<Vec<(String, RuleNode)>, RuleError> {
    mapping
        .iter()
        .map(|(key, value)| {
            let name = key_name(key, parent)?;
            let path = format!("{parent}.{name}");
            let node = parse_node(value, &path)?;
            Ok((name, node))
        })
        .collect()
}

fn parse_node(value: &Value, path: &str) -> Result<RuleNode, RuleError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(RuleError::MissingRuleType {
            path: path.to_string(),
        });
    };

    if let Some(tag) = mapping.get("type") {
        return parse_rule(value, tag, path).map(RuleNode::Rule);
    }

    if RULE_FIELDS.iter().any(|field| mapping.contains_key(*field)) {
        return Err(RuleError::MissingRuleType {
            path: path.to_string(),
        });
    }
    if mapping.is_empty() {
        return Err(RuleError::InvalidRule {
            path: path.to_string(),
            reason: "empty rule group".to_string(),
        });
    }

    parse_entries(mapping, path).map(RuleNode::Group)
}

fn parse_rule(value: &Value, tag: &Value, path: &str) -> Result<RandomizationRule, RuleError> {
    let tag = tag.as_str().ok_or_else(|| RuleError::InvalidRule {
        path: path.to_string(),
        reason: "rule type must be a string".to_string(),
    })?;
    if !RULE_TYPES.contains(&tag) {
        return Err(RuleError::UnknownRuleType {
            path: path.to_string(),
            rule_type: tag.to_string(),
        });
    }

    let rule: RandomizationRule =
        serde_yaml::from_value(value.clone()).map_err(|e| RuleError::InvalidRule {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    rule.validate(path)?;
    Ok(rule)
}

/// Rule keys must be strings; the template is looked up by string key.
fn key_name(key: &Value, parent: &str) -> Result<String, RuleError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        _ => Err(RuleError::InvalidRule {
            path: parent.to_string(),
            reason: format!("key {key:?} must be a string"),
        }),
    }
}

/// Errors in the randomization rule set.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Unknown randomization type '{rule_type}' for '{path}'")]
    UnknownRuleType { path: String, rule_type: String },
    #[error("Missing 'type' in parameter '{path}'")]
    MissingRuleType { path: String },
    #[error("Invalid rule for '{path}': {reason}")]
    InvalidRule { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<RuleSet, RuleError> {
        let mapping: Mapping = serde_yaml::from_str(yaml).unwrap();
        RuleSet::from_mapping(&mapping)
    }

    #[test]
    fn test_parse_all_rule_types() {
        let rules = parse(
            r#"
hyperparameters:
  num_layers: { type: static, value: 3 }
  beta: { type: uniform, min: 0.001, max: 0.01 }
  learning_rate: { type: log, min: 0.00001, max: 0.001 }
  schedule: { type: discrete, choices: [constant, linear] }
  batch_size: { type: doubling, min: 512, max: 4096 }
  epsilon: { type: default }
"#,
        )
        .unwrap();

        let (category, entries) = rules.categories().next().unwrap();
        assert_eq!(category, "hyperparameters");
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            ["num_layers", "beta", "learning_rate", "schedule", "batch_size", "epsilon"]
        );
        assert_eq!(
            entries[0].1,
            RuleNode::Rule(RandomizationRule::Static {
                value: Value::from(3u64)
            })
        );
        assert_eq!(
            entries[4].1,
            RuleNode::Rule(RandomizationRule::Doubling {
                min: 512.0,
                max: 4096.0
            })
        );
        assert_eq!(entries[5].1, RuleNode::Rule(RandomizationRule::Default));
    }

    #[test]
    fn test_nested_group() {
        let rules = parse(
            r#"
reward_signals:
  extrinsic:
    gamma: { type: uniform, min: 0.9, max: 0.99 }
    strength: { type: static, value: 1.0 }
"#,
        )
        .unwrap();

        let (_, entries) = rules.categories().next().unwrap();
        match &entries[0].1 {
            RuleNode::Group(children) => assert_eq!(children.len(), 2),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_rule_type() {
        let err = parse("h:\n  lr: { type: gaussian, min: 0, max: 1 }\n").unwrap_err();
        match err {
            RuleError::UnknownRuleType { path, rule_type } => {
                assert_eq!(path, "h.lr");
                assert_eq!(rule_type, "gaussian");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_leaf_without_type_is_rejected() {
        let err = parse("h:\n  lr: { min: 0.1, max: 0.2 }\n").unwrap_err();
        assert!(matches!(err, RuleError::MissingRuleType { ref path } if path == "h.lr"));
    }

    #[test]
    fn test_scalar_rule_is_rejected() {
        let err = parse("h:\n  lr: 0.1\n").unwrap_err();
        assert!(matches!(err, RuleError::MissingRuleType { .. }));
    }

    #[test]
    fn test_invalid_bounds() {
        let err = parse("h:\n  lr: { type: uniform, min: 2, max: 1 }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));

        let err = parse("h:\n  lr: { type: log, min: 0, max: 1 }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));

        let err = parse("h:\n  lr: { type: discrete, choices: [] }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));
    }

    #[test]
    fn test_overflowing_range_rejected() {
        let err = parse("h:\n  lr: { type: uniform, min: -1e308, max: 1e308 }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { ref path, .. } if path == "h.lr"));

        assert!(parse("h:\n  lr: { type: uniform, min: -1e300, max: 1e300 }\n").is_ok());
    }

    #[test]
    fn test_non_string_keys_rejected() {
        let err = parse("h:\n  1: { type: static, value: 2 }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { ref path, .. } if path == "h"));

        let err = parse("true:\n  x: { type: default }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));
    }

    #[test]
    fn test_missing_rule_field() {
        let err = parse("h:\n  lr: { type: uniform, min: 0.1 }\n").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));
    }
}
