//! Heuristic fitness of a training run.
//!
//! The score is a parameter-free sum of four terms computed over the run's
//! metric history:
//!
//! `reward trend + final reward - reward variance + group reward trend`
//!
//! Scores are only comparable between runs with the same step budget.

use serde::{Deserialize, Serialize};

use crate::schema::RunHistory;

/// Scores a run history.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    /// Create a new scorer.
    pub fn new() -> Self {
        Self
    }

    /// Heuristic score of a run. An empty history scores `0.0`.
    pub fn score(&self, history: &RunHistory) -> f64 {
        self.breakdown(history).total()
    }

    /// The individual terms of the score.
    pub fn breakdown(&self, history: &RunHistory) -> ScoreBreakdown {
        if history.is_empty() {
            return ScoreBreakdown::default();
        }

        let steps: Vec<f64> = history.iter().map(|s| s.step as f64).collect();
        let rewards: Vec<f64> = history.iter().map(|s| s.mean_reward).collect();
        let group_rewards: Vec<f64> = history.iter().map(|s| s.mean_group_reward).collect();

        ScoreBreakdown {
            trend: linear_slope(&steps, &rewards),
            final_reward: rewards.last().copied().unwrap_or(0.0),
            variance: population_variance(&rewards),
            group_trend: linear_slope(&steps, &group_rewards),
        }
    }
}

/// Terms of the heuristic score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Least-squares slope of mean reward against step.
    pub trend: f64,
    /// Last mean reward.
    pub final_reward: f64,
    /// Population variance of mean reward.
    pub variance: f64,
    /// Least-squares slope of mean group reward against step.
    pub group_trend: f64,
}

impl ScoreBreakdown {
    /// Combined score.
    pub fn total(&self) -> f64 {
        self.trend + self.final_reward - self.variance + self.group_trend
    }
}

/// Slope of the least-squares line through `(xs, ys)`.
///
/// Zero for fewer than two points or when every `x` is equal.
fn linear_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut spread = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        covariance += dx * (y - mean_y);
        spread += dx * dx;
    }

    if spread > 0.0 { covariance / spread } else { 0.0 }
}

/// Population variance; zero for fewer than two values.
fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MetricSample;

    fn sample(step: u64, reward: f64, group: f64) -> MetricSample {
        MetricSample {
            step,
            elapsed_time: step as f64 / 100.0,
            mean_reward: reward,
            mean_group_reward: group,
        }
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(HeuristicScorer::new().score(&Vec::new()), 0.0);
    }

    #[test]
    fn test_single_sample() {
        let history = vec![sample(1000, 0.37, 0.9)];
        let breakdown = HeuristicScorer::new().breakdown(&history);
        assert_eq!(breakdown.trend, 0.0);
        assert_eq!(breakdown.group_trend, 0.0);
        assert_eq!(breakdown.variance, 0.0);
        assert_eq!(breakdown.total(), 0.37);
    }

    #[test]
    fn test_two_point_example() {
        let history = vec![sample(0, 0.0, 0.0), sample(100, 1.0, 0.0)];
        let breakdown = HeuristicScorer::new().breakdown(&history);

        assert!((breakdown.trend - 0.01).abs() < 1e-12);
        assert_eq!(breakdown.final_reward, 1.0);
        assert!((breakdown.variance - 0.25).abs() < 1e-12);
        assert_eq!(breakdown.group_trend, 0.0);
        assert!((breakdown.total() - 0.76).abs() < 1e-12);
    }

    #[test]
    fn test_group_trend_counts() {
        let history = vec![
            sample(0, 1.0, 0.0),
            sample(10, 1.0, 1.0),
            sample(20, 1.0, 2.0),
        ];
        let breakdown = HeuristicScorer::new().breakdown(&history);
        assert_eq!(breakdown.trend, 0.0);
        assert_eq!(breakdown.variance, 0.0);
        assert!((breakdown.group_trend - 0.1).abs() < 1e-12);
        assert!((breakdown.total() - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_instability_penalized() {
        let steady = vec![sample(0, 0.5, 0.0), sample(10, 0.5, 0.0), sample(20, 0.5, 0.0)];
        let noisy = vec![sample(0, 1.5, 0.0), sample(10, -0.5, 0.0), sample(20, 0.5, 0.0)];
        let scorer = HeuristicScorer::new();
        assert!(scorer.score(&steady) > scorer.score(&noisy));
    }

    #[test]
    fn test_slope_matches_least_squares() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 5.0, 7.0];
        assert!((linear_slope(&xs, &ys) - 2.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[5.0, 5.0], &[1.0, 2.0]), 0.0);
    }
}
