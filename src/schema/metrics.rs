//! Training progress samples extracted from a trainer log.

use serde::{Deserialize, Serialize};

/// One summary line of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Trainer step counter.
    pub step: u64,
    /// Wall-clock seconds since training started.
    pub elapsed_time: f64,
    /// Mean episode reward.
    pub mean_reward: f64,
    /// Mean group reward.
    pub mean_group_reward: f64,
}

/// Samples of one candidate's training run, in log order.
pub type RunHistory = Vec<MetricSample>;
