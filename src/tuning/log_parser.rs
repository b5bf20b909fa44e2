//! Extraction of training metrics from trainer console output.
//!
//! The trainer reports progress with lines like:
//!
//! ```text
//! [INFO] SoccerTwos. Step: 20000. Time Elapsed: 61.452 s. Mean Reward: 0.000. Mean Group Reward: -0.125. Training.
//! ```
//!
//! Anything else in the log is ignored.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::{MetricSample, RunHistory};

static METRIC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Step:\s(?P<step>\d+).*?Time Elapsed:\s(?P<elapsed>[\d.]+)\s?s.*?Mean Reward:\s(?P<reward>[-\d.]+).*?Mean Group Reward:\s(?P<group>[-\d.]+)",
    )
    .expect("metric line pattern is valid")
});

/// Parses trainer output into a [`RunHistory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParser;

impl LogParser {
    pub fn new() -> Self {
        Self
    }

    /// Every metric line in `output`, in order.
    pub fn parse(&self, output: &str) -> RunHistory {
        let history: RunHistory = output.lines().filter_map(|line| self.parse_line(line)).collect();
        log::trace!("parsed {} metric samples", history.len());
        history
    }

    /// Parse one line. Returns `None` for lines that are not metric lines.
    pub fn parse_line(&self, line: &str) -> Option<MetricSample> {
        let caps = METRIC_LINE.captures(line)?;
        Some(MetricSample {
            step: caps["step"].parse().ok()?,
            elapsed_time: parse_number(&caps["elapsed"])?,
            mean_reward: parse_number(&caps["reward"])?,
            mean_group_reward: parse_number(&caps["group"])?,
        })
    }
}

/// Parse a captured number, dropping the sentence-ending period the trainer
/// prints directly after it.
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim_end_matches('.').parse().ok()
}
