//! The training seam.
//!
//! The scheduler only needs "train this config for its budget and give me the
//! console output". [`ProcessTrainer`] does that by launching the external
//! trainer; tests substitute their own [`Trainer`].

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::schema::TrainerConfig;

use super::population::CandidateId;

/// Poll interval while waiting on a trainer with a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One training invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingRequest {
    pub candidate: CandidateId,
    /// Generation number, starting at 1.
    pub generation: usize,
    /// Candidate configuration file; its step budget is already set.
    pub config_path: PathBuf,
    /// Unique run identifier, e.g. `experiment3_gen2_config_sample5`.
    pub run_id: String,
    pub seed: u64,
}

/// Trains a candidate and returns the trainer's console output.
///
/// Implementations must be callable from several threads at once when the
/// scheduler evaluates in parallel.
pub trait Trainer: Send + Sync {
    fn train(&self, request: &TrainingRequest) -> Result<String, TrainerError>;
}

/// Runs the configured trainer executable as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    config: TrainerConfig,
    results_dir: Option<PathBuf>,
}

impl ProcessTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            results_dir: None,
        }
    }

    /// Pass `--results-dir=<dir>` to every run.
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    /// Command line for a request, without spawning it.
    pub fn command(&self, request: &TrainingRequest) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(&request.config_path)
            .arg(format!("--run-id={}", request.run_id))
            .arg(format!("--seed={}", request.seed))
            .args(&self.config.args);
        if let Some(env) = &self.config.env {
            cmd.arg(format!("--env={}", env.display()));
        }
        if let Some(dir) = &self.results_dir {
            cmd.arg(format!("--results-dir={}", dir.display()));
        }
        cmd
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_seconds.map(Duration::from_secs)
    }
}

impl Trainer for ProcessTrainer {
    fn train(&self, request: &TrainingRequest) -> Result<String, TrainerError> {
        let mut cmd = self.command(request);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        log::info!("Starting training run {}", request.run_id);
        let mut child = cmd.spawn().map_err(|source| TrainerError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        // Trainer subprocesses inherit stdout and can hold the pipe open after
        // the trainer is killed; never wait on the reader past the deadline.
        let (tx, rx) = mpsc::channel();
        let stdout = child.stdout.take();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = match stdout {
                Some(mut out) => out.read_to_end(&mut buf).map(|_| buf),
                None => Ok(buf),
            };
            let _ = tx.send(result);
        });

        let deadline = self.timeout().map(|timeout| Instant::now() + timeout);
        let timed_out = || TrainerError::TimedOut {
            run_id: request.run_id.clone(),
            seconds: self.config.timeout_seconds.unwrap_or_default(),
        };

        let Some(status) = wait_until(&mut child, deadline)? else {
            return Err(timed_out());
        };
        if !status.success() {
            log::warn!("Training run {} exited with {}", request.run_id, status);
            return Err(TrainerError::Failed {
                run_id: request.run_id.clone(),
                reason: format!("trainer exited with {status}"),
            });
        }

        let received = match deadline {
            Some(deadline) => rx
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => timed_out(),
                    RecvTimeoutError::Disconnected => TrainerError::OutputReader {
                        run_id: request.run_id.clone(),
                    },
                })?,
            None => rx.recv().map_err(|_| TrainerError::OutputReader {
                run_id: request.run_id.clone(),
            })?,
        };
        Ok(String::from_utf8_lossy(&received?).into_owned())
    }
}

/// Wait for `child`, killing it once `deadline` passes.
///
/// Returns `Ok(None)` if the child was killed.
fn wait_until(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Errors launching or supervising a training run.
#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    #[error("Failed to launch trainer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while training: {0}")]
    Io(#[from] std::io::Error),
    #[error("Output reader for run {run_id} stopped without reporting")]
    OutputReader { run_id: String },
    #[error("Training run {run_id} exceeded {seconds}s and was killed")]
    TimedOut { run_id: String, seconds: u64 },
    #[error("Training run {run_id} failed: {reason}")]
    Failed { run_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TrainingRequest {
        TrainingRequest {
            candidate: CandidateId(3),
            generation: 2,
            config_path: PathBuf::from("/tmp/pop/config_sample3.yaml"),
            run_id: "experiment1_gen2_config_sample3".to_string(),
            seed: 42,
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_line() {
        let trainer = ProcessTrainer::new(TrainerConfig {
            env: Some(PathBuf::from("builds/SoccerTwos")),
            ..TrainerConfig::default()
        })
        .with_results_dir("/tmp/results");

        let cmd = trainer.command(&request());
        assert_eq!(cmd.get_program(), "mlagents-learn");
        assert_eq!(
            args_of(&cmd),
            [
                "/tmp/pop/config_sample3.yaml",
                "--run-id=experiment1_gen2_config_sample3",
                "--seed=42",
                "--no-graphics",
                "--env=builds/SoccerTwos",
                "--results-dir=/tmp/results",
            ]
        );
    }

    #[test]
    fn test_command_without_optional_flags() {
        let trainer = ProcessTrainer::new(TrainerConfig {
            program: "train".to_string(),
            args: Vec::new(),
            env: None,
            timeout_seconds: None,
        });
        let cmd = trainer.command(&request());
        assert_eq!(cmd.get_program(), "train");
        assert_eq!(args_of(&cmd).len(), 3);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let trainer = ProcessTrainer::new(TrainerConfig {
            program: "/nonexistent/trainer-binary".to_string(),
            ..TrainerConfig::default()
        });
        let err = trainer.train(&request()).unwrap_err();
        assert!(matches!(err, TrainerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let trainer = ProcessTrainer::new(TrainerConfig {
            program: "echo".to_string(),
            args: vec!["Step: 10. Time Elapsed: 1.0 s. Mean Reward: 0.5. Mean Group Reward: 0.0.".to_string()],
            env: None,
            timeout_seconds: Some(30),
        });
        let output = trainer.train(&request()).unwrap();
        assert!(output.contains("Mean Reward: 0.5"));
        assert!(output.contains("--run-id=experiment1_gen2_config_sample3"));
    }

    #[cfg(unix)]
    fn script_request(dir: &std::path::Path, body: &str) -> TrainingRequest {
        let script = dir.join("train.sh");
        std::fs::write(&script, body).unwrap();
        TrainingRequest {
            config_path: script,
            ..request()
        }
    }

    #[cfg(unix)]
    fn shell_trainer(timeout_seconds: Option<u64>) -> ProcessTrainer {
        ProcessTrainer::new(TrainerConfig {
            program: "sh".to_string(),
            args: Vec::new(),
            env: None,
            timeout_seconds,
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_not_held_by_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let request = script_request(dir.path(), "sleep 20 &\nsleep 20\n");

        let start = Instant::now();
        let err = shell_trainer(Some(1)).train(&request).unwrap_err();
        assert!(matches!(err, TrainerError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = script_request(dir.path(), "exit 3\n");

        let err = shell_trainer(Some(30)).train(&request).unwrap_err();
        assert!(matches!(err, TrainerError::Failed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_after_metrics_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = script_request(
            dir.path(),
            "echo 'Step: 10. Time Elapsed: 1.0 s. Mean Reward: 0.5. Mean Group Reward: 0.0.'\nexit 1\n",
        );

        let err = shell_trainer(None).train(&request).unwrap_err();
        assert!(matches!(err, TrainerError::Failed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_output_captured() {
        let dir = tempfile::tempdir().unwrap();
        let request = script_request(dir.path(), "echo \"run $1\"\n");

        let output = shell_trainer(Some(30)).train(&request).unwrap();
        assert_eq!(output.trim(), "run --run-id=experiment1_gen2_config_sample3");
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_kills() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        assert!(wait_until(&mut child, Some(deadline)).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_finishes() {
        let mut child = Command::new("true").spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = wait_until(&mut child, Some(deadline)).unwrap();
        assert!(status.unwrap().success());
    }
}
