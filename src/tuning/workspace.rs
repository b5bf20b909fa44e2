//! Experiment directory bookkeeping.
//!
//! Every tuning run gets a fresh `experiment_N` directory under the
//! experiments root, holding the population files and trainer results:
//!
//! ```text
//! experiments/
//!   experiment_0/
//!     population/config_sample0.yaml ...
//!     results/
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directories of one tuning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentWorkspace {
    pub number: usize,
    pub dir: PathBuf,
    pub population_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl ExperimentWorkspace {
    /// Create the next workspace under `root`.
    ///
    /// `N` is the number of `experiment_*` directories already present, so
    /// numbering starts at 0.
    pub fn create_next<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        let mut number = count_experiments(root)?;
        // A gap in the numbering can make the count collide with an existing name.
        while root.join(format!("experiment_{number}")).exists() {
            number += 1;
        }

        let dir = root.join(format!("experiment_{number}"));
        let population_dir = dir.join("population");
        let results_dir = dir.join("results");
        fs::create_dir_all(&population_dir)?;
        fs::create_dir_all(&results_dir)?;

        log::info!("Created experiment workspace {}", dir.display());
        Ok(Self {
            number,
            dir,
            population_dir,
            results_dir,
        })
    }

    /// Prefix for trainer run ids, e.g. `experiment3`.
    pub fn run_prefix(&self) -> String {
        format!("experiment{}", self.number)
    }

    /// Where the run summary is written.
    pub fn summary_path(&self) -> PathBuf {
        self.results_dir.join("tuning_summary.json")
    }
}

fn count_experiments(root: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && entry.file_name().to_string_lossy().starts_with("experiment_")
        {
            count += 1;
        }
    }
    Ok(count)
}
