//! Persistent population of candidate configurations.
//!
//! Each candidate lives in its own YAML file under the population directory.
//! The store tracks which candidates are still alive, their latest scores and
//! the generation they were last evaluated in.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::schema::TemplateLayout;

/// Identifier of a candidate, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub usize);

impl CandidateId {
    /// Name of the candidate's configuration file.
    pub fn file_name(&self) -> String {
        format!("{self}.yaml")
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config_sample{}", self.0)
    }
}

/// A live candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationEntry {
    pub id: CandidateId,
    /// Score from the latest evaluation; 0 before the generation is evaluated.
    pub score: f64,
    pub generation: usize,
}

/// Candidate configurations on disk plus their bookkeeping.
#[derive(Debug)]
pub struct PopulationStore {
    dir: PathBuf,
    entries: Vec<PopulationEntry>,
    next_id: usize,
}

impl PopulationStore {
    /// Open an empty store rooted at `dir`, creating the directory.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            entries: Vec::new(),
            next_id: 0,
        })
    }

    /// Population directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a new candidate and return its id.
    pub fn insert(&mut self, config: &Value) -> Result<CandidateId, StoreError> {
        let id = CandidateId(self.next_id);
        self.write_config(id, config)?;
        self.next_id += 1;
        self.entries.push(PopulationEntry {
            id,
            score: 0.0,
            generation: 0,
        });
        Ok(id)
    }

    pub fn config_path(&self, id: CandidateId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Read a candidate's configuration back from disk.
    pub fn load_config(&self, id: CandidateId) -> Result<Value, StoreError> {
        let path = self.config_path(id);
        let contents = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Yaml { path, source })
    }

    /// Overwrite a candidate's configuration file.
    pub fn write_config(&self, id: CandidateId, config: &Value) -> Result<(), StoreError> {
        let path = self.config_path(id);
        let yaml = serde_yaml::to_string(config).map_err(|source| StoreError::Yaml {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, yaml).map_err(|source| StoreError::Write { path, source })
    }

    /// Live candidates, in rank order after [`rank`](Self::rank).
    pub fn entries(&self) -> &[PopulationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<CandidateId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Store scores for live candidates. NaN is stored as the worst score.
    pub fn record_scores(&mut self, scores: &[(CandidateId, f64)]) {
        for &(id, score) in scores {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
                entry.score = if score.is_nan() { f64::NEG_INFINITY } else { score };
            }
        }
    }

    /// Stable sort by score, best first. Ties keep creation order.
    pub fn rank(&mut self) {
        self.entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    /// Keep the best `floor(n/2)` candidates and return the rest.
    ///
    /// Expects a ranked population. A population of one is left alone.
    pub fn halve(&mut self) -> Vec<PopulationEntry> {
        if self.entries.len() <= 1 {
            return Vec::new();
        }
        let keep = self.entries.len() / 2;
        self.entries.split_off(keep)
    }

    /// Current step budget of a candidate, read from its file.
    pub fn read_step_budget(
        &self,
        id: CandidateId,
        layout: &TemplateLayout,
    ) -> Result<u64, PromotionError> {
        let config = self.load_config(id)?;
        step_budget_of(&config, id, layout)
    }

    /// Double a candidate's persisted step budget. Returns the new budget.
    ///
    /// Nothing is written on error.
    pub fn promote(&self, id: CandidateId, layout: &TemplateLayout) -> Result<u64, PromotionError> {
        let mut config = self.load_config(id)?;
        let budget = step_budget_of(&config, id, layout)?;
        let doubled = budget
            .checked_mul(2)
            .ok_or(PromotionError::Overflow { candidate: id, budget })?;

        if !layout.set_step_budget(&mut config, doubled) {
            return Err(PromotionError::MissingStepBudget {
                candidate: id,
                path: layout.step_budget_display(),
            });
        }
        self.write_config(id, &config)?;
        Ok(doubled)
    }

    /// Reset scores and stamp the new generation number on every survivor.
    pub fn advance_generation(&mut self, generation: usize) {
        for entry in &mut self.entries {
            entry.score = 0.0;
            entry.generation = generation;
        }
    }

    /// The remaining candidate once the population has shrunk to one.
    pub fn winner(&self) -> Option<&PopulationEntry> {
        match self.entries.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

fn step_budget_of(
    config: &Value,
    id: CandidateId,
    layout: &TemplateLayout,
) -> Result<u64, PromotionError> {
    let value = layout
        .step_budget(config)
        .ok_or_else(|| PromotionError::MissingStepBudget {
            candidate: id,
            path: layout.step_budget_display(),
        })?;
    value.as_u64().ok_or_else(|| PromotionError::InvalidStepBudget {
        candidate: id,
        value: format!("{value:?}"),
    })
}

/// Errors reading or writing candidate files.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create population directory '{}': {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in '{}': {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A candidate whose budget could not be doubled.
#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("{candidate}: step budget '{path}' not found")]
    MissingStepBudget { candidate: CandidateId, path: String },
    #[error("{candidate}: step budget {value} is not a non-negative integer")]
    InvalidStepBudget { candidate: CandidateId, value: String },
    #[error("{candidate}: doubling step budget {budget} overflows")]
    Overflow { candidate: CandidateId, budget: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}
