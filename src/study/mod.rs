//! Parameter studies
//!
//! A study runs one solver configuration over a grid of parameter points and
//! persists every run under `<directory>/<name>/`:
//!
//! - `study.json`: index of runs and their parameters
//! - `runs/run_<line>.json`: cost sequences and outcome of one run
//! - `reconstructions/run_<line>.nii.gz`: final estimate of one run
//!
//! `ParameterStudy` writes that layout and `ParameterStudyReader` queries it.

pub mod parameter;
pub mod reader;
pub mod writer;

pub use parameter::*;
pub use reader::*;
pub use writer::*;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::geometry::Geometry;
use crate::solvers::driver::{IterationRecord, StopReason};

pub const INDEX_FILE: &str = "study.json";
pub const RUNS_DIR: &str = "runs";
pub const RECONSTRUCTIONS_DIR: &str = "reconstructions";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Converged,
    MaxIterReached,
    Failed,
}

/// Summary of one run as listed in the index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub line: usize,
    pub parameters: ParameterPoint,
    pub status: RunStatus,
    pub iterations: usize,
}

/// Contents of `study.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudyIndex {
    pub name: String,
    pub solver: String,
    pub parameter_names: Vec<String>,
    pub geometry: Geometry,
    pub runs: Vec<RunEntry>,
}

/// Contents of `runs/run_<line>.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub line: usize,
    pub parameters: ParameterPoint,
    pub status: RunStatus,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub failure: Option<String>,
    pub iterations: usize,
    pub elapsed_seconds: f64,
    pub geometry: Geometry,
    pub record: IterationRecord,
}

pub fn study_dir(directory: &Path, name: &str) -> PathBuf {
    directory.join(name)
}

pub fn index_path(study_dir: &Path) -> PathBuf {
    study_dir.join(INDEX_FILE)
}

pub fn run_path(study_dir: &Path, line: usize) -> PathBuf {
    study_dir.join(RUNS_DIR).join(format!("run_{:05}.json", line))
}

pub fn reconstruction_path(study_dir: &Path, line: usize) -> PathBuf {
    study_dir.join(RECONSTRUCTIONS_DIR).join(format!("run_{:05}.nii.gz", line))
}

/// Serialize `value` into a file that must not exist yet.
fn write_json_new<T: Serialize>(path: &Path, value: &T) -> SolverResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| SolverError::from_io(path, e))?;
    file.write_all(&json).map_err(|e| SolverError::from_io(path, e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SolverResult<T> {
    let bytes = std::fs::read(path).map_err(|e| SolverError::from_io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| SolverError::Serialization {
        message: format!("{}: {}", path.display(), e),
    })
}
