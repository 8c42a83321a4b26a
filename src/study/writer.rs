//! Running and persisting a parameter study

use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{SolverConfig, StudyConfig};
use crate::error::{SolverError, SolverResult};
use crate::inversion::problem::Problem;
use crate::nifti_io::{check_nifti_geometry, save_nifti_gz};
use crate::solvers::driver::SolverState;

use super::{
    index_path, reconstruction_path, run_path, study_dir, write_json_new, ParameterPoint, RunEntry,
    RunRecord, RunStatus, StudyIndex, RECONSTRUCTIONS_DIR, RUNS_DIR,
};

/// True when `path` is a directory with at least one entry.
fn has_entries(path: &Path) -> SolverResult<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SolverError::from_io(path, e)),
    }
}

/// One solver configuration swept over a parameter grid for a fixed problem.
pub struct ParameterStudy {
    config: StudyConfig,
    problem: Problem,
}

struct Job {
    line: usize,
    point: ParameterPoint,
    solver: SolverConfig,
}

impl ParameterStudy {
    pub fn new(config: StudyConfig, problem: Problem) -> SolverResult<Self> {
        config.validate()?;
        if config.save_reconstructions {
            check_nifti_geometry(problem.geometry())?;
        }
        Ok(Self { config, problem })
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// `<directory>/<name>`
    pub fn path(&self) -> PathBuf {
        study_dir(&self.config.directory, &self.config.name)
    }

    /// Run every grid point and write the study. Numerical failures of
    /// single runs are recorded as `Failed`; any other error aborts.
    pub fn run(&self) -> SolverResult<StudyIndex> {
        let jobs = self
            .config
            .grid
            .points()?
            .into_iter()
            .enumerate()
            .map(|(line, point)| {
                let solver = self.config.solver.with_point(&point)?;
                Ok(Job { line, point, solver })
            })
            .collect::<SolverResult<Vec<Job>>>()?;

        let dir = self.path();
        let leftovers = [RUNS_DIR, RECONSTRUCTIONS_DIR]
            .iter()
            .map(|sub| has_entries(&dir.join(sub)))
            .collect::<SolverResult<Vec<bool>>>()?;
        if index_path(&dir).exists() || leftovers.contains(&true) {
            return Err(SolverError::state(format!(
                "parameter study '{}' already exists in {}",
                self.config.name,
                self.config.directory.display()
            )));
        }
        for sub in [RUNS_DIR, RECONSTRUCTIONS_DIR] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).map_err(|e| SolverError::from_io(&path, e))?;
        }

        log::info!(
            "Parameter study '{}': {} runs of {} in {}",
            self.config.name,
            jobs.len(),
            self.config.solver.name(),
            dir.display()
        );

        let runs = self.run_jobs(&dir, &jobs).into_iter().collect::<SolverResult<Vec<RunEntry>>>()?;

        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
        let index = StudyIndex {
            name: self.config.name.clone(),
            solver: self.config.solver.name().to_string(),
            parameter_names: self.config.grid.parameter_names(),
            geometry: self.problem.geometry().clone(),
            runs,
        };
        write_json_new(&index_path(&dir), &index)?;

        log::info!(
            "Parameter study '{}' finished: {} runs, {} failed",
            self.config.name,
            index.runs.len(),
            failed
        );
        Ok(index)
    }

    #[cfg(feature = "parallel")]
    fn run_jobs(&self, dir: &Path, jobs: &[Job]) -> Vec<SolverResult<RunEntry>> {
        if self.config.parallel {
            jobs.par_iter().map(|job| self.run_job(dir, job)).collect()
        } else {
            jobs.iter().map(|job| self.run_job(dir, job)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run_jobs(&self, dir: &Path, jobs: &[Job]) -> Vec<SolverResult<RunEntry>> {
        jobs.iter().map(|job| self.run_job(dir, job)).collect()
    }

    fn run_job(&self, dir: &Path, job: &Job) -> SolverResult<RunEntry> {
        let start = Instant::now();
        let mut solver = job.solver.build(self.problem.clone())?;

        let (status, stop_reason, failure, x) = match solver.run() {
            Ok(outcome) => {
                let status = match outcome.state {
                    SolverState::Converged => RunStatus::Converged,
                    _ => RunStatus::MaxIterReached,
                };
                (status, Some(outcome.stop_reason), None, outcome.x)
            }
            Err(SolverError::NumericalFailure { iteration, reason, last_iterate }) => {
                log::warn!(
                    "Run {} ({}) failed at iteration {}: {}",
                    job.line,
                    job.point,
                    iteration,
                    reason
                );
                (RunStatus::Failed, None, Some(reason), last_iterate)
            }
            Err(other) => return Err(other),
        };

        let record = solver.record().clone();
        let iterations = record.len();
        let geometry = self.problem.geometry();

        let run = RunRecord {
            line: job.line,
            parameters: job.point.clone(),
            status,
            stop_reason,
            failure,
            iterations,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            geometry: geometry.clone(),
            record,
        };
        write_json_new(&run_path(dir, job.line), &run)?;
        if self.config.save_reconstructions {
            save_nifti_gz(&reconstruction_path(dir, job.line), &x, geometry)?;
        }

        log::debug!("Run {} ({}): {:?} after {} iterations", job.line, job.point, status, iterations);
        Ok(RunEntry {
            line: job.line,
            parameters: job.point.clone(),
            status,
            iterations,
        })
    }
}
