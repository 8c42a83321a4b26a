//! Solver and study configuration
//!
//! `SolverConfig` selects an algorithm with its parameters and outer-loop
//! options; `StudyConfig` adds the parameter grid and output location.
//! Both are plain serde structs loaded from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::inversion::admm::{AdmmParams, AdmmSolver};
use crate::inversion::normal::LinearSolver;
use crate::inversion::primal_dual::{PrimalDualParams, PrimalDualSolver, PrimalDualVariant};
use crate::inversion::problem::Problem;
use crate::inversion::tikhonov::{TikhonovParams, TikhonovSolver};
use crate::measures::PriorKind;
use crate::solvers::driver::{IterationOptions, Solve};
use crate::study::parameter::{ParameterGrid, ParameterPoint};

/// Algorithm selection with its parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "solver", rename_all = "snake_case")]
pub enum SolverConfig {
    Tikhonov {
        #[serde(default)]
        params: TikhonovParams,
        #[serde(default)]
        options: IterationOptions,
    },
    Admm {
        #[serde(default)]
        params: AdmmParams,
        #[serde(default)]
        options: IterationOptions,
    },
    PrimalDual {
        #[serde(default)]
        params: PrimalDualParams,
        #[serde(default)]
        options: IterationOptions,
    },
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig::Admm {
            params: AdmmParams::default(),
            options: IterationOptions::default(),
        }
    }
}

/// Parse a sweep value that must be a positive integer
fn as_count(name: &str, value: f64) -> SolverResult<usize> {
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(SolverError::config(name, value, "must be a positive integer"))
    }
}

fn set_cg(linear_solver: &mut LinearSolver, name: &str, value: f64) -> SolverResult<()> {
    match linear_solver {
        LinearSolver::ConjugateGradient { tolerance, max_iterations } => {
            match name {
                "cg_iterations" => *max_iterations = as_count(name, value)?,
                _ => *tolerance = value,
            }
            Ok(())
        }
        _ => Err(SolverError::config(name, value, "linear solver is not conjugate gradient")),
    }
}

impl SolverConfig {
    pub fn name(&self) -> &'static str {
        match self {
            SolverConfig::Tikhonov { .. } => "tikhonov",
            SolverConfig::Admm { .. } => "admm",
            SolverConfig::PrimalDual { .. } => "primal_dual",
        }
    }

    pub fn alpha(&self) -> f64 {
        match self {
            SolverConfig::Tikhonov { params, .. } => params.alpha,
            SolverConfig::Admm { params, .. } => params.alpha,
            SolverConfig::PrimalDual { params, .. } => params.alpha,
        }
    }

    pub fn prior(&self) -> PriorKind {
        match self {
            SolverConfig::Tikhonov { params, .. } => params.prior,
            SolverConfig::Admm { params, .. } => params.prior,
            SolverConfig::PrimalDual { params, .. } => params.prior,
        }
    }

    pub fn options(&self) -> &IterationOptions {
        match self {
            SolverConfig::Tikhonov { options, .. }
            | SolverConfig::Admm { options, .. }
            | SolverConfig::PrimalDual { options, .. } => options,
        }
    }

    pub fn options_mut(&mut self) -> &mut IterationOptions {
        match self {
            SolverConfig::Tikhonov { options, .. }
            | SolverConfig::Admm { options, .. }
            | SolverConfig::PrimalDual { options, .. } => options,
        }
    }

    pub fn validate(&self) -> SolverResult<()> {
        self.options().validate()?;
        match self {
            SolverConfig::Tikhonov { params, .. } => params.validate(),
            SolverConfig::Admm { params, .. } => params.validate(),
            SolverConfig::PrimalDual { params, .. } => params.validate(),
        }
    }

    /// Copy with one named parameter overridden; the result is validated.
    pub fn with_parameter(&self, name: &str, value: f64) -> SolverResult<Self> {
        let mut config = self.clone();

        match name {
            "iterations" => config.options_mut().iterations = as_count(name, value)?,
            "tolerance" => config.options_mut().tolerance = value,
            _ => match &mut config {
                SolverConfig::Tikhonov { params, .. } => match name {
                    "alpha" => params.alpha = value,
                    "cg_iterations" | "cg_tolerance" => set_cg(&mut params.linear_solver, name, value)?,
                    _ => return Err(SolverError::config(name, value, "unknown parameter for tikhonov")),
                },
                SolverConfig::Admm { params, .. } => match name {
                    "alpha" => params.alpha = value,
                    "rho" => params.rho = value,
                    "cg_iterations" | "cg_tolerance" => set_cg(&mut params.linear_solver, name, value)?,
                    _ => return Err(SolverError::config(name, value, "unknown parameter for admm")),
                },
                SolverConfig::PrimalDual { params, .. } => match name {
                    "alpha" => params.alpha = value,
                    "tau" | "step_primal" => params.tau = Some(value),
                    "sigma" | "step_dual" => params.sigma = Some(value),
                    "gamma" => params.variant = PrimalDualVariant::Accelerated { gamma: value },
                    "cg_iterations" | "cg_tolerance" => set_cg(&mut params.linear_solver, name, value)?,
                    _ => return Err(SolverError::config(name, value, "unknown parameter for primal_dual")),
                },
            },
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply every parameter of a study point.
    pub fn with_point(&self, point: &ParameterPoint) -> SolverResult<Self> {
        point
            .iter()
            .try_fold(self.clone(), |config, (name, value)| config.with_parameter(name, value))
    }

    /// Build a ready-to-run solver for `problem`.
    pub fn build(&self, problem: Problem) -> SolverResult<Box<dyn Solve + Send>> {
        self.validate()?;
        let solver: Box<dyn Solve + Send> = match self {
            SolverConfig::Tikhonov { params, options } => {
                Box::new(TikhonovSolver::tikhonov(problem, params, options.clone())?)
            }
            SolverConfig::Admm { params, options } => {
                Box::new(AdmmSolver::admm(problem, params, options.clone())?)
            }
            SolverConfig::PrimalDual { params, options } => {
                Box::new(PrimalDualSolver::primal_dual(problem, params, options.clone())?)
            }
        };
        Ok(solver)
    }
}

fn default_true() -> bool {
    true
}

/// Everything needed to run a parameter study except the data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub name: String,
    pub directory: PathBuf,
    pub solver: SolverConfig,
    pub grid: ParameterGrid,
    /// Run points concurrently (needs the `parallel` feature)
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Write the final estimate of every run as NIfTI
    #[serde(default = "default_true")]
    pub save_reconstructions: bool,
}

impl StudyConfig {
    pub fn from_json_str(json: &str) -> SolverResult<Self> {
        let config: StudyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SolverResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| SolverError::from_io(path, e))?;
        Self::from_json_str(&json)
    }

    /// Check the template and every grid point before anything runs.
    pub fn validate(&self) -> SolverResult<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(SolverError::config("name", &self.name, "must be a plain, non-empty file name"));
        }
        self.solver.validate()?;
        for point in self.grid.points()? {
            self.solver.with_point(&point)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    #[test]
    fn test_with_parameter() {
        let config = SolverConfig::default();
        let swept = config.with_parameter("alpha", 0.5).unwrap();
        assert_eq!(swept.alpha(), 0.5);
        assert_eq!(config.alpha(), 0.01);

        let swept = swept.with_parameter("iterations", 25.0).unwrap();
        assert_eq!(swept.options().iterations, 25);

        match swept.with_parameter("rho", 2.0).unwrap() {
            SolverConfig::Admm { params, .. } => assert_eq!(params.rho, 2.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_and_invalid_parameters() {
        let config = SolverConfig::default();
        assert!(matches!(
            config.with_parameter("lambda", 0.1),
            Err(SolverError::Configuration { .. })
        ));
        assert!(config.with_parameter("alpha", -1.0).is_err());
        assert!(config.with_parameter("iterations", 2.5).is_err());

        let tikhonov = SolverConfig::Tikhonov { params: Default::default(), options: Default::default() };
        assert!(tikhonov.with_parameter("rho", 1.0).is_err());
        assert!(tikhonov.with_parameter("cg_iterations", 50.0).is_ok());
    }

    #[test]
    fn test_primal_dual_step_aliases() {
        let config = SolverConfig::PrimalDual { params: Default::default(), options: Default::default() };
        match config.with_parameter("step_primal", 0.1).unwrap() {
            SolverConfig::PrimalDual { params, .. } => assert_eq!(params.tau, Some(0.1)),
            other => panic!("unexpected {:?}", other),
        }
        match config.with_parameter("gamma", 0.3).unwrap() {
            SolverConfig::PrimalDual { params, .. } => {
                assert_eq!(params.variant, PrimalDualVariant::Accelerated { gamma: 0.3 })
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let json = r#"{"solver": "admm", "params": {"alpha": 0.1, "rho_policy": {"policy": "adaptive", "mu": 10.0, "factor": 2.0}}}"#;
        let config: SolverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.alpha(), 0.1);
        assert_eq!(config.options(), &IterationOptions::default());

        let back: SolverConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_study_config_validates_points() {
        let json = r#"{
            "name": "tv",
            "directory": "/tmp/nsol",
            "solver": {"solver": "admm"},
            "grid": {"product": {"alpha": [0.01, 0.1], "rho": [0.5, 1.0]}}
        }"#;
        let config = StudyConfig::from_json_str(json).unwrap();
        assert!(config.parallel);
        assert_eq!(config.grid.points().unwrap().len(), 4);

        let bad = json.replace("\"rho\"", "\"lambda\"");
        assert!(matches!(StudyConfig::from_json_str(&bad), Err(SolverError::Configuration { .. })));
    }

    #[test]
    fn test_build_runs_solver() {
        let g = Geometry::new(&[8]).unwrap();
        let problem = Problem::denoising(vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0], g).unwrap();
        let mut solver = SolverConfig::default().build(problem).unwrap();
        let outcome = solver.run().unwrap();
        assert!(outcome.iterations >= 1);
        assert_eq!(solver.name(), "ADMM");
        assert_eq!(solver.record().get("Total").unwrap().len(), outcome.iterations);
    }
}
