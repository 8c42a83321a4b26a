//! Tikhonov regularization
//!
//! Quadratic priors give a linear optimality system:
//!
//! x = argmin_x ||Ax - b||₂² + α||Γx||₂²  ⇔  (AᵀA + αΓᵀΓ) x = Aᵀb
//!
//! with Γ = I (zeroth order) or Γ = D (first order). The system is solved by
//! CG on the operator, exactly in k-space when everything is circulant,
//! or by a dense Cholesky factorization for small problems. The recorded
//! `Data` is the full `||Ax - b||₂²`, so `Total` is the minimized functional.

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::inversion::normal::{LinearSolver, NormalEquations, Regularization};
use crate::inversion::problem::{Objective, Problem};
use crate::measures::PriorKind;
use crate::solvers::cg::CgState;
use crate::solvers::driver::{IterationOptions, IterativeSolver, Scheme, StepReport};

/// How outer iterations map onto the linear solve
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TikhonovMode {
    /// Each outer iteration finishes a warm-started linear solve
    #[default]
    SingleShot,
    /// Each outer iteration is one CG iteration
    TrackCg,
}

/// Tikhonov parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TikhonovParams {
    /// Regularization weight
    pub alpha: f64,
    /// Zeroth or first order
    pub prior: PriorKind,
    pub mode: TikhonovMode,
    pub linear_solver: LinearSolver,
}

impl Default for TikhonovParams {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            prior: PriorKind::FirstOrderTikhonov,
            mode: TikhonovMode::default(),
            linear_solver: LinearSolver::default(),
        }
    }
}

impl TikhonovParams {
    pub fn validate(&self) -> SolverResult<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(SolverError::config("alpha", self.alpha, "must be positive and finite"));
        }
        regularization_for(self.prior)?;
        if self.mode == TikhonovMode::TrackCg
            && !matches!(self.linear_solver, LinearSolver::ConjugateGradient { .. })
        {
            return Err(SolverError::config(
                "mode",
                "track_cg",
                "tracking CG iterates requires the conjugate gradient solver",
            ));
        }
        self.linear_solver.validate()
    }
}

fn regularization_for(prior: PriorKind) -> SolverResult<Regularization> {
    match prior {
        PriorKind::ZerothOrderTikhonov => Ok(Regularization::Identity),
        PriorKind::FirstOrderTikhonov => Ok(Regularization::Gradient),
        PriorKind::TotalVariation => Err(SolverError::config(
            "prior",
            prior,
            "Tikhonov needs a zeroth- or first-order Tikhonov prior",
        )),
    }
}

pub struct TikhonovScheme {
    system: NormalEquations,
    alpha: f64,
    rhs: Vec<f64>,
    x: Vec<f64>,
    mode: TikhonovMode,
    tolerance: f64,
    cg: Option<CgState>,
}

impl TikhonovScheme {
    pub fn new(problem: &Problem, params: &TikhonovParams, tolerance: f64) -> SolverResult<Self> {
        params.validate()?;
        let regularization = regularization_for(params.prior)?;

        let system = NormalEquations::new(
            problem.operator().clone(),
            problem.difference_operator(),
            regularization,
            params.linear_solver.clone(),
        )?;
        let rhs = problem.adjoint_observed()?;
        let x = problem.initial_guess()?;

        let cg = match params.mode {
            TikhonovMode::TrackCg => Some(system.cg_state(params.alpha, &rhs, &x)?),
            TikhonovMode::SingleShot => None,
        };

        Ok(Self {
            system,
            alpha: params.alpha,
            rhs,
            x,
            mode: params.mode,
            tolerance,
            cg,
        })
    }
}

impl Scheme for TikhonovScheme {
    fn name(&self) -> &'static str {
        "Tikhonov"
    }

    fn iterate(&self) -> &[f64] {
        &self.x
    }

    fn step(&mut self, _iteration: usize) -> SolverResult<StepReport> {
        match self.mode {
            TikhonovMode::SingleShot => {
                let outcome = self.system.solve(self.alpha, &self.rhs, &self.x)?;
                self.x = outcome.x;
                Ok(StepReport {
                    converged: outcome.converged && outcome.residual < self.tolerance,
                    diagnostics: vec![
                        ("LinearIterations", outcome.iterations as f64),
                        ("LinearResidual", outcome.residual),
                    ],
                })
            }
            TikhonovMode::TrackCg => {
                let (system, alpha) = (&self.system, self.alpha);
                let cg = self.cg.as_mut().ok_or_else(|| SolverError::state("CG state missing"))?;
                let residual = cg.step(|v| system.apply(alpha, v))?;
                self.x.clear();
                self.x.extend_from_slice(cg.x());
                Ok(StepReport {
                    converged: residual < self.tolerance,
                    diagnostics: vec![("CgResidual", residual)],
                })
            }
        }
    }
}

pub type TikhonovSolver = IterativeSolver<TikhonovScheme>;

impl IterativeSolver<TikhonovScheme> {
    /// Tikhonov solver for `problem`
    pub fn tikhonov(problem: Problem, params: &TikhonovParams, options: IterationOptions) -> SolverResult<Self> {
        let scheme = TikhonovScheme::new(&problem, params, options.tolerance)?;
        let objective = Objective::new(problem, params.prior, params.alpha)?.with_fidelity_weight(1.0);
        IterativeSolver::new(scheme, objective, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::operators::{Boundary, ConvolutionOperator};
    use crate::solvers::driver::{SolverState, StopReason};
    use std::sync::Arc;

    fn noisy_signal(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| if i < n / 2 { 0.0 } else { 1.0 } + 0.05 * ((i * 7919) % 13) as f64 / 13.0)
            .collect()
    }

    #[test]
    fn test_small_alpha_recovers_input() {
        let b = noisy_signal(40);
        let g = Geometry::new(&[40]).unwrap();
        let problem = Problem::denoising(b.clone(), g).unwrap();
        let params = TikhonovParams {
            alpha: 1e-8,
            prior: PriorKind::FirstOrderTikhonov,
            ..Default::default()
        };
        let mut solver = TikhonovSolver::tikhonov(problem, &params, IterationOptions::default()).unwrap();
        let outcome = solver.run().unwrap();

        for (x, bi) in outcome.x.iter().zip(&b) {
            assert!((x - bi).abs() < 1e-6, "{} vs {}", x, bi);
        }
        assert_eq!(outcome.state, SolverState::Converged);
    }

    #[test]
    fn test_zeroth_order_closed_form() {
        // A = I, R = I: x = b / (1 + α)
        let b = noisy_signal(10);
        let g = Geometry::new(&[10]).unwrap();
        let problem = Problem::denoising(b.clone(), g).unwrap();
        let params = TikhonovParams {
            alpha: 0.5,
            prior: PriorKind::ZerothOrderTikhonov,
            ..Default::default()
        };
        let outcome = TikhonovSolver::tikhonov(problem, &params, IterationOptions::default())
            .unwrap()
            .run()
            .unwrap();
        for (x, bi) in outcome.x.iter().zip(&b) {
            assert!((x - bi / 1.5).abs() < 1e-8);
        }
    }

    #[test]
    fn test_total_is_the_minimized_functional() {
        // A = I, R = I: x* = b / (1 + α) minimizes ||x - b||² + α||x||²
        let b = noisy_signal(10);
        let g = Geometry::new(&[10]).unwrap();
        let problem = Problem::denoising(b.clone(), g).unwrap();
        let alpha = 0.5;
        let params = TikhonovParams { alpha, prior: PriorKind::ZerothOrderTikhonov, ..Default::default() };
        let mut solver = TikhonovSolver::tikhonov(problem, &params, IterationOptions::default()).unwrap();
        let x = solver.run().unwrap().x;

        let functional = |x: &[f64]| {
            let data: f64 = x.iter().zip(&b).map(|(a, bi)| (a - bi) * (a - bi)).sum();
            let reg: f64 = x.iter().map(|v| v * v).sum();
            data + alpha * reg
        };
        let total = *solver.record().get("Total").unwrap().last().unwrap();
        assert!((total - functional(&x)).abs() < 1e-10, "{} vs {}", total, functional(&x));

        // Any perturbation of the solution raises the recorded functional
        for i in 0..x.len() {
            for eps in [1e-3, -1e-3] {
                let mut y = x.clone();
                y[i] += eps;
                assert!(functional(&y) > total);
            }
        }
    }

    #[test]
    fn test_linear_solvers_agree() {
        let g = Geometry::new(&[16, 8]).unwrap();
        let op = Arc::new(ConvolutionOperator::gaussian(&g, &[1.0, 1.0]).unwrap());
        let b: Vec<f64> = (0..128).map(|i| ((i % 16) as f64 / 4.0).floor()).collect();
        let problem = Problem::new(b, g, op).unwrap().with_boundary(Boundary::Periodic);

        let solve = |linear_solver: LinearSolver| {
            let params = TikhonovParams { alpha: 0.05, linear_solver, ..Default::default() };
            TikhonovSolver::tikhonov(problem.clone(), &params, IterationOptions::default())
                .unwrap()
                .run()
                .unwrap()
                .x
        };

        let x_cg = solve(LinearSolver::ConjugateGradient { tolerance: 1e-12, max_iterations: 1000 });
        let x_fourier = solve(LinearSolver::Fourier);
        let x_dense = solve(LinearSolver::Dense);
        for i in 0..128 {
            assert!((x_cg[i] - x_fourier[i]).abs() < 1e-7, "cg/fourier at {}", i);
            assert!((x_dense[i] - x_fourier[i]).abs() < 1e-9, "dense/fourier at {}", i);
        }
    }

    #[test]
    fn test_track_cg_records_residual() {
        let b = noisy_signal(30);
        let g = Geometry::new(&[30]).unwrap();
        let problem = Problem::denoising(b, g).unwrap();
        let params = TikhonovParams { alpha: 0.1, mode: TikhonovMode::TrackCg, ..Default::default() };
        let options = IterationOptions { iterations: 5, tolerance: 0.0, ..Default::default() };
        let mut solver = TikhonovSolver::tikhonov(problem, &params, options).unwrap();
        let outcome = solver.run().unwrap();

        assert_eq!(outcome.iterations, 5);
        assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
        let residuals = solver.record().get("CgResidual").unwrap();
        assert_eq!(residuals.len(), 5);
        assert!(residuals[4] < residuals[0], "CG residual should drop: {:?}", residuals);
    }

    #[test]
    fn test_rejects_total_variation_prior() {
        let g = Geometry::new(&[4]).unwrap();
        let problem = Problem::denoising(vec![0.0; 4], g).unwrap();
        let params = TikhonovParams { prior: PriorKind::TotalVariation, ..Default::default() };
        assert!(matches!(
            TikhonovSolver::tikhonov(problem, &params, IterationOptions::default()),
            Err(SolverError::Configuration { .. })
        ));
    }

    #[test]
    fn test_track_cg_requires_cg() {
        let params = TikhonovParams {
            mode: TikhonovMode::TrackCg,
            linear_solver: LinearSolver::Dense,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
