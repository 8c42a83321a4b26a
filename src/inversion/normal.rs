//! Regularized normal equations
//!
//! Solves `(AᵀA + w R) x = rhs` with `R = I` or `R = DᵀD`. Shared by the
//! Tikhonov solver, the ADMM x-update (`w = ρ`) and the primal-dual primal
//! step (`R = I`, `w = 1/τ`).
//!
//! Three methods are available:
//! - conjugate gradient on the operator (always applicable, warm-started)
//! - Fourier diagonalization when every term is circulant on the grid
//! - dense Cholesky on the materialized matrix (small problems only)

use std::sync::Arc;

use nalgebra::{linalg::Cholesky, DMatrix, DVector, Dyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::fft::Fft3dPlan;
use crate::kernels::negative_laplacian_symbol;
use crate::operators::{Boundary, DifferenceOperator, LinearOperator};
use crate::solvers::cg::{cg_solve, CgState};

/// Largest unknown count for which the dense system is materialized
pub const MAX_DENSE_UNKNOWNS: usize = 4096;

/// Symbols below this fraction of the largest one make the system singular
const SINGULAR_SYMBOL: f64 = 1e-14;

/// Regularization operator R in the normal equations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regularization {
    /// R = I
    Identity,
    /// R = DᵀD (negative Laplacian)
    Gradient,
}

/// Method used to solve the normal equations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LinearSolver {
    ConjugateGradient { tolerance: f64, max_iterations: usize },
    Fourier,
    Dense,
}

impl Default for LinearSolver {
    fn default() -> Self {
        LinearSolver::ConjugateGradient { tolerance: 1e-8, max_iterations: 100 }
    }
}

impl LinearSolver {
    pub fn validate(&self) -> SolverResult<()> {
        if let LinearSolver::ConjugateGradient { tolerance, max_iterations } = *self {
            if !(tolerance.is_finite() && tolerance > 0.0) {
                return Err(SolverError::config("cg_tolerance", tolerance, "must be positive"));
            }
            if max_iterations == 0 {
                return Err(SolverError::config("cg_iterations", max_iterations, "must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Result of one linear solve
#[derive(Clone, Debug)]
pub struct LinearSolveOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    /// Relative residual (0 for direct methods)
    pub residual: f64,
    pub converged: bool,
}

/// Precomputed Fourier diagonal of AᵀA and R
#[derive(Clone, Debug)]
struct FourierSystem {
    plan: Fft3dPlan,
    /// |Ĥ|²
    data_symbol: Vec<f64>,
    /// 1 or the symbol of DᵀD
    reg_symbol: Vec<f64>,
}

/// Materialized AᵀA and R with a factorization cached per weight
struct DenseSystem {
    ata: DMatrix<f64>,
    reg: DMatrix<f64>,
    factor: Option<(f64, Cholesky<f64, Dyn>)>,
}

pub struct NormalEquations {
    operator: Arc<dyn LinearOperator>,
    difference: DifferenceOperator,
    regularization: Regularization,
    method: LinearSolver,
    fourier: Option<FourierSystem>,
    dense: Option<DenseSystem>,
}

impl std::fmt::Debug for NormalEquations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalEquations")
            .field("regularization", &self.regularization)
            .field("method", &self.method)
            .finish()
    }
}

impl NormalEquations {
    /// Set up the system, precomputing whatever the method needs.
    pub fn new(
        operator: Arc<dyn LinearOperator>,
        difference: DifferenceOperator,
        regularization: Regularization,
        method: LinearSolver,
    ) -> SolverResult<Self> {
        method.validate()?;
        let n = difference.geometry().n_total();
        if operator.domain_len() != n {
            return Err(SolverError::shape(n, operator.domain_len(), "normal equations operator"));
        }

        let mut system = Self {
            operator,
            difference,
            regularization,
            method: method.clone(),
            fourier: None,
            dense: None,
        };

        match method {
            LinearSolver::ConjugateGradient { .. } => {}
            LinearSolver::Fourier => system.fourier = Some(system.build_fourier()?),
            LinearSolver::Dense => system.dense = Some(system.build_dense()?),
        }
        Ok(system)
    }

    pub fn method(&self) -> &LinearSolver {
        &self.method
    }

    fn build_fourier(&self) -> SolverResult<FourierSystem> {
        let geometry = self.difference.geometry();
        let transfer = self.operator.transfer_function().ok_or_else(|| {
            SolverError::config("linear_solver", "fourier", "forward operator has no Fourier transfer function")
        })?;
        geometry.check_len(transfer.len(), "transfer function")?;

        let plan = Fft3dPlan::for_geometry(geometry);
        let data_symbol = transfer.iter().map(|h: &Complex64| h.norm_sqr()).collect();
        let reg_symbol = match self.regularization {
            Regularization::Identity => vec![1.0; geometry.n_total()],
            Regularization::Gradient => {
                if self.difference.boundary() != Boundary::Periodic {
                    return Err(SolverError::config(
                        "linear_solver",
                        "fourier",
                        "gradient regularization needs a periodic boundary",
                    ));
                }
                negative_laplacian_symbol(geometry, &plan)
            }
        };

        Ok(FourierSystem { plan, data_symbol, reg_symbol })
    }

    fn build_dense(&self) -> SolverResult<DenseSystem> {
        let n = self.difference.geometry().n_total();
        if n > MAX_DENSE_UNKNOWNS {
            return Err(SolverError::config(
                "linear_solver",
                format!("dense ({n} unknowns)"),
                "too many unknowns for a dense solve",
            ));
        }

        let mut ata = DMatrix::<f64>::zeros(n, n);
        let mut reg = DMatrix::<f64>::identity(n, n);
        let mut unit = vec![0.0; n];

        // Column j is the image of the j-th unit vector
        for j in 0..n {
            unit[j] = 1.0;
            let col = self.operator.normal(&unit)?;
            ata.set_column(j, &DVector::from_vec(col));
            if self.regularization == Regularization::Gradient {
                let col = self.difference.negative_laplacian(&unit)?;
                reg.set_column(j, &DVector::from_vec(col));
            }
            unit[j] = 0.0;
        }

        Ok(DenseSystem { ata, reg, factor: None })
    }

    /// `(AᵀA + w R) x`
    pub fn apply(&self, weight: f64, x: &[f64]) -> SolverResult<Vec<f64>> {
        let mut out = self.operator.normal(x)?;
        match self.regularization {
            Regularization::Identity => {
                for (o, &xi) in out.iter_mut().zip(x) {
                    *o += weight * xi;
                }
            }
            Regularization::Gradient => {
                let lap = self.difference.negative_laplacian(x)?;
                for (o, li) in out.iter_mut().zip(lap) {
                    *o += weight * li;
                }
            }
        }
        Ok(out)
    }

    /// Start a stepwise CG solve (one iteration per `CgState::step`).
    pub fn cg_state(&self, weight: f64, rhs: &[f64], x0: &[f64]) -> SolverResult<CgState> {
        CgState::new(|v| self.apply(weight, v), rhs, x0)
    }

    /// Solve `(AᵀA + w R) x = rhs`, warm-starting iterative methods at `x0`.
    pub fn solve(&mut self, weight: f64, rhs: &[f64], x0: &[f64]) -> SolverResult<LinearSolveOutcome> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(SolverError::config("weight", weight, "must be non-negative"));
        }
        self.difference.geometry().check_len(rhs.len(), "normal equations rhs")?;

        match self.method {
            LinearSolver::ConjugateGradient { tolerance, max_iterations } => {
                let out = cg_solve(|v| self.apply(weight, v), rhs, x0, tolerance, max_iterations)?;
                Ok(LinearSolveOutcome {
                    x: out.x,
                    iterations: out.iterations,
                    residual: out.residual,
                    converged: out.converged,
                })
            }
            LinearSolver::Fourier => {
                let fourier = self.fourier.as_ref().ok_or_else(|| {
                    SolverError::state("fourier system was not initialized")
                })?;
                let denominators: Vec<f64> = fourier
                    .data_symbol
                    .iter()
                    .zip(&fourier.reg_symbol)
                    .map(|(&h2, &s)| h2 + weight * s)
                    .collect();
                let largest = denominators.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
                let singular = denominators.iter().filter(|d| d.abs() <= SINGULAR_SYMBOL * largest).count();
                if largest == 0.0 || singular > 0 {
                    return Err(SolverError::numerical(
                        0,
                        format!("normal equations are singular at {singular} frequencies (weight {weight:e})"),
                        x0.to_vec(),
                    ));
                }

                let mut spectrum = fourier.plan.forward_real(rhs);
                for (c, &denom) in spectrum.iter_mut().zip(&denominators) {
                    *c /= denom;
                }
                Ok(LinearSolveOutcome {
                    x: fourier.plan.inverse_real(spectrum),
                    iterations: 1,
                    residual: 0.0,
                    converged: true,
                })
            }
            LinearSolver::Dense => {
                let dense = self.dense.as_mut().ok_or_else(|| {
                    SolverError::state("dense system was not initialized")
                })?;

                let cached = matches!(&dense.factor, Some((w, _)) if *w == weight);
                if !cached {
                    let matrix = &dense.ata + &dense.reg * weight;
                    let factor = matrix.cholesky().ok_or_else(|| {
                        SolverError::numerical(
                            0,
                            format!("normal matrix is not positive definite (weight {weight:e})"),
                            x0.to_vec(),
                        )
                    })?;
                    log::debug!("factorized dense normal matrix for weight {:e}", weight);
                    dense.factor = Some((weight, factor));
                }

                let x = match &dense.factor {
                    Some((_, factor)) => factor.solve(&DVector::from_column_slice(rhs)),
                    None => return Err(SolverError::state("dense factorization missing")),
                };
                Ok(LinearSolveOutcome {
                    x: x.as_slice().to_vec(),
                    iterations: 1,
                    residual: 0.0,
                    converged: true,
                })
            }
        }
    }
}
