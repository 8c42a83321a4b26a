//! ADMM for non-smooth and first-order priors
//!
//! Solves
//!
//! x = argmin_x ½||Ax - b||₂² + α g(Dx)
//!
//! by splitting z = Dx with an unscaled multiplier y:
//! 1. x-update: (AᵀA + ρ DᵀD) x = Aᵀb + Dᵀ(ρz - y)
//! 2. z-update: prox of (α/ρ) g at Dx + y/ρ
//! 3. y-update: y = y + ρ(Dx - z)

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::inversion::normal::{LinearSolver, NormalEquations, Regularization};
use crate::inversion::problem::{Objective, Problem};
use crate::measures::{PriorKind, TvNorm};
use crate::operators::linear::{check_input, norm};
use crate::operators::{DifferenceOperator, LinearOperator};
use crate::solvers::driver::{IterationOptions, IterativeSolver, Scheme, StepReport};

/// Soft thresholding (shrinkage) operator for L1 regularization
/// shrink(x, t) = sign(x) * max(|x| - t, 0)
#[inline]
pub fn shrink(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

/// Group shrinkage of a stacked gradient: each pixel's vector across the
/// `dimension` blocks is scaled by max(1 - t/|v|, 0).
pub fn group_shrink(v: &[f64], dimension: usize, threshold: f64, out: &mut [f64]) -> SolverResult<()> {
    check_stacked(v.len(), dimension, "group shrinkage")?;
    check_input(v.len(), out, "group shrinkage output")?;
    let n = v.len() / dimension;
    for i in 0..n {
        let mag = (0..dimension)
            .map(|axis| v[axis * n + i] * v[axis * n + i])
            .sum::<f64>()
            .sqrt();
        let scale = if mag > threshold { 1.0 - threshold / mag } else { 0.0 };
        for axis in 0..dimension {
            out[axis * n + i] = scale * v[axis * n + i];
        }
    }
    Ok(())
}

/// A stacked array must split into `dimension >= 1` equal blocks.
pub(crate) fn check_stacked(len: usize, dimension: usize, context: &'static str) -> SolverResult<()> {
    if dimension == 0 {
        return Err(SolverError::shape(1, 0, context));
    }
    if len % dimension != 0 {
        return Err(SolverError::shape(len.div_ceil(dimension) * dimension, len, context));
    }
    Ok(())
}

/// Penalty parameter update rule
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RhoPolicy {
    #[default]
    Fixed,
    /// Residual balancing: scale ρ by `factor` when one residual exceeds
    /// `mu` times the other.
    Adaptive { mu: f64, factor: f64 },
}

impl RhoPolicy {
    pub fn adaptive() -> Self {
        RhoPolicy::Adaptive { mu: 10.0, factor: 2.0 }
    }
}

/// ADMM parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmParams {
    /// Regularization weight
    pub alpha: f64,
    /// Initial penalty parameter
    pub rho: f64,
    /// Total variation or first-order Tikhonov
    pub prior: PriorKind,
    pub tv_norm: TvNorm,
    pub rho_policy: RhoPolicy,
    /// Solver for the x-update
    pub linear_solver: LinearSolver,
}

impl Default for AdmmParams {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            rho: 0.5,
            prior: PriorKind::TotalVariation,
            tv_norm: TvNorm::default(),
            rho_policy: RhoPolicy::default(),
            linear_solver: LinearSolver::default(),
        }
    }
}

impl AdmmParams {
    pub fn validate(&self) -> SolverResult<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(SolverError::config("alpha", self.alpha, "must be positive and finite"));
        }
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(SolverError::config("rho", self.rho, "must be positive and finite"));
        }
        if self.prior == PriorKind::ZerothOrderTikhonov {
            return Err(SolverError::config(
                "prior",
                self.prior,
                "ADMM splits on the gradient; use total variation or first-order Tikhonov",
            ));
        }
        if let RhoPolicy::Adaptive { mu, factor } = self.rho_policy {
            if !(mu >= 1.0) {
                return Err(SolverError::config("mu", mu, "must be at least 1"));
            }
            if !(factor > 1.0) {
                return Err(SolverError::config("factor", factor, "must be greater than 1"));
            }
        }
        self.linear_solver.validate()
    }
}

pub struct AdmmScheme {
    system: NormalEquations,
    difference: DifferenceOperator,
    atb: Vec<f64>,
    x: Vec<f64>,
    z: Vec<f64>,
    z_prev: Vec<f64>,
    y: Vec<f64>,
    dx: Vec<f64>,
    alpha: f64,
    rho: f64,
    prior: PriorKind,
    tv_norm: TvNorm,
    rho_policy: RhoPolicy,
    tolerance: f64,
}

impl AdmmScheme {
    pub fn new(problem: &Problem, params: &AdmmParams, tolerance: f64) -> SolverResult<Self> {
        params.validate()?;

        let difference = problem.difference_operator();
        let system = NormalEquations::new(
            problem.operator().clone(),
            difference.clone(),
            Regularization::Gradient,
            params.linear_solver.clone(),
        )?;

        let atb = problem.adjoint_observed()?;
        let x = problem.initial_guess()?;
        let z = difference.forward(&x)?;
        let m = z.len();

        Ok(Self {
            system,
            difference,
            atb,
            x,
            z_prev: z.clone(),
            z,
            y: vec![0.0; m],
            dx: vec![0.0; m],
            alpha: params.alpha,
            rho: params.rho,
            prior: params.prior,
            tv_norm: params.tv_norm,
            rho_policy: params.rho_policy,
            tolerance,
        })
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// z = prox_{(α/ρ) g}(v), written into `self.z`
    fn update_z(&mut self, v: &[f64]) -> SolverResult<()> {
        let threshold = self.alpha / self.rho;
        match (self.prior, self.tv_norm) {
            (PriorKind::FirstOrderTikhonov, _) => {
                // argmin α|z|² + ρ/2 |z - v|²
                let scale = self.rho / (2.0 * self.alpha + self.rho);
                for (zi, &vi) in self.z.iter_mut().zip(v) {
                    *zi = scale * vi;
                }
            }
            (_, TvNorm::Isotropic) => {
                group_shrink(v, self.difference.dimension(), threshold, &mut self.z)?;
            }
            (_, TvNorm::Anisotropic) => {
                for (zi, &vi) in self.z.iter_mut().zip(v) {
                    *zi = shrink(vi, threshold);
                }
            }
        }
        Ok(())
    }
}

impl Scheme for AdmmScheme {
    fn name(&self) -> &'static str {
        "ADMM"
    }

    fn iterate(&self) -> &[f64] {
        &self.x
    }

    fn step(&mut self, _iteration: usize) -> SolverResult<StepReport> {
        let rho = self.rho;

        // x-subproblem: (AᵀA + ρ DᵀD) x = Aᵀb + Dᵀ(ρz - y)
        let v: Vec<f64> = self.z.iter().zip(&self.y).map(|(&zi, &yi)| rho * zi - yi).collect();
        let mut rhs = self.difference.adjoint(&v)?;
        for (r, &a) in rhs.iter_mut().zip(&self.atb) {
            *r += a;
        }
        self.x = self.system.solve(rho, &rhs, &self.x)?.x;

        // z-subproblem at Dx + y/ρ
        self.difference.forward_into(&self.x, &mut self.dx)?;
        let w: Vec<f64> = self.dx.iter().zip(&self.y).map(|(&d, &yi)| d + yi / rho).collect();
        std::mem::swap(&mut self.z, &mut self.z_prev);
        self.update_z(&w)?;

        // Multiplier update and residuals
        let mut primal_sq = 0.0;
        for ((yi, &d), &zi) in self.y.iter_mut().zip(&self.dx).zip(&self.z) {
            let r = d - zi;
            *yi += rho * r;
            primal_sq += r * r;
        }
        let primal = primal_sq.sqrt();

        let dz: Vec<f64> = self.z.iter().zip(&self.z_prev).map(|(&a, &b)| rho * (a - b)).collect();
        let dual = norm(&self.difference.adjoint(&dz)?);

        if let RhoPolicy::Adaptive { mu, factor } = self.rho_policy {
            if primal > mu * dual {
                self.rho *= factor;
            } else if dual > mu * primal {
                self.rho /= factor;
            }
            if self.rho != rho {
                log::debug!("ADMM rho {:e} -> {:e} (primal {:e}, dual {:e})", rho, self.rho, primal, dual);
            }
        }

        Ok(StepReport {
            converged: primal < self.tolerance && dual < self.tolerance,
            diagnostics: vec![("PrimalResidual", primal), ("DualResidual", dual), ("Rho", rho)],
        })
    }
}

pub type AdmmSolver = IterativeSolver<AdmmScheme>;

impl IterativeSolver<AdmmScheme> {
    /// ADMM solver for `problem`
    pub fn admm(problem: Problem, params: &AdmmParams, options: IterationOptions) -> SolverResult<Self> {
        let scheme = AdmmScheme::new(&problem, params, options.tolerance)?;
        let objective = Objective::new(problem, params.prior, params.alpha)?.with_tv_norm(params.tv_norm);
        IterativeSolver::new(scheme, objective, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::inversion::tikhonov::{TikhonovParams, TikhonovSolver};
    use crate::measures::total_variation;
    use crate::operators::Boundary;

    fn step_signal(n: usize) -> (Vec<f64>, Vec<f64>) {
        let clean: Vec<f64> = (0..n).map(|i| if i < n / 2 { 0.0 } else { 1.0 }).collect();
        let noisy = clean
            .iter()
            .enumerate()
            .map(|(i, &c)| c + 0.1 * ((i as f64 * 2.3).sin()))
            .collect();
        (clean, noisy)
    }

    #[test]
    fn test_shrink() {
        assert!((shrink(1.0, 0.5) - 0.5).abs() < 1e-10);
        assert!((shrink(-1.0, 0.5) - (-0.5)).abs() < 1e-10);
        assert!((shrink(0.3, 0.5) - 0.0).abs() < 1e-10);
        assert!((shrink(-0.3, 0.5) - 0.0).abs() < 1e-10);
    }

    #[test]
    fn test_group_shrink() {
        // Two pixels, two axes: (3, 4) has norm 5, (0.1, 0) is below threshold
        let v = [3.0, 0.1, 4.0, 0.0];
        let mut out = [0.0; 4];
        group_shrink(&v, 2, 1.0, &mut out).unwrap();
        assert!((out[0] - 2.4).abs() < 1e-12);
        assert!((out[2] - 3.2).abs() < 1e-12);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[3], 0.0);

        assert!(matches!(group_shrink(&v, 0, 1.0, &mut out), Err(SolverError::Shape { .. })));
        assert!(matches!(group_shrink(&v, 3, 1.0, &mut out), Err(SolverError::Shape { .. })));
        assert!(matches!(group_shrink(&v, 2, 1.0, &mut out[..3]), Err(SolverError::Shape { .. })));
    }

    #[test]
    fn test_admm_zero_data() {
        let g = Geometry::new(&[6, 6]).unwrap();
        let problem = Problem::denoising(vec![0.0; 36], g).unwrap();
        let mut solver = AdmmSolver::admm(problem, &AdmmParams::default(), IterationOptions::default()).unwrap();
        let outcome = solver.run().unwrap();
        for &val in &outcome.x {
            assert!(val.abs() < 1e-12, "Zero data should give zero estimate, got {}", val);
        }
    }

    #[test]
    fn test_tv_denoising_reduces_error() {
        let (clean, noisy) = step_signal(50);
        let g = Geometry::new(&[50]).unwrap();
        let problem = Problem::denoising(noisy.clone(), g.clone()).unwrap();
        let params = AdmmParams { alpha: 0.1, rho: 1.0, ..Default::default() };
        let options = IterationOptions { iterations: 100, tolerance: 1e-8, ..Default::default() };
        let outcome = AdmmSolver::admm(problem, &params, options).unwrap().run().unwrap();

        let d = DifferenceOperator::new(&g, Boundary::Neumann);
        let tv_noisy = total_variation(&noisy, &d, 1).unwrap();
        let tv_x = total_variation(&outcome.x, &d, 1).unwrap();
        assert!(tv_x < tv_noisy, "TV should drop: {} vs {}", tv_x, tv_noisy);

        let err = |x: &[f64]| x.iter().zip(&clean).map(|(a, b)| (a - b) * (a - b)).sum::<f64>();
        assert!(err(&outcome.x) < err(&noisy));
    }

    #[test]
    fn test_first_order_matches_tikhonov() {
        // ½|x - b|² + α|Dx|² has normal equations (I + 2α DᵀD) x = b
        let (_, noisy) = step_signal(30);
        let g = Geometry::new(&[30]).unwrap();
        let problem = Problem::denoising(noisy, g).unwrap();

        let params = AdmmParams { alpha: 0.2, rho: 1.0, prior: PriorKind::FirstOrderTikhonov, ..Default::default() };
        let options = IterationOptions { iterations: 500, tolerance: 1e-10, ..Default::default() };
        let x_admm = AdmmSolver::admm(problem.clone(), &params, options).unwrap().run().unwrap().x;

        let tik = TikhonovParams { alpha: 0.4, prior: PriorKind::FirstOrderTikhonov, ..Default::default() };
        let x_tik = TikhonovSolver::tikhonov(problem, &tik, IterationOptions::default()).unwrap().run().unwrap().x;

        for (a, b) in x_admm.iter().zip(&x_tik) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_adaptive_rho_changes_rho() {
        let (_, noisy) = step_signal(40);
        let g = Geometry::new(&[40]).unwrap();
        let problem = Problem::denoising(noisy, g).unwrap();
        let params = AdmmParams {
            alpha: 0.05,
            rho: 100.0,
            rho_policy: RhoPolicy::Adaptive { mu: 1.0, factor: 2.0 },
            ..Default::default()
        };
        let options = IterationOptions { iterations: 10, tolerance: 0.0, ..Default::default() };
        let mut solver = AdmmSolver::admm(problem, &params, options).unwrap();
        solver.run().unwrap();

        let rho = solver.record().get("Rho").unwrap();
        assert_eq!(rho[0], 100.0);
        assert!(rho.iter().any(|&r| r != 100.0), "rho never adapted: {:?}", rho);
        assert!(solver.record().get("PrimalResidual").is_some());
        assert!(solver.record().get("DualResidual").is_some());
    }

    #[test]
    fn test_rejects_zeroth_order_prior() {
        let params = AdmmParams { prior: PriorKind::ZerothOrderTikhonov, ..Default::default() };
        assert!(matches!(params.validate(), Err(SolverError::Configuration { .. })));
        let params = AdmmParams { rho: 0.0, ..Default::default() };
        assert!(params.validate().is_err());
    }
}
