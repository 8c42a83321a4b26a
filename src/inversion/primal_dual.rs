//! First-order primal-dual algorithm (Chambolle-Pock)
//!
//! Solves
//!
//! x = argmin_x ½||Ax - b||₂² + α g(Kx)
//!
//! with K = D for total variation and first-order Tikhonov, K = I for
//! zeroth-order Tikhonov. Each iteration:
//! 1. p = prox_{σF*}(p + σ K x̄)
//! 2. x = prox_{τf}(x - τ Kᵀp), i.e. (AᵀA + I/τ) x = Aᵀb + (x - τKᵀp)/τ
//! 3. x̄ = x + θ(x - x_old)
//!
//! Reference:
//! Chambolle A, Pock T. A first-order primal-dual algorithm for convex
//! problems with applications to imaging. JMIV 2011;40(1):120-145.

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::inversion::admm::check_stacked;
use crate::inversion::normal::{LinearSolver, NormalEquations, Regularization};
use crate::inversion::problem::{Objective, Problem};
use crate::measures::{PriorKind, TvNorm};
use crate::operators::linear::norm;
use crate::operators::{DifferenceOperator, LinearOperator};
use crate::solvers::driver::{IterationOptions, IterativeSolver, Scheme, StepReport};

/// Extrapolation and step-size schedule
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum PrimalDualVariant {
    /// θ = 1, constant steps
    #[default]
    Standard,
    /// θ = 1/√(1 + 2γτ), τ ← θτ, σ ← σ/θ. Needs a strongly convex data
    /// term (injective A).
    Accelerated { gamma: f64 },
}

/// Primal-dual parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimalDualParams {
    /// Regularization weight
    pub alpha: f64,
    pub prior: PriorKind,
    pub tv_norm: TvNorm,
    pub variant: PrimalDualVariant,
    /// Primal step; defaults to 1/‖K‖
    pub tau: Option<f64>,
    /// Dual step; defaults to 1/‖K‖
    pub sigma: Option<f64>,
    /// Solver for the primal step when A is not the identity
    pub linear_solver: LinearSolver,
}

impl Default for PrimalDualParams {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            prior: PriorKind::TotalVariation,
            tv_norm: TvNorm::default(),
            variant: PrimalDualVariant::default(),
            tau: None,
            sigma: None,
            linear_solver: LinearSolver::default(),
        }
    }
}

impl PrimalDualParams {
    pub fn validate(&self) -> SolverResult<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(SolverError::config("alpha", self.alpha, "must be positive and finite"));
        }
        for (name, step) in [("tau", self.tau), ("sigma", self.sigma)] {
            if let Some(step) = step {
                if !(step.is_finite() && step > 0.0) {
                    return Err(SolverError::config(name, step, "step size must be positive"));
                }
            }
        }
        if let PrimalDualVariant::Accelerated { gamma } = self.variant {
            if !(gamma.is_finite() && gamma > 0.0) {
                return Err(SolverError::config("gamma", gamma, "must be positive"));
            }
        }
        self.linear_solver.validate()
    }

    /// Resolve (τ, σ) for an operator with ‖K‖² = `norm_sq`, checking
    /// τσ‖K‖² ≤ 1.
    pub fn step_sizes(&self, norm_sq: f64) -> SolverResult<(f64, f64)> {
        let (tau, sigma) = match (self.tau, self.sigma) {
            (None, None) => {
                let step = 1.0 / norm_sq.sqrt();
                (step, step)
            }
            (Some(tau), None) => (tau, 1.0 / (tau * norm_sq)),
            (None, Some(sigma)) => (1.0 / (sigma * norm_sq), sigma),
            (Some(tau), Some(sigma)) => (tau, sigma),
        };

        if tau * sigma * norm_sq > 1.0 + 1e-12 {
            return Err(SolverError::config(
                "tau*sigma",
                tau * sigma * norm_sq,
                "step sizes must satisfy tau * sigma * |K|^2 <= 1",
            ));
        }
        Ok((tau, sigma))
    }
}

/// The operator K the prior acts on
#[derive(Clone, Debug)]
enum DualMap {
    Gradient(DifferenceOperator),
    Identity,
}

impl DualMap {
    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        match self {
            DualMap::Gradient(d) => d.forward(x),
            DualMap::Identity => Ok(x.to_vec()),
        }
    }

    fn adjoint(&self, p: &[f64]) -> SolverResult<Vec<f64>> {
        match self {
            DualMap::Gradient(d) => d.adjoint(p),
            DualMap::Identity => Ok(p.to_vec()),
        }
    }

    fn norm_squared(&self) -> f64 {
        match self {
            DualMap::Gradient(d) => d.norm_squared_bound(),
            DualMap::Identity => 1.0,
        }
    }

    /// Number of stacked components per pixel
    fn dimension(&self) -> usize {
        match self {
            DualMap::Gradient(d) => d.dimension(),
            DualMap::Identity => 1,
        }
    }
}

/// Projection of each pixel's dual vector onto the ball of radius `threshold`
pub fn project_ball(p: &mut [f64], dimension: usize, threshold: f64) -> SolverResult<()> {
    check_stacked(p.len(), dimension, "dual projection")?;
    let n = p.len() / dimension;
    for i in 0..n {
        let norm = (0..dimension)
            .map(|axis| p[axis * n + i] * p[axis * n + i])
            .sum::<f64>()
            .sqrt();
        if norm > threshold {
            let scale = threshold / norm;
            for axis in 0..dimension {
                p[axis * n + i] *= scale;
            }
        }
    }
    Ok(())
}

pub struct PrimalDualScheme {
    k: DualMap,
    /// None when A = I (closed-form primal step)
    system: Option<NormalEquations>,
    atb: Vec<f64>,
    x: Vec<f64>,
    x_bar: Vec<f64>,
    p: Vec<f64>,
    alpha: f64,
    prior: PriorKind,
    tv_norm: TvNorm,
    variant: PrimalDualVariant,
    tau: f64,
    sigma: f64,
    tolerance: f64,
}

impl PrimalDualScheme {
    pub fn new(problem: &Problem, params: &PrimalDualParams, tolerance: f64) -> SolverResult<Self> {
        params.validate()?;

        let k = match params.prior {
            PriorKind::ZerothOrderTikhonov => DualMap::Identity,
            PriorKind::FirstOrderTikhonov | PriorKind::TotalVariation => {
                DualMap::Gradient(problem.difference_operator())
            }
        };
        let (tau, sigma) = params.step_sizes(k.norm_squared())?;

        let system = if problem.operator().is_identity() {
            None
        } else {
            Some(NormalEquations::new(
                problem.operator().clone(),
                problem.difference_operator(),
                Regularization::Identity,
                params.linear_solver.clone(),
            )?)
        };

        let x = problem.initial_guess()?;
        let p = vec![0.0; k.dimension() * x.len()];

        Ok(Self {
            k,
            system,
            atb: problem.adjoint_observed()?,
            x_bar: x.clone(),
            x,
            p,
            alpha: params.alpha,
            prior: params.prior,
            tv_norm: params.tv_norm,
            variant: params.variant,
            tau,
            sigma,
            tolerance,
        })
    }

    pub fn step_sizes(&self) -> (f64, f64) {
        (self.tau, self.sigma)
    }

    /// p = prox_{σF*}(v) for F = α g
    fn dual_prox(&mut self) -> SolverResult<()> {
        match (self.prior, self.tv_norm) {
            (PriorKind::TotalVariation, TvNorm::Isotropic) => {
                project_ball(&mut self.p, self.k.dimension(), self.alpha)?;
            }
            (PriorKind::TotalVariation, TvNorm::Anisotropic) => {
                let alpha = self.alpha;
                self.p.iter_mut().for_each(|v| *v = v.clamp(-alpha, alpha));
            }
            // F(u) = α|u|², F*(p) = |p|²/(4α)
            _ => {
                let scale = 1.0 / (1.0 + self.sigma / (2.0 * self.alpha));
                self.p.iter_mut().for_each(|v| *v *= scale);
            }
        }
        Ok(())
    }
}

impl Scheme for PrimalDualScheme {
    fn name(&self) -> &'static str {
        "PrimalDual"
    }

    fn iterate(&self) -> &[f64] {
        &self.x
    }

    fn step(&mut self, _iteration: usize) -> SolverResult<StepReport> {
        let (tau, sigma) = (self.tau, self.sigma);

        // Dual ascent at the extrapolated point
        let p_old = self.p.clone();
        let k_xbar = self.k.forward(&self.x_bar)?;
        for (pi, &g) in self.p.iter_mut().zip(&k_xbar) {
            *pi += sigma * g;
        }
        self.dual_prox()?;

        // Primal descent: v = x - τ Kᵀp
        let x_old = self.x.clone();
        let kt_p = self.k.adjoint(&self.p)?;
        let v: Vec<f64> = self.x.iter().zip(&kt_p).map(|(&xi, &ki)| xi - tau * ki).collect();

        // (AᵀA + I/τ) x = Aᵀb + v/τ
        self.x = match self.system.as_mut() {
            None => v
                .iter()
                .zip(&self.atb)
                .map(|(&vi, &bi)| (tau * bi + vi) / (tau + 1.0))
                .collect(),
            Some(system) => {
                let rhs: Vec<f64> = v.iter().zip(&self.atb).map(|(&vi, &bi)| bi + vi / tau).collect();
                system.solve(1.0 / tau, &rhs, &x_old)?.x
            }
        };

        let theta = match self.variant {
            PrimalDualVariant::Standard => 1.0,
            PrimalDualVariant::Accelerated { gamma } => {
                let theta = 1.0 / (1.0 + 2.0 * gamma * tau).sqrt();
                self.tau = theta * tau;
                self.sigma = sigma / theta;
                theta
            }
        };

        // Extragradient: x̄ = x + θ(x - x_old)
        for ((xb, &xi), &xo) in self.x_bar.iter_mut().zip(&self.x).zip(&x_old) {
            *xb = xi + theta * (xi - xo);
        }

        // Residuals of the optimality conditions
        let dp: Vec<f64> = p_old.iter().zip(&self.p).map(|(&a, &b)| a - b).collect();
        let dx: Vec<f64> = x_old.iter().zip(&self.x).map(|(&a, &b)| a - b).collect();
        let kt_dp = self.k.adjoint(&dp)?;
        let k_dx = self.k.forward(&dx)?;

        let primal_res: Vec<f64> = dx.iter().zip(&kt_dp).map(|(&d, &k)| d / tau - k).collect();
        let dual_res: Vec<f64> = dp.iter().zip(&k_dx).map(|(&d, &k)| d / sigma - k).collect();
        let primal = norm(&primal_res);
        let dual = norm(&dual_res);

        Ok(StepReport {
            converged: primal < self.tolerance && dual < self.tolerance,
            diagnostics: vec![("PrimalResidual", primal), ("DualResidual", dual), ("StepPrimal", tau)],
        })
    }
}

pub type PrimalDualSolver = IterativeSolver<PrimalDualScheme>;

impl IterativeSolver<PrimalDualScheme> {
    /// Primal-dual solver for `problem`
    pub fn primal_dual(problem: Problem, params: &PrimalDualParams, options: IterationOptions) -> SolverResult<Self> {
        let scheme = PrimalDualScheme::new(&problem, params, options.tolerance)?;
        let objective = Objective::new(problem, params.prior, params.alpha)?.with_tv_norm(params.tv_norm);
        IterativeSolver::new(scheme, objective, options)
    }
}
