//! Conjugate Gradient solver
//!
//! Solves Ax = b for symmetric positive definite A. The state can be stepped
//! one iteration at a time (to expose CG iterates to the outer driver) or run
//! to completion with `cg_solve`.

use crate::error::{SolverError, SolverResult};

/// Result of a complete CG solve
#[derive(Clone, Debug)]
pub struct CgOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    /// Relative residual ‖r‖ / ‖b‖
    pub residual: f64,
    pub converged: bool,
}

/// Iteration state of conjugate gradients for a fixed right-hand side.
#[derive(Clone, Debug)]
pub struct CgState {
    x: Vec<f64>,
    r: Vec<f64>,
    p: Vec<f64>,
    rsold: f64,
    b_norm: f64,
    iterations: usize,
}

impl CgState {
    /// Initialize from `x0`: r = b - A*x0, p = r
    pub fn new<F>(a_op: F, b: &[f64], x0: &[f64]) -> SolverResult<Self>
    where
        F: Fn(&[f64]) -> SolverResult<Vec<f64>>,
    {
        if b.len() != x0.len() {
            return Err(SolverError::shape(b.len(), x0.len(), "cg initial guess"));
        }
        let x = x0.to_vec();

        let ax = a_op(&x)?;
        let r: Vec<f64> = b.iter().zip(ax.iter())
            .map(|(&bi, &axi)| bi - axi)
            .collect();

        let p = r.clone();
        let rsold: f64 = r.iter().map(|&ri| ri * ri).sum();
        let b_norm: f64 = b.iter().map(|&bi| bi * bi).sum::<f64>().sqrt();

        Ok(Self { x, r, p, rsold, b_norm, iterations: 0 })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn into_x(self) -> Vec<f64> {
        self.x
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Relative residual ‖r‖ / ‖b‖ (absolute when b = 0)
    pub fn residual(&self) -> f64 {
        let r_norm = self.rsold.sqrt();
        if self.b_norm > 0.0 { r_norm / self.b_norm } else { r_norm }
    }

    pub fn is_converged(&self, tol: f64) -> bool {
        self.residual() < tol
    }

    /// One CG iteration. Returns the relative residual afterwards.
    pub fn step<F>(&mut self, a_op: F) -> SolverResult<f64>
    where
        F: Fn(&[f64]) -> SolverResult<Vec<f64>>,
    {
        // Exact solution already reached
        if self.rsold == 0.0 {
            return Ok(0.0);
        }

        let n = self.x.len();
        let ap = a_op(&self.p)?;

        let pap: f64 = self.p.iter().zip(ap.iter())
            .map(|(&pi, &api)| pi * api)
            .sum();

        if !pap.is_finite() || pap <= 0.0 {
            return Err(SolverError::numerical(
                self.iterations,
                format!("conjugate gradient curvature p'Ap = {pap:e}; system is not positive definite"),
                self.x.clone(),
            ));
        }

        let alpha = self.rsold / pap;

        // x = x + alpha * p
        for i in 0..n {
            self.x[i] += alpha * self.p[i];
        }

        // r = r - alpha * A*p
        for i in 0..n {
            self.r[i] -= alpha * ap[i];
        }

        let rsnew: f64 = self.r.iter().map(|&ri| ri * ri).sum();
        let beta = rsnew / self.rsold;

        // p = r + beta * p
        for i in 0..n {
            self.p[i] = self.r[i] + beta * self.p[i];
        }

        self.rsold = rsnew;
        self.iterations += 1;
        Ok(self.residual())
    }
}

/// Conjugate gradient solver
///
/// Solves Ax = b where A is a linear operator represented by a closure.
///
/// # Arguments
/// * `a_op` - Closure that computes A*x
/// * `b` - Right-hand side vector
/// * `x0` - Initial guess (warm start)
/// * `tol` - Convergence tolerance on ‖r‖/‖b‖
/// * `max_iter` - Maximum iterations
pub fn cg_solve<F>(
    a_op: F,
    b: &[f64],
    x0: &[f64],
    tol: f64,
    max_iter: usize,
) -> SolverResult<CgOutcome>
where
    F: Fn(&[f64]) -> SolverResult<Vec<f64>>,
{
    let mut state = CgState::new(&a_op, b, x0)?;

    while !state.is_converged(tol) && state.iterations() < max_iter {
        state.step(&a_op)?;
    }

    let residual = state.residual();
    Ok(CgOutcome {
        iterations: state.iterations(),
        residual,
        converged: residual < tol,
        x: state.into_x(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cg_identity() {
        // Solve Ix = b (identity matrix)
        let b = vec![1.0, 2.0, 3.0];
        let x0 = vec![0.0, 0.0, 0.0];

        let out = cg_solve(|v| Ok(v.to_vec()), &b, &x0, 1e-10, 100).unwrap();

        for (xi, bi) in out.x.iter().zip(b.iter()) {
            assert!((xi - bi).abs() < 1e-8, "x should equal b");
        }
        assert!(out.converged);
        assert_eq!(out.iterations, 1);
    }

    #[test]
    fn test_cg_diagonal() {
        // Solve diag(2,3,4) * x = [2, 6, 12]
        // Solution: x = [1, 2, 3]
        let b = vec![2.0, 6.0, 12.0];
        let x0 = vec![0.0, 0.0, 0.0];
        let diag = vec![2.0, 3.0, 4.0];

        let out = cg_solve(
            |v| Ok(v.iter().zip(diag.iter()).map(|(&vi, &di)| vi * di).collect()),
            &b, &x0, 1e-10, 100
        ).unwrap();

        let expected = vec![1.0, 2.0, 3.0];
        for (xi, ei) in out.x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-8, "Expected {}, got {}", ei, xi);
        }
        assert!(out.iterations <= 3);
    }

    #[test]
    fn test_cg_warm_start_at_solution() {
        let b = vec![2.0, 6.0];
        let out = cg_solve(
            |v| Ok(vec![2.0 * v[0], 3.0 * v[1]]),
            &b, &[1.0, 2.0], 1e-12, 50
        ).unwrap();
        assert_eq!(out.iterations, 0);
        assert!(out.converged);
    }

    #[test]
    fn test_cg_stepwise_residual_decreases_to_zero() {
        // SPD tridiagonal 4x4: [2 -1; -1 2 -1; ...] + I
        let a_op = |v: &[f64]| -> SolverResult<Vec<f64>> {
            let n = v.len();
            Ok((0..n).map(|i| {
                let left = if i > 0 { v[i - 1] } else { 0.0 };
                let right = if i + 1 < n { v[i + 1] } else { 0.0 };
                3.0 * v[i] - left - right
            }).collect())
        };
        let b = vec![1.0, 0.0, 0.0, 1.0];
        let mut state = CgState::new(a_op, &b, &[0.0; 4]).unwrap();
        for _ in 0..4 {
            state.step(a_op).unwrap();
        }
        assert!(state.residual() < 1e-10, "CG converges in n steps, residual {}", state.residual());
    }

    #[test]
    fn test_cg_indefinite_fails() {
        let b = vec![1.0, 1.0];
        let err = cg_solve(|v| Ok(vec![v[0], -2.0 * v[1]]), &b, &[0.0, 0.0], 1e-10, 10);
        assert!(matches!(err, Err(SolverError::NumericalFailure { .. })));
    }
}
