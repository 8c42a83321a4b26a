//! Finite-difference gradient operator
//!
//! Forward differences along each active axis, stacked as `[Dx; Dy; Dz]`.
//! The adjoint is the negative backward divergence, so `Dᵀ D` is the
//! discrete negative Laplacian for the chosen boundary.

use serde::{Deserialize, Serialize};

use crate::error::SolverResult;
use crate::geometry::Geometry;
use crate::operators::linear::{check_input, LinearOperator};

/// Boundary handling of the forward difference at the last sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Zero flux: the last difference along each axis is 0.
    #[default]
    Neumann,
    /// Differences wrap around the grid.
    Periodic,
}

#[derive(Clone, Debug)]
pub struct DifferenceOperator {
    geometry: Geometry,
    boundary: Boundary,
}

impl DifferenceOperator {
    pub fn new(geometry: &Geometry, boundary: Boundary) -> Self {
        Self {
            geometry: geometry.clone(),
            boundary,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Number of stacked gradient components
    pub fn dimension(&self) -> usize {
        self.geometry.ndim
    }

    /// Upper bound of `‖D‖²`: 4 Σ 1/h²
    pub fn norm_squared_bound(&self) -> f64 {
        self.geometry.spacing().iter().map(|h| 4.0 / (h * h)).sum()
    }

    /// `Dᵀ D x`
    pub fn negative_laplacian(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        let g = self.forward(x)?;
        self.adjoint(&g)
    }

    /// (length, stride, 1/h) per active axis
    fn axes(&self) -> Vec<(usize, usize, f64)> {
        let (nx, ny, nz) = self.geometry.dims;
        let (vsx, vsy, vsz) = self.geometry.voxel_size;
        [(nx, 1, 1.0 / vsx), (ny, nx, 1.0 / vsy), (nz, nx * ny, 1.0 / vsz)]
            .into_iter()
            .take(self.geometry.ndim)
            .collect()
    }

    #[inline]
    fn next(&self, c: usize, n: usize) -> Option<usize> {
        if c + 1 < n {
            Some(c + 1)
        } else {
            match self.boundary {
                Boundary::Periodic => Some(0),
                Boundary::Neumann => None,
            }
        }
    }

    #[inline]
    fn prev(&self, c: usize, n: usize) -> Option<usize> {
        if c > 0 {
            Some(c - 1)
        } else {
            match self.boundary {
                Boundary::Periodic => Some(n - 1),
                Boundary::Neumann => None,
            }
        }
    }

    /// Forward differences into a pre-allocated buffer of length `dimension * n`
    pub fn forward_into(&self, x: &[f64], out: &mut [f64]) -> SolverResult<()> {
        check_input(self.domain_len(), x, "difference forward")?;
        check_input(self.range_len(), out, "difference forward output")?;
        let n_total = self.geometry.n_total();

        for (axis, &(n, stride, h)) in self.axes().iter().enumerate() {
            let block = &mut out[axis * n_total..(axis + 1) * n_total];
            for (idx, g) in block.iter_mut().enumerate() {
                let c = (idx / stride) % n;
                *g = match self.next(c, n) {
                    Some(cp1) => {
                        let idx_p = idx - c * stride + cp1 * stride;
                        (x[idx_p] - x[idx]) * h
                    }
                    None => 0.0,
                };
            }
        }
        Ok(())
    }

    /// Negative divergence (adjoint of the forward difference) into `out`
    pub fn adjoint_into(&self, p: &[f64], out: &mut [f64]) -> SolverResult<()> {
        check_input(self.range_len(), p, "difference adjoint")?;
        check_input(self.domain_len(), out, "difference adjoint output")?;
        let n_total = self.geometry.n_total();
        out.iter_mut().for_each(|v| *v = 0.0);

        for (axis, &(n, stride, h)) in self.axes().iter().enumerate() {
            let block = &p[axis * n_total..(axis + 1) * n_total];
            for (idx, d) in out.iter_mut().enumerate() {
                let c = (idx / stride) % n;
                // Slots with no forward neighbour were never written by D
                let own = if self.next(c, n).is_some() { block[idx] } else { 0.0 };
                let before = match self.prev(c, n) {
                    Some(cm1) => block[idx - c * stride + cm1 * stride],
                    None => 0.0,
                };
                *d += (before - own) * h;
            }
        }
        Ok(())
    }
}

impl LinearOperator for DifferenceOperator {
    fn domain_len(&self) -> usize {
        self.geometry.n_total()
    }

    fn range_len(&self) -> usize {
        self.dimension() * self.geometry.n_total()
    }

    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        let mut out = vec![0.0; self.range_len()];
        self.forward_into(x, &mut out)?;
        Ok(out)
    }

    fn adjoint(&self, p: &[f64]) -> SolverResult<Vec<f64>> {
        let mut out = vec![0.0; self.domain_len()];
        self.adjoint_into(p, &mut out)?;
        Ok(out)
    }
}
