//! Image geometry: shape, voxel spacing and orientation
//!
//! Arrays are stored flat in Fortran order (x varies fastest) to match the
//! NIfTI convention: `index = i + j*nx + k*nx*ny`. Unused axes have size 1.

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// Shape, spacing and orientation of an unknown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Dimensions (nx, ny, nz), padded with 1
    pub dims: (usize, usize, usize),
    /// Number of spatial axes (1..=3)
    pub ndim: usize,
    /// Voxel sizes per axis
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl Geometry {
    /// Geometry with unit spacing for a 1-, 2- or 3-dimensional shape.
    pub fn new(shape: &[usize]) -> SolverResult<Self> {
        if shape.is_empty() || shape.len() > 3 {
            return Err(SolverError::config(
                "shape",
                format!("{:?}", shape),
                "expected 1 to 3 axes",
            ));
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(SolverError::config(
                "shape",
                format!("{:?}", shape),
                "axes must be non-empty",
            ));
        }

        let dim = |axis: usize| shape.get(axis).copied().unwrap_or(1);
        Ok(Self {
            dims: (dim(0), dim(1), dim(2)),
            ndim: shape.len(),
            voxel_size: (1.0, 1.0, 1.0),
            affine: identity_affine((1.0, 1.0, 1.0)),
        })
    }

    /// Infer the dimensionality from trailing unit axes, e.g. (64, 64, 1) is 2D.
    pub fn from_dims(nx: usize, ny: usize, nz: usize) -> SolverResult<Self> {
        let shape = if nz > 1 {
            vec![nx, ny, nz]
        } else if ny > 1 {
            vec![nx, ny]
        } else {
            vec![nx]
        };
        Self::new(&shape)
    }

    /// Set the voxel spacing (one value per axis). Resets the affine to the
    /// matching scaling matrix.
    pub fn with_voxel_size(mut self, spacing: &[f64]) -> SolverResult<Self> {
        if spacing.len() != self.ndim {
            return Err(SolverError::shape(self.ndim, spacing.len(), "voxel spacing"));
        }
        if spacing.iter().any(|&h| !(h.is_finite() && h > 0.0)) {
            return Err(SolverError::config(
                "voxel_size",
                format!("{:?}", spacing),
                "spacing must be positive and finite",
            ));
        }

        let h = |axis: usize| spacing.get(axis).copied().unwrap_or(1.0);
        self.voxel_size = (h(0), h(1), h(2));
        self.affine = identity_affine(self.voxel_size);
        Ok(self)
    }

    /// Set the orientation/origin affine.
    pub fn with_affine(mut self, affine: [f64; 16]) -> Self {
        self.affine = affine;
        self
    }

    /// Total number of voxels
    pub fn n_total(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Shape restricted to the active axes
    pub fn shape(&self) -> Vec<usize> {
        [self.dims.0, self.dims.1, self.dims.2][..self.ndim].to_vec()
    }

    /// Spacing restricted to the active axes
    pub fn spacing(&self) -> Vec<f64> {
        [self.voxel_size.0, self.voxel_size.1, self.voxel_size.2][..self.ndim].to_vec()
    }

    /// Check that a flat array matches this geometry.
    pub fn check_len(&self, len: usize, context: &'static str) -> SolverResult<()> {
        if len != self.n_total() {
            return Err(SolverError::shape(self.n_total(), len, context));
        }
        Ok(())
    }
}

/// Diagonal affine with voxel scaling
pub fn identity_affine(voxel_size: (f64, f64, f64)) -> [f64; 16] {
    let (vsx, vsy, vsz) = voxel_size;
    [
        vsx, 0.0, 0.0, 0.0,
        0.0, vsy, 0.0, 0.0,
        0.0, 0.0, vsz, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Index into a 3D array stored in Fortran order (column-major)
/// index = x + y*nx + z*nx*ny
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}
