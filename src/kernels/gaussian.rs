//! Gaussian point-spread kernel
//!
//! Builds a sampled Gaussian centred at index (0, 0, 0) with wraparound, the
//! layout expected by FFT-based periodic convolution.

use crate::error::{SolverError, SolverResult};
use crate::geometry::{idx3d, Geometry};

/// Signed wraparound offset of index `i` on an axis of length `n`
#[inline]
fn wrapped(i: usize, n: usize) -> f64 {
    if i <= n / 2 { i as f64 } else { (i as i64 - n as i64) as f64 }
}

/// Generate a Gaussian kernel in image space
///
/// # Arguments
/// * `geometry` - Grid dimensions and voxel sizes
/// * `sigma` - Standard deviation per active axis, in physical units.
///   A zero entry collapses the kernel along that axis.
///
/// # Returns
/// Flattened kernel of size nx*ny*nz in Fortran order, normalized so sum = 1
pub fn gaussian_kernel(geometry: &Geometry, sigma: &[f64]) -> SolverResult<Vec<f64>> {
    if sigma.len() != geometry.ndim {
        return Err(SolverError::shape(geometry.ndim, sigma.len(), "gaussian sigma"));
    }
    if sigma.iter().any(|&s| !(s.is_finite() && s >= 0.0)) {
        return Err(SolverError::config(
            "sigma",
            format!("{:?}", sigma),
            "standard deviations must be non-negative and finite",
        ));
    }

    let (nx, ny, nz) = geometry.dims;
    let (vsx, vsy, vsz) = geometry.voxel_size;
    let s = |axis: usize| sigma.get(axis).copied().unwrap_or(0.0);
    let (sx, sy, sz) = (s(0), s(1), s(2));

    // exp(-d²/2σ²) per axis; σ = 0 keeps only the zero offset
    let weight = |d: f64, sd: f64| -> f64 {
        if sd == 0.0 {
            if d == 0.0 { 1.0 } else { 0.0 }
        } else {
            (-d * d / (2.0 * sd * sd)).exp()
        }
    };

    let mut g = vec![0.0; geometry.n_total()];
    let mut total = 0.0;

    for k in 0..nz {
        let wz = weight(wrapped(k, nz) * vsz, sz);
        for j in 0..ny {
            let wy = weight(wrapped(j, ny) * vsy, sy);
            for i in 0..nx {
                let w = weight(wrapped(i, nx) * vsx, sx) * wy * wz;
                g[idx3d(i, j, k, nx, ny)] = w;
                total += w;
            }
        }
    }

    // Normalize so sum = 1 (total >= 1 since the origin has weight 1)
    for val in g.iter_mut() {
        *val /= total;
    }

    Ok(g)
}
