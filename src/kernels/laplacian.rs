//! Laplacian kernel for regularization
//!
//! Discrete 7-point stencil Laplacian kernel. Its Fourier transform is the
//! symbol of `Dᵀ D` for the periodic forward-difference operator, which the
//! Fourier linear solver uses to diagonalize first-order Tikhonov systems.

use num_complex::Complex64;

use crate::fft::Fft3dPlan;
use crate::geometry::{idx3d, Geometry};

/// Generate Laplacian kernel in image space
///
/// Creates a 7-point stencil Laplacian centered at (0,0,0) for FFT compatibility.
/// The stencil is: [-2(1/dx² + 1/dy² + 1/dz²)] at center,
/// [1/dx²] at ±1 in x, [1/dy²] at ±1 in y, [1/dz²] at ±1 in z.
/// Neighbours wrap around, so axes of length 1 or 2 accumulate onto the
/// same entries and the kernel always sums to zero.
///
/// # Arguments
/// * `geometry` - Grid dimensions and voxel sizes
/// * `negative` - If true, return negative Laplacian
///
/// # Returns
/// Flattened Laplacian kernel array of size nx*ny*nz in Fortran order
pub fn laplacian_kernel(geometry: &Geometry, negative: bool) -> Vec<f64> {
    let (nx, ny, nz) = geometry.dims;
    let (vsx, vsy, vsz) = geometry.voxel_size;
    let mut l = vec![0.0; geometry.n_total()];

    let sign = if negative { -1.0 } else { 1.0 };

    let axes = [
        (nx, 1.0 / (vsx * vsx)),
        (ny, 1.0 / (vsy * vsy)),
        (nz, 1.0 / (vsz * vsz)),
    ];

    for (axis, &(n, h)) in axes.iter().enumerate().take(geometry.ndim) {
        l[0] -= sign * 2.0 * h;

        for offset in [1 % n, (n - 1) % n] {
            let idx = match axis {
                0 => idx3d(offset, 0, 0, nx, ny),
                1 => idx3d(0, offset, 0, nx, ny),
                _ => idx3d(0, 0, offset, nx, ny),
            };
            l[idx] += sign * h;
        }
    }

    l
}

/// Generate negative Laplacian kernel (the stencil of `Dᵀ D`)
pub fn negative_laplacian_kernel(geometry: &Geometry) -> Vec<f64> {
    laplacian_kernel(geometry, true)
}

/// Fourier symbol of the periodic `Dᵀ D` (real and non-negative)
pub fn negative_laplacian_symbol(geometry: &Geometry, plan: &Fft3dPlan) -> Vec<f64> {
    let kernel = negative_laplacian_kernel(geometry);
    let spectrum: Vec<Complex64> = plan.forward_real(&kernel);
    // Take real part (symmetric kernel); clamp round-off at DC
    spectrum.iter().map(|c| c.re.max(0.0)).collect()
}
