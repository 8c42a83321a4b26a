//! FFT plans for 1D/2D/3D transforms using rustfft
//!
//! Provides FFT/IFFT operations compatible with NumPy's FFT conventions.
//! Uses Fortran (column-major) order indexing to match NIfTI convention.
//! Axes of size 1 are transformed trivially.

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

use crate::geometry::{idx3d, Geometry};

/// Cached forward/inverse plans for a fixed grid.
///
/// Plans are immutable and shareable across threads; scratch buffers are
/// allocated per transform.
#[derive(Clone)]
pub struct Fft3dPlan {
    nx: usize,
    ny: usize,
    nz: usize,
    // Forward FFT plans
    fft_x: Arc<dyn Fft<f64>>,
    fft_y: Arc<dyn Fft<f64>>,
    fft_z: Arc<dyn Fft<f64>>,
    // Inverse FFT plans
    ifft_x: Arc<dyn Fft<f64>>,
    ifft_y: Arc<dyn Fft<f64>>,
    ifft_z: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft3dPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft3dPlan")
            .field("nx", &self.nx)
            .field("ny", &self.ny)
            .field("nz", &self.nz)
            .finish()
    }
}

impl Fft3dPlan {
    /// Create plans for the given dimensions
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let mut planner = FftPlanner::new();

        let fft_x = planner.plan_fft(nx, FftDirection::Forward);
        let fft_y = planner.plan_fft(ny, FftDirection::Forward);
        let fft_z = planner.plan_fft(nz, FftDirection::Forward);

        let ifft_x = planner.plan_fft(nx, FftDirection::Inverse);
        let ifft_y = planner.plan_fft(ny, FftDirection::Inverse);
        let ifft_z = planner.plan_fft(nz, FftDirection::Inverse);

        Self {
            nx, ny, nz,
            fft_x, fft_y, fft_z,
            ifft_x, ifft_y, ifft_z,
        }
    }

    pub fn for_geometry(geometry: &Geometry) -> Self {
        let (nx, ny, nz) = geometry.dims;
        Self::new(nx, ny, nz)
    }

    pub fn n_total(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// In-place forward FFT
    pub fn forward(&self, data: &mut [Complex64]) {
        self.transform(data, &self.fft_x, &self.fft_y, &self.fft_z);
    }

    /// In-place inverse FFT (with 1/N normalization)
    pub fn inverse(&self, data: &mut [Complex64]) {
        self.transform(data, &self.ifft_x, &self.ifft_y, &self.ifft_z);

        let n_total = self.n_total() as f64;
        for val in data.iter_mut() {
            *val /= n_total;
        }
    }

    fn transform(
        &self,
        data: &mut [Complex64],
        plan_x: &Arc<dyn Fft<f64>>,
        plan_y: &Arc<dyn Fft<f64>>,
        plan_z: &Arc<dyn Fft<f64>>,
    ) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        debug_assert_eq!(data.len(), nx * ny * nz);

        // Transform along x-axis (innermost in Fortran order, stride 1)
        if nx > 1 {
            let mut scratch = vec![Complex64::new(0.0, 0.0); plan_x.get_inplace_scratch_len()];
            for k in 0..nz {
                for j in 0..ny {
                    let start = idx3d(0, j, k, nx, ny);
                    plan_x.process_with_scratch(&mut data[start..start + nx], &mut scratch);
                }
            }
        }

        // Transform along y-axis (stride nx)
        if ny > 1 {
            let mut scratch = vec![Complex64::new(0.0, 0.0); plan_y.get_inplace_scratch_len()];
            let mut buffer = vec![Complex64::new(0.0, 0.0); ny];
            for k in 0..nz {
                for i in 0..nx {
                    for j in 0..ny {
                        buffer[j] = data[idx3d(i, j, k, nx, ny)];
                    }
                    plan_y.process_with_scratch(&mut buffer, &mut scratch);
                    for j in 0..ny {
                        data[idx3d(i, j, k, nx, ny)] = buffer[j];
                    }
                }
            }
        }

        // Transform along z-axis (stride nx*ny)
        if nz > 1 {
            let mut scratch = vec![Complex64::new(0.0, 0.0); plan_z.get_inplace_scratch_len()];
            let mut buffer = vec![Complex64::new(0.0, 0.0); nz];
            for j in 0..ny {
                for i in 0..nx {
                    for k in 0..nz {
                        buffer[k] = data[idx3d(i, j, k, nx, ny)];
                    }
                    plan_z.process_with_scratch(&mut buffer, &mut scratch);
                    for k in 0..nz {
                        data[idx3d(i, j, k, nx, ny)] = buffer[k];
                    }
                }
            }
        }
    }

    /// FFT of real data (real-to-complex, full spectrum)
    pub fn forward_real(&self, data: &[f64]) -> Vec<Complex64> {
        let mut complex_data: Vec<Complex64> = data.iter()
            .map(|&x| Complex64::new(x, 0.0))
            .collect();
        self.forward(&mut complex_data);
        complex_data
    }

    /// IFFT returning the real part (imaginary parts discarded)
    pub fn inverse_real(&self, mut data: Vec<Complex64>) -> Vec<f64> {
        self.inverse(&mut data);
        data.iter().map(|c| c.re).collect()
    }

    /// Apply a Fourier multiplier: out = real(ifft(H * fft(x)))
    pub fn apply_multiplier(&self, x: &[f64], multiplier: &[Complex64]) -> Vec<f64> {
        let mut spectrum = self.forward_real(x);
        for (c, &h) in spectrum.iter_mut().zip(multiplier.iter()) {
            *c *= h;
        }
        self.inverse_real(spectrum)
    }
}
