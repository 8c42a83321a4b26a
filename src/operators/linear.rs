//! Linear forward models with explicit adjoints
//!
//! Every operator satisfies `<A x, y> == <x, Aᵀ y>` up to floating-point
//! tolerance. Operators are immutable and shared between runs through `Arc`.

use std::borrow::Cow;
use std::sync::Arc;

use num_complex::Complex64;

use crate::error::{SolverError, SolverResult};
use crate::fft::Fft3dPlan;
use crate::geometry::Geometry;
use crate::kernels::gaussian_kernel;

/// Linear map `A: R^domain -> R^range` with its adjoint.
pub trait LinearOperator: Send + Sync {
    fn domain_len(&self) -> usize;
    fn range_len(&self) -> usize;

    /// `A x`
    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>>;

    /// `Aᵀ y`
    fn adjoint(&self, y: &[f64]) -> SolverResult<Vec<f64>>;

    /// Fourier transfer function when `A` is circulant on its geometry.
    fn transfer_function(&self) -> Option<Cow<'_, [Complex64]>> {
        None
    }

    /// True when `A = I`, so proximal steps have a closed form.
    fn is_identity(&self) -> bool {
        false
    }

    /// `Aᵀ A x`
    fn normal(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        let ax = self.forward(x)?;
        self.adjoint(&ax)
    }
}

/// Check that `x` has the expected length.
pub(crate) fn check_input(expected: usize, x: &[f64], context: &'static str) -> SolverResult<()> {
    if x.len() != expected {
        return Err(SolverError::shape(expected, x.len(), context));
    }
    Ok(())
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&ai, &bi)| ai * bi).sum()
}

#[inline]
pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// Relative discrepancy of the adjoint identity for a pair of test vectors:
/// `|<A x, y> - <x, Aᵀ y>| / max(|<A x, y>|, 1)`
pub fn adjoint_mismatch<A: LinearOperator + ?Sized>(op: &A, x: &[f64], y: &[f64]) -> SolverResult<f64> {
    let lhs = dot(&op.forward(x)?, y);
    let rhs = dot(x, &op.adjoint(y)?);
    Ok((lhs - rhs).abs() / lhs.abs().max(1.0))
}

// ============================================================================
// Identity
// ============================================================================

/// Identity forward model (denoising)
#[derive(Clone, Debug)]
pub struct IdentityOperator {
    n: usize,
}

impl IdentityOperator {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl LinearOperator for IdentityOperator {
    fn domain_len(&self) -> usize {
        self.n
    }

    fn range_len(&self) -> usize {
        self.n
    }

    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        check_input(self.n, x, "identity forward")?;
        Ok(x.to_vec())
    }

    fn adjoint(&self, y: &[f64]) -> SolverResult<Vec<f64>> {
        check_input(self.n, y, "identity adjoint")?;
        Ok(y.to_vec())
    }

    fn transfer_function(&self) -> Option<Cow<'_, [Complex64]>> {
        Some(Cow::Owned(vec![Complex64::new(1.0, 0.0); self.n]))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

// ============================================================================
// Closure-backed operator
// ============================================================================

type MatVec = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// Operator given by a pair of closures, e.g. a sparse matrix product.
#[derive(Clone)]
pub struct FnOperator {
    domain: usize,
    range: usize,
    forward: MatVec,
    adjoint: MatVec,
}

impl FnOperator {
    pub fn new<F, G>(domain: usize, range: usize, forward: F, adjoint: G) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
        G: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            domain,
            range,
            forward: Arc::new(forward),
            adjoint: Arc::new(adjoint),
        }
    }
}

impl std::fmt::Debug for FnOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperator")
            .field("domain", &self.domain)
            .field("range", &self.range)
            .finish()
    }
}

impl LinearOperator for FnOperator {
    fn domain_len(&self) -> usize {
        self.domain
    }

    fn range_len(&self) -> usize {
        self.range
    }

    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        check_input(self.domain, x, "operator forward")?;
        let y = (self.forward)(x);
        check_input(self.range, &y, "operator forward output")?;
        Ok(y)
    }

    fn adjoint(&self, y: &[f64]) -> SolverResult<Vec<f64>> {
        check_input(self.range, y, "operator adjoint")?;
        let x = (self.adjoint)(y);
        check_input(self.domain, &x, "operator adjoint output")?;
        Ok(x)
    }
}

// ============================================================================
// Periodic convolution
// ============================================================================

/// Periodic convolution `x -> ifft(K̂ · fft(x))` on a fixed grid.
#[derive(Clone, Debug)]
pub struct ConvolutionOperator {
    geometry: Geometry,
    plan: Fft3dPlan,
    spectrum: Vec<Complex64>,
    spectrum_conj: Vec<Complex64>,
}

impl ConvolutionOperator {
    /// Build from an image-space kernel centred at index 0 (with wraparound).
    pub fn from_kernel(geometry: &Geometry, kernel: &[f64]) -> SolverResult<Self> {
        geometry.check_len(kernel.len(), "convolution kernel")?;
        let plan = Fft3dPlan::for_geometry(geometry);
        let spectrum = plan.forward_real(kernel);
        let spectrum_conj = spectrum.iter().map(|c| c.conj()).collect();

        Ok(Self {
            geometry: geometry.clone(),
            plan,
            spectrum,
            spectrum_conj,
        })
    }

    /// Gaussian blur with per-axis standard deviation in physical units.
    pub fn gaussian(geometry: &Geometry, sigma: &[f64]) -> SolverResult<Self> {
        let kernel = gaussian_kernel(geometry, sigma)?;
        Self::from_kernel(geometry, &kernel)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl LinearOperator for ConvolutionOperator {
    fn domain_len(&self) -> usize {
        self.geometry.n_total()
    }

    fn range_len(&self) -> usize {
        self.geometry.n_total()
    }

    fn forward(&self, x: &[f64]) -> SolverResult<Vec<f64>> {
        self.geometry.check_len(x.len(), "convolution forward")?;
        Ok(self.plan.apply_multiplier(x, &self.spectrum))
    }

    fn adjoint(&self, y: &[f64]) -> SolverResult<Vec<f64>> {
        self.geometry.check_len(y.len(), "convolution adjoint")?;
        Ok(self.plan.apply_multiplier(y, &self.spectrum_conj))
    }

    fn transfer_function(&self) -> Option<Cow<'_, [Complex64]>> {
        Some(Cow::Borrowed(&self.spectrum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vec(rng: &mut StdRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_identity_roundtrip_and_shape() {
        let op = IdentityOperator::new(3);
        let x = vec![1.0, -2.0, 3.0];
        assert_eq!(op.forward(&x).unwrap(), x);
        assert_eq!(op.adjoint(&x).unwrap(), x);
        assert!(matches!(op.forward(&[1.0]), Err(SolverError::Shape { .. })));
    }

    #[test]
    fn test_convolution_adjoint_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let g = Geometry::new(&[9, 6]).unwrap().with_voxel_size(&[1.0, 0.5]).unwrap();
        // Asymmetric kernel so the adjoint differs from the forward
        let mut kernel = vec![0.0; g.n_total()];
        kernel[0] = 0.5;
        kernel[1] = 0.3;
        kernel[9] = 0.2;
        let op = ConvolutionOperator::from_kernel(&g, &kernel).unwrap();

        let x = random_vec(&mut rng, g.n_total());
        let y = random_vec(&mut rng, g.n_total());
        let mismatch = adjoint_mismatch(&op, &x, &y).unwrap();
        assert!(mismatch < 1e-12, "Adjoint mismatch {}", mismatch);
    }

    #[test]
    fn test_convolution_shifts_impulse() {
        let g = Geometry::new(&[8]).unwrap();
        let mut kernel = vec![0.0; 8];
        kernel[1] = 1.0;
        let op = ConvolutionOperator::from_kernel(&g, &kernel).unwrap();

        let mut x = vec![0.0; 8];
        x[7] = 1.0;
        let y = op.forward(&x).unwrap();
        // Wraps around to index 0
        assert!((y[0] - 1.0).abs() < 1e-12, "got {:?}", y);
        assert!(y[1..].iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_gaussian_blur_preserves_mean() {
        let g = Geometry::new(&[32]).unwrap();
        let op = ConvolutionOperator::gaussian(&g, &[2.0]).unwrap();
        let x: Vec<f64> = (0..32).map(|i| if i < 16 { 0.0 } else { 1.0 }).collect();
        let y = op.forward(&x).unwrap();
        let sum_x: f64 = x.iter().sum();
        let sum_y: f64 = y.iter().sum();
        assert!((sum_x - sum_y).abs() < 1e-10);
        assert!(op.transfer_function().is_some());
    }

    #[test]
    fn test_fn_operator_adjoint_identity() {
        // A = [[1, 2], [0, 1], [3, -1]]
        let op = FnOperator::new(
            2,
            3,
            |x| vec![x[0] + 2.0 * x[1], x[1], 3.0 * x[0] - x[1]],
            |y| vec![y[0] + 3.0 * y[2], 2.0 * y[0] + y[1] - y[2]],
        );
        let mismatch = adjoint_mismatch(&op, &[0.3, -1.2], &[1.0, 0.5, -0.7]).unwrap();
        assert!(mismatch < 1e-14);
        assert!(op.forward(&[1.0, 2.0, 3.0]).is_err());
        assert!(op.transfer_function().is_none());
    }
}
