//! Kernel functions in image space
//!
//! Kernels are centred at index (0, 0, 0) with wraparound so they can be
//! transformed directly by the FFT plans:
//! - Laplacian stencil (and the Fourier symbol of the periodic `Dᵀ D`)
//! - Gaussian point-spread function for blur forward models

pub mod gaussian;
pub mod laplacian;

pub use gaussian::*;
pub use laplacian::*;
