//! NSoL: numerical solvers for regularized inverse problems
//!
//! Solves `argmin_x ½‖Ax − b‖² + α g(x)` for linear forward models `A` and
//! priors `g` (zeroth/first-order Tikhonov, total variation) on 1D to 3D
//! grids, and runs parameter studies over the solver hyperparameters.
//!
//! # Modules
//! - `operators`: Linear operators (identity, convolution, finite differences)
//! - `measures`: Prior and similarity measures
//! - `solvers`: Conjugate gradient and the generic iteration driver
//! - `inversion`: Tikhonov, ADMM and primal-dual schemes
//! - `study`: Parameter study writer and reader
//! - `config`: Solver and study configuration
//! - `nifti_io`: Reconstruction files

// Core modules
pub mod error;
pub mod geometry;
pub mod fft;

// Algorithm modules
pub mod kernels;
pub mod operators;
pub mod measures;
pub mod solvers;
pub mod inversion;

// Studies and configuration
pub mod config;
pub mod study;

// I/O modules
pub mod nifti_io;

pub use error::{SolverError, SolverResult};
pub use geometry::Geometry;

use std::sync::Arc;

use wasm_bindgen::prelude::*;

use crate::inversion::{AdmmParams, AdmmSolver, PrimalDualParams, PrimalDualSolver, Problem, TikhonovParams, TikhonovSolver};
use crate::measures::PriorKind;
use crate::operators::{ConvolutionOperator, DifferenceOperator, LinearOperator};
use crate::solvers::IterationOptions;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

#[allow(unused_macros)]
macro_rules! console_log {
    ($($t:tt)*) => (log(&format_args!($($t)*).to_string()))
}

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn to_js(err: SolverError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Denoising (`blur_sigma == 0`) or Gaussian deblurring problem
fn wasm_problem(
    observed: &[f64],
    nx: usize, ny: usize, nz: usize,
    blur_sigma: f64,
) -> SolverResult<Problem> {
    let geometry = Geometry::from_dims(nx, ny, nz)?;
    if blur_sigma == 0.0 {
        return Problem::denoising(observed.to_vec(), geometry);
    }
    let sigma = vec![blur_sigma; geometry.ndim];
    let operator: Arc<dyn LinearOperator> = Arc::new(ConvolutionOperator::gaussian(&geometry, &sigma)?);
    Problem::new(observed.to_vec(), geometry, operator)
}

fn wasm_options(tol: f64, max_iter: usize) -> IterationOptions {
    IterationOptions {
        iterations: max_iter,
        tolerance: tol,
        ..Default::default()
    }
}

// ============================================================================
// WASM Exports: Solvers
// ============================================================================

/// Tikhonov regularization
///
/// # Arguments
/// * `observed` - Observed data (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Array dimensions (trailing 1s reduce the dimensionality)
/// * `blur_sigma` - Gaussian blur of the forward model in voxels (0 = denoising)
/// * `alpha` - Regularization parameter
/// * `order` - Prior: 0 = zeroth order, 1 = first order (gradient)
/// * `max_iter` - Maximum outer iterations
#[wasm_bindgen]
pub fn tikhonov_wasm(
    observed: &[f64],
    nx: usize, ny: usize, nz: usize,
    blur_sigma: f64,
    alpha: f64,
    order: u8,
    max_iter: usize,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM Tikhonov: {}x{}x{}, alpha={:.4}, order={}", nx, ny, nz, alpha, order);

    let params = TikhonovParams {
        alpha,
        prior: if order == 0 { PriorKind::ZerothOrderTikhonov } else { PriorKind::FirstOrderTikhonov },
        ..Default::default()
    };
    let problem = wasm_problem(observed, nx, ny, nz, blur_sigma).map_err(to_js)?;
    let mut solver = TikhonovSolver::tikhonov(problem, &params, wasm_options(1e-6, max_iter)).map_err(to_js)?;
    let outcome = solver.run().map_err(to_js)?;

    console_log!("WASM Tikhonov complete after {} iterations", outcome.iterations);
    Ok(outcome.x)
}

/// TV-ADMM
///
/// # Arguments
/// * `observed` - Observed data (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Array dimensions
/// * `blur_sigma` - Gaussian blur of the forward model in voxels (0 = denoising)
/// * `alpha` - Regularization parameter
/// * `rho` - ADMM penalty parameter
/// * `tol` - Convergence tolerance
/// * `max_iter` - Maximum iterations
#[wasm_bindgen]
pub fn admm_tv_wasm(
    observed: &[f64],
    nx: usize, ny: usize, nz: usize,
    blur_sigma: f64,
    alpha: f64,
    rho: f64,
    tol: f64,
    max_iter: usize,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM TV-ADMM: {}x{}x{}, alpha={:.4}, rho={:.4}, max_iter={}",
                 nx, ny, nz, alpha, rho, max_iter);

    let params = AdmmParams { alpha, rho, ..Default::default() };
    let problem = wasm_problem(observed, nx, ny, nz, blur_sigma).map_err(to_js)?;
    let mut solver = AdmmSolver::admm(problem, &params, wasm_options(tol, max_iter)).map_err(to_js)?;
    let outcome = solver.run().map_err(to_js)?;

    console_log!("WASM TV-ADMM complete after {} iterations", outcome.iterations);
    Ok(outcome.x)
}

/// TV-ADMM with progress callback
#[wasm_bindgen]
pub fn admm_tv_wasm_with_progress(
    observed: &[f64],
    nx: usize, ny: usize, nz: usize,
    blur_sigma: f64,
    alpha: f64,
    rho: f64,
    tol: f64,
    max_iter: usize,
    progress_callback: &js_sys::Function,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM TV-ADMM with progress: {}x{}x{}, alpha={:.4}, max_iter={}",
                 nx, ny, nz, alpha, max_iter);

    let params = AdmmParams { alpha, rho, ..Default::default() };
    let problem = wasm_problem(observed, nx, ny, nz, blur_sigma).map_err(to_js)?;
    let mut solver = AdmmSolver::admm(problem, &params, wasm_options(tol, max_iter)).map_err(to_js)?;

    let callback = progress_callback.clone();
    let outcome = solver
        .run_with_progress(|current, total| {
            let this = JsValue::null();
            let _ = callback.call2(&this,
                &JsValue::from(current as u32),
                &JsValue::from(total as u32));
        })
        .map_err(to_js)?;

    console_log!("WASM TV-ADMM complete after {} iterations", outcome.iterations);
    Ok(outcome.x)
}

/// TV primal-dual (Chambolle-Pock) with default step sizes
#[wasm_bindgen]
pub fn primal_dual_tv_wasm(
    observed: &[f64],
    nx: usize, ny: usize, nz: usize,
    blur_sigma: f64,
    alpha: f64,
    tol: f64,
    max_iter: usize,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM TV primal-dual: {}x{}x{}, alpha={:.4}, max_iter={}",
                 nx, ny, nz, alpha, max_iter);

    let params = PrimalDualParams { alpha, ..Default::default() };
    let problem = wasm_problem(observed, nx, ny, nz, blur_sigma).map_err(to_js)?;
    let mut solver = PrimalDualSolver::primal_dual(problem, &params, wasm_options(tol, max_iter)).map_err(to_js)?;
    let outcome = solver.run().map_err(to_js)?;

    console_log!("WASM TV primal-dual complete after {} iterations", outcome.iterations);
    Ok(outcome.x)
}

/// Isotropic total variation of an image (Neumann boundary)
#[wasm_bindgen]
pub fn total_variation_wasm(x: &[f64], nx: usize, ny: usize, nz: usize) -> Result<f64, JsValue> {
    let geometry = Geometry::from_dims(nx, ny, nz).map_err(to_js)?;
    geometry.check_len(x.len(), "image").map_err(to_js)?;
    let d = DifferenceOperator::new(&geometry, Default::default());
    PriorKind::TotalVariation.evaluate(x, &d).map_err(to_js)
}

// ============================================================================
// WASM Exports: Utilities
// ============================================================================

/// Check if WASM module is loaded and working
#[wasm_bindgen]
pub fn wasm_health_check() -> bool {
    console_log!("NSoL WASM module loaded successfully!");
    true
}

/// Get version string
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
