//! Iterative solvers
//!
//! - Conjugate gradient for symmetric positive definite systems
//! - Generic outer-iteration driver shared by all inversion schemes

pub mod cg;
pub mod driver;

pub use cg::*;
pub use driver::*;
