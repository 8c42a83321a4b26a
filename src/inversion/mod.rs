//! Regularized inversion of `argmin_x f(x) + alpha g(x)`
//!
//! Methods include:
//! - Tikhonov: quadratic priors through the normal equations
//! - ADMM: total variation (or quadratic gradient priors) by variable splitting
//! - Primal-dual: first-order Chambolle-Pock iterations for total variation

pub mod problem;
pub mod normal;
pub mod tikhonov;
pub mod admm;
pub mod primal_dual;

pub use problem::*;
pub use normal::*;
pub use tikhonov::*;
pub use admm::*;
pub use primal_dual::*;
