//! Linear operators
//!
//! - `LinearOperator` trait with identity, closure and periodic convolution
//!   implementations
//! - `DifferenceOperator` (forward differences and negative divergence)

pub mod difference;
pub mod linear;

pub use difference::*;
pub use linear::*;
