//! Cost measures
//!
//! Stateless functions dispatched by kind enums: prior measures (regularizer
//! costs) and similarity measures (fidelity and reference metrics).

pub mod prior;
pub mod similarity;

pub use prior::*;
pub use similarity::*;
