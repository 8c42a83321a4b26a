//! Prior measures, i.e. regularizer costs g(x)

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::operators::{DifferenceOperator, LinearOperator};

/// Σ x²
pub fn zeroth_order_tikhonov(x: &[f64]) -> f64 {
    x.iter().map(|&v| v * v).sum()
}

/// Σ (D x)²
pub fn first_order_tikhonov(x: &[f64], d: &DifferenceOperator) -> SolverResult<f64> {
    let dx = d.forward(x)?;
    Ok(zeroth_order_tikhonov(&dx))
}

/// Isotropic total variation Σ_i sqrt(Σ_axis (D_axis x)_i²)
pub fn total_variation(x: &[f64], d: &DifferenceOperator, dimension: usize) -> SolverResult<f64> {
    let dx = d.forward(x)?;
    total_variation_of_gradient(&dx, dimension)
}

/// Total variation of an already stacked gradient `[D_1 x; ...; D_dim x]`.
pub fn total_variation_of_gradient(dx: &[f64], dimension: usize) -> SolverResult<f64> {
    if dimension == 0 {
        return Err(SolverError::shape(1, 0, "total variation dimension"));
    }
    if dx.len() % dimension != 0 {
        return Err(SolverError::shape(
            dx.len().div_ceil(dimension) * dimension,
            dx.len(),
            "total variation gradient split",
        ));
    }

    let n = dx.len() / dimension;
    let tv = (0..n)
        .map(|i| {
            (0..dimension)
                .map(|axis| dx[axis * n + i] * dx[axis * n + i])
                .sum::<f64>()
                .sqrt()
        })
        .sum();
    Ok(tv)
}

/// Anisotropic total variation Σ_i Σ_axis |(D_axis x)_i|
pub fn anisotropic_total_variation(x: &[f64], d: &DifferenceOperator) -> SolverResult<f64> {
    let dx = d.forward(x)?;
    Ok(dx.iter().map(|v| v.abs()).sum())
}

/// Which norm total variation takes of each pixel's gradient
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TvNorm {
    /// Σ_i |(Dx)_i|₂
    #[default]
    Isotropic,
    /// Σ_i |(Dx)_i|₁
    Anisotropic,
}

/// Selector for the regularizer g.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorKind {
    #[serde(rename = "zeroth")]
    ZerothOrderTikhonov,
    #[serde(rename = "first")]
    FirstOrderTikhonov,
    #[default]
    #[serde(rename = "tv")]
    TotalVariation,
}

impl PriorKind {
    pub fn name(&self) -> &'static str {
        match self {
            PriorKind::ZerothOrderTikhonov => "zeroth",
            PriorKind::FirstOrderTikhonov => "first",
            PriorKind::TotalVariation => "tv",
        }
    }

    /// Quadratic priors have a linear optimality system.
    pub fn is_quadratic(&self) -> bool {
        !matches!(self, PriorKind::TotalVariation)
    }

    pub fn evaluate(&self, x: &[f64], d: &DifferenceOperator) -> SolverResult<f64> {
        self.evaluate_with_norm(x, d, TvNorm::Isotropic)
    }

    /// As `evaluate`, with total variation taken in `tv_norm`. Quadratic
    /// priors ignore the norm.
    pub fn evaluate_with_norm(&self, x: &[f64], d: &DifferenceOperator, tv_norm: TvNorm) -> SolverResult<f64> {
        match (self, tv_norm) {
            (PriorKind::ZerothOrderTikhonov, _) => Ok(zeroth_order_tikhonov(x)),
            (PriorKind::FirstOrderTikhonov, _) => first_order_tikhonov(x, d),
            (PriorKind::TotalVariation, TvNorm::Isotropic) => total_variation(x, d, d.dimension()),
            (PriorKind::TotalVariation, TvNorm::Anisotropic) => anisotropic_total_variation(x, d),
        }
    }
}

impl std::fmt::Display for PriorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
