//! Problem definition and objective evaluation
//!
//! A `Problem` bundles the observed data, its geometry, the forward model and
//! the boundary used by the difference operator. The `Objective` adds the
//! prior and its weight and evaluates `½‖Ax − b‖² + α g(x)`, the functional
//! ADMM and primal-dual minimize. Tikhonov's normal equations
//! `(AᵀA + αR) x = Aᵀb` minimize `‖Ax − b‖² + α g(x)`, so its objective takes
//! the fidelity with weight 1 (`with_fidelity_weight`).

use std::sync::Arc;

use crate::error::{SolverError, SolverResult};
use crate::geometry::Geometry;
use crate::measures::{sum_of_squared_differences, PriorKind, SimilarityKind, TvNorm};
use crate::operators::{Boundary, DifferenceOperator, IdentityOperator, LinearOperator};

#[derive(Clone)]
pub struct Problem {
    observed: Vec<f64>,
    geometry: Geometry,
    operator: Arc<dyn LinearOperator>,
    boundary: Boundary,
    initial: Option<Vec<f64>>,
    reference: Option<Vec<f64>>,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("geometry", &self.geometry)
            .field("boundary", &self.boundary)
            .field("observed_len", &self.observed.len())
            .field("has_initial", &self.initial.is_some())
            .field("has_reference", &self.reference.is_some())
            .finish()
    }
}

impl Problem {
    /// Problem with a general forward model. `operator` must map the grid of
    /// `geometry` onto the observed data.
    pub fn new(
        observed: Vec<f64>,
        geometry: Geometry,
        operator: Arc<dyn LinearOperator>,
    ) -> SolverResult<Self> {
        geometry.check_len(operator.domain_len(), "operator domain")?;
        if operator.range_len() != observed.len() {
            return Err(SolverError::shape(operator.range_len(), observed.len(), "observed data"));
        }

        Ok(Self {
            observed,
            geometry,
            operator,
            boundary: Boundary::default(),
            initial: None,
            reference: None,
        })
    }

    /// Denoising problem (A = I)
    pub fn denoising(observed: Vec<f64>, geometry: Geometry) -> SolverResult<Self> {
        let operator = Arc::new(IdentityOperator::new(geometry.n_total()));
        Self::new(observed, geometry, operator)
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_initial_guess(mut self, x0: Vec<f64>) -> SolverResult<Self> {
        self.geometry.check_len(x0.len(), "initial guess")?;
        self.initial = Some(x0);
        Ok(self)
    }

    /// Ground truth used for similarity metrics
    pub fn with_reference(mut self, reference: Vec<f64>) -> SolverResult<Self> {
        self.geometry.check_len(reference.len(), "reference image")?;
        self.reference = Some(reference);
        Ok(self)
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn operator(&self) -> &Arc<dyn LinearOperator> {
        &self.operator
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn reference(&self) -> Option<&[f64]> {
        self.reference.as_deref()
    }

    pub fn difference_operator(&self) -> DifferenceOperator {
        DifferenceOperator::new(&self.geometry, self.boundary)
    }

    /// `Aᵀ b`
    pub fn adjoint_observed(&self) -> SolverResult<Vec<f64>> {
        self.operator.adjoint(&self.observed)
    }

    /// Caller's initial guess (copied), defaulting to `Aᵀ b`
    pub fn initial_guess(&self) -> SolverResult<Vec<f64>> {
        match &self.initial {
            Some(x0) => Ok(x0.clone()),
            None => self.adjoint_observed(),
        }
    }
}

/// Costs of one iterate
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Costs {
    /// w‖Ax − b‖², w = ½ unless the objective says otherwise
    pub data: f64,
    /// g(x)
    pub reg: f64,
    /// data + α reg
    pub total: f64,
}

/// `w‖Ax − b‖² + α g(x)` for a problem and prior, `w = ½` by default
#[derive(Clone, Debug)]
pub struct Objective {
    problem: Problem,
    prior: PriorKind,
    alpha: f64,
    tv_norm: TvNorm,
    fidelity_weight: f64,
    difference: DifferenceOperator,
}

impl Objective {
    pub fn new(problem: Problem, prior: PriorKind, alpha: f64) -> SolverResult<Self> {
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(SolverError::config("alpha", alpha, "must be positive and finite"));
        }
        let difference = problem.difference_operator();
        Ok(Self {
            problem,
            prior,
            alpha,
            tv_norm: TvNorm::default(),
            fidelity_weight: 0.5,
            difference,
        })
    }

    /// Norm the total variation prior is measured in
    pub fn with_tv_norm(mut self, tv_norm: TvNorm) -> Self {
        self.tv_norm = tv_norm;
        self
    }

    /// Weight `w` of `‖Ax − b‖²` in the data term
    pub fn with_fidelity_weight(mut self, weight: f64) -> Self {
        self.fidelity_weight = weight;
        self
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn prior(&self) -> PriorKind {
        self.prior
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn tv_norm(&self) -> TvNorm {
        self.tv_norm
    }

    pub fn difference(&self) -> &DifferenceOperator {
        &self.difference
    }

    pub fn costs(&self, x: &[f64]) -> SolverResult<Costs> {
        let ax = self.problem.operator.forward(x)?;
        let data = self.fidelity_weight * sum_of_squared_differences(&ax, &self.problem.observed)?;
        let reg = self.prior.evaluate_with_norm(x, &self.difference, self.tv_norm)?;
        Ok(Costs { data, reg, total: data + self.alpha * reg })
    }

    /// Similarity of `x` to the reference image for each requested metric
    pub fn metrics(&self, x: &[f64], kinds: &[SimilarityKind]) -> SolverResult<Vec<(&'static str, f64)>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let reference = self.problem.reference().ok_or_else(|| {
            SolverError::config("metrics", format!("{:?}", kinds), "metrics require a reference image")
        })?;
        kinds
            .iter()
            .map(|kind| Ok((kind.name(), kind.evaluate(x, reference)?)))
            .collect()
    }
}
