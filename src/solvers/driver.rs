//! Generic iteration driver
//!
//! Every algorithm is a `Scheme` that performs one outer update per `step()`.
//! `IterativeSolver` owns the lifecycle around it: time budget, finiteness
//! checks, cost recording, progress callbacks and the stopping rule.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::inversion::problem::Objective;
use crate::measures::SimilarityKind;
use crate::operators::linear::norm;

/// Outcome of a single outer update
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    /// The algorithm's own convergence verdict
    pub converged: bool,
    /// Extra per-iteration measures (residuals, step sizes, ...)
    pub diagnostics: Vec<(&'static str, f64)>,
}

/// One algorithm plugged into the driver.
pub trait Scheme {
    fn name(&self) -> &'static str;

    /// Current estimate
    fn iterate(&self) -> &[f64];

    /// Perform one outer iteration (`iteration` is 0-based).
    fn step(&mut self, iteration: usize) -> SolverResult<StepReport>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverState {
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCriterion {
    /// Algorithm-specific residuals
    Algorithm,
    /// Relative change of the iterate or of the total cost
    RelativeChange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Converged(ConvergenceCriterion),
    MaxIterations,
    TimeBudget,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingRule {
    #[default]
    Algorithm,
    RelativeChange,
    Either,
}

/// Outer-loop options shared by all solvers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationOptions {
    pub iterations: usize,
    pub tolerance: f64,
    pub stopping_rule: StoppingRule,
    /// Wall-clock budget in seconds, checked once per iteration
    pub time_budget: Option<f64>,
    /// Keep every iterate in the record, not only the final one
    pub keep_iterates: bool,
    /// Similarity metrics against the problem's reference image
    pub metrics: Vec<SimilarityKind>,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            tolerance: 1e-6,
            stopping_rule: StoppingRule::default(),
            time_budget: None,
            keep_iterates: false,
            metrics: Vec::new(),
        }
    }
}

impl IterationOptions {
    pub fn validate(&self) -> SolverResult<()> {
        if self.iterations == 0 {
            return Err(SolverError::config("iterations", self.iterations, "must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(SolverError::config("tolerance", self.tolerance, "must be non-negative"));
        }
        if let Some(budget) = self.time_budget {
            if !(budget > 0.0) {
                return Err(SolverError::config("time_budget", budget, "must be positive"));
            }
        }
        Ok(())
    }
}

/// Per-measure cost sequences of one run, plus the final (or every) iterate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    #[serde(with = "nullable_measures")]
    measures: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    iterates: Vec<Vec<f64>>,
}

impl IterationRecord {
    pub fn push(&mut self, measure: &str, value: f64) {
        self.measures.entry(measure.to_string()).or_default().push(value);
    }

    pub fn get(&self, measure: &str) -> Option<&[f64]> {
        self.measures.get(measure).map(|v| v.as_slice())
    }

    pub fn measures(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.measures
    }

    pub fn measure_names(&self) -> Vec<&str> {
        self.measures.keys().map(|k| k.as_str()).collect()
    }

    /// Number of recorded iterations
    pub fn len(&self) -> usize {
        self.measures.values().map(|v| v.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iterates(&self) -> &[Vec<f64>] {
        &self.iterates
    }
}

/// JSON has no NaN or infinity: non-finite values are written as `null`
/// and read back as NaN.
mod nullable_measures {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(measures: &BTreeMap<String, Vec<f64>>, serializer: S) -> Result<S::Ok, S::Error> {
        let nullable: BTreeMap<&str, Vec<Option<f64>>> = measures
            .iter()
            .map(|(name, values)| {
                let values: Vec<Option<f64>> = values.iter().map(|&v| v.is_finite().then_some(v)).collect();
                (name.as_str(), values)
            })
            .collect();
        nullable.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, Vec<f64>>, D::Error> {
        let nullable = BTreeMap::<String, Vec<Option<f64>>>::deserialize(deserializer)?;
        Ok(nullable
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()))
            .collect())
    }
}

#[derive(Clone, Debug)]
pub struct SolverOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub state: SolverState,
    pub elapsed: Duration,
}

/// Object-safe view of a configured solver
pub trait Solve {
    fn name(&self) -> &'static str;
    fn run_with_progress(&mut self, progress: &mut dyn FnMut(usize, usize)) -> SolverResult<SolverOutcome>;
    fn record(&self) -> &IterationRecord;
    fn state(&self) -> SolverState;

    fn run(&mut self) -> SolverResult<SolverOutcome> {
        self.run_with_progress(&mut |_, _| {})
    }
}

/// Wall clock that degrades to zero on targets without `Instant`.
struct Stopwatch {
    #[cfg(not(target_arch = "wasm32"))]
    start: std::time::Instant,
}

impl Stopwatch {
    fn start() -> Self {
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            start: std::time::Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.start.elapsed()
        }
        #[cfg(target_arch = "wasm32")]
        {
            Duration::ZERO
        }
    }
}

/// `|a - b| / |b|`, absolute when `b` is zero
fn relative(diff: f64, base: f64) -> f64 {
    if base == 0.0 { diff.abs() } else { diff.abs() / base.abs() }
}

pub struct IterativeSolver<S: Scheme> {
    scheme: S,
    objective: Objective,
    options: IterationOptions,
    state: SolverState,
    record: IterationRecord,
}

impl<S: Scheme> IterativeSolver<S> {
    pub fn new(scheme: S, objective: Objective, options: IterationOptions) -> SolverResult<Self> {
        options.validate()?;
        if !options.metrics.is_empty() && objective.problem().reference().is_none() {
            return Err(SolverError::config(
                "metrics",
                format!("{:?}", options.metrics),
                "metrics require a reference image",
            ));
        }

        Ok(Self {
            scheme,
            objective,
            options,
            state: SolverState::Initialized,
            record: IterationRecord::default(),
        })
    }

    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn options(&self) -> &IterationOptions {
        &self.options
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn record(&self) -> &IterationRecord {
        &self.record
    }

    pub fn run(&mut self) -> SolverResult<SolverOutcome> {
        self.run_with_progress(|_, _| {})
    }

    /// Run to termination, calling `progress(iteration, max_iterations)`
    /// after every outer iteration.
    pub fn run_with_progress<F>(&mut self, mut progress: F) -> SolverResult<SolverOutcome>
    where
        F: FnMut(usize, usize),
    {
        if self.state != SolverState::Initialized {
            return Err(SolverError::state(format!(
                "{} solver already ran (state {:?}); build a new instance",
                self.scheme.name(),
                self.state
            )));
        }
        self.state = SolverState::Iterating;

        let result = self.iterate_loop(&mut progress);
        if result.is_err() {
            self.state = SolverState::Failed;
        }
        result
    }

    fn iterate_loop(&mut self, progress: &mut dyn FnMut(usize, usize)) -> SolverResult<SolverOutcome> {
        let clock = Stopwatch::start();
        let max_iter = self.options.iterations;
        let tol = self.options.tolerance;
        let budget = self.options.time_budget.map(Duration::from_secs_f64);

        let mut last_valid = self.scheme.iterate().to_vec();
        let mut last_total = self.objective.costs(&last_valid)?.total;
        let mut stop_reason = StopReason::MaxIterations;
        let mut iterations = 0;

        for k in 0..max_iter {
            if let Some(budget) = budget {
                if clock.elapsed() >= budget {
                    stop_reason = StopReason::TimeBudget;
                    break;
                }
            }

            let report = self.scheme.step(k).map_err(|err| match err {
                SolverError::NumericalFailure { reason, .. } => {
                    SolverError::numerical(k + 1, reason, last_valid.clone())
                }
                other => other,
            })?;
            iterations = k + 1;

            let x = self.scheme.iterate();
            if x.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::numerical(
                    iterations,
                    format!("{} produced a non-finite iterate", self.scheme.name()),
                    last_valid,
                ));
            }

            let costs = self.objective.costs(x)?;
            self.record.push("Data", costs.data);
            self.record.push("Reg", costs.reg);
            self.record.push("Total", costs.total);
            for (name, value) in self.objective.metrics(x, &self.options.metrics)? {
                self.record.push(name, value);
            }
            for &(name, value) in &report.diagnostics {
                self.record.push(name, value);
            }
            if self.options.keep_iterates {
                self.record.iterates.push(x.to_vec());
            }

            log::debug!(
                "{} iteration {}/{}: data = {:.6e}, reg = {:.6e}, total = {:.6e}",
                self.scheme.name(), iterations, max_iter, costs.data, costs.reg, costs.total
            );
            progress(iterations, max_iter);

            let change_converged = {
                let diff: f64 = x.iter().zip(&last_valid).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt();
                relative(diff, norm(x)) < tol || relative(costs.total - last_total, last_total) < tol
            };
            let algorithm_converged = report.converged;

            let criterion = match self.options.stopping_rule {
                StoppingRule::Algorithm if algorithm_converged => Some(ConvergenceCriterion::Algorithm),
                StoppingRule::RelativeChange if change_converged => Some(ConvergenceCriterion::RelativeChange),
                StoppingRule::Either if algorithm_converged => Some(ConvergenceCriterion::Algorithm),
                StoppingRule::Either if change_converged => Some(ConvergenceCriterion::RelativeChange),
                _ => None,
            };

            last_valid.clear();
            last_valid.extend_from_slice(x);
            last_total = costs.total;

            if let Some(criterion) = criterion {
                stop_reason = StopReason::Converged(criterion);
                break;
            }
        }

        self.state = match stop_reason {
            StopReason::Converged(_) => SolverState::Converged,
            StopReason::MaxIterations | StopReason::TimeBudget => SolverState::MaxIterReached,
        };
        if !self.options.keep_iterates {
            self.record.iterates = vec![last_valid.clone()];
        }

        let elapsed = clock.elapsed();
        log::info!(
            "{} finished after {} iterations ({:?}) in {:.3}s",
            self.scheme.name(), iterations, stop_reason, elapsed.as_secs_f64()
        );

        Ok(SolverOutcome {
            x: last_valid,
            iterations,
            stop_reason,
            state: self.state,
            elapsed,
        })
    }
}

impl<S: Scheme> Solve for IterativeSolver<S> {
    fn name(&self) -> &'static str {
        self.scheme.name()
    }

    fn run_with_progress(&mut self, progress: &mut dyn FnMut(usize, usize)) -> SolverResult<SolverOutcome> {
        IterativeSolver::run_with_progress(self, progress)
    }

    fn record(&self) -> &IterationRecord {
        &self.record
    }

    fn state(&self) -> SolverState {
        self.state
    }
}
