//! Parameter points and grids for parameter studies

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// One assignment of values to named parameters.
///
/// Ordered and compared with `f64::total_cmp`, so points can key maps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterPoint(BTreeMap<String, f64>);

impl ParameterPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Human-readable label, e.g. `alpha=0.01, rho=1`
    pub fn label(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<(String, f64)> for ParameterPoint {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl PartialEq for ParameterPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParameterPoint {}

impl PartialOrd for ParameterPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParameterPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut a = self.0.iter();
        let mut b = other.0.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some((ka, va)), Some((kb, vb))) => {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for ParameterPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Set of parameter points a study sweeps over
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterGrid {
    /// Cartesian product of named value lists
    Product(BTreeMap<String, Vec<f64>>),
    /// Explicit list of points
    Points(Vec<ParameterPoint>),
}

impl ParameterGrid {
    /// Single-parameter sweep
    pub fn sweep(name: impl Into<String>, values: Vec<f64>) -> Self {
        let mut axes = BTreeMap::new();
        axes.insert(name.into(), values);
        ParameterGrid::Product(axes)
    }

    /// Expand into points, in run ("line") order. For products the last
    /// parameter name varies fastest.
    pub fn points(&self) -> SolverResult<Vec<ParameterPoint>> {
        let points = match self {
            ParameterGrid::Product(axes) => {
                if axes.is_empty() {
                    return Err(SolverError::config("grid", "{}", "no parameters to sweep"));
                }
                let mut points = vec![ParameterPoint::new()];
                for (name, values) in axes {
                    if values.is_empty() {
                        return Err(SolverError::config(name.clone(), "[]", "no values to sweep"));
                    }
                    let mut expanded = Vec::with_capacity(points.len() * values.len());
                    for p in &points {
                        for &v in values {
                            expanded.push(p.clone().with(name.clone(), v));
                        }
                    }
                    points = expanded;
                }
                points
            }
            ParameterGrid::Points(points) => {
                let first = points
                    .first()
                    .ok_or_else(|| SolverError::config("grid", "[]", "no points to run"))?;
                if first.is_empty() {
                    return Err(SolverError::config("grid", first, "points need at least one parameter"));
                }
                let names = first.names();
                if let Some(bad) = points.iter().find(|p| p.names() != names) {
                    return Err(SolverError::config(
                        "grid",
                        bad,
                        "all points must set the same parameters",
                    ));
                }
                points.clone()
            }
        };

        let mut seen = std::collections::BTreeSet::new();
        for p in &points {
            if !seen.insert(p) {
                return Err(SolverError::config("grid", p, "duplicate parameter point"));
            }
        }
        Ok(points)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        match self {
            ParameterGrid::Product(axes) => axes.keys().cloned().collect(),
            ParameterGrid::Points(points) => points
                .first()
                .map(|p| p.names().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}
