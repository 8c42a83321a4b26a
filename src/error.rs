//! Error taxonomy for operators, solvers and parameter studies

use std::path::PathBuf;

/// Crate-wide result alias.
pub type SolverResult<T> = Result<T, SolverError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    // ---- Shapes ----
    /// Operator or array dimensions do not agree.
    Shape {
        expected: usize,
        found: usize,
        context: &'static str,
    },

    // ---- Lifecycle ----
    /// Invalid solver reuse or other lifecycle violation.
    State { message: String },

    // ---- Numerics ----
    /// NaN/Inf iterate, indefinite or singular linear system.
    ///
    /// Carries the last finite iterate so callers can still inspect it.
    NumericalFailure {
        iteration: usize,
        reason: String,
        last_iterate: Vec<f64>,
    },

    // ---- Configuration ----
    /// Invalid hyperparameter or violated precondition.
    Configuration {
        parameter: String,
        value: String,
        reason: &'static str,
    },

    // ---- Persistence ----
    /// A persisted artifact is absent. Recoverable: callers may skip it.
    MissingData { path: PathBuf, reason: String },
    /// Any other file-system failure.
    Io { path: PathBuf, message: String },
    /// Record could not be encoded or decoded.
    Serialization { message: String },
}

impl SolverError {
    pub fn shape(expected: usize, found: usize, context: &'static str) -> Self {
        SolverError::Shape { expected, found, context }
    }

    pub fn state(message: impl Into<String>) -> Self {
        SolverError::State { message: message.into() }
    }

    pub fn config(parameter: impl Into<String>, value: impl ToString, reason: &'static str) -> Self {
        SolverError::Configuration {
            parameter: parameter.into(),
            value: value.to_string(),
            reason,
        }
    }

    pub fn numerical(iteration: usize, reason: impl Into<String>, last_iterate: Vec<f64>) -> Self {
        SolverError::NumericalFailure {
            iteration,
            reason: reason.into(),
            last_iterate,
        }
    }

    pub fn missing(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SolverError::MissingData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Missing artifacts are soft failures for the analysis layer.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, SolverError::MissingData { .. })
    }

    pub fn is_numerical_failure(&self) -> bool {
        matches!(self, SolverError::NumericalFailure { .. })
    }

    /// Attach a path to an I/O error, mapping `NotFound` to `MissingData`.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            SolverError::MissingData { path, reason: err.to_string() }
        } else {
            SolverError::Io { path, message: err.to_string() }
        }
    }
}

impl std::error::Error for SolverError {}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::Shape { expected, found, context } => {
                write!(f, "Shape mismatch in {context}: expected {expected}, found {found}")
            }
            SolverError::State { message } => write!(f, "Invalid solver state: {message}"),
            SolverError::NumericalFailure { iteration, reason, .. } => {
                write!(f, "Numerical failure at iteration {iteration}: {reason}")
            }
            SolverError::Configuration { parameter, value, reason } => {
                write!(f, "Invalid configuration '{parameter}' = {value}: {reason}")
            }
            SolverError::MissingData { path, reason } => {
                write!(f, "Missing data '{}': {reason}", path.display())
            }
            SolverError::Io { path, message } => {
                write!(f, "I/O error on '{}': {message}", path.display())
            }
            SolverError::Serialization { message } => write!(f, "Serialization error: {message}"),
        }
    }
}

impl From<serde_json::Error> for SolverError {
    fn from(err: serde_json::Error) -> Self {
        SolverError::Serialization { message: err.to_string() }
    }
}

impl From<std::io::Error> for SolverError {
    fn from(err: std::io::Error) -> Self {
        SolverError::from_io(PathBuf::new(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_missing_data() {
        let err = SolverError::from_io(
            "results/study.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.is_missing_data());

        let err = SolverError::from_io(
            "results/study.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_missing_data());
    }

    #[test]
    fn test_display_mentions_parameter() {
        let err = SolverError::config("alpha", -1.0, "must be positive");
        let text = err.to_string();
        assert!(text.contains("alpha"), "got {}", text);
        assert!(text.contains("must be positive"), "got {}", text);
    }
}
