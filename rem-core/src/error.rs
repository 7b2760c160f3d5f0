//! Error types for readout error mitigation
//!
//! Covers the three failure surfaces of the engine:
//! - Construction errors (calibration data, cluster partitions) abort model
//!   building entirely; a model is never returned partially built.
//! - Per-request errors (singular model, solver budget) are scoped to one
//!   correction call and leave the shared model untouched.
//! - Persistence errors wrap I/O and JSON failures.

use thiserror::Error;

/// Result type alias for mitigation operations
pub type Result<T> = std::result::Result<T, MitigationError>;

/// Error type for calibration, model building and correction
#[derive(Error, Debug)]
pub enum MitigationError {
    // ==========================================================================
    // Construction Errors
    // ==========================================================================
    /// Calibration run with zero shots
    #[error("calibration run for basis state |{basis_state}\u{27e9} has zero shots")]
    InsufficientData { basis_state: String },

    /// Cluster assignment does not cover all qubits exactly once
    #[error("invalid cluster partition: {0}")]
    InvalidPartition(String),

    /// Counts negative, labels malformed, or alphabet mismatch with model dimension
    #[error("malformed frequency table: {0}")]
    MalformedFrequencyTable(String),

    // ==========================================================================
    // Per-Request Errors
    // ==========================================================================
    /// Confusion matrix numerically singular; calibration data does not
    /// sufficiently distinguish outcomes
    #[error(
        "noise model is numerically singular on cluster {cluster}: \
         condition number {condition:.3e} exceeds threshold {threshold:.3e}"
    )]
    SingularNoiseModel {
        cluster: usize,
        condition: f64,
        threshold: f64,
    },

    /// Constrained solver exhausted its budget before reaching tolerance.
    /// Carries the best estimate found so far; callers may keep it, or retry
    /// with a relaxed tolerance or a larger budget.
    #[error(
        "constrained solver stopped after {iterations} iterations \
         (residual {residual:.3e}, tolerance {tolerance:.3e})"
    )]
    Convergence {
        iterations: usize,
        residual: f64,
        tolerance: f64,
        best_estimate: Vec<f64>,
    },

    // ==========================================================================
    // Persistence Errors
    // ==========================================================================
    /// IO error while persisting or loading a noise model
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MitigationError {
    /// Check whether the caller can retry the same request.
    ///
    /// Only solver-budget exhaustion is recoverable: retry with a relaxed
    /// tolerance or larger budget, or fall back to the other correction
    /// method. Everything else signals bad inputs or bad calibration data.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MitigationError::Convergence { .. })
    }

    /// Best-so-far estimate attached to a convergence failure, if any
    pub fn partial_result(&self) -> Option<&[f64]> {
        match self {
            MitigationError::Convergence { best_estimate, .. } => Some(best_estimate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let conv = MitigationError::Convergence {
            iterations: 100,
            residual: 1e-3,
            tolerance: 1e-10,
            best_estimate: vec![0.5, 0.5],
        };
        assert!(conv.is_recoverable());

        let singular = MitigationError::SingularNoiseModel {
            cluster: 0,
            condition: 1e12,
            threshold: 1e8,
        };
        assert!(!singular.is_recoverable());
        assert!(!MitigationError::InvalidPartition("gap".into()).is_recoverable());
    }

    #[test]
    fn test_partial_result() {
        let conv = MitigationError::Convergence {
            iterations: 5,
            residual: 0.1,
            tolerance: 1e-10,
            best_estimate: vec![0.25, 0.75],
        };
        assert_eq!(conv.partial_result(), Some(&[0.25, 0.75][..]));

        let malformed = MitigationError::MalformedFrequencyTable("bad".into());
        assert!(malformed.partial_result().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = MitigationError::InsufficientData {
            basis_state: "010".into(),
        };
        assert!(err.to_string().contains("010"));

        let err = MitigationError::SingularNoiseModel {
            cluster: 2,
            condition: 3.0e9,
            threshold: 1.0e8,
        };
        assert!(err.to_string().contains("cluster 2"));
    }
}
