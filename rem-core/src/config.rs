//! Configuration for model composition and correction
//!
//! All knobs recognized by the engine live in [`MitigationConfig`]; the
//! cluster layout itself is passed separately as a
//! [`crate::partition::ClusterPartition`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default max alphabet size for full tensor composition (10 qubits)
pub const DEFAULT_EXACT_MODE_THRESHOLD: usize = 1024;

/// Default convergence tolerance for the constrained solver
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-10;

/// Default iteration budget for the constrained solver
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Default condition-number cutoff above which a model counts as singular
pub const DEFAULT_SINGULAR_THRESHOLD: f64 = 1e8;

/// Default bound on calibration column-sum drift before data counts as corrupted
pub const DEFAULT_MAX_COLUMN_DRIFT: f64 = 1e-3;

// =============================================================================
// Distance Metric
// =============================================================================

/// Distance minimized by the constrained correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance ||M·p - p_noisy||²
    SquaredL2,
    /// Negative log-likelihood of the observed counts under M·p
    NegLogLikelihood,
}

impl DistanceMetric {
    /// String name
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::SquaredL2 => "squared-L2",
            DistanceMetric::NegLogLikelihood => "negative-log-likelihood",
        }
    }
}

// =============================================================================
// Mitigation Configuration
// =============================================================================

/// Configuration for noise model composition and correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    /// Max alphabet size (2^n) for which the full matrix is materialized;
    /// larger systems stay factorized
    pub exact_mode_threshold: usize,
    /// Distance minimized by constrained correction
    pub distance_metric: DistanceMetric,
    /// Constrained solver convergence tolerance (objective decrease per step)
    pub convergence_tolerance: f64,
    /// Constrained solver iteration budget
    pub max_iterations: usize,
    /// Condition-number cutoff for [`crate::error::MitigationError::SingularNoiseModel`]
    pub singular_threshold: f64,
    /// Calibration column sums further than this from 1 signal corrupted data
    pub max_column_drift: f64,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            exact_mode_threshold: DEFAULT_EXACT_MODE_THRESHOLD,
            distance_metric: DistanceMetric::SquaredL2,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            singular_threshold: DEFAULT_SINGULAR_THRESHOLD,
            max_column_drift: DEFAULT_MAX_COLUMN_DRIFT,
        }
    }
}

impl MitigationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exact_mode_threshold(mut self, threshold: usize) -> Self {
        self.exact_mode_threshold = threshold;
        self
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_singular_threshold(mut self, threshold: f64) -> Self {
        self.singular_threshold = threshold;
        self
    }

    pub fn with_max_column_drift(mut self, drift: f64) -> Self {
        self.max_column_drift = drift;
        self
    }

    /// Tight tolerances for high-statistics data
    pub fn strict() -> Self {
        Self {
            convergence_tolerance: 1e-12,
            max_iterations: 100_000,
            singular_threshold: 1e6,
            ..Self::default()
        }
    }

    /// Loose tolerances for quick, low-statistics passes
    pub fn fast() -> Self {
        Self {
            convergence_tolerance: 1e-6,
            max_iterations: 1_000,
            ..Self::default()
        }
    }
}
