//! Readout error mitigation for quantum measurement statistics
//!
//! Builds per-subsystem confusion matrices from calibration counts,
//! composes them into a full-register noise model (exact for small
//! registers, cluster-factorized for large ones), and corrects noisy
//! outcome statistics back to a physically valid distribution, either by
//! direct inversion or by simplex-constrained optimization.
//!
//! Pipeline: calibration counts -> [`ConfusionMatrix`] per cluster ->
//! [`NoiseModel::compose`] -> [`Corrector`] against experiment
//! [`FrequencyTable`]s, with [`SampleComplexityEstimator`] deciding how
//! much the raw statistics can be trusted.

pub mod config; // configuration builder and engine-wide defaults
pub mod confusion; // confusion matrices from calibration counts
pub mod correct; // unconstrained and constrained correction engine
pub mod error;
pub mod estimator; // statistical confidence bounds on empirical tables
pub mod frequency; // outcome count tables
pub mod model; // exact / factorized noise model composition
pub mod partition; // cluster partitions of the qubit register
pub mod sim; // synthetic measurement source for tests and benches
pub mod solver; // simplex-constrained solvers

pub use config::{
    DistanceMetric, MitigationConfig, DEFAULT_CONVERGENCE_TOLERANCE, DEFAULT_EXACT_MODE_THRESHOLD,
    DEFAULT_MAX_COLUMN_DRIFT, DEFAULT_MAX_ITERATIONS, DEFAULT_SINGULAR_THRESHOLD,
};
pub use confusion::ConfusionMatrix;
pub use correct::{Correction, CorrectionMethod, Corrector, QualityMetrics};
pub use error::{MitigationError, Result};
pub use estimator::{
    statistical_error_bound, ConfidenceBound, SampleComplexityEstimator, DEFAULT_CONFIDENCE,
};
pub use frequency::{render_bitstring, total_variation_distance, FrequencyTable};
pub use model::NoiseModel;
pub use partition::ClusterPartition;
pub use sim::ShotSampler;
pub use solver::{
    default_solver, project_onto_simplex, IterativeBayes, ProjectedGradient, SimplexProblem,
    SimplexSolver, SolveOutcome, SolverBudget,
};
