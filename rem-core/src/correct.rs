//! Correction of noisy measurement statistics against a noise model
//!
//! [`Corrector`] borrows an immutable [`NoiseModel`] and maps noisy
//! [`FrequencyTable`]s to corrected distributions, either by direct
//! inversion (fast, may leave the simplex) or by simplex-constrained
//! optimization (always physical). Out-of-range mass from inversion is a
//! reported quality metric, never an error and never silently clipped.
//!
//! The corrector holds no mutable state: one instance can serve many
//! concurrent corrections, and [`Corrector::correct_batch`] fans a batch
//! out across a rayon pool.

use std::collections::HashMap;

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MitigationConfig;
use crate::error::{MitigationError, Result};
use crate::estimator::{ConfidenceBound, SampleComplexityEstimator};
use crate::frequency::{render_bitstring, FrequencyTable};
use crate::model::NoiseModel;
use crate::partition::ClusterPartition;
use crate::solver::{default_solver, SimplexProblem, SimplexSolver, SolverBudget};

// =============================================================================
// Correction Output
// =============================================================================

/// Which correction algorithm produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMethod {
    /// Direct application of the inverse noise operator
    Unconstrained,
    /// Simplex-constrained distance minimization
    Constrained,
}

impl CorrectionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CorrectionMethod::Unconstrained => "unconstrained",
            CorrectionMethod::Constrained => "constrained",
        }
    }
}

/// Quality record attached to every correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Algorithm used
    pub method: CorrectionMethod,
    /// Total mass below zero in the raw result (unconstrained only)
    pub negative_mass: f64,
    /// Absolute deviation of the result sum from 1
    pub sum_deviation: f64,
    /// Solver iterations (constrained only)
    pub solver_iterations: Option<usize>,
    /// Final solver residual (constrained only)
    pub solver_residual: Option<f64>,
    /// Statistical confidence bound on the input, when requested
    pub tv_bound: Option<ConfidenceBound>,
}

/// Corrected outcome distribution plus its quality record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    n_bits: usize,
    probabilities: Array1<f64>,
    pub metrics: QualityMetrics,
}

impl Correction {
    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    /// Corrected probability vector, in outcome-index order.
    /// Unconstrained results may contain entries outside [0, 1].
    pub fn probabilities(&self) -> &Array1<f64> {
        &self.probabilities
    }

    pub fn probability(&self, outcome: usize) -> f64 {
        self.probabilities.get(outcome).copied().unwrap_or(0.0)
    }

    /// All entries non-negative and summing to 1 within `tolerance`
    pub fn is_physical(&self, tolerance: f64) -> bool {
        self.probabilities.iter().all(|&x| x >= -tolerance)
            && (self.probabilities.sum() - 1.0).abs() <= tolerance
    }

    /// Euclidean-closest valid distribution to this result. The raw vector
    /// is left untouched; unphysical mass stays visible in the metrics.
    pub fn nearest_physical(&self) -> Array1<f64> {
        let mut projected = self.probabilities.clone();
        crate::solver::project_onto_simplex(&mut projected);
        projected
    }

    /// Render as a bit-string keyed map (qubit n-1 leftmost)
    pub fn to_bitstring_map(&self) -> HashMap<String, f64> {
        self.probabilities
            .iter()
            .enumerate()
            .map(|(outcome, &p)| (render_bitstring(outcome, self.n_bits), p))
            .collect()
    }
}

// =============================================================================
// Corrector
// =============================================================================

/// Correction engine bound to one immutable noise model
pub struct Corrector<'m> {
    model: &'m NoiseModel,
    config: MitigationConfig,
    solver: Box<dyn SimplexSolver>,
    estimator: SampleComplexityEstimator,
}

impl<'m> Corrector<'m> {
    /// Corrector with default configuration and the metric's default solver
    pub fn new(model: &'m NoiseModel) -> Self {
        let config = MitigationConfig::default();
        let solver = default_solver(config.distance_metric);
        Self {
            model,
            config,
            solver,
            estimator: SampleComplexityEstimator::default(),
        }
    }

    /// Replace the configuration; picks the new metric's default solver
    pub fn with_config(mut self, config: MitigationConfig) -> Self {
        self.solver = default_solver(config.distance_metric);
        self.config = config;
        self
    }

    /// Swap in a custom constrained solver
    pub fn with_solver(mut self, solver: Box<dyn SimplexSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Change the confidence level used by [`Self::correct_auto`]
    pub fn with_estimator(mut self, estimator: SampleComplexityEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn model(&self) -> &NoiseModel {
        self.model
    }

    pub fn config(&self) -> &MitigationConfig {
        &self.config
    }

    /// Fast linear correction: apply the inverse noise operator.
    ///
    /// The result may contain small negative or above-one entries from
    /// numerical inversion; their magnitude is reported in the metrics.
    pub fn correct_unconstrained(&self, table: &FrequencyTable) -> Result<Correction> {
        let noisy = self.validated_probabilities(table)?;
        let raw = self
            .model
            .apply_inverse(&noisy, self.config.singular_threshold)?;
        let negative_mass: f64 = raw.iter().filter(|&&x| x < 0.0).map(|&x| -x).sum();
        let sum_deviation = (raw.sum() - 1.0).abs();
        Ok(Correction {
            n_bits: self.model.n_qubits(),
            probabilities: raw,
            metrics: QualityMetrics {
                method: CorrectionMethod::Unconstrained,
                negative_mass,
                sum_deviation,
                solver_iterations: None,
                solver_residual: None,
                tv_bound: None,
            },
        })
    }

    /// Constrained correction with the budget taken from the configuration
    pub fn correct_constrained(&self, table: &FrequencyTable) -> Result<Correction> {
        self.correct_constrained_with_budget(table, &SolverBudget::from_config(&self.config))
    }

    /// Constrained correction: minimize the configured distance between the
    /// model image of the estimate and the noisy input, over the simplex.
    ///
    /// Accepts an explicit budget so callers can attach timeouts or a
    /// cancellation flag. An exhausted budget yields
    /// [`MitigationError::Convergence`] carrying the best estimate so far.
    pub fn correct_constrained_with_budget(
        &self,
        table: &FrequencyTable,
        budget: &SolverBudget,
    ) -> Result<Correction> {
        let noisy = self.validated_probabilities(table)?;
        match self.model {
            NoiseModel::Exact { matrix } => {
                let problem =
                    SimplexProblem::new(matrix.matrix(), &noisy, self.config.distance_metric);
                let dim = self.model.dim();
                let init = Array1::from_elem(dim, 1.0 / dim as f64);
                let outcome = self.solver.solve(&problem, &init, budget);
                if !outcome.converged {
                    return Err(MitigationError::Convergence {
                        iterations: outcome.iterations,
                        residual: outcome.residual,
                        tolerance: budget.tolerance,
                        best_estimate: outcome.probabilities.to_vec(),
                    });
                }
                Ok(self.constrained_correction(
                    outcome.probabilities,
                    outcome.iterations,
                    outcome.residual,
                ))
            }
            NoiseModel::Factorized {
                clusters,
                partition,
            } => {
                // under the product-noise assumption the objective separates
                // across clusters: solve each small simplex problem on the
                // cluster marginal, then recombine the product
                let mut locals: Vec<Array1<f64>> = Vec::with_capacity(clusters.len());
                let mut iterations = 0usize;
                let mut residual = 0.0f64;
                let mut failed = false;
                for (matrix, cluster) in clusters.iter().zip(partition.clusters()) {
                    let marginal = table.marginal(cluster)?;
                    let local_noisy = marginal.to_probabilities();
                    let problem = SimplexProblem::new(
                        matrix.matrix(),
                        &local_noisy,
                        self.config.distance_metric,
                    );
                    let dim = matrix.dim();
                    let init = Array1::from_elem(dim, 1.0 / dim as f64);
                    let outcome = self.solver.solve(&problem, &init, budget);
                    iterations += outcome.iterations;
                    residual = residual.max(outcome.residual);
                    failed |= !outcome.converged;
                    locals.push(outcome.probabilities);
                }
                let combined = product_distribution(partition, &locals);
                if failed {
                    return Err(MitigationError::Convergence {
                        iterations,
                        residual,
                        tolerance: budget.tolerance,
                        best_estimate: combined.to_vec(),
                    });
                }
                Ok(self.constrained_correction(combined, iterations, residual))
            }
        }
    }

    /// Pick the method from the input's statistical confidence bound:
    /// tight statistics take the fast inversion, loose statistics the
    /// noise-robust constrained correction. The bound is attached to the
    /// metrics either way.
    pub fn correct_auto(&self, table: &FrequencyTable) -> Result<Correction> {
        let bound = self.estimator.bound_for(table);
        let mut correction = if bound.recommends_unconstrained() {
            self.correct_unconstrained(table)?
        } else {
            self.correct_constrained(table)?
        };
        correction.metrics.tv_bound = Some(bound);
        Ok(correction)
    }

    /// Correct many independent experiments against the shared model in
    /// parallel. Each failure is scoped to its own table.
    pub fn correct_batch(
        &self,
        tables: &[FrequencyTable],
        method: CorrectionMethod,
    ) -> Vec<Result<Correction>> {
        tables
            .par_iter()
            .map(|table| match method {
                CorrectionMethod::Unconstrained => self.correct_unconstrained(table),
                CorrectionMethod::Constrained => self.correct_constrained(table),
            })
            .collect()
    }

    fn constrained_correction(
        &self,
        probabilities: Array1<f64>,
        iterations: usize,
        residual: f64,
    ) -> Correction {
        let sum_deviation = (probabilities.sum() - 1.0).abs();
        Correction {
            n_bits: self.model.n_qubits(),
            probabilities,
            metrics: QualityMetrics {
                method: CorrectionMethod::Constrained,
                negative_mass: 0.0,
                sum_deviation,
                solver_iterations: Some(iterations),
                solver_residual: Some(residual),
                tv_bound: None,
            },
        }
    }

    fn validated_probabilities(&self, table: &FrequencyTable) -> Result<Array1<f64>> {
        if table.n_bits() != self.model.n_qubits() {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "table spans {} bits but the model covers {}",
                table.n_bits(),
                self.model.n_qubits()
            )));
        }
        if table.is_empty() {
            return Err(MitigationError::MalformedFrequencyTable(
                "table has zero shots".into(),
            ));
        }
        Ok(table.to_probabilities())
    }
}

/// Recombine per-cluster distributions into the full product distribution
fn product_distribution(partition: &ClusterPartition, locals: &[Array1<f64>]) -> Array1<f64> {
    let dim = 1usize << partition.n_qubits();
    let mut combined = Array1::zeros(dim);
    for outcome in 0..dim {
        let mut product = 1.0;
        for (c, local) in locals.iter().enumerate() {
            product *= local[partition.local_outcome(c, outcome)];
            if product == 0.0 {
                break;
            }
        }
        combined[outcome] = product;
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confusion::ConfusionMatrix;

    fn exact_two_qubit_model() -> NoiseModel {
        let per_qubit = ConfusionMatrix::from_flip_rates(0.05, 0.10);
        NoiseModel::compose(
            vec![per_qubit.clone(), per_qubit],
            ClusterPartition::singletons(2),
            &MitigationConfig::default(),
        )
        .unwrap()
    }

    fn table_from_probabilities(probs: &Array1<f64>, shots: f64) -> FrequencyTable {
        let counts: Vec<(usize, u64)> = probs
            .iter()
            .enumerate()
            .map(|(outcome, &p)| (outcome, (p * shots).round() as u64))
            .collect();
        FrequencyTable::from_counts(probs.len().trailing_zeros() as usize, counts).unwrap()
    }

    #[test]
    fn test_identity_model_returns_input() {
        let model = NoiseModel::Exact {
            matrix: ConfusionMatrix::identity(2),
        };
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(2, [(0, 400), (1, 100), (2, 200), (3, 300)]).unwrap();
        let expected = table.to_probabilities();

        let unconstrained = corrector.correct_unconstrained(&table).unwrap();
        for x in 0..4 {
            assert!((unconstrained.probability(x) - expected[x]).abs() < 1e-12);
        }
        assert!(unconstrained.metrics.negative_mass.abs() < 1e-12);

        let constrained = corrector.correct_constrained(&table).unwrap();
        for x in 0..4 {
            assert!((constrained.probability(x) - expected[x]).abs() < 1e-4);
        }
        assert!(constrained.is_physical(1e-9));
    }

    #[test]
    fn test_unconstrained_round_trip() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model);
        let truth = ndarray::arr1(&[0.4, 0.1, 0.1, 0.4]);
        let noisy = model.apply(&truth);
        let table = table_from_probabilities(&noisy, 1e7);

        let correction = corrector.correct_unconstrained(&table).unwrap();
        for x in 0..4 {
            assert!(
                (correction.probability(x) - truth[x]).abs() < 0.02,
                "outcome {x}: {} vs {}",
                correction.probability(x),
                truth[x]
            );
        }
        assert_eq!(correction.metrics.method, CorrectionMethod::Unconstrained);
    }

    #[test]
    fn test_unconstrained_reports_negative_mass() {
        let model = NoiseModel::Exact {
            matrix: ConfusionMatrix::from_matrix(ndarray::arr2(&[[0.6, 0.4], [0.4, 0.6]]))
                .unwrap(),
        };
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(1, [(0, 950), (1, 50)]).unwrap();

        let correction = corrector.correct_unconstrained(&table).unwrap();
        // raw inverse is [2.75, -1.75]: unphysical but reported, not clipped
        assert!((correction.probability(0) - 2.75).abs() < 1e-9);
        assert!((correction.probability(1) + 1.75).abs() < 1e-9);
        assert!((correction.metrics.negative_mass - 1.75).abs() < 1e-9);
        assert!(correction.metrics.sum_deviation < 1e-9);
        assert!(!correction.is_physical(1e-9));

        let projected = correction.nearest_physical();
        assert!(projected.iter().all(|&x| x >= 0.0));
        assert!((projected.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constrained_always_physical() {
        let model = NoiseModel::Exact {
            matrix: ConfusionMatrix::from_matrix(ndarray::arr2(&[[0.6, 0.4], [0.4, 0.6]]))
                .unwrap(),
        };
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(1, [(0, 950), (1, 50)]).unwrap();

        let correction = corrector.correct_constrained(&table).unwrap();
        assert!(correction.is_physical(1e-9));
        assert!(correction.probability(0) > 0.99);
        assert!(correction.metrics.solver_iterations.is_some());
    }

    #[test]
    fn test_factorized_constrained_product_recovery() {
        let per_qubit = ConfusionMatrix::from_flip_rates(0.05, 0.10);
        let model = NoiseModel::compose(
            vec![per_qubit.clone(), per_qubit],
            ClusterPartition::singletons(2),
            &MitigationConfig::default().with_exact_mode_threshold(0),
        )
        .unwrap();
        let corrector = Corrector::new(&model);

        // product-form truth: q0 reads 1 with 0.1, q1 with 0.2
        let truth = ndarray::arr1(&[0.72, 0.08, 0.18, 0.02]);
        let noisy = model.apply(&truth);
        let table = table_from_probabilities(&noisy, 1e6);

        let correction = corrector.correct_constrained(&table).unwrap();
        assert!(correction.is_physical(1e-9));
        for x in 0..4 {
            assert!(
                (correction.probability(x) - truth[x]).abs() < 1e-3,
                "outcome {x}: {} vs {}",
                correction.probability(x),
                truth[x]
            );
        }
    }

    #[test]
    fn test_convergence_error_carries_partial() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model).with_config(
            MitigationConfig::default()
                .with_max_iterations(1)
                .with_convergence_tolerance(0.0),
        );
        let table = FrequencyTable::from_counts(2, [(0, 460), (1, 40), (2, 40), (3, 460)]).unwrap();

        let err = corrector.correct_constrained(&table).unwrap_err();
        assert!(err.is_recoverable());
        match err {
            MitigationError::Convergence {
                iterations,
                best_estimate,
                ..
            } => {
                assert!(iterations >= 1);
                assert_eq!(best_estimate.len(), 4);
            }
            other => panic!("expected Convergence, got {other:?}"),
        }
    }

    #[test]
    fn test_alphabet_mismatch_rejected() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(3, [(0, 100)]).unwrap();
        assert!(matches!(
            corrector.correct_unconstrained(&table),
            Err(MitigationError::MalformedFrequencyTable(_))
        ));
    }

    #[test]
    fn test_empty_table_rejected() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(2, []).unwrap();
        assert!(matches!(
            corrector.correct_constrained(&table),
            Err(MitigationError::MalformedFrequencyTable(_))
        ));
    }

    #[test]
    fn test_correct_auto_attaches_bound() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model);

        // few shots: loose statistics, constrained path
        let small = FrequencyTable::from_counts(2, [(0, 40), (3, 60)]).unwrap();
        let correction = corrector.correct_auto(&small).unwrap();
        assert_eq!(correction.metrics.method, CorrectionMethod::Constrained);
        assert!(correction.metrics.tv_bound.is_some());

        // heavy statistics: inversion path
        let truth = ndarray::arr1(&[0.4, 0.1, 0.1, 0.4]);
        let noisy = model.apply(&truth);
        let big = table_from_probabilities(&noisy, 1e8);
        let correction = corrector.correct_auto(&big).unwrap();
        assert_eq!(correction.metrics.method, CorrectionMethod::Unconstrained);
    }

    #[test]
    fn test_batch_matches_single() {
        let model = exact_two_qubit_model();
        let corrector = Corrector::new(&model);
        let truth = ndarray::arr1(&[0.4, 0.1, 0.1, 0.4]);
        let noisy = model.apply(&truth);
        let tables: Vec<FrequencyTable> = (0..4)
            .map(|_| table_from_probabilities(&noisy, 1e6))
            .collect();

        let results = corrector.correct_batch(&tables, CorrectionMethod::Unconstrained);
        assert_eq!(results.len(), 4);
        let single = corrector.correct_unconstrained(&tables[0]).unwrap();
        for result in results {
            let correction = result.unwrap();
            for x in 0..4 {
                assert!((correction.probability(x) - single.probability(x)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_bitstring_map() {
        let model = NoiseModel::Exact {
            matrix: ConfusionMatrix::identity(2),
        };
        let corrector = Corrector::new(&model);
        let table = FrequencyTable::from_counts(2, [(1, 250), (2, 750)]).unwrap();
        let correction = corrector.correct_unconstrained(&table).unwrap();
        let map = correction.to_bitstring_map();
        assert!((map["01"] - 0.25).abs() < 1e-12);
        assert!((map["10"] - 0.75).abs() < 1e-12);
        assert!((map["00"]).abs() < 1e-12);
    }
}
