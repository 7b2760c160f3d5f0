//! Noise model composition over cluster confusion matrices
//!
//! [`NoiseModel`] is a tagged variant: either the full 2^n matrix (exact
//! tensor composition, small registers) or the ordered list of cluster
//! matrices with their partition (factorized, deferred composition). In
//! factorized mode the full matrix is never materialized; every operation
//! runs one cluster at a time over the tensor-factor structure.
//!
//! Models are immutable once composed and safe to share across concurrent
//! correction calls; recalibration means composing a new model value.

use std::fs;
use std::path::Path;

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::MitigationConfig;
use crate::confusion::{norm_1, ConfusionMatrix};
use crate::error::{MitigationError, Result};
use crate::partition::ClusterPartition;

/// Composed readout noise operator for the full register
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum NoiseModel {
    /// Full 2^n confusion matrix, materialized at composition time
    Exact { matrix: ConfusionMatrix },
    /// Deferred composition: cluster matrices applied one tensor factor at
    /// a time, in partition order
    Factorized {
        clusters: Vec<ConfusionMatrix>,
        partition: ClusterPartition,
    },
}

impl NoiseModel {
    /// Compose per-cluster confusion matrices into a full-register model.
    ///
    /// `matrices[c]` must describe cluster `c` of `partition` (dimension
    /// `2^|cluster c|`). Goes exact when the full alphabet fits under
    /// `config.exact_mode_threshold`, factorized otherwise.
    pub fn compose(
        matrices: Vec<ConfusionMatrix>,
        partition: ClusterPartition,
        config: &MitigationConfig,
    ) -> Result<NoiseModel> {
        if matrices.len() != partition.n_clusters() {
            return Err(MitigationError::InvalidPartition(format!(
                "{} cluster matrices supplied for {} clusters",
                matrices.len(),
                partition.n_clusters()
            )));
        }
        for (c, (matrix, cluster)) in matrices.iter().zip(partition.clusters()).enumerate() {
            if matrix.n_bits() != cluster.len() {
                return Err(MitigationError::InvalidPartition(format!(
                    "cluster {c} spans {} qubits but its matrix covers {}",
                    cluster.len(),
                    matrix.n_bits()
                )));
            }
        }
        let n = partition.n_qubits();
        let exact = n < usize::BITS as usize && (1usize << n) <= config.exact_mode_threshold;
        if exact {
            let matrix = compose_dense(&matrices, &partition);
            debug!("composed exact noise model: {n} qubits, dim {}", 1usize << n);
            Ok(NoiseModel::Exact {
                matrix: ConfusionMatrix::from_matrix_with_drift(matrix, config.max_column_drift)?,
            })
        } else {
            debug!(
                "composed factorized noise model: {n} qubits, {} clusters, largest {}",
                partition.n_clusters(),
                partition.largest_cluster()
            );
            Ok(NoiseModel::Factorized {
                clusters: matrices,
                partition,
            })
        }
    }

    /// Number of measured qubits
    pub fn n_qubits(&self) -> usize {
        match self {
            NoiseModel::Exact { matrix } => matrix.n_bits(),
            NoiseModel::Factorized { partition, .. } => partition.n_qubits(),
        }
    }

    /// Full alphabet size 2^n
    pub fn dim(&self) -> usize {
        1usize << self.n_qubits()
    }

    pub fn is_factorized(&self) -> bool {
        matches!(self, NoiseModel::Factorized { .. })
    }

    /// Cluster partition, present only in factorized mode
    pub fn partition(&self) -> Option<&ClusterPartition> {
        match self {
            NoiseModel::Exact { .. } => None,
            NoiseModel::Factorized { partition, .. } => Some(partition),
        }
    }

    /// Forward application: map a true distribution to the noisy one
    pub fn apply(&self, probs: &Array1<f64>) -> Array1<f64> {
        match self {
            NoiseModel::Exact { matrix } => matrix.apply(probs),
            NoiseModel::Factorized {
                clusters,
                partition,
            } => {
                let mut result = probs.clone();
                for (matrix, cluster) in clusters.iter().zip(partition.clusters()) {
                    apply_local(&mut result, matrix.matrix(), cluster, partition.n_qubits());
                }
                result
            }
        }
    }

    /// Inverse application: map a noisy distribution back to the raw
    /// (possibly unphysical) estimate of the true one.
    ///
    /// Fails with [`MitigationError::SingularNoiseModel`] when any cluster's
    /// 1-norm condition number exceeds `singular_threshold`.
    pub fn apply_inverse(
        &self,
        probs: &Array1<f64>,
        singular_threshold: f64,
    ) -> Result<Array1<f64>> {
        match self {
            NoiseModel::Exact { matrix } => {
                let inverse = invertible_or_err(matrix, 0, singular_threshold)?;
                Ok(inverse.dot(probs))
            }
            NoiseModel::Factorized {
                clusters,
                partition,
            } => {
                let mut result = probs.clone();
                for (c, (matrix, cluster)) in
                    clusters.iter().zip(partition.clusters()).enumerate()
                {
                    let inverse = invertible_or_err(matrix, c, singular_threshold)?;
                    apply_local(&mut result, &inverse, cluster, partition.n_qubits());
                }
                Ok(result)
            }
        }
    }

    /// Verify every cluster is invertible under the given condition cutoff
    pub fn check_invertible(&self, singular_threshold: f64) -> Result<()> {
        match self {
            NoiseModel::Exact { matrix } => {
                invertible_or_err(matrix, 0, singular_threshold).map(|_| ())
            }
            NoiseModel::Factorized { clusters, .. } => {
                for (c, matrix) in clusters.iter().enumerate() {
                    invertible_or_err(matrix, c, singular_threshold)?;
                }
                Ok(())
            }
        }
    }

    /// Materialize the full matrix by applying the model to basis vectors.
    /// Exponential in n; intended for tests and small registers.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            NoiseModel::Exact { matrix } => matrix.matrix().clone(),
            NoiseModel::Factorized { .. } => {
                let dim = self.dim();
                let mut dense = Array2::zeros((dim, dim));
                for i in 0..dim {
                    let mut basis = Array1::zeros(dim);
                    basis[i] = 1.0;
                    let column = self.apply(&basis);
                    for j in 0..dim {
                        dense[[j, i]] = column[j];
                    }
                }
                dense
            }
        }
    }

    /// Persist as JSON; round-trips matrices and partition exactly
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a model persisted by [`Self::save_json`]
    pub fn load_json(path: impl AsRef<Path>) -> Result<NoiseModel> {
        let json = fs::read_to_string(path)?;
        let model: NoiseModel = serde_json::from_str(&json)?;
        model.validate()?;
        Ok(model)
    }

    /// Structural validation for models that bypassed composition
    /// (deserialization).
    fn validate(&self) -> Result<()> {
        match self {
            NoiseModel::Exact { matrix } => validate_stochastic(matrix, 0),
            NoiseModel::Factorized {
                clusters,
                partition,
            } => {
                if clusters.len() != partition.n_clusters() {
                    return Err(MitigationError::InvalidPartition(format!(
                        "{} cluster matrices for {} clusters",
                        clusters.len(),
                        partition.n_clusters()
                    )));
                }
                for (c, (matrix, cluster)) in
                    clusters.iter().zip(partition.clusters()).enumerate()
                {
                    if matrix.n_bits() != cluster.len() {
                        return Err(MitigationError::InvalidPartition(format!(
                            "cluster {c} spans {} qubits but its matrix covers {}",
                            cluster.len(),
                            matrix.n_bits()
                        )));
                    }
                    validate_stochastic(matrix, c)?;
                }
                Ok(())
            }
        }
    }
}

/// Condition-checked inverse of one cluster matrix
fn invertible_or_err(
    matrix: &ConfusionMatrix,
    cluster: usize,
    singular_threshold: f64,
) -> Result<Array2<f64>> {
    let inverse = matrix
        .try_inverse()
        .ok_or(MitigationError::SingularNoiseModel {
            cluster,
            condition: f64::INFINITY,
            threshold: singular_threshold,
        })?;
    let condition = norm_1(matrix.matrix()) * norm_1(&inverse);
    if condition > singular_threshold {
        return Err(MitigationError::SingularNoiseModel {
            cluster,
            condition,
            threshold: singular_threshold,
        });
    }
    Ok(inverse)
}

fn validate_stochastic(matrix: &ConfusionMatrix, cluster: usize) -> Result<()> {
    let m = matrix.matrix();
    for i in 0..m.ncols() {
        let sum: f64 = m.column(i).sum();
        if (sum - 1.0).abs() > 1e-6 || m.column(i).iter().any(|&x| x < -1e-9) {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "cluster {cluster} column {i} is not stochastic (sum {sum})"
            )));
        }
    }
    Ok(())
}

/// Dense exact composition: entry (j, i) is the product over clusters of
/// the cluster matrix entry at the local bits of j and i. This is the
/// Kronecker product of the cluster matrices routed through the
/// cluster-to-qubit bit mapping.
fn compose_dense(matrices: &[ConfusionMatrix], partition: &ClusterPartition) -> Array2<f64> {
    let dim = 1usize << partition.n_qubits();
    let mut dense = Array2::zeros((dim, dim));
    for j in 0..dim {
        for i in 0..dim {
            let mut product = 1.0;
            for (c, matrix) in matrices.iter().enumerate() {
                let local_j = partition.local_outcome(c, j);
                let local_i = partition.local_outcome(c, i);
                product *= matrix.matrix()[[local_j, local_i]];
                if product == 0.0 {
                    break;
                }
            }
            dense[[j, i]] = product;
        }
    }
    dense
}

/// Scatter `value`'s bit t to global bit `positions[t]`
fn spread_bits(value: usize, positions: &[usize]) -> usize {
    let mut spread = 0usize;
    for (t, &q) in positions.iter().enumerate() {
        spread |= ((value >> t) & 1) << q;
    }
    spread
}

/// Apply a local operator on the tensor factor spanned by `qubits`,
/// in place over the full 2^n vector.
fn apply_local(vector: &mut Array1<f64>, local: &Array2<f64>, qubits: &[usize], n_bits: usize) {
    let k = qubits.len();
    let local_dim = 1usize << k;
    let rest: Vec<usize> = (0..n_bits).filter(|q| !qubits.contains(q)).collect();
    let mut indices = vec![0usize; local_dim];
    let mut gathered = vec![0.0f64; local_dim];

    for r in 0..(1usize << rest.len()) {
        let base = spread_bits(r, &rest);
        for (i, index) in indices.iter_mut().enumerate() {
            *index = base | spread_bits(i, qubits);
        }
        for (i, slot) in gathered.iter_mut().enumerate() {
            *slot = vector[indices[i]];
        }
        for j in 0..local_dim {
            let mut acc = 0.0;
            for (i, &g) in gathered.iter().enumerate() {
                acc += local[[j, i]] * g;
            }
            vector[indices[j]] = acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn qubit_matrix() -> ConfusionMatrix {
        ConfusionMatrix::from_flip_rates(0.05, 0.10)
    }

    fn two_qubit_model(config: &MitigationConfig) -> NoiseModel {
        NoiseModel::compose(
            vec![qubit_matrix(), qubit_matrix()],
            ClusterPartition::singletons(2),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_compose_exact_entries() {
        let model = two_qubit_model(&MitigationConfig::default());
        assert!(!model.is_factorized());
        let dense = model.to_dense();
        // (0, 0): both qubits read 0 given true 00
        assert!((dense[[0, 0]] - 0.95 * 0.95).abs() < 1e-12);
        // (1, 0): qubit 0 flips 0 -> 1
        assert!((dense[[1, 0]] - 0.05 * 0.95).abs() < 1e-12);
        // (3, 0): both flip
        assert!((dense[[3, 0]] - 0.05 * 0.05).abs() < 1e-12);
        // (0, 3): both flip 1 -> 0
        assert!((dense[[0, 3]] - 0.10 * 0.10).abs() < 1e-12);
        // columns stochastic
        for i in 0..4 {
            assert!((dense.column(i).sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exact_matches_factorized() {
        let exact = two_qubit_model(&MitigationConfig::default());
        let factorized = two_qubit_model(&MitigationConfig::default().with_exact_mode_threshold(0));
        assert!(factorized.is_factorized());

        let dense_exact = exact.to_dense();
        let dense_factorized = factorized.to_dense();
        for j in 0..4 {
            for i in 0..4 {
                assert!((dense_exact[[j, i]] - dense_factorized[[j, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_non_contiguous_cluster_apply() {
        // 3 qubits, cluster {0, 2} with a correlated 4x4 matrix, {1} alone
        let pair = ConfusionMatrix::from_matrix(ndarray::arr2(&[
            [0.90, 0.05, 0.04, 0.01],
            [0.04, 0.85, 0.02, 0.04],
            [0.03, 0.04, 0.88, 0.05],
            [0.03, 0.06, 0.06, 0.90],
        ]))
        .unwrap();
        let single = qubit_matrix();
        let partition = ClusterPartition::new(3, vec![vec![0, 2], vec![1]]).unwrap();

        let exact = NoiseModel::compose(
            vec![pair.clone(), single.clone()],
            partition.clone(),
            &MitigationConfig::default(),
        )
        .unwrap();
        let factorized = NoiseModel::compose(
            vec![pair, single],
            partition,
            &MitigationConfig::default().with_exact_mode_threshold(0),
        )
        .unwrap();

        let probs = arr1(&[0.1, 0.0, 0.2, 0.05, 0.15, 0.1, 0.25, 0.15]);
        let via_exact = exact.apply(&probs);
        let via_factorized = factorized.apply(&probs);
        for x in 0..8 {
            assert!((via_exact[x] - via_factorized[x]).abs() < 1e-12);
        }
        assert!((via_factorized.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_apply_inverse_round_trip() {
        for threshold in [1024usize, 0] {
            let model =
                two_qubit_model(&MitigationConfig::default().with_exact_mode_threshold(threshold));
            let truth = arr1(&[0.4, 0.1, 0.1, 0.4]);
            let noisy = model.apply(&truth);
            let recovered = model.apply_inverse(&noisy, 1e8).unwrap();
            for x in 0..4 {
                assert!((recovered[x] - truth[x]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_cluster_reported() {
        let singular = ConfusionMatrix::from_matrix(ndarray::arr2(&[[0.5, 0.5], [0.5, 0.5]]))
            .unwrap();
        let model = NoiseModel::compose(
            vec![qubit_matrix(), singular],
            ClusterPartition::singletons(2),
            &MitigationConfig::default().with_exact_mode_threshold(0),
        )
        .unwrap();
        let err = model
            .apply_inverse(&arr1(&[0.25, 0.25, 0.25, 0.25]), 1e8)
            .unwrap_err();
        match err {
            MitigationError::SingularNoiseModel { cluster, .. } => assert_eq!(cluster, 1),
            other => panic!("expected SingularNoiseModel, got {other:?}"),
        }
    }

    #[test]
    fn test_condition_threshold_enforced() {
        let model = two_qubit_model(&MitigationConfig::default());
        // per-qubit condition is tiny, but a cutoff below it must trip
        let err = model
            .apply_inverse(&arr1(&[0.25, 0.25, 0.25, 0.25]), 1.0)
            .unwrap_err();
        assert!(matches!(err, MitigationError::SingularNoiseModel { .. }));
    }

    #[test]
    fn test_mismatched_matrix_count_rejected() {
        let err = NoiseModel::compose(
            vec![qubit_matrix()],
            ClusterPartition::singletons(2),
            &MitigationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MitigationError::InvalidPartition(_)));
    }

    #[test]
    fn test_mismatched_matrix_dim_rejected() {
        let partition = ClusterPartition::new(3, vec![vec![0, 1], vec![2]]).unwrap();
        let err = NoiseModel::compose(
            vec![qubit_matrix(), qubit_matrix()],
            partition,
            &MitigationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MitigationError::InvalidPartition(_)));
    }

    #[test]
    fn test_json_round_trip_in_memory() {
        let model = two_qubit_model(&MitigationConfig::default().with_exact_mode_threshold(0));
        let json = serde_json::to_string(&model).unwrap();
        let restored: NoiseModel = serde_json::from_str(&json).unwrap();
        restored.validate().unwrap();

        let dense_a = model.to_dense();
        let dense_b = restored.to_dense();
        for j in 0..4 {
            for i in 0..4 {
                assert!((dense_a[[j, i]] - dense_b[[j, i]]).abs() < 1e-15);
            }
        }
        assert_eq!(
            model.partition().unwrap().clusters(),
            restored.partition().unwrap().clusters()
        );
    }
}
