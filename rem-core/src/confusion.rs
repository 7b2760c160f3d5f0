//! Confusion matrices from detector calibration counts
//!
//! A [`ConfusionMatrix`] is the column-stochastic matrix of one subsystem:
//! `M[[j, i]] = P(observe j | true i)`, estimated from one calibration
//! [`FrequencyTable`] per computational basis state. Columns drifting
//! slightly from sum 1 are renormalized; drift past the configured bound is
//! treated as corrupted calibration data.

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_COLUMN_DRIFT;
use crate::error::{MitigationError, Result};
use crate::frequency::{parse_bitstring, render_bitstring, FrequencyTable};

/// Column sums within this tolerance of 1 are accepted as-is
const AUTO_RENORM_TOLERANCE: f64 = 1e-9;

/// Pivots below this magnitude abort Gauss-Jordan elimination
const PIVOT_EPSILON: f64 = 1e-12;

/// Column-stochastic readout confusion matrix for one subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Subsystem size in qubits
    n_bits: usize,
    /// `matrix[[j, i]] = P(observe j | true i)`; every column sums to 1
    matrix: Array2<f64>,
}

impl ConfusionMatrix {
    /// Build from calibration runs, one [`FrequencyTable`] per basis state.
    ///
    /// `tables[i]` holds the outcomes observed with the subsystem prepared
    /// in basis state `i`; column `i` of the matrix is its normalized
    /// frequency vector.
    pub fn from_calibration(tables: &[FrequencyTable]) -> Result<Self> {
        Self::from_calibration_with_drift(tables, DEFAULT_MAX_COLUMN_DRIFT)
    }

    /// [`Self::from_calibration`] with an explicit corruption bound on
    /// column-sum drift.
    pub fn from_calibration_with_drift(
        tables: &[FrequencyTable],
        max_column_drift: f64,
    ) -> Result<Self> {
        let dim = tables.len();
        if dim < 2 || !dim.is_power_of_two() {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "expected a power-of-two number of calibration states, got {dim}"
            )));
        }
        let n_bits = dim.trailing_zeros() as usize;
        let mut matrix = Array2::zeros((dim, dim));
        for (i, table) in tables.iter().enumerate() {
            if table.n_bits() != n_bits {
                return Err(MitigationError::MalformedFrequencyTable(format!(
                    "calibration table for state |{}\u{27e9} spans {} bits, expected {n_bits}",
                    render_bitstring(i, n_bits),
                    table.n_bits()
                )));
            }
            if table.is_empty() {
                return Err(MitigationError::InsufficientData {
                    basis_state: render_bitstring(i, n_bits),
                });
            }
            for (&outcome, &count) in table.counts() {
                matrix[[outcome, i]] = count as f64 / table.n_shots() as f64;
            }
        }
        Self::from_matrix_with_drift(matrix, max_column_drift)
    }

    /// Build from (basis-state label, calibration table) pairs, e.g.
    /// `("10", table)`. Every basis state of the subsystem must appear
    /// exactly once; a missing state counts as a calibration run with no
    /// data.
    pub fn from_labeled_calibration<'a>(
        pairs: impl IntoIterator<Item = (&'a str, FrequencyTable)>,
    ) -> Result<Self> {
        let mut n_bits: Option<usize> = None;
        let mut labeled: Vec<(usize, FrequencyTable)> = Vec::new();
        for (label, table) in pairs {
            match n_bits {
                None => n_bits = Some(label.len()),
                Some(n) if n != label.len() => {
                    return Err(MitigationError::MalformedFrequencyTable(format!(
                        "label '{label}' has length {}, expected {n}",
                        label.len()
                    )));
                }
                _ => {}
            }
            labeled.push((parse_bitstring(label)?, table));
        }
        let n_bits = n_bits.ok_or_else(|| {
            MitigationError::MalformedFrequencyTable("empty calibration input".into())
        })?;
        let mut slots: Vec<Option<FrequencyTable>> = vec![None; 1 << n_bits];
        for (index, table) in labeled {
            if slots[index].is_some() {
                return Err(MitigationError::MalformedFrequencyTable(format!(
                    "duplicate calibration run for basis state |{}\u{27e9}",
                    render_bitstring(index, n_bits)
                )));
            }
            slots[index] = Some(table);
        }
        let tables = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or(MitigationError::InsufficientData {
                    basis_state: render_bitstring(i, n_bits),
                })
            })
            .collect::<Result<Vec<FrequencyTable>>>()?;
        Self::from_calibration(&tables)
    }

    /// Wrap an existing column-stochastic matrix, applying the same
    /// renormalization/corruption policy as calibration construction.
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self> {
        Self::from_matrix_with_drift(matrix, DEFAULT_MAX_COLUMN_DRIFT)
    }

    /// [`Self::from_matrix`] with an explicit corruption bound.
    pub fn from_matrix_with_drift(mut matrix: Array2<f64>, max_column_drift: f64) -> Result<Self> {
        let dim = matrix.nrows();
        if dim != matrix.ncols() || dim < 2 || !dim.is_power_of_two() {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "confusion matrix must be square with power-of-two dimension, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        for i in 0..dim {
            let mut sum = 0.0;
            for j in 0..dim {
                let entry = matrix[[j, i]];
                if entry < -AUTO_RENORM_TOLERANCE || entry > 1.0 + max_column_drift {
                    return Err(MitigationError::MalformedFrequencyTable(format!(
                        "entry ({j}, {i}) = {entry} outside [0, 1]"
                    )));
                }
                matrix[[j, i]] = entry.max(0.0);
                sum += matrix[[j, i]];
            }
            let drift = (sum - 1.0).abs();
            if drift <= AUTO_RENORM_TOLERANCE {
                continue;
            }
            if drift > max_column_drift {
                return Err(MitigationError::MalformedFrequencyTable(format!(
                    "column {i} sums to {sum}, drift {drift:.3e} exceeds bound {max_column_drift:.3e}"
                )));
            }
            debug!("renormalizing confusion column {i}: sum {sum}");
            for j in 0..dim {
                matrix[[j, i]] /= sum;
            }
        }
        let n_bits = dim.trailing_zeros() as usize;
        Ok(Self { n_bits, matrix })
    }

    /// Perfect readout: the identity matrix
    pub fn identity(n_bits: usize) -> Self {
        Self {
            n_bits,
            matrix: Array2::eye(1 << n_bits),
        }
    }

    /// Single-qubit matrix from flip rates: `p01 = P(1|0)`, `p10 = P(0|1)`
    pub fn from_flip_rates(p01: f64, p10: f64) -> Self {
        let p01 = p01.clamp(0.0, 1.0);
        let p10 = p10.clamp(0.0, 1.0);
        Self {
            n_bits: 1,
            matrix: ndarray::arr2(&[[1.0 - p01, p10], [p01, 1.0 - p10]]),
        }
    }

    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    /// Matrix dimension 2^k
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Forward application: map a true distribution to the observed one
    pub fn apply(&self, probs: &Array1<f64>) -> Array1<f64> {
        self.matrix.dot(probs)
    }

    /// Inverse via Gauss-Jordan elimination; `None` when numerically singular
    pub fn try_inverse(&self) -> Option<Array2<f64>> {
        invert_matrix(&self.matrix)
    }

    /// 1-norm condition number estimate; `None` when numerically singular
    pub fn condition_number(&self) -> Option<f64> {
        let inverse = self.try_inverse()?;
        Some(norm_1(&self.matrix) * norm_1(&inverse))
    }
}

/// Max absolute column sum
pub(crate) fn norm_1(matrix: &Array2<f64>) -> f64 {
    let mut max = 0.0f64;
    for i in 0..matrix.ncols() {
        let sum: f64 = matrix.column(i).iter().map(|x| x.abs()).sum();
        max = max.max(sum);
    }
    max
}

/// Gauss-Jordan inversion with partial pivoting
pub(crate) fn invert_matrix(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let dim = matrix.nrows();
    let mut a = matrix.clone();
    let mut inv = Array2::<f64>::eye(dim);

    for col in 0..dim {
        let mut pivot = col;
        for row in (col + 1)..dim {
            if a[[row, col]].abs() > a[[pivot, col]].abs() {
                pivot = row;
            }
        }
        if a[[pivot, col]].abs() < PIVOT_EPSILON {
            return None;
        }
        if pivot != col {
            for j in 0..dim {
                a.swap([col, j], [pivot, j]);
                inv.swap([col, j], [pivot, j]);
            }
        }
        let scale = a[[col, col]];
        for j in 0..dim {
            a[[col, j]] /= scale;
            inv[[col, j]] /= scale;
        }
        for row in 0..dim {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..dim {
                a[[row, j]] -= factor * a[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn calibration_pair() -> Vec<FrequencyTable> {
        vec![
            FrequencyTable::from_counts(1, [(0, 950), (1, 50)]).unwrap(),
            FrequencyTable::from_counts(1, [(0, 100), (1, 900)]).unwrap(),
        ]
    }

    #[test]
    fn test_from_calibration() {
        let m = ConfusionMatrix::from_calibration(&calibration_pair()).unwrap();
        assert_eq!(m.n_bits(), 1);
        assert!((m.matrix()[[0, 0]] - 0.95).abs() < 1e-12);
        assert!((m.matrix()[[1, 0]] - 0.05).abs() < 1e-12);
        assert!((m.matrix()[[0, 1]] - 0.10).abs() < 1e-12);
        assert!((m.matrix()[[1, 1]] - 0.90).abs() < 1e-12);
    }

    #[test]
    fn test_zero_shot_calibration_rejected() {
        let tables = vec![
            FrequencyTable::from_counts(1, [(0, 100)]).unwrap(),
            FrequencyTable::from_counts(1, []).unwrap(),
        ];
        let err = ConfusionMatrix::from_calibration(&tables).unwrap_err();
        match err {
            MitigationError::InsufficientData { basis_state } => assert_eq!(basis_state, "1"),
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_from_labeled_calibration() {
        let tables = calibration_pair();
        let m = ConfusionMatrix::from_labeled_calibration([
            ("1", tables[1].clone()),
            ("0", tables[0].clone()),
        ])
        .unwrap();
        assert!((m.matrix()[[0, 0]] - 0.95).abs() < 1e-12);
        assert!((m.matrix()[[1, 1]] - 0.90).abs() < 1e-12);
    }

    #[test]
    fn test_labeled_calibration_missing_state() {
        let tables = calibration_pair();
        let err =
            ConfusionMatrix::from_labeled_calibration([("00", tables[0].clone())]).unwrap_err();
        assert!(matches!(err, MitigationError::InsufficientData { .. }));
    }

    #[test]
    fn test_labeled_calibration_duplicate_state() {
        let tables = calibration_pair();
        let err = ConfusionMatrix::from_labeled_calibration([
            ("0", tables[0].clone()),
            ("0", tables[1].clone()),
        ])
        .unwrap_err();
        assert!(matches!(err, MitigationError::MalformedFrequencyTable(_)));
    }

    #[test]
    fn test_wrong_table_count_rejected() {
        let tables = vec![FrequencyTable::from_counts(1, [(0, 1)]).unwrap(); 3];
        assert!(ConfusionMatrix::from_calibration(&tables).is_err());
    }

    #[test]
    fn test_column_drift_renormalized() {
        // columns sum to 1.0001: inside the corruption bound, renormalized
        let m = ConfusionMatrix::from_matrix(arr2(&[[0.9501, 0.10], [0.05, 0.9001]])).unwrap();
        for i in 0..2 {
            let sum: f64 = m.matrix().column(i).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_column_drift_corruption_rejected() {
        let err = ConfusionMatrix::from_matrix(arr2(&[[0.7, 0.10], [0.05, 0.90]])).unwrap_err();
        assert!(matches!(err, MitigationError::MalformedFrequencyTable(_)));
    }

    #[test]
    fn test_identity_and_flip_rates() {
        let id = ConfusionMatrix::identity(2);
        assert_eq!(id.dim(), 4);
        assert!((id.matrix()[[2, 2]] - 1.0).abs() < 1e-12);

        let m = ConfusionMatrix::from_flip_rates(0.1, 0.2);
        assert!((m.matrix()[[0, 0]] - 0.9).abs() < 1e-12);
        assert!((m.matrix()[[1, 0]] - 0.1).abs() < 1e-12);
        assert!((m.matrix()[[0, 1]] - 0.2).abs() < 1e-12);
        assert!((m.matrix()[[1, 1]] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_apply() {
        let m = ConfusionMatrix::from_flip_rates(0.1, 0.1);
        let noisy = m.apply(&arr1(&[1.0, 0.0]));
        assert!((noisy[0] - 0.9).abs() < 1e-12);
        assert!((noisy[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = ConfusionMatrix::from_calibration(&calibration_pair()).unwrap();
        let inv = m.try_inverse().unwrap();
        let product = m.matrix().dot(&inv);
        for j in 0..2 {
            for i in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product[[j, i]] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_matrix_detected() {
        let m = ConfusionMatrix::from_matrix(arr2(&[[0.5, 0.5], [0.5, 0.5]])).unwrap();
        assert!(m.try_inverse().is_none());
        assert!(m.condition_number().is_none());
    }

    #[test]
    fn test_condition_number() {
        let m = ConfusionMatrix::from_matrix(arr2(&[[0.6, 0.4], [0.4, 0.6]])).unwrap();
        // inverse is [[3, -2], [-2, 3]]: condition = 1 * 5
        assert!((m.condition_number().unwrap() - 5.0).abs() < 1e-9);
    }
}
