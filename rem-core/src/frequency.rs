//! Frequency tables over fixed-length bit-string outcomes
//!
//! [`FrequencyTable`] is the foundation type consumed by confusion matrix
//! builders and correctors: an immutable record of how many times each
//! outcome was observed. Outcome index convention: qubit `q` is bit
//! `(index >> q) & 1`, so rendered bit-strings put qubit `n-1` leftmost and
//! lexicographic string order equals index order.

use ndarray::Array1;
use rustc_hash::FxHashMap;

use crate::error::{MitigationError, Result};

/// Immutable table of observed outcome counts over an n-bit alphabet
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    /// Number of measured bits
    n_bits: usize,
    /// Total shots (sum of all counts)
    n_shots: u64,
    /// Sparse counts, outcome index -> count; zero counts are not stored
    counts: FxHashMap<usize, u64>,
}

impl FrequencyTable {
    /// Build a table from (outcome index, count) pairs.
    ///
    /// Duplicate outcomes are summed. Outcomes outside the n-bit alphabet
    /// are rejected.
    pub fn from_counts(
        n_bits: usize,
        counts: impl IntoIterator<Item = (usize, u64)>,
    ) -> Result<Self> {
        if n_bits == 0 || n_bits >= usize::BITS as usize {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "unsupported register width {n_bits}"
            )));
        }
        let dim = 1usize << n_bits;
        let mut map: FxHashMap<usize, u64> = FxHashMap::default();
        let mut n_shots: u64 = 0;
        for (outcome, count) in counts {
            if outcome >= dim {
                return Err(MitigationError::MalformedFrequencyTable(format!(
                    "outcome {outcome} outside {n_bits}-bit alphabet"
                )));
            }
            if count == 0 {
                continue;
            }
            *map.entry(outcome).or_insert(0) += count;
            n_shots += count;
        }
        Ok(Self {
            n_bits,
            n_shots,
            counts: map,
        })
    }

    /// Build a table from (bit-string label, count) pairs, e.g. `("01", 480)`.
    ///
    /// All labels must have the same length and contain only '0'/'1'.
    /// The leftmost character is qubit `n-1`.
    pub fn from_bitstring_counts<'a>(
        counts: impl IntoIterator<Item = (&'a str, u64)>,
    ) -> Result<Self> {
        let mut n_bits: Option<usize> = None;
        let mut indexed: Vec<(usize, u64)> = Vec::new();
        for (label, count) in counts {
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
            indexed.push((parse_bitstring(label)?, count));
        }
        let n_bits = n_bits.ok_or_else(|| {
            MitigationError::MalformedFrequencyTable("no outcome labels supplied".into())
        })?;
        Self::from_counts(n_bits, indexed)
    }

    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    pub fn n_shots(&self) -> u64 {
        self.n_shots
    }

    /// Alphabet size 2^n
    pub fn dim(&self) -> usize {
        1usize << self.n_bits
    }

    pub fn is_empty(&self) -> bool {
        self.n_shots == 0
    }

    /// Count for a specific outcome
    pub fn count(&self, outcome: usize) -> u64 {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    /// Empirical probability of a specific outcome
    pub fn probability(&self, outcome: usize) -> f64 {
        if self.n_shots == 0 {
            return 0.0;
        }
        self.count(outcome) as f64 / self.n_shots as f64
    }

    /// Sparse view of the stored counts
    pub fn counts(&self) -> &FxHashMap<usize, u64> {
        &self.counts
    }

    /// Dense empirical probability vector over the full alphabet
    pub fn to_probabilities(&self) -> Array1<f64> {
        let mut probs = Array1::zeros(self.dim());
        if self.n_shots == 0 {
            return probs;
        }
        let total = self.n_shots as f64;
        for (&outcome, &count) in &self.counts {
            probs[outcome] = count as f64 / total;
        }
        probs
    }

    /// Most frequent outcome and its count
    pub fn most_frequent(&self) -> Option<(usize, u64)> {
        self.counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(&outcome, &count)| (outcome, count))
    }

    /// Marginalize onto a subset of qubits.
    ///
    /// `qubits` must be distinct indices below `n_bits`; the marginal's local
    /// bit `t` is the t-th smallest index in `qubits` (the same local
    /// ordering clusters use).
    pub fn marginal(&self, qubits: &[usize]) -> Result<FrequencyTable> {
        let mut sorted = qubits.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != qubits.len() {
            return Err(MitigationError::MalformedFrequencyTable(
                "duplicate qubit index in marginal".into(),
            ));
        }
        if sorted.is_empty() || *sorted.last().unwrap() >= self.n_bits {
            return Err(MitigationError::MalformedFrequencyTable(format!(
                "marginal qubits {sorted:?} outside {}-bit register",
                self.n_bits
            )));
        }
        let mut marginal_counts: FxHashMap<usize, u64> = FxHashMap::default();
        for (&outcome, &count) in &self.counts {
            let mut local = 0usize;
            for (t, &q) in sorted.iter().enumerate() {
                local |= ((outcome >> q) & 1) << t;
            }
            *marginal_counts.entry(local).or_insert(0) += count;
        }
        FrequencyTable::from_counts(sorted.len(), marginal_counts)
    }

    /// Render an outcome index as a bit-string (qubit n-1 leftmost)
    pub fn bitstring(&self, outcome: usize) -> String {
        render_bitstring(outcome, self.n_bits)
    }
}

/// Parse a bit-string label into an outcome index (leftmost char is the
/// highest qubit)
pub(crate) fn parse_bitstring(label: &str) -> Result<usize> {
    if label.is_empty() || label.len() >= usize::BITS as usize {
        return Err(MitigationError::MalformedFrequencyTable(format!(
            "unsupported label width {}",
            label.len()
        )));
    }
    let mut index = 0usize;
    for ch in label.chars() {
        index <<= 1;
        match ch {
            '0' => {}
            '1' => index |= 1,
            _ => {
                return Err(MitigationError::MalformedFrequencyTable(format!(
                    "label '{label}' contains non-binary character '{ch}'"
                )));
            }
        }
    }
    Ok(index)
}

/// Render an outcome index as a bit-string of width `n_bits`
pub fn render_bitstring(outcome: usize, n_bits: usize) -> String {
    (0..n_bits)
        .rev()
        .map(|q| if (outcome >> q) & 1 == 1 { '1' } else { '0' })
        .collect()
}

/// Total-variation distance between two distributions: half the L1 norm
/// of their difference.
pub fn total_variation_distance(p: &Array1<f64>, q: &Array1<f64>) -> f64 {
    p.iter()
        .zip(q.iter())
        .map(|(a, b)| (a - b).abs())
        .sum::<f64>()
        / 2.0
}
