//! Cluster partitions of the measured qubit register
//!
//! A [`ClusterPartition`] assigns every qubit to exactly one cluster; each
//! cluster later owns one confusion matrix over its local outcome alphabet.
//! Cluster granularity is the accuracy/tractability dial of the whole
//! engine and is chosen by the caller, either explicitly or from an
//! externally estimated correlation matrix.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{MitigationError, Result};

/// Disjoint grouping of qubit indices covering `{0, .., n-1}` exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPartition {
    n_qubits: usize,
    /// Each cluster sorted ascending; clusters ordered by smallest member
    clusters: Vec<Vec<usize>>,
}

impl ClusterPartition {
    /// Validate an explicit grouping.
    ///
    /// Every qubit index in `0..n_qubits` must appear in exactly one
    /// cluster; gaps, overlaps and out-of-range indices are rejected.
    pub fn new(n_qubits: usize, clusters: Vec<Vec<usize>>) -> Result<Self> {
        if n_qubits == 0 {
            return Err(MitigationError::InvalidPartition(
                "register has no qubits".into(),
            ));
        }
        let mut seen = vec![false; n_qubits];
        for cluster in &clusters {
            if cluster.is_empty() {
                return Err(MitigationError::InvalidPartition("empty cluster".into()));
            }
            for &q in cluster {
                if q >= n_qubits {
                    return Err(MitigationError::InvalidPartition(format!(
                        "qubit index {q} outside register of {n_qubits} qubits"
                    )));
                }
                if seen[q] {
                    return Err(MitigationError::InvalidPartition(format!(
                        "qubit {q} assigned to more than one cluster"
                    )));
                }
                seen[q] = true;
            }
        }
        if let Some(missing) = seen.iter().position(|&covered| !covered) {
            return Err(MitigationError::InvalidPartition(format!(
                "qubit {missing} not assigned to any cluster"
            )));
        }
        // Cluster order is preserved: it is the composition order and must
        // stay aligned with the matrix list handed to the composer. Members
        // are sorted so local bit t is the t-th smallest qubit.
        let clusters: Vec<Vec<usize>> = clusters
            .into_iter()
            .map(|mut cluster| {
                cluster.sort_unstable();
                cluster
            })
            .collect();
        Ok(Self { n_qubits, clusters })
    }

    /// One single-qubit cluster per qubit: the uncorrelated-readout layout
    pub fn singletons(n_qubits: usize) -> Self {
        Self {
            n_qubits,
            clusters: (0..n_qubits).map(|q| vec![q]).collect(),
        }
    }

    /// Derive a partition from an externally estimated correlation matrix:
    /// qubit pairs with `|correlation| >= threshold` land in the same
    /// cluster (transitively).
    pub fn from_correlations(correlations: &Array2<f64>, threshold: f64) -> Result<Self> {
        let n_qubits = correlations.nrows();
        if n_qubits == 0 || correlations.ncols() != n_qubits {
            return Err(MitigationError::InvalidPartition(format!(
                "correlation matrix must be square and non-empty, got {}x{}",
                correlations.nrows(),
                correlations.ncols()
            )));
        }
        let mut parent: Vec<usize> = (0..n_qubits).collect();
        fn find(parent: &mut Vec<usize>, q: usize) -> usize {
            let mut root = q;
            while parent[root] != root {
                root = parent[root];
            }
            let mut cursor = q;
            while parent[cursor] != root {
                let next = parent[cursor];
                parent[cursor] = root;
                cursor = next;
            }
            root
        }
        for i in 0..n_qubits {
            for j in (i + 1)..n_qubits {
                let strength = correlations[[i, j]].abs().max(correlations[[j, i]].abs());
                if strength >= threshold {
                    let ri = find(&mut parent, i);
                    let rj = find(&mut parent, j);
                    if ri != rj {
                        parent[rj] = ri;
                    }
                }
            }
        }
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); n_qubits];
        for q in 0..n_qubits {
            let root = find(&mut parent, q);
            groups[root].push(q);
        }
        let clusters: Vec<Vec<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
        Self::new(n_qubits, clusters)
    }

    pub fn n_qubits(&self) -> usize {
        self.n_qubits
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Clusters in canonical order, members ascending
    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    /// Size of the largest cluster
    pub fn largest_cluster(&self) -> usize {
        self.clusters.iter().map(|c| c.len()).max().unwrap_or(0)
    }

    /// Extract the local outcome index of `cluster` from a full-register
    /// outcome: local bit `t` is the cluster's t-th (ascending) qubit.
    pub fn local_outcome(&self, cluster: usize, outcome: usize) -> usize {
        let mut local = 0usize;
        for (t, &q) in self.clusters[cluster].iter().enumerate() {
            local |= ((outcome >> q) & 1) << t;
        }
        local
    }
}
