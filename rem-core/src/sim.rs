//! Synthetic measurement data for tests and benchmarks
//!
//! The engine treats data acquisition as an external collaborator; this
//! module is the in-repo stand-in for it. A seeded [`ShotSampler`] draws
//! finite-shot [`FrequencyTable`]s from known distributions, and
//! [`ShotSampler::sample_calibration`] produces the per-basis-state
//! calibration runs a real device session would.

use rand::prelude::*;
use rand::SeedableRng;

use crate::confusion::ConfusionMatrix;
use crate::error::Result;
use crate::frequency::FrequencyTable;
use crate::model::NoiseModel;
use ndarray::Array1;
use rustc_hash::FxHashMap;

/// Seeded sampler of finite-shot outcome tables
#[derive(Debug)]
pub struct ShotSampler {
    rng: StdRng,
}

impl ShotSampler {
    /// Deterministic when seeded, entropy-seeded otherwise
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draw one outcome index from a probability vector
    pub fn sample_once(&mut self, probs: &Array1<f64>) -> usize {
        let roll: f64 = self.rng.gen();
        let mut cumulative = 0.0;
        for (outcome, &p) in probs.iter().enumerate() {
            cumulative += p;
            if roll < cumulative {
                return outcome;
            }
        }
        probs.len() - 1
    }

    /// Draw `n_shots` outcomes into a frequency table
    pub fn sample(&mut self, probs: &Array1<f64>, n_shots: u64) -> Result<FrequencyTable> {
        let n_bits = probs.len().trailing_zeros() as usize;
        let mut counts: FxHashMap<usize, u64> = FxHashMap::default();
        for _ in 0..n_shots {
            let outcome = self.sample_once(probs);
            *counts.entry(outcome).or_insert(0) += 1;
        }
        FrequencyTable::from_counts(n_bits, counts)
    }

    /// Simulate one calibration session for a subsystem: for each basis
    /// state, sample the corresponding column of the true confusion matrix.
    /// The returned tables feed [`ConfusionMatrix::from_calibration`].
    pub fn sample_calibration(
        &mut self,
        truth: &ConfusionMatrix,
        shots_per_state: u64,
    ) -> Result<Vec<FrequencyTable>> {
        let mut tables = Vec::with_capacity(truth.dim());
        for i in 0..truth.dim() {
            let column = truth.matrix().column(i).to_owned();
            tables.push(self.sample(&column, shots_per_state)?);
        }
        Ok(tables)
    }

    /// Simulate a noisy experiment: push the true distribution through the
    /// model, then sample finite shots from the result.
    pub fn sample_experiment(
        &mut self,
        model: &NoiseModel,
        truth: &Array1<f64>,
        n_shots: u64,
    ) -> Result<FrequencyTable> {
        let noisy = model.apply(truth);
        self.sample(&noisy, n_shots)
    }
}
