//! Statistical confidence bounds on empirical outcome distributions
//!
//! Concentration bound on the total-variation distance between an empirical
//! distribution over `A` outcomes estimated from `N` shots and the true
//! one: with probability at least `confidence`,
//! `TV(empirical, true) <= sqrt((ln(2^A - 2) - ln(1 - confidence)) / (2N))`,
//! with the `-2` term dropped for large alphabets where it is negligible.
//!
//! Callers use the bound to decide whether raw statistics are trustworthy
//! enough for unconstrained inversion (which amplifies statistical noise)
//! or whether the constrained correction is warranted.

use serde::{Deserialize, Serialize};

use crate::frequency::FrequencyTable;

/// Default confidence level for bounds
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Alphabets below this size keep the exact `2^A - 2` term
const SMALL_ALPHABET_CUTOFF: usize = 16;

/// TV bounds below this are tight enough for unconstrained inversion
const UNCONSTRAINED_TV_CUTOFF: f64 = 0.01;

/// Upper bound on the total-variation distance between the empirical
/// distribution and the truth, violated with probability at most
/// `failure_probability`.
pub fn statistical_error_bound(
    n_outcomes: usize,
    n_samples: u64,
    failure_probability: f64,
) -> f64 {
    if n_samples == 0 {
        return f64::INFINITY;
    }
    let delta = failure_probability.clamp(1e-12, 1.0 - 1e-12);
    let samples = n_samples as f64;
    if n_outcomes < SMALL_ALPHABET_CUTOFF {
        // the -2 term is not negligible for small alphabets
        let events = (2.0f64.powi(n_outcomes as i32) - 2.0).max(1.0);
        ((events.ln() - delta.ln()) / (2.0 * samples)).sqrt()
    } else {
        ((n_outcomes as f64 * 2.0f64.ln() - delta.ln()) / (2.0 * samples)).sqrt()
    }
}

/// Confidence bound attached to one frequency table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBound {
    /// Upper bound on TV distance to the true distribution
    pub tv_bound: f64,
    /// Probability with which the bound holds
    pub confidence: f64,
    /// Shots behind the estimate
    pub n_shots: u64,
    /// Alphabet size
    pub n_outcomes: usize,
}

impl ConfidenceBound {
    /// Whether statistics are tight enough to trust unconstrained inversion
    pub fn recommends_unconstrained(&self) -> bool {
        self.tv_bound < UNCONSTRAINED_TV_CUTOFF
    }

    /// Solver tolerance matched to the statistical noise floor: there is no
    /// point driving the objective far below the uncertainty of its input.
    pub fn suggested_tolerance(&self) -> f64 {
        (self.tv_bound * self.tv_bound).clamp(1e-12, 1e-4)
    }
}

/// Computes [`ConfidenceBound`]s at a fixed confidence level
#[derive(Debug, Clone, Copy)]
pub struct SampleComplexityEstimator {
    confidence: f64,
}

impl Default for SampleComplexityEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE)
    }
}

impl SampleComplexityEstimator {
    /// Estimator at the given confidence level (clamped inside (0, 1))
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(1e-12, 1.0 - 1e-12),
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Bound for an alphabet of `n_outcomes` estimated from `n_shots`
    pub fn bound(&self, n_outcomes: usize, n_shots: u64) -> f64 {
        statistical_error_bound(n_outcomes, n_shots, 1.0 - self.confidence)
    }

    /// Bound for one table's empirical distribution
    pub fn bound_for(&self, table: &FrequencyTable) -> ConfidenceBound {
        ConfidenceBound {
            tv_bound: self.bound(table.dim(), table.n_shots()),
            confidence: self.confidence,
            n_shots: table.n_shots(),
            n_outcomes: table.dim(),
        }
    }
}
