//! Simplex-constrained solvers for the maximum-likelihood-style correction
//!
//! The corrector talks to solvers through the [`SimplexSolver`] capability
//! trait, so the algorithm is swappable without touching the correction
//! contract. Two implementations ship:
//! - [`ProjectedGradient`]: monotone descent with backtracking steps and
//!   Euclidean projection onto the probability simplex; handles both
//!   distance metrics.
//! - [`IterativeBayes`]: multiplicative fixed-point updates for the
//!   negative-log-likelihood objective; iterates stay on the simplex by
//!   construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use ndarray::{Array1, Array2};

use crate::config::{
    DistanceMetric, MitigationConfig, DEFAULT_CONVERGENCE_TOLERANCE, DEFAULT_MAX_ITERATIONS,
};

/// Floor applied to model-predicted probabilities inside logarithms and
/// likelihood ratios
const PROBABILITY_FLOOR: f64 = 1e-300;

/// Max step halvings per projected-gradient iteration
const MAX_BACKTRACKS: usize = 60;

/// Sufficient-decrease coefficient for the backtracking line search
const ARMIJO_SIGMA: f64 = 1e-4;

// =============================================================================
// Problem Statement
// =============================================================================

/// One constrained correction instance: find the simplex point p minimizing
/// `D(response · p, target)`
#[derive(Clone, Copy)]
pub struct SimplexProblem<'a> {
    /// Response (confusion) matrix mapping true to observed probabilities
    pub response: &'a Array2<f64>,
    /// Observed noisy distribution
    pub target: &'a Array1<f64>,
    /// Distance being minimized
    pub metric: DistanceMetric,
}

impl<'a> SimplexProblem<'a> {
    pub fn new(
        response: &'a Array2<f64>,
        target: &'a Array1<f64>,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            response,
            target,
            metric,
        }
    }

    /// Objective value at `p`
    pub fn objective(&self, p: &Array1<f64>) -> f64 {
        let predicted = self.response.dot(p);
        match self.metric {
            DistanceMetric::SquaredL2 => predicted
                .iter()
                .zip(self.target.iter())
                .map(|(m, y)| (m - y) * (m - y))
                .sum(),
            DistanceMetric::NegLogLikelihood => predicted
                .iter()
                .zip(self.target.iter())
                .filter(|(_, &y)| y > 0.0)
                .map(|(&m, &y)| -y * m.max(PROBABILITY_FLOOR).ln())
                .sum(),
        }
    }

    /// Objective gradient at `p`
    pub fn gradient(&self, p: &Array1<f64>) -> Array1<f64> {
        let predicted = self.response.dot(p);
        match self.metric {
            DistanceMetric::SquaredL2 => {
                let residual = &predicted - self.target;
                self.response.t().dot(&residual) * 2.0
            }
            DistanceMetric::NegLogLikelihood => {
                let ratios = Array1::from_iter(
                    predicted
                        .iter()
                        .zip(self.target.iter())
                        .map(|(&m, &y)| y / m.max(PROBABILITY_FLOOR)),
                );
                self.response.t().dot(&ratios) * -1.0
            }
        }
    }
}

// =============================================================================
// Budget
// =============================================================================

/// Iteration, tolerance, wall-clock and cancellation limits for one solve
#[derive(Debug, Clone, Default)]
pub struct SolverBudget {
    /// Stop when the objective decrease per iteration drops to this
    pub tolerance: f64,
    /// Hard iteration cap
    pub max_iterations: usize,
    /// Optional wall-clock limit
    pub timeout: Option<Duration>,
    /// Optional cooperative cancellation flag, checked every iteration
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SolverBudget {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            timeout: None,
            cancel: None,
        }
    }

    pub fn from_config(config: &MitigationConfig) -> Self {
        Self::new(config.convergence_tolerance, config.max_iterations)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Reason to stop early, if any
    fn interrupted(&self, start: Instant) -> Option<&'static str> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Some("cancelled");
            }
        }
        if let Some(limit) = self.timeout {
            if start.elapsed() >= limit {
                return Some("timed out");
            }
        }
        None
    }
}

/// Default budget from the crate-wide constants
pub fn default_budget() -> SolverBudget {
    SolverBudget::new(DEFAULT_CONVERGENCE_TOLERANCE, DEFAULT_MAX_ITERATIONS)
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of one constrained solve, converged or not
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// Best simplex point found
    pub probabilities: Array1<f64>,
    /// Objective at the best point
    pub objective: f64,
    /// Iterations consumed
    pub iterations: usize,
    /// Last per-iteration objective decrease
    pub residual: f64,
    /// Whether the tolerance was reached within budget
    pub converged: bool,
    /// Stop reason
    pub message: String,
}

// =============================================================================
// Solver Trait
// =============================================================================

/// A constrained convex solver over the probability simplex
pub trait SimplexSolver: Send + Sync {
    /// Algorithm name for diagnostics
    fn name(&self) -> &'static str;

    /// Minimize the problem objective starting from `init`, within `budget`
    fn solve(&self, problem: &SimplexProblem, init: &Array1<f64>, budget: &SolverBudget)
        -> SolveOutcome;
}

/// Default solver for a metric: projected gradient for squared-L2,
/// iterative Bayes for negative log-likelihood
pub fn default_solver(metric: DistanceMetric) -> Box<dyn SimplexSolver> {
    match metric {
        DistanceMetric::SquaredL2 => Box::new(ProjectedGradient),
        DistanceMetric::NegLogLikelihood => Box::new(IterativeBayes),
    }
}

// =============================================================================
// Projected Gradient
// =============================================================================

/// Monotone projected-gradient descent with backtracking line search
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectedGradient;

impl SimplexSolver for ProjectedGradient {
    fn name(&self) -> &'static str {
        "projected-gradient"
    }

    fn solve(
        &self,
        problem: &SimplexProblem,
        init: &Array1<f64>,
        budget: &SolverBudget,
    ) -> SolveOutcome {
        let start = Instant::now();
        let mut p = init.clone();
        project_onto_simplex(&mut p);
        let mut objective = problem.objective(&p);
        let mut residual = f64::INFINITY;
        let mut step = 1.0f64;
        let mut iterations = 0usize;
        let mut converged = false;
        let mut message = String::from("iteration budget exhausted");

        while iterations < budget.max_iterations {
            if let Some(reason) = budget.interrupted(start) {
                message = reason.to_string();
                break;
            }
            iterations += 1;
            let gradient = problem.gradient(&p);

            let mut accepted = false;
            for _ in 0..MAX_BACKTRACKS {
                let mut candidate = &p - &(&gradient * step);
                project_onto_simplex(&mut candidate);
                let candidate_objective = problem.objective(&candidate);
                // sufficient decrease relative to the projected movement;
                // plain non-increase would accept equal-objective
                // reflections and stall at a wrong point
                let movement: f64 = candidate
                    .iter()
                    .zip(p.iter())
                    .map(|(c, x)| (c - x) * (c - x))
                    .sum();
                if candidate_objective <= objective - ARMIJO_SIGMA * movement / step {
                    residual = objective - candidate_objective;
                    p = candidate;
                    objective = candidate_objective;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                // no feasible descent direction left
                residual = 0.0;
                converged = true;
                message = "stationary point reached".to_string();
                break;
            }
            step *= 1.5;
            if residual <= budget.tolerance {
                converged = true;
                message = "converged".to_string();
                break;
            }
        }

        debug!(
            "projected gradient: {} after {iterations} iterations (objective {objective:.3e})",
            message
        );
        SolveOutcome {
            probabilities: p,
            objective,
            iterations,
            residual,
            converged,
            message,
        }
    }
}

// =============================================================================
// Iterative Bayes
// =============================================================================

/// Multiplicative fixed-point iteration for the negative-log-likelihood
/// objective (iterative proportional fitting family). The metric on the
/// problem is ignored: this solver always targets the likelihood optimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterativeBayes;

impl SimplexSolver for IterativeBayes {
    fn name(&self) -> &'static str {
        "iterative-bayes"
    }

    fn solve(
        &self,
        problem: &SimplexProblem,
        init: &Array1<f64>,
        budget: &SolverBudget,
    ) -> SolveOutcome {
        let likelihood = SimplexProblem::new(
            problem.response,
            problem.target,
            DistanceMetric::NegLogLikelihood,
        );
        let start = Instant::now();

        // multiplicative updates cannot leave a zero entry, so start interior
        let mut p = init.mapv(|x| x.max(1e-12));
        let total = p.sum();
        p.mapv_inplace(|x| x / total);

        let mut objective = likelihood.objective(&p);
        let mut residual = f64::INFINITY;
        let mut iterations = 0usize;
        let mut converged = false;
        let mut message = String::from("iteration budget exhausted");

        while iterations < budget.max_iterations {
            if let Some(reason) = budget.interrupted(start) {
                message = reason.to_string();
                break;
            }
            iterations += 1;

            let predicted = likelihood.response.dot(&p);
            let ratios = Array1::from_iter(
                predicted
                    .iter()
                    .zip(likelihood.target.iter())
                    .map(|(&m, &y)| y / m.max(PROBABILITY_FLOOR)),
            );
            let factors = likelihood.response.t().dot(&ratios);
            p = &p * &factors;
            let total = p.sum();
            if total > 0.0 {
                p.mapv_inplace(|x| x / total);
            }

            let updated = likelihood.objective(&p);
            residual = (objective - updated).abs();
            objective = updated;
            if residual <= budget.tolerance {
                converged = true;
                message = "converged".to_string();
                break;
            }
        }

        debug!(
            "iterative bayes: {} after {iterations} iterations (objective {objective:.3e})",
            message
        );
        SolveOutcome {
            probabilities: p,
            objective,
            iterations,
            residual,
            converged,
            message,
        }
    }
}

// =============================================================================
// Simplex Projection
// =============================================================================

/// Euclidean projection onto the probability simplex, in place.
///
/// Sort-and-shift algorithm: find the largest prefix of the descending
/// sorted entries whose uniform shift keeps them positive, subtract that
/// shift, clamp the rest to zero.
pub fn project_onto_simplex(vector: &mut Array1<f64>) {
    let mut sorted: Vec<f64> = vector.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut shift = 0.0;
    for (k, &entry) in sorted.iter().enumerate() {
        cumulative += entry;
        let candidate = (cumulative - 1.0) / (k + 1) as f64;
        if entry - candidate > 0.0 {
            shift = candidate;
        }
    }
    vector.mapv_inplace(|x| (x - shift).max(0.0));
}
